//! Peers talking to a live central index and to each other's upload servers over loopback TCP.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use p2pci_core::protocol::PORT_CONFLICT_REASON;
use p2pci_core::{Registry, StatusCode};
use p2pci_peer::{shell, upload, CiClient, ClientError, Downloader, UploadContext};

const LOOPBACK: &str = "127.0.0.1";
const TIMEOUT: Duration = Duration::from_secs(5);

async fn start_index() -> SocketAddr {
    let listener = p2pci_server::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(p2pci_server::run_server(listener, Arc::new(Registry::new())));
    addr
}

async fn start_uploads(dir: &Path) -> u16 {
    let listener = upload::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let ctx = Arc::new(UploadContext {
        rfc_dir: dir.to_path_buf(),
        os: "TestOS".to_string(),
    });
    tokio::spawn(upload::run_upload_server(listener, ctx));
    port
}

async fn join(index: SocketAddr, host: &str, upload_port: u16) -> CiClient {
    CiClient::connect(LOOPBACK, index.port(), host, upload_port, TIMEOUT)
        .await
        .unwrap()
}

fn scratch(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("p2pci-{}-{}", tag, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[tokio::test]
async fn add_then_lookup_from_another_peer() {
    let index = start_index().await;
    let mut a = join(index, LOOPBACK, 6001).await;
    let mut b = join(index, LOOPBACK, 6002).await;

    let reply = a.add(7, "Networking Basics").await.unwrap();
    assert_eq!(reply.status, StatusCode::Ok);
    assert_eq!(reply.records.len(), 1);
    assert_eq!(reply.records[0].title, "Networking Basics");

    let reply = b.lookup(7).await.unwrap();
    assert!(reply.is_success());
    assert_eq!(reply.records.len(), 1);
    let record = &reply.records[0];
    assert_eq!(
        (record.id, record.title.as_str(), record.host.as_str(), record.port),
        (7, "Networking Basics", LOOPBACK, 6001)
    );

    let reply = b.lookup(8).await.unwrap();
    assert_eq!(reply.status, StatusCode::NotFound);
    assert!(reply.records.is_empty());
}

#[tokio::test]
async fn list_all_spans_peers() {
    let index = start_index().await;
    let mut a = join(index, LOOPBACK, 6011).await;
    let mut b = join(index, LOOPBACK, 6012).await;

    let empty = a.list_all().await.unwrap();
    assert_eq!(empty.status, StatusCode::NotFound);

    assert!(a.add(1, "First").await.unwrap().is_success());
    assert!(b.add(1, "First").await.unwrap().is_success());
    assert!(b.add(2, "Second Title").await.unwrap().is_success());
    // Re-adding the same advertisement does not duplicate it.
    assert!(b.add(2, "Second Title").await.unwrap().is_success());

    let all = a.list_all().await.unwrap();
    assert_eq!(all.status, StatusCode::Ok);
    let mut seen: Vec<(u32, u16)> = all.records.iter().map(|r| (r.id, r.port)).collect();
    seen.sort();
    assert_eq!(seen, vec![(1, 6011), (1, 6012), (2, 6012)]);
}

#[tokio::test]
async fn disconnect_removes_records() {
    let index = start_index().await;
    let mut a = join(index, LOOPBACK, 6021).await;
    let mut b = join(index, LOOPBACK, 6022).await;
    assert!(a.add(5, "Leaving Soon").await.unwrap().is_success());
    assert_eq!(b.lookup(5).await.unwrap().records.len(), 1);

    drop(a);
    let mut gone = false;
    for _ in 0..100 {
        if b.lookup(5).await.unwrap().status == StatusCode::NotFound {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "records of a disconnected peer must be removed");
}

#[tokio::test]
async fn port_conflict_closes_connection() {
    let index = start_index().await;
    let mut a = join(index, "host-a", 6031).await;
    let mut b = join(index, "host-b", 6031).await;
    assert!(a.add(3, "Owned").await.unwrap().is_success());

    let reply = b.add(3, "Stolen").await.unwrap();
    assert_eq!(reply.status, StatusCode::BadRequest);
    assert_eq!(reply.reason, PORT_CONFLICT_REASON);
    assert!(reply.records.is_empty());
    assert!(b.lookup(3).await.is_err());

    let owner = a.lookup(3).await.unwrap();
    assert_eq!(owner.records.len(), 1);
    assert_eq!(owner.records[0].host, "host-a");
}

#[tokio::test]
async fn get_downloads_exact_bytes() {
    let source = scratch("source");
    let dest = scratch("dest");
    let body = "Echo Protocol\n\nA host sends data and receives it back.\n".repeat(500);
    std::fs::write(source.join("rfc862.txt"), &body).unwrap();
    let port = start_uploads(&source).await;

    let downloader = Downloader::new(LOOPBACK, "TestOS", &dest, TIMEOUT);
    let download = downloader.get(862, LOOPBACK, port).await.unwrap();
    assert_eq!(download.path, dest.join("rfc862.txt"));
    assert_eq!(download.bytes, body.len() as u64);
    assert_eq!(
        download.headers.content_length().unwrap(),
        Some(body.len() as u64)
    );
    assert_eq!(download.headers.get("OS"), Some("TestOS"));
    assert_eq!(std::fs::read_to_string(&download.path).unwrap(), body);

    match downloader.get(863, LOOPBACK, port).await {
        Err(ClientError::Rejected { status, .. }) => assert_eq!(status, StatusCode::NotFound),
        other => panic!("expected 404, got {:?}", other),
    }
    assert!(!dest.join("rfc863.txt").exists());
    assert!(!dest.join("rfc863.txt.part").exists());

    std::fs::remove_dir_all(&source).unwrap();
    std::fs::remove_dir_all(&dest).unwrap();
}

#[tokio::test]
async fn get_from_closed_port_fails() {
    let dest = scratch("closed");
    let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    let downloader = Downloader::new(LOOPBACK, "TestOS", &dest, TIMEOUT);
    assert!(downloader.get(1, LOOPBACK, port).await.is_err());
    std::fs::remove_dir_all(&dest).unwrap();
}

#[tokio::test]
async fn scripted_shell_session() {
    let source = scratch("shell-src");
    let dest = scratch("shell-dest");
    std::fs::write(source.join("rfc9.txt"), "shell transfer body\n").unwrap();
    let upload_port = start_uploads(&source).await;
    let index = start_index().await;
    let mut client = join(index, LOOPBACK, upload_port).await;
    let downloader = Downloader::new(LOOPBACK, "TestOS", &dest, TIMEOUT);

    let script = format!(
        "add 9 Shell  Title\nlookup 9\n\nbogus\nGET 9 {} {}\nexit\nlist\n",
        LOOPBACK, upload_port
    );
    let mut output = Vec::new();
    shell::run_shell(script.as_bytes(), &mut output, &mut client, &downloader)
        .await
        .unwrap();
    let output = String::from_utf8(output).unwrap();

    let result_line = format!("RFC 9 Shell  Title {} {}", LOOPBACK, upload_port);
    assert_eq!(output.matches(&result_line).count(), 2, "{}", output);
    assert_eq!(output.matches("P2P-CI/1.0 200 OK").count(), 2, "{}", output);
    assert!(output.contains("unknown command"));
    assert!(output.contains("saved"));
    assert_eq!(
        std::fs::read_to_string(dest.join("rfc9.txt")).unwrap(),
        "shell transfer body\n"
    );

    std::fs::remove_dir_all(&source).unwrap();
    std::fs::remove_dir_all(&dest).unwrap();
}
