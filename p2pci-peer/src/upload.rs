//! Upload server: answers one GET per connection with the bytes of a local resource file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use p2pci_core::protocol::CONTENT_TYPE_TEXT;
use p2pci_core::stream::{self, WireError};
use p2pci_core::wire::{
    self, HEADER_CONTENT_LENGTH, HEADER_CONTENT_TYPE, HEADER_DATE, HEADER_HOST,
    HEADER_LAST_MODIFIED, HEADER_OS,
};
use p2pci_core::{rfc_file_name, Headers, Method, ProtocolError, RequestHead, StatusCode, Target};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

const SERVED: &[Method] = &[Method::Get];
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// What the upload server needs to answer a request.
#[derive(Debug, Clone)]
pub struct UploadContext {
    /// Directory holding rfc<N>.txt files.
    pub rfc_dir: PathBuf,
    /// Value of the OS response header.
    pub os: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    /// Peer connected and left without a request.
    Closed,
    Rejected(StatusCode),
    Sent { id: u32, bytes: u64 },
}

pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "upload server listening");
    Ok(listener)
}

/// Accept loop. Each connection gets its own task and is closed after one response.
pub async fn run_upload_server(listener: TcpListener, ctx: Arc<UploadContext>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let _ = stream.set_nodelay(true);
                tokio::spawn(handle_upload(stream, remote, ctx.clone()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "upload accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Serve a single request on `stream`, then close it.
pub async fn handle_upload<S>(stream: S, remote: SocketAddr, ctx: Arc<UploadContext>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    match serve_one(&mut reader, &mut writer, &ctx).await {
        Ok(Outcome::Sent { id, bytes }) => tracing::info!(%remote, id, bytes, "upload served"),
        Ok(Outcome::Rejected(status)) => tracing::info!(%remote, %status, "upload rejected"),
        Ok(Outcome::Closed) => tracing::debug!(%remote, "closed without request"),
        Err(e) => tracing::warn!(%remote, error = %e, "upload failed"),
    }
    let _ = writer.shutdown().await;
}

async fn serve_one<R, W>(
    reader: &mut R,
    writer: &mut W,
    ctx: &UploadContext,
) -> Result<Outcome, WireError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let line = loop {
        match stream::read_line(reader).await? {
            None => return Ok(Outcome::Closed),
            Some(l) if l.trim().is_empty() => continue,
            Some(l) => break l,
        }
    };
    let head = RequestHead::parse(&line, SERVED);
    let block = stream::read_header_block(reader).await?;
    let id = match head.and_then(|h| requested_id(&h, &block)) {
        Ok(id) => id,
        Err(e) => {
            tracing::debug!(request = line.trim(), error = %e, "bad upload request");
            return reject(writer, StatusCode::BadRequest).await;
        }
    };

    let path = ctx.rfc_dir.join(rfc_file_name(id));
    let (mut file, meta) = match open_regular(&path).await {
        Ok(found) => found,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "resource not available");
            return reject(writer, StatusCode::NotFound).await;
        }
    };
    let length = meta.len();
    let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());

    let mut headers = Headers::new();
    headers.push(HEADER_DATE, httpdate::fmt_http_date(SystemTime::now()));
    headers.push(HEADER_OS, ctx.os.as_str());
    headers.push(HEADER_LAST_MODIFIED, httpdate::fmt_http_date(modified));
    headers.push(HEADER_CONTENT_LENGTH, length.to_string());
    headers.push(HEADER_CONTENT_TYPE, CONTENT_TYPE_TEXT);
    let status = StatusCode::Ok;
    writer
        .write_all(wire::encode_head(status, status.reason(), &headers).as_bytes())
        .await?;

    let bytes = stream::copy_exact(&mut file, writer, length).await?;
    writer.flush().await?;
    if bytes < length {
        tracing::warn!(path = %path.display(), expected = length, sent = bytes, "file shrank while sending");
    }
    Ok(Outcome::Sent { id, bytes })
}

/// Only `GET RFC <id>` with a Host header names a resource.
fn requested_id(head: &RequestHead, block: &[u8]) -> Result<u32, ProtocolError> {
    let Target::Resource(id) = head.target()? else {
        return Err(ProtocolError::Malformed("expected GET RFC <id> <version>"));
    };
    wire::parse_header_block(block)?.require(HEADER_HOST)?;
    Ok(id)
}

async fn open_regular(
    path: &std::path::Path,
) -> std::io::Result<(tokio::fs::File, std::fs::Metadata)> {
    let file = tokio::fs::File::open(path).await?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "not a regular file",
        ));
    }
    Ok((file, meta))
}

async fn reject<W>(writer: &mut W, status: StatusCode) -> Result<Outcome, WireError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(wire::encode_head(status, status.reason(), &Headers::new()).as_bytes())
        .await?;
    writer.flush().await?;
    Ok(Outcome::Rejected(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("p2pci-upload-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn context(dir: &std::path::Path) -> Arc<UploadContext> {
        Arc::new(UploadContext {
            rfc_dir: dir.to_path_buf(),
            os: "TestOS".to_string(),
        })
    }

    /// Send `request`, close the write side, and collect everything the server writes.
    async fn exchange(ctx: Arc<UploadContext>, request: &str) -> Vec<u8> {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(handle_upload(server, "127.0.0.1:1".parse().unwrap(), ctx));
        client.write_all(request.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap();
        out
    }

    fn split_head(raw: &[u8]) -> (String, &[u8]) {
        let end = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("end of head")
            + 4;
        (String::from_utf8(raw[..end].to_vec()).unwrap(), &raw[end..])
    }

    #[tokio::test]
    async fn serves_file_with_headers() {
        let dir = scratch_dir();
        let body = b"Requests for Comments\r\nline two\n\x00binary tail";
        std::fs::write(dir.join("rfc42.txt"), body).unwrap();

        let raw = exchange(
            context(&dir),
            "GET RFC 42 P2P-CI/1.0\r\nHost: peer-b\r\nOS: Linux\r\n\r\n",
        )
        .await;
        std::fs::remove_dir_all(&dir).unwrap();

        let (head, rest) = split_head(&raw);
        assert!(head.starts_with("P2P-CI/1.0 200 OK\r\n"));
        let block = &head.as_bytes()[head.find("\r\n").unwrap() + 2..];
        let headers = wire::parse_header_block(block).unwrap();
        assert_eq!(headers.get("OS"), Some("TestOS"));
        assert_eq!(headers.get("Content-Type"), Some("text/text"));
        assert_eq!(headers.content_length().unwrap(), Some(body.len() as u64));
        assert!(httpdate::parse_http_date(headers.get("Date").unwrap()).is_ok());
        assert!(httpdate::parse_http_date(headers.get("Last-Modified").unwrap()).is_ok());
        assert_eq!(rest, &body[..]);
    }

    #[tokio::test]
    async fn missing_file_is_404_without_body() {
        let dir = scratch_dir();
        let raw = exchange(context(&dir), "GET RFC 9 P2P-CI/1.0\r\nHost: peer-b\r\n\r\n").await;
        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(raw, b"P2P-CI/1.0 404 Not Found\r\n\r\n");
    }

    #[tokio::test]
    async fn directory_is_not_a_resource() {
        let dir = scratch_dir();
        std::fs::create_dir(dir.join("rfc5.txt")).unwrap();
        let raw = exchange(context(&dir), "GET RFC 5 P2P-CI/1.0\r\nHost: h\r\n\r\n").await;
        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(raw, b"P2P-CI/1.0 404 Not Found\r\n\r\n");
    }

    #[tokio::test]
    async fn bad_requests_are_400() {
        let dir = scratch_dir();
        std::fs::write(dir.join("rfc1.txt"), "x").unwrap();
        for request in [
            "LOOKUP RFC 1 P2P-CI/1.0\r\nHost: h\r\nPort: 1\r\n\r\n",
            "GET FILE 1 P2P-CI/1.0\r\nHost: h\r\n\r\n",
            "GET RFC 0 P2P-CI/1.0\r\nHost: h\r\n\r\n",
            "GET RFC 1 P2P-CI/2.0\r\nHost: h\r\n\r\n",
            "GET RFC 1 HTTP/1.1\r\nHost: h\r\n\r\n",
            "GET RFC 1 P2P-CI/1.0\r\nOS: Linux\r\n\r\n",
            "GET RFC\r\n\r\n",
        ] {
            let raw = exchange(context(&dir), request).await;
            assert_eq!(raw, b"P2P-CI/1.0 400 Bad Request\r\n\r\n", "{:?}", request);
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn silent_peer_gets_nothing() {
        let dir = scratch_dir();
        let raw = exchange(context(&dir), "").await;
        std::fs::remove_dir_all(&dir).unwrap();
        assert!(raw.is_empty());
    }
}
