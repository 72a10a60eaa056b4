//! Client engine: requests to the central index over one long-lived connection, and
//! downloads from other peers' upload servers over one short-lived connection each.

use std::path::{Path, PathBuf};
use std::time::Duration;

use p2pci_core::protocol::PROTOCOL_VERSION;
use p2pci_core::stream::{self, WireError};
use p2pci_core::wire;
use p2pci_core::{rfc_file_name, Headers, ProtocolError, Request, ResourceRecord, StatusCode};
use tokio::io::{AsyncBufRead, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::catalog::LocalResource;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Wire(#[from] WireError),
    #[error("bad response: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("connection closed by remote")]
    Closed,
    #[error("request rejected: {} {reason}", status.code())]
    Rejected { status: StatusCode, reason: String },
    #[error("body truncated: expected {expected} bytes, got {received}")]
    Truncated { expected: u64, received: u64 },
}

/// Decoded index reply. Non-200 replies carry no records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub reason: String,
    pub records: Vec<ResourceRecord>,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn status_line(&self) -> String {
        format!("{} {} {}", PROTOCOL_VERSION, self.status.code(), self.reason)
    }
}

async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, ClientError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| ClientError::ConnectTimeout(format!("{}:{}", host, port)))??;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

async fn expect_line<R>(reader: &mut R) -> Result<String, ClientError>
where
    R: AsyncBufRead + Unpin,
{
    stream::read_line(reader).await?.ok_or(ClientError::Closed)
}

/// Read one index reply: status line, blank line, and for 200 the result lines up to a blank line.
/// An undecodable result line is reported only after the body is drained, so the stream stays in sync.
async fn read_reply<R>(reader: &mut R) -> Result<Reply, ClientError>
where
    R: AsyncBufRead + Unpin,
{
    let (status, reason) = wire::parse_status_line(&expect_line(reader).await?)?;
    expect_line(reader).await?;
    let mut records = Vec::new();
    let mut bad_line = None;
    if status.is_success() {
        loop {
            let line = expect_line(reader).await?;
            if line.trim().is_empty() {
                break;
            }
            match wire::decode_result_line(&line) {
                Ok(record) => records.push(record),
                Err(e) => bad_line = bad_line.or(Some(e)),
            }
        }
    }
    if let Some(e) = bad_line {
        return Err(e.into());
    }
    Ok(Reply {
        status,
        reason,
        records,
    })
}

/// Persistent connection to the central index. Requests are strictly sequential.
pub struct CiClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    host: String,
    upload_port: u16,
}

impl CiClient {
    /// Connect to the index at `server_host:server_port`. `host` and `upload_port` are what this
    /// peer advertises in every request.
    pub async fn connect(
        server_host: &str,
        server_port: u16,
        host: impl Into<String>,
        upload_port: u16,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let stream = connect(server_host, server_port, timeout).await?;
        tracing::info!(server = %format!("{}:{}", server_host, server_port), "connected to central index");
        let (r, w) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(r),
            writer: w,
            host: host.into(),
            upload_port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn upload_port(&self) -> u16 {
        self.upload_port
    }

    async fn request(&mut self, request: &Request) -> Result<Reply, ClientError> {
        self.writer
            .write_all(wire::encode_request(request).as_bytes())
            .await?;
        self.writer.flush().await?;
        read_reply(&mut self.reader).await
    }

    /// Advertise resource `id`. A 200 reply echoes the stored record.
    pub async fn add(&mut self, id: u32, title: &str) -> Result<Reply, ClientError> {
        let request = Request::Add {
            id,
            title: title.to_string(),
            host: self.host.clone(),
            port: self.upload_port,
        };
        self.request(&request).await
    }

    /// Peers offering resource `id`. 404 (or any other error status) yields no records.
    pub async fn lookup(&mut self, id: u32) -> Result<Reply, ClientError> {
        let request = Request::Lookup {
            id,
            host: self.host.clone(),
            port: self.upload_port,
            title: None,
        };
        self.request(&request).await
    }

    /// Every advertisement in the index.
    pub async fn list_all(&mut self) -> Result<Reply, ClientError> {
        let request = Request::ListAll {
            host: self.host.clone(),
            port: self.upload_port,
        };
        self.request(&request).await
    }

    /// Advertise every local resource. Returns how many the index accepted.
    pub async fn add_all(&mut self, resources: &[LocalResource]) -> Result<usize, ClientError> {
        let mut accepted = 0;
        for r in resources {
            let reply = self.add(r.id, &r.title).await?;
            if reply.is_success() {
                tracing::info!(id = r.id, title = %r.title, "registered local resource");
                accepted += 1;
            } else {
                tracing::warn!(id = r.id, status = %reply.status_line(), "index rejected local resource");
            }
        }
        Ok(accepted)
    }
}

/// A completed download.
#[derive(Debug)]
pub struct Download {
    pub path: PathBuf,
    pub bytes: u64,
    pub headers: Headers,
}

/// Fetches resources from other peers' upload servers into `dest_dir`.
#[derive(Debug, Clone)]
pub struct Downloader {
    host: String,
    os: String,
    dest_dir: PathBuf,
    connect_timeout: Duration,
}

impl Downloader {
    pub fn new(
        host: impl Into<String>,
        os: impl Into<String>,
        dest_dir: impl Into<PathBuf>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            os: os.into(),
            dest_dir: dest_dir.into(),
            connect_timeout,
        }
    }

    /// GET resource `id` from the upload server at `peer_host:peer_port` and save it as
    /// `<dest_dir>/rfc<id>.txt`. Reads exactly `Content-Length` bytes, or to EOF without one.
    pub async fn get(
        &self,
        id: u32,
        peer_host: &str,
        peer_port: u16,
    ) -> Result<Download, ClientError> {
        let stream = connect(peer_host, peer_port, self.connect_timeout).await?;
        let (r, mut w) = stream.into_split();
        let mut reader = BufReader::new(r);

        let request = Request::Get {
            id,
            host: self.host.clone(),
            os: self.os.clone(),
        };
        w.write_all(wire::encode_request(&request).as_bytes())
            .await?;
        w.flush().await?;

        let (status, reason) = wire::parse_status_line(&expect_line(&mut reader).await?)?;
        let block = stream::read_header_block(&mut reader).await?;
        if !status.is_success() {
            return Err(ClientError::Rejected { status, reason });
        }
        let headers = wire::parse_header_block(&block)?;
        let length = headers.content_length()?;

        let path = self.dest_dir.join(rfc_file_name(id));
        let partial = self.dest_dir.join(format!("{}.part", rfc_file_name(id)));
        let bytes = match receive_body(&mut reader, &partial, length).await {
            Ok(n) => n,
            Err(e) => {
                discard(&partial).await;
                return Err(e);
            }
        };
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            discard(&partial).await;
            return Err(e.into());
        }
        tracing::info!(id, peer = %format!("{}:{}", peer_host, peer_port), bytes, "downloaded resource");
        Ok(Download {
            path,
            bytes,
            headers,
        })
    }
}

async fn receive_body<R>(
    reader: &mut R,
    path: &Path,
    length: Option<u64>,
) -> Result<u64, ClientError>
where
    R: AsyncBufRead + Unpin,
{
    let mut file = tokio::fs::File::create(path).await?;
    let received = match length {
        Some(n) => stream::copy_exact(reader, &mut file, n).await?,
        None => stream::copy_to_end(reader, &mut file).await?,
    };
    file.flush().await?;
    match length {
        Some(expected) if received < expected => Err(ClientError::Truncated { expected, received }),
        _ => Ok(received),
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "cannot remove partial download");
        }
    }
}
