//! Per-connection request loop of the central index.
//!
//! One cycle: await a request line, fail fast on shape/version, consume the header block,
//! validate, admit the requesting peer, dispatch to the registry, respond. The loop ends on
//! EOF, on a framing/transport error, or after answering a port conflict. Whatever ends it,
//! the last admitted peer of the connection is removed from the registry with its records.

use std::net::SocketAddr;
use std::sync::Arc;

use p2pci_core::protocol::PORT_CONFLICT_REASON;
use p2pci_core::stream::{self, WireError};
use p2pci_core::wire::{self, HEADER_HOST, HEADER_TITLE};
use p2pci_core::{
    Method, PeerRecord, ProtocolError, Registry, RequestHead, ResourceRecord, Response,
    StatusCode, Target,
};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Methods the index answers. GET goes to peers' upload servers.
const SERVED: &[Method] = &[Method::Add, Method::Lookup, Method::List];

/// Per-connection state. Only used to clean up when the connection ends.
#[derive(Debug, Default)]
pub struct Session {
    /// Last peer admitted on this connection.
    peer: Option<PeerRecord>,
}

impl Session {
    pub fn peer(&self) -> Option<&PeerRecord> {
        self.peer.as_ref()
    }
}

/// Outcome of one request cycle.
#[derive(Debug, PartialEq, Eq)]
enum Cycle {
    /// Peer closed the stream while we waited for a request line.
    Eof,
    /// Blank line between requests.
    Idle,
    Reply(Response),
    /// Reply, then close the connection.
    ReplyAndClose(Response),
}

/// A request whose line and headers passed validation.
struct Validated {
    method: Method,
    target: Target,
    host: String,
    port: u16,
    title: Option<String>,
}

impl Validated {
    fn new(head: &RequestHead, block: &[u8]) -> Result<Self, ProtocolError> {
        let target = head.target()?;
        let headers = wire::parse_header_block(block)?;
        let host = headers.require(HEADER_HOST)?.to_string();
        let port = headers.port()?;
        let title = match head.method {
            Method::Add => Some(headers.require(HEADER_TITLE)?.to_string()),
            _ => None,
        };
        Ok(Self {
            method: head.method,
            target,
            host,
            port,
            title,
        })
    }
}

/// Serve one connection until it ends, then drop the connection's peer from the registry.
pub async fn handle_connection<S>(stream: S, remote: SocketAddr, registry: Arc<Registry>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut session = Session::default();
    match serve(&mut reader, &mut writer, &registry, &mut session, remote).await {
        Ok(()) => tracing::info!(%remote, "connection closed"),
        Err(e) => tracing::warn!(%remote, error = %e, "connection ended"),
    }
    if let Some(peer) = session.peer.take() {
        let removed = registry.remove_peer(&peer.host, peer.port);
        tracing::info!(%remote, %peer, removed, "peer disconnected; records removed");
    }
}

/// Request loop. `Ok(())` on EOF or after a fatal rejection.
pub async fn serve<R, W>(
    reader: &mut R,
    writer: &mut W,
    registry: &Registry,
    session: &mut Session,
    remote: SocketAddr,
) -> Result<(), WireError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        match next_cycle(reader, registry, session, remote).await? {
            Cycle::Eof => return Ok(()),
            Cycle::Idle => continue,
            Cycle::Reply(response) => write_response(writer, &response).await?,
            Cycle::ReplyAndClose(response) => {
                write_response(writer, &response).await?;
                return Ok(());
            }
        }
    }
}

async fn next_cycle<R>(
    reader: &mut R,
    registry: &Registry,
    session: &mut Session,
    remote: SocketAddr,
) -> Result<Cycle, WireError>
where
    R: AsyncBufRead + Unpin,
{
    let line = match stream::read_line(reader).await? {
        Some(line) => line,
        None => return Ok(Cycle::Eof),
    };
    let line = line.trim();
    if line.is_empty() {
        return Ok(Cycle::Idle);
    }
    tracing::debug!(%remote, request = line, "request line");

    // Shape and version failures answer before the header block is read.
    let head = match RequestHead::parse(line, SERVED) {
        Ok(head) => head,
        Err(e) => {
            tracing::debug!(%remote, error = %e, "rejected request line");
            return Ok(Cycle::Reply(Response::error(e.status())));
        }
    };
    let block = stream::read_header_block(reader).await?;
    Ok(dispatch(&head, &block, registry, session, remote))
}

fn dispatch(
    head: &RequestHead,
    block: &[u8],
    registry: &Registry,
    session: &mut Session,
    remote: SocketAddr,
) -> Cycle {
    let req = match Validated::new(head, block) {
        Ok(req) => req,
        Err(e) => {
            tracing::debug!(%remote, error = %e, "rejected request");
            return Cycle::Reply(Response::error(e.status()));
        }
    };

    match registry.add_peer(&req.host, req.port) {
        Ok(true) => tracing::info!(%remote, host = %req.host, port = req.port, "peer registered"),
        Ok(false) => {}
        Err(conflict) => {
            tracing::warn!(%remote, host = %req.host, error = %conflict, "port conflict; closing");
            return Cycle::ReplyAndClose(Response::error_with_reason(
                StatusCode::BadRequest,
                PORT_CONFLICT_REASON,
            ));
        }
    }
    session.peer = Some(PeerRecord::new(req.host.clone(), req.port));

    let response = match (req.method, req.target, req.title) {
        (Method::Add, Target::Resource(id), Some(title)) => {
            if registry.add_resource(id, &title, &req.host, req.port) {
                tracing::info!(%remote, id, title = %title, host = %req.host, "resource added");
            }
            Response::ok(vec![ResourceRecord::new(id, title, req.host, req.port)])
        }
        (Method::Lookup, Target::Resource(id), _) => Response::found(registry.lookup_resource(id)),
        (Method::List, Target::All, _) => Response::found(registry.list_all()),
        _ => Response::error(StatusCode::BadRequest),
    };
    Cycle::Reply(response)
}

async fn write_response<W>(writer: &mut W, response: &Response) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(wire::encode_response(response).as_bytes())
        .await?;
    writer.flush().await?;
    Ok(())
}
