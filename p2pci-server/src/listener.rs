//! Accept loop: one task per connection, all sharing one registry. No connection limit.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use p2pci_core::Registry;
use tokio::net::TcpListener;

use crate::handler;

/// Pause after a failed accept (e.g. out of file descriptors) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bind the index listener.
pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "central index listening");
    Ok(listener)
}

/// Run the accept loop forever. Accept errors are logged and never stop the listener.
pub async fn run_server(listener: TcpListener, registry: Arc<Registry>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                tracing::info!(%remote, "connection accepted");
                let _ = stream.set_nodelay(true);
                tokio::spawn(handler::handle_connection(stream, remote, registry.clone()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
