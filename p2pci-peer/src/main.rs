// P2P-CI peer: upload server, index registration, interactive shell.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use p2pci_peer::{catalog, config, shell, upload, CiClient, Downloader, UploadContext};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("p2pci-peer {}", VERSION);
            return Ok(());
        }
    }

    // Logs go to stderr; stdout belongs to the shell.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load().context("invalid peer configuration")?;
    let host = cfg.advertised_host();
    let os = cfg.os_name();

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, cfg.upload_port));
        let listener = upload::bind(addr)
            .await
            .with_context(|| format!("cannot bind upload port {}", cfg.upload_port))?;
        let ctx = Arc::new(UploadContext {
            rfc_dir: cfg.rfc_dir.clone(),
            os: os.clone(),
        });
        tokio::spawn(upload::run_upload_server(listener, ctx));

        let mut client = CiClient::connect(
            &cfg.server_host,
            cfg.server_port,
            host.clone(),
            cfg.upload_port,
            cfg.connect_timeout(),
        )
        .await
        .context("cannot reach central index")?;

        let local = match catalog::scan(&cfg.rfc_dir) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(dir = %cfg.rfc_dir.display(), error = %e, "cannot scan resource directory");
                Vec::new()
            }
        };
        let accepted = client.add_all(&local).await?;
        tracing::info!(host = %host, found = local.len(), accepted, "local resources registered");

        let downloader = Downloader::new(host, os, cfg.rfc_dir.clone(), cfg.connect_timeout());
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        tokio::select! {
            r = shell::run_shell(stdin, &mut stdout, &mut client, &downloader) => r?,
            r = shutdown_signal() => r?,
        }
        tracing::info!("shutting down");
        Ok::<(), anyhow::Error>(())
    });
    // The stdin reader may still be parked on a blocking read.
    rt.shutdown_background();
    result
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
