//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Lowest upload port a peer may listen on.
pub const MIN_UPLOAD_PORT: u16 = 1024;

/// Peer configuration. File: ~/.config/p2pci/peer.toml or /etc/p2pci/peer.toml.
/// Env overrides: P2PCI_UPLOAD_PORT, P2PCI_SERVER_HOST, P2PCI_SERVER_PORT, P2PCI_RFC_DIR,
/// P2PCI_HOSTNAME.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Upload server port, advertised to the index (default 5678).
    #[serde(default = "default_upload_port")]
    pub upload_port: u16,
    /// Central index host (default 127.0.0.1).
    #[serde(default = "default_server_host")]
    pub server_host: String,
    /// Central index port (default 7734).
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Directory holding rfc<N>.txt files, served and downloaded into (default ".").
    #[serde(default = "default_rfc_dir")]
    pub rfc_dir: PathBuf,
    /// Host name advertised in requests (default: system host name).
    #[serde(default)]
    pub hostname: Option<String>,
    /// OS string sent in GET requests and file responses (default: running OS).
    #[serde(default)]
    pub os: Option<String>,
    /// Connect timeout for index and peer connections, in seconds (default 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_upload_port() -> u16 {
    5678
}
fn default_server_host() -> String {
    "127.0.0.1".to_string()
}
fn default_server_port() -> u16 {
    p2pci_core::DEFAULT_SERVER_PORT
}
fn default_rfc_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_port: default_upload_port(),
            server_host: default_server_host(),
            server_port: default_server_port(),
            rfc_dir: default_rfc_dir(),
            hostname: None,
            os: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("upload port {0} out of range {}-65535", MIN_UPLOAD_PORT)]
    UploadPort(u16),
    #[error("server port must be non-zero")]
    ServerPort,
    #[error("server host is empty")]
    ServerHost,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload_port < MIN_UPLOAD_PORT {
            return Err(ConfigError::UploadPort(self.upload_port));
        }
        if self.server_port == 0 {
            return Err(ConfigError::ServerPort);
        }
        if self.server_host.trim().is_empty() {
            return Err(ConfigError::ServerHost);
        }
        Ok(())
    }

    /// Host name to advertise: configured, else the system's, else "localhost".
    pub fn advertised_host(&self) -> String {
        self.hostname
            .clone()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(system_hostname)
    }

    pub fn os_name(&self) -> String {
        self.os
            .clone()
            .unwrap_or_else(|| std::env::consts::OS.to_string())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn system_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Load config: merge default, then config file (if present), then env vars. Then validate.
pub fn load() -> Result<Config, ConfigError> {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c.validate()?;
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("P2PCI_UPLOAD_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.upload_port = p;
    }
    if let Some(h) = var("P2PCI_SERVER_HOST") {
        c.server_host = h;
    }
    if let Some(p) = var("P2PCI_SERVER_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.server_port = p;
    }
    if let Some(d) = var("P2PCI_RFC_DIR") {
        c.rfc_dir = PathBuf::from(d);
    }
    if let Some(h) = var("P2PCI_HOSTNAME") {
        c.hostname = Some(h);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/p2pci/peer.toml"));
    }
    out.push(PathBuf::from("/etc/p2pci/peer.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => tracing::warn!(path = %p.display(), error = %e, "ignoring invalid config"),
                },
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "cannot read config"),
            }
            break;
        }
    }
    None
}
