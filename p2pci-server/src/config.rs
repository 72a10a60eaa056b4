//! Load config from file and environment.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Index server configuration. File: ~/.config/p2pci/server.toml or /etc/p2pci/server.toml.
/// Env overrides: P2PCI_BIND_ADDR, P2PCI_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listen address (default 0.0.0.0).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    /// Listen port (default 7734).
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_port() -> u16 {
    p2pci_core::DEFAULT_SERVER_PORT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(a) = var("P2PCI_BIND_ADDR").and_then(|s| s.parse::<IpAddr>().ok()) {
        c.bind_addr = a;
    }
    if let Some(p) = var("P2PCI_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.port = p;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/p2pci/server.toml"));
    }
    out.push(PathBuf::from("/etc/p2pci/server.toml"));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.port, 7734);
        assert_eq!(c.listen_addr().to_string(), "0.0.0.0:7734");
    }

    #[test]
    fn file_fields_and_unknown_keys() {
        let c: Config = toml::from_str("port = 9000").unwrap();
        assert_eq!(c.port, 9000);
        assert!(c.bind_addr.is_unspecified());
        assert!(toml::from_str::<Config>("prot = 9000").is_err());
    }

    #[test]
    fn env_overrides_skip_invalid_values() {
        let mut c = Config::default();
        apply_env(&mut c, |k| match k {
            "P2PCI_BIND_ADDR" => Some("127.0.0.1".into()),
            "P2PCI_PORT" => Some("not-a-port".into()),
            _ => None,
        });
        assert_eq!(c.listen_addr().to_string(), "127.0.0.1:7734");
    }
}
