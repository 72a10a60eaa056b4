//! Central index registry: active peers and their resource advertisements behind one lock.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::{PeerRecord, ResourceRecord};

/// `AddPeer` rejection: the port already belongs to another host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("port {port} already registered by {owner}")]
pub struct PortConflict {
    pub port: u16,
    pub owner: String,
}

#[derive(Default)]
struct Inner {
    peers: Vec<PeerRecord>,
    resources: Vec<ResourceRecord>,
}

/// Shared store of peers and advertisements. Every operation holds the single lock for its
/// whole critical section, so operations are linearizable with respect to each other.
/// Containers are never handed out; reads return owned snapshots in insertion order.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the vectors half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `host:port`. Returns `Ok(true)` if newly added, `Ok(false)` if already present,
    /// `Err` if another host owns `port`.
    pub fn add_peer(&self, host: &str, port: u16) -> Result<bool, PortConflict> {
        let mut inner = self.lock();
        if let Some(owner) = inner
            .peers
            .iter()
            .find(|p| p.port == port && p.host != host)
        {
            return Err(PortConflict {
                port,
                owner: owner.host.clone(),
            });
        }
        if inner.peers.iter().any(|p| p.host == host && p.port == port) {
            return Ok(false);
        }
        inner.peers.push(PeerRecord::new(host, port));
        Ok(true)
    }

    /// Advertise resource `id` at `host:port`. Re-adding the same `(id, host, port)` is a no-op
    /// (the first title wins). Returns whether a record was inserted.
    pub fn add_resource(&self, id: u32, title: &str, host: &str, port: u16) -> bool {
        let mut inner = self.lock();
        if inner
            .resources
            .iter()
            .any(|r| r.id == id && r.is_offered_by(host, port))
        {
            return false;
        }
        inner
            .resources
            .push(ResourceRecord::new(id, title, host, port));
        true
    }

    /// All advertisements of `id`. Empty means not found.
    pub fn lookup_resource(&self, id: u32) -> Vec<ResourceRecord> {
        self.lock()
            .resources
            .iter()
            .filter(|r| r.id == id)
            .cloned()
            .collect()
    }

    /// Every advertisement.
    pub fn list_all(&self) -> Vec<ResourceRecord> {
        self.lock().resources.clone()
    }

    /// Drop the peer and every advertisement it made. Returns the number of advertisements removed.
    pub fn remove_peer(&self, host: &str, port: u16) -> usize {
        let mut inner = self.lock();
        inner.peers.retain(|p| !(p.host == host && p.port == port));
        let before = inner.resources.len();
        inner.resources.retain(|r| !r.is_offered_by(host, port));
        before - inner.resources.len()
    }

    pub fn contains_peer(&self, host: &str, port: u16) -> bool {
        self.lock()
            .peers
            .iter()
            .any(|p| p.host == host && p.port == port)
    }

    pub fn peer_count(&self) -> usize {
        self.lock().peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn add_peer_is_idempotent() {
        let reg = Registry::new();
        assert_eq!(reg.add_peer("a", 5000), Ok(true));
        assert_eq!(reg.add_peer("a", 5000), Ok(false));
        assert_eq!(reg.peer_count(), 1);
    }

    #[test]
    fn port_owned_by_other_host_is_rejected() {
        let reg = Registry::new();
        reg.add_peer("a", 5000).unwrap();
        let err = reg.add_peer("b", 5000).unwrap_err();
        assert_eq!(err.owner, "a");
        assert_eq!(err.port, 5000);
        assert!(!reg.contains_peer("b", 5000));
        // Same host, other port is fine.
        assert_eq!(reg.add_peer("a", 5001), Ok(true));
    }

    #[test]
    fn add_then_lookup_dedups() {
        let reg = Registry::new();
        assert!(reg.add_resource(7, "Networking Basics", "a", 5000));
        assert!(!reg.add_resource(7, "Networking Basics", "a", 5000));
        let found = reg.lookup_resource(7);
        assert_eq!(
            found,
            vec![ResourceRecord::new(7, "Networking Basics", "a", 5000)]
        );
        assert!(reg.lookup_resource(8).is_empty());
    }

    #[test]
    fn same_id_from_many_peers_keeps_order() {
        let reg = Registry::new();
        reg.add_resource(7, "T", "a", 5000);
        reg.add_resource(9, "U", "a", 5000);
        reg.add_resource(7, "T", "b", 5001);
        let hosts: Vec<String> = reg.lookup_resource(7).into_iter().map(|r| r.host).collect();
        assert_eq!(hosts, vec!["a", "b"]);
        let ids: Vec<u32> = reg.list_all().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![7, 9, 7]);
    }

    #[test]
    fn remove_peer_cascades() {
        let reg = Registry::new();
        reg.add_peer("a", 5000).unwrap();
        reg.add_peer("b", 5001).unwrap();
        reg.add_resource(1, "only a", "a", 5000);
        reg.add_resource(2, "shared", "a", 5000);
        reg.add_resource(2, "shared", "b", 5001);
        assert_eq!(reg.remove_peer("a", 5000), 2);
        assert!(!reg.contains_peer("a", 5000));
        assert!(reg.lookup_resource(1).is_empty());
        assert_eq!(reg.lookup_resource(2).len(), 1);
        // The port is free for another host now.
        assert_eq!(reg.add_peer("c", 5000), Ok(true));
    }

    #[test]
    fn concurrent_adds_for_same_id() {
        let reg = Arc::new(Registry::new());
        let handles: Vec<_> = [("a", 5000u16), ("b", 5001u16)]
            .into_iter()
            .map(|(host, port)| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    reg.add_peer(host, port).unwrap();
                    reg.add_resource(7, "Shared", host, port)
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        let all = reg.list_all();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|r| r.is_offered_by("a", 5000)));
        assert!(all.iter().any(|r| r.is_offered_by("b", 5001)));
    }

    #[test]
    fn concurrent_port_claims_admit_one_host() {
        let reg = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.add_peer(&format!("host-{}", i), 6000).is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(reg.peer_count(), 1);
    }
}
