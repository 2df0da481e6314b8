//! Peer directory: discovered peers keyed by service name.
//!
//! Mutators return whether anything changed so the session only notifies observers on real
//! updates. None of them fail: a name that is not present is simply ignored, because discovery
//! may report loss for peers we filtered out and a peer may vanish in the middle of a send.

use std::net::IpAddr;

use crate::ports::PortRange;

/// One discovered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    /// True only while a dispatch step holds an open socket to this peer.
    pub connected: bool,
    /// Last reply line, empty until the first successful exchange.
    pub last_reply: String,
}

/// Peers in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDirectory {
    range: PortRange,
    peers: Vec<PeerRecord>,
}

impl PeerDirectory {
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            peers: Vec::new(),
        }
    }

    /// Insert or refresh a resolved peer. Ports outside the shared range are ignored.
    pub fn upsert_discovered(&mut self, name: &str, address: IpAddr, port: u16) -> bool {
        if !self.range.contains(port) {
            tracing::debug!(name, port, "ignoring peer advertising out-of-range port");
            return false;
        }
        if let Some(peer) = self.find_mut(name) {
            if peer.address == address && peer.port == port {
                return false;
            }
            peer.address = address;
            peer.port = port;
            return true;
        }
        self.peers.push(PeerRecord {
            name: name.to_string(),
            address,
            port,
            connected: false,
            last_reply: String::new(),
        });
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p.name != name);
        self.peers.len() != before
    }

    pub fn mark_connected(&mut self, name: &str, connected: bool) -> bool {
        match self.find_mut(name) {
            Some(peer) if peer.connected != connected => {
                peer.connected = connected;
                true
            }
            _ => false,
        }
    }

    pub fn record_reply(&mut self, name: &str, reply: &str) -> bool {
        match self.find_mut(name) {
            Some(peer) => {
                peer.last_reply = reply.to_string();
                true
            }
            None => false,
        }
    }

    /// Clear every `connected` flag. Run once a send batch has finished.
    pub fn reset_connected(&mut self) -> bool {
        let mut changed = false;
        for peer in self.peers.iter_mut().filter(|p| p.connected) {
            peer.connected = false;
            changed = true;
        }
        changed
    }

    pub fn clear_all(&mut self) -> bool {
        let changed = !self.peers.is_empty();
        self.peers.clear();
        changed
    }

    pub fn get(&self, name: &str) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Owned copy in discovery order, used as a send batch.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.clone()
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut PeerRecord> {
        self.peers.iter_mut().find(|p| p.name == name)
    }
}
