//! Session state document and the handle every component shares to read and mutate it.

use std::sync::Arc;

use tokio::sync::watch;

use crate::directory::PeerDirectory;
use crate::identity::LocalIdentity;
use crate::ports::PortRange;

/// Pending message a fresh session starts with.
pub const DEFAULT_OUTBOUND_MESSAGE: &str = "From Client";

/// Everything the UI layer observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub identity: LocalIdentity,
    pub peers: PeerDirectory,
    pub broadcasting: bool,
    pub searching: bool,
    /// Nonzero iff broadcasting with a bound listener.
    pub listen_port: u16,
    pub pending_outbound_message: String,
    pub last_received_message: String,
    /// Peer the user picked. Connecting is left to the next send.
    pub selected_peer: Option<String>,
}

impl SessionState {
    pub fn new(range: PortRange) -> Self {
        Self {
            identity: LocalIdentity::default(),
            peers: PeerDirectory::new(range),
            broadcasting: false,
            searching: false,
            listen_port: 0,
            pending_outbound_message: DEFAULT_OUTBOUND_MESSAGE.to_string(),
            last_received_message: String::new(),
            selected_peer: None,
        }
    }
}

/// Shared handle to one session's state.
///
/// All writers go through the same `watch` sender, which serializes them and wakes every
/// subscriber after each change. Never hold the guard from [`Session::read`] across a write.
#[derive(Clone)]
pub struct Session {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Session {
    pub fn new(state: SessionState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { tx: Arc::new(tx) }
    }

    /// Mutate and notify observers.
    pub fn update(&self, f: impl FnOnce(&mut SessionState)) {
        self.tx.send_modify(f);
    }

    /// Mutate; observers are only notified when `f` returns true.
    pub fn modify(&self, f: impl FnOnce(&mut SessionState) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    pub fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&self.tx.borrow())
    }

    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Receiver that sees every published state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("state", &*self.tx.borrow()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn session() -> Session {
        Session::new(SessionState::new(PortRange::default()))
    }

    #[test]
    fn fresh_state() {
        let s = session().snapshot();
        assert!(!s.broadcasting);
        assert!(!s.searching);
        assert_eq!(s.listen_port, 0);
        assert_eq!(s.pending_outbound_message, DEFAULT_OUTBOUND_MESSAGE);
        assert!(s.peers.is_empty());
    }

    #[test]
    fn clones_share_one_document() {
        let a = session();
        let b = a.clone();
        b.update(|s| s.last_received_message = "ping".into());
        assert_eq!(a.read(|s| s.last_received_message.clone()), "ping");
    }

    #[tokio::test]
    async fn subscribers_only_see_real_changes() {
        let s = session();
        let mut rx = s.subscribe();
        rx.borrow_and_update();

        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(!s.modify(|st| st.peers.upsert_discovered("aaaaaa", localhost, 1)));
        assert!(!rx.has_changed().unwrap());

        assert!(s.modify(|st| st.peers.upsert_discovered("aaaaaa", localhost, 20_000)));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().peers.len(), 1);
    }
}
