//! Session controller: the host-facing API. Hosts feed it user actions; discovery events and
//! socket traffic reach the shared state through it.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::CoreConfig;
use crate::dispatch::{BatchReport, Dispatcher};
use crate::identity::{Clock, SystemClock};
use crate::listener::{BindError, ListenerService};
use crate::ports::{ConfigError, PortRange};
use crate::registrar::{AdvertisementRegistrar, DiscoveredService, DiscoveryRegistrar, RegistrarError};
use crate::state::{Session, SessionState};

/// Failures surfaced to the host. Per-peer network errors never get this far.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("listener: {0}")]
    Bind(#[from] BindError),
    #[error("advertisement: {0}")]
    Advertise(#[source] RegistrarError),
    #[error("discovery: {0}")]
    Discovery(#[source] RegistrarError),
}

/// Owns one node's session: listener, registrars and the state document.
pub struct SessionController {
    range: PortRange,
    clock: Arc<dyn Clock>,
    session: Session,
    listener: ListenerService,
    dispatcher: Dispatcher,
    advertiser: Box<dyn AdvertisementRegistrar>,
    discovery: Box<dyn DiscoveryRegistrar>,
}

impl SessionController {
    pub fn new(
        config: &CoreConfig,
        advertiser: Box<dyn AdvertisementRegistrar>,
        discovery: Box<dyn DiscoveryRegistrar>,
    ) -> Result<Self, SessionError> {
        Self::with_clock(config, Arc::new(SystemClock), advertiser, discovery)
    }

    pub fn with_clock(
        config: &CoreConfig,
        clock: Arc<dyn Clock>,
        advertiser: Box<dyn AdvertisementRegistrar>,
        discovery: Box<dyn DiscoveryRegistrar>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let range = config.port_range()?;
        let session = Session::new(SessionState::new(range));
        let listener = ListenerService::new(session.clone(), config.read_timeout());
        let dispatcher = Dispatcher::new(
            session.clone(),
            config.connect_timeout(),
            config.read_timeout(),
            config.dispatch_concurrency,
        );
        Ok(Self {
            range,
            clock,
            session,
            listener,
            dispatcher,
            advertiser,
            discovery,
        })
    }

    /// Shared handle to the state document.
    pub fn session(&self) -> Session {
        self.session.clone()
    }

    pub fn snapshot(&self) -> SessionState {
        self.session.snapshot()
    }

    /// Observer that wakes after every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    /// Bind the listener and advertise it. Without `port` one is picked from the range.
    /// Returns the listening port; if already broadcasting, returns the current one.
    ///
    /// If the advertisement is refused the listener is closed again and broadcasting stays off.
    pub async fn start_broadcast(&mut self, port: Option<u16>) -> Result<u16, SessionError> {
        if let Some(current) = self.listener.port() {
            return Ok(current);
        }
        self.refresh_identity();
        let requested = port.unwrap_or_else(|| self.range.pick());
        let bound = self.listener.start(requested).await?;

        let service_name = self
            .session
            .read(|s| s.identity.derived_service_name().to_string());
        if let Err(e) = self.advertiser.register(&service_name, bound) {
            tracing::warn!(error = %e, port = bound, "advertisement refused, closing listener");
            self.listener.stop().await;
            return Err(SessionError::Advertise(e));
        }

        self.session.update(|s| {
            s.broadcasting = true;
            s.listen_port = bound;
        });
        tracing::info!(service = %service_name, port = bound, "broadcasting");
        Ok(bound)
    }

    /// Stop listening and withdraw the advertisement. Safe to call at any time.
    pub async fn stop_broadcast(&mut self) {
        let was_running = self.listener.is_running();
        self.listener.stop().await;
        if was_running {
            self.advertiser.unregister();
        }
        self.session.modify(|s| {
            let changed = s.broadcasting || s.listen_port != 0;
            s.broadcasting = false;
            s.listen_port = 0;
            changed
        });
        if was_running {
            tracing::info!("broadcast stopped");
        }
    }

    /// Start discovery. Only advertisements whose name equals the current derived search name
    /// are admitted to the directory; lost advertisements are removed by name.
    pub fn start_search(&mut self) -> Result<(), SessionError> {
        if self.session.read(|s| s.searching) {
            return Ok(());
        }
        self.refresh_identity();

        let found_session = self.session.clone();
        self.discovery
            .on_service_found(Arc::new(move |service: DiscoveredService| {
                admit_discovered(&found_session, service);
            }));
        let lost_session = self.session.clone();
        self.discovery.on_service_lost(Arc::new(move |name: &str| {
            if lost_session.modify(|s| s.peers.remove(name)) {
                tracing::info!(peer = name, "peer lost");
            }
        }));

        self.discovery
            .start_discovery()
            .map_err(SessionError::Discovery)?;
        self.session.update(|s| s.searching = true);
        tracing::info!(
            target_name = %self.session.read(|s| s.identity.derived_search_name().to_string()),
            "searching"
        );
        Ok(())
    }

    /// Stop discovery and forget every peer.
    pub fn stop_search(&mut self) {
        if !self.session.read(|s| s.searching) {
            return;
        }
        self.discovery.stop_discovery();
        self.session.update(|s| {
            s.searching = false;
            s.peers.clear_all();
            s.selected_peer = None;
        });
        tracing::info!("search stopped");
    }

    /// Remember the peer the user picked. Connecting waits for the next [`send`](Self::send).
    pub fn on_peer_selected(&mut self, name: &str) {
        self.session.modify(|s| {
            if s.peers.get(name).is_none() {
                return false;
            }
            s.selected_peer = Some(name.to_string());
            true
        });
    }

    pub fn update_identifier(&mut self, raw: &str) {
        let year_month = self.clock.year_month();
        self.session
            .update(|s| s.identity.set_identifier(raw, &year_month));
    }

    pub fn update_search_identifier(&mut self, raw: &str) {
        let year_month = self.clock.year_month();
        self.session
            .update(|s| s.identity.set_search_identifier(raw, &year_month));
    }

    pub fn enter_message(&mut self, text: &str) {
        self.session
            .update(|s| s.pending_outbound_message = text.to_string());
    }

    /// Send the pending message to every peer known right now, on a background task.
    /// Must be called inside a Tokio runtime.
    pub fn send(&self) -> JoinHandle<BatchReport> {
        let (message, peers) = self
            .session
            .read(|s| (s.pending_outbound_message.clone(), s.peers.snapshot()));
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move { dispatcher.broadcast_message(&message, peers).await })
    }

    /// Stop searching and broadcasting.
    pub async fn shutdown(&mut self) {
        self.stop_search();
        self.stop_broadcast().await;
    }

    /// Re-derive names for the current month; identities rotate at month boundaries.
    fn refresh_identity(&self) {
        let year_month = self.clock.year_month();
        self.session.modify(|s| {
            let before = s.identity.clone();
            s.identity.refresh(&year_month);
            s.identity != before
        });
    }
}

fn admit_discovered(session: &Session, service: DiscoveredService) {
    let admitted = session.modify(|s| {
        if service.name != s.identity.derived_search_name() {
            return false;
        }
        s.peers
            .upsert_discovered(&service.name, service.address, service.port)
    });
    if admitted {
        tracing::info!(peer = %service.name, address = %service.address, port = service.port, "peer discovered");
    } else {
        tracing::trace!(name = %service.name, "advertisement filtered out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{derive_name, FixedClock};
    use crate::registrar::InProcessRegistry;
    use std::net::{IpAddr, Ipv4Addr};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn controller(registry: &InProcessRegistry) -> SessionController {
        SessionController::with_clock(
            &CoreConfig::default(),
            Arc::new(FixedClock::new("2026-10")),
            Box::new(registry.advertiser(LOCALHOST)),
            Box::new(registry.browser()),
        )
        .unwrap()
    }

    struct RefusingAdvertiser;

    impl AdvertisementRegistrar for RefusingAdvertiser {
        fn register(&mut self, _: &str, _: u16) -> Result<(), RegistrarError> {
            Err(RegistrarError::Unavailable("no wifi".into()))
        }
        fn unregister(&mut self) {}
    }

    #[test]
    fn bad_config_rejected() {
        let registry = InProcessRegistry::new();
        let config = CoreConfig {
            port_range_low: 9,
            port_range_high: 9,
            ..CoreConfig::default()
        };
        let res = SessionController::new(
            &config,
            Box::new(registry.advertiser(LOCALHOST)),
            Box::new(registry.browser()),
        );
        assert!(matches!(res, Err(SessionError::Config(_))));
    }

    #[test]
    fn identifiers_derive_immediately() {
        let registry = InProcessRegistry::new();
        let mut c = controller(&registry);
        c.update_identifier("alice");
        c.update_search_identifier("bob");
        let s = c.snapshot();
        assert_eq!(s.identity.raw_identifier(), "alice");
        assert_eq!(s.identity.derived_service_name(), "4bf7ea");
        assert_eq!(s.identity.derived_search_name(), "f078d2");
    }

    #[test]
    fn enter_message_sets_pending() {
        let registry = InProcessRegistry::new();
        let mut c = controller(&registry);
        c.enter_message("hello");
        assert_eq!(c.snapshot().pending_outbound_message, "hello");
    }

    #[tokio::test]
    async fn broadcast_lifecycle() {
        let registry = InProcessRegistry::new();
        let mut c = controller(&registry);
        c.update_identifier("alice");

        let port = c.start_broadcast(None).await.unwrap();
        assert!(PortRange::default().contains(port));
        let s = c.snapshot();
        assert!(s.broadcasting);
        assert_eq!(s.listen_port, port);
        assert_eq!(registry.services()[0].name, "4bf7ea");
        assert_eq!(registry.services()[0].port, port);

        assert_eq!(c.start_broadcast(None).await.unwrap(), port);

        c.stop_broadcast().await;
        let s = c.snapshot();
        assert!(!s.broadcasting);
        assert_eq!(s.listen_port, 0);
        assert!(registry.services().is_empty());
        c.stop_broadcast().await;
    }

    #[tokio::test]
    async fn refused_advertisement_rolls_back() {
        let registry = InProcessRegistry::new();
        let mut c = SessionController::with_clock(
            &CoreConfig::default(),
            Arc::new(FixedClock::new("2026-10")),
            Box::new(RefusingAdvertiser),
            Box::new(registry.browser()),
        )
        .unwrap();
        let res = c.start_broadcast(Some(0)).await;
        assert!(matches!(res, Err(SessionError::Advertise(_))));
        let s = c.snapshot();
        assert!(!s.broadcasting);
        assert_eq!(s.listen_port, 0);
    }

    #[test]
    fn search_filters_by_derived_name() {
        let registry = InProcessRegistry::new();
        let mut c = controller(&registry);
        c.update_search_identifier("bob");
        c.start_search().unwrap();
        assert!(c.snapshot().searching);

        registry.publish(DiscoveredService {
            name: derive_name("mallory", "2026-10"),
            address: LOCALHOST,
            port: 20_000,
        });
        assert!(c.snapshot().peers.is_empty());

        registry.publish(DiscoveredService {
            name: "f078d2".into(),
            address: LOCALHOST,
            port: 5,
        });
        assert!(c.snapshot().peers.is_empty());

        registry.publish(DiscoveredService {
            name: "f078d2".into(),
            address: LOCALHOST,
            port: 20_000,
        });
        assert_eq!(c.snapshot().peers.len(), 1);

        c.on_peer_selected("f078d2");
        assert_eq!(c.snapshot().selected_peer.as_deref(), Some("f078d2"));
        c.on_peer_selected("nobody");
        assert_eq!(c.snapshot().selected_peer.as_deref(), Some("f078d2"));

        registry.withdraw("someone-else");
        assert_eq!(c.snapshot().peers.len(), 1);
        registry.withdraw("f078d2");
        assert!(c.snapshot().peers.is_empty());
    }

    #[test]
    fn stop_search_clears_directory() {
        let registry = InProcessRegistry::new();
        let mut c = controller(&registry);
        c.update_search_identifier("bob");
        registry.publish(DiscoveredService {
            name: "f078d2".into(),
            address: LOCALHOST,
            port: 20_000,
        });
        c.start_search().unwrap();
        assert_eq!(c.snapshot().peers.len(), 1);

        c.stop_search();
        let s = c.snapshot();
        assert!(!s.searching);
        assert!(s.peers.is_empty());

        // Nothing arrives after stopping.
        registry.publish(DiscoveredService {
            name: "f078d2".into(),
            address: LOCALHOST,
            port: 20_001,
        });
        assert!(c.snapshot().peers.is_empty());
    }

    #[tokio::test]
    async fn send_with_no_peers_clears_pending() {
        let registry = InProcessRegistry::new();
        let mut c = controller(&registry);
        c.enter_message("hello");
        let report = c.send().await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(c.snapshot().pending_outbound_message, "");
    }
}
