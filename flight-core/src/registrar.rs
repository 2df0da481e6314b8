//! Seams to the platform's service discovery: advertising our name, and hearing about others.
//!
//! The engine never speaks a discovery protocol itself. Hosts plug in mDNS, Wi-Fi Direct
//! DNS-SD or anything else that can resolve `(name, address, port)` tuples.
//! [`InProcessRegistry`] is a loopback implementation for tests and single-process setups.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

/// A resolved advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
}

/// Called for every resolved advertisement.
pub type ServiceFoundFn = Arc<dyn Fn(DiscoveredService) + Send + Sync>;
/// Called with the name of an advertisement that went away.
pub type ServiceLostFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Publishes this node's `(service_name, port)`.
pub trait AdvertisementRegistrar: Send {
    fn register(&mut self, service_name: &str, port: u16) -> Result<(), RegistrarError>;
    /// Withdraw the advertisement. No-op if nothing is registered.
    fn unregister(&mut self);
}

/// Browses for advertisements and reports them through the installed callbacks.
pub trait DiscoveryRegistrar: Send {
    fn on_service_found(&mut self, callback: ServiceFoundFn);
    fn on_service_lost(&mut self, callback: ServiceLostFn);
    fn start_discovery(&mut self) -> Result<(), RegistrarError>;
    /// No-op if not discovering.
    fn stop_discovery(&mut self);
}

/// Platform refused or could not perform a registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrarError {
    #[error("registration rejected: {0}")]
    Rejected(String),
    #[error("discovery service unavailable: {0}")]
    Unavailable(String),
}

// ── In-process registry ───────────────────────────────────────────────────────

struct Watcher {
    found: Option<ServiceFoundFn>,
    lost: Option<ServiceLostFn>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    services: Vec<DiscoveredService>,
    watchers: HashMap<u64, Watcher>,
}

/// Loopback discovery shared by every advertiser and browser created from it.
#[derive(Clone, Default)]
pub struct InProcessRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl InProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertiser that publishes under `address`.
    pub fn advertiser(&self, address: IpAddr) -> InProcessAdvertiser {
        InProcessAdvertiser {
            registry: self.clone(),
            address,
            registered: None,
        }
    }

    pub fn browser(&self) -> InProcessBrowser {
        InProcessBrowser {
            registry: self.clone(),
            found: None,
            lost: None,
            watch_id: None,
        }
    }

    /// Currently advertised services.
    pub fn services(&self) -> Vec<DiscoveredService> {
        self.lock().services.clone()
    }

    /// Publish directly, as if some other node had advertised. Watchers are notified.
    pub fn publish(&self, service: DiscoveredService) {
        let callbacks: Vec<ServiceFoundFn> = {
            let mut reg = self.lock();
            reg.services.retain(|s| s.name != service.name);
            reg.services.push(service.clone());
            reg.watchers.values().filter_map(|w| w.found.clone()).collect()
        };
        for found in callbacks {
            found(service.clone());
        }
    }

    /// Withdraw a service by name. Watchers are notified even if it was never published.
    pub fn withdraw(&self, name: &str) {
        let callbacks: Vec<ServiceLostFn> = {
            let mut reg = self.lock();
            reg.services.retain(|s| s.name != name);
            reg.watchers.values().filter_map(|w| w.lost.clone()).collect()
        };
        for lost in callbacks {
            lost(name);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        // Callbacks never run under this lock.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// [`AdvertisementRegistrar`] backed by an [`InProcessRegistry`].
pub struct InProcessAdvertiser {
    registry: InProcessRegistry,
    address: IpAddr,
    registered: Option<String>,
}

impl AdvertisementRegistrar for InProcessAdvertiser {
    fn register(&mut self, service_name: &str, port: u16) -> Result<(), RegistrarError> {
        if service_name.is_empty() {
            return Err(RegistrarError::Rejected("empty service name".into()));
        }
        self.unregister();
        self.registry.publish(DiscoveredService {
            name: service_name.to_string(),
            address: self.address,
            port,
        });
        self.registered = Some(service_name.to_string());
        Ok(())
    }

    fn unregister(&mut self) {
        if let Some(name) = self.registered.take() {
            self.registry.withdraw(&name);
        }
    }
}

/// [`DiscoveryRegistrar`] backed by an [`InProcessRegistry`].
pub struct InProcessBrowser {
    registry: InProcessRegistry,
    found: Option<ServiceFoundFn>,
    lost: Option<ServiceLostFn>,
    watch_id: Option<u64>,
}

impl DiscoveryRegistrar for InProcessBrowser {
    fn on_service_found(&mut self, callback: ServiceFoundFn) {
        self.found = Some(callback);
    }

    fn on_service_lost(&mut self, callback: ServiceLostFn) {
        self.lost = Some(callback);
    }

    /// Replays everything already advertised, then follows live changes.
    fn start_discovery(&mut self) -> Result<(), RegistrarError> {
        self.stop_discovery();
        let existing = {
            let mut reg = self.registry.lock();
            let id = reg.next_id;
            reg.next_id += 1;
            reg.watchers.insert(
                id,
                Watcher {
                    found: self.found.clone(),
                    lost: self.lost.clone(),
                },
            );
            self.watch_id = Some(id);
            reg.services.clone()
        };
        if let Some(found) = &self.found {
            for service in existing {
                found(service);
            }
        }
        Ok(())
    }

    fn stop_discovery(&mut self) {
        if let Some(id) = self.watch_id.take() {
            self.registry.lock().watchers.remove(&id);
        }
    }
}

impl Drop for InProcessBrowser {
    fn drop(&mut self) {
        self.stop_discovery();
    }
}

impl Drop for InProcessAdvertiser {
    fn drop(&mut self) {
        self.unregister();
    }
}
