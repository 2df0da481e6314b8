//! mDNS/DNS-SD registrars. Advertises `<derived name>._flight_tech._tcp.local.` and browses the
//! same type, handing resolved `(name, address, port)` tuples to the engine.

use std::net::IpAddr;

use flight_core::{
    AdvertisementRegistrar, DiscoveredService, DiscoveryRegistrar, RegistrarError,
    ServiceFoundFn, ServiceLostFn,
};
use local_ip_address::local_ip;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::task::JoinHandle;

pub const SERVICE_TYPE: &str = "_flight_tech._tcp.local.";

/// TXT keys published alongside the port.
const TXT_LISTEN_PORT: &str = "listenport";
const TXT_AVAILABLE: &str = "available";

fn unavailable(e: impl std::fmt::Display) -> RegistrarError {
    RegistrarError::Unavailable(e.to_string())
}

/// Start the mDNS responder thread shared by the advertiser and the browser.
pub fn daemon() -> Result<ServiceDaemon, RegistrarError> {
    ServiceDaemon::new().map_err(unavailable)
}

pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    registered: Option<String>, // fullname
}

impl MdnsAdvertiser {
    pub fn new(daemon: ServiceDaemon) -> Self {
        Self {
            daemon,
            registered: None,
        }
    }
}

impl AdvertisementRegistrar for MdnsAdvertiser {
    fn register(&mut self, service_name: &str, port: u16) -> Result<(), RegistrarError> {
        if service_name.is_empty() {
            return Err(RegistrarError::Rejected("no identifier set".into()));
        }
        self.unregister();

        let ip = local_ip().map_err(unavailable)?;
        let host = format!("{service_name}.local.");
        let port_text = port.to_string();
        let properties = [(TXT_LISTEN_PORT, port_text.as_str()), (TXT_AVAILABLE, "visible")];
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            service_name,
            &host,
            &ip.to_string(),
            port,
            &properties[..],
        )
        .map_err(|e| RegistrarError::Rejected(e.to_string()))?;

        let fullname = info.get_fullname().to_string();
        self.daemon.register(info).map_err(unavailable)?;
        tracing::info!(%fullname, %ip, port, "mdns service registered");
        self.registered = Some(fullname);
        Ok(())
    }

    fn unregister(&mut self) {
        let Some(fullname) = self.registered.take() else {
            return;
        };
        match self.daemon.unregister(&fullname) {
            Ok(_) => tracing::info!(%fullname, "mdns service unregistered"),
            Err(e) => tracing::warn!(%fullname, error = %e, "mdns unregister failed"),
        }
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Browses [`SERVICE_TYPE`] on a Tokio task. Must be started inside a runtime.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    found: Option<ServiceFoundFn>,
    lost: Option<ServiceLostFn>,
    task: Option<JoinHandle<()>>,
}

impl MdnsBrowser {
    pub fn new(daemon: ServiceDaemon) -> Self {
        Self {
            daemon,
            found: None,
            lost: None,
            task: None,
        }
    }
}

impl DiscoveryRegistrar for MdnsBrowser {
    fn on_service_found(&mut self, callback: ServiceFoundFn) {
        self.found = Some(callback);
    }

    fn on_service_lost(&mut self, callback: ServiceLostFn) {
        self.lost = Some(callback);
    }

    fn start_discovery(&mut self) -> Result<(), RegistrarError> {
        self.stop_discovery();
        let receiver = self.daemon.browse(SERVICE_TYPE).map_err(unavailable)?;
        let found = self.found.clone();
        let lost = self.lost.clone();
        self.task = Some(tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let name = instance_name(info.get_fullname()).to_string();
                        let Some(address) = pick_address(
                            info.get_addresses().iter().map(|a| a.to_string()),
                        ) else {
                            tracing::debug!(%name, "resolved service without usable address");
                            continue;
                        };
                        let port = info
                            .get_property_val_str(TXT_LISTEN_PORT)
                            .and_then(|p| p.parse().ok())
                            .unwrap_or_else(|| info.get_port());
                        tracing::debug!(%name, %address, port, "mdns service resolved");
                        if let Some(found) = &found {
                            found(DiscoveredService { name, address, port });
                        }
                    }
                    ServiceEvent::ServiceRemoved(_ty, fullname) => {
                        let name = instance_name(&fullname);
                        tracing::debug!(name, "mdns service removed");
                        if let Some(lost) = &lost {
                            lost(name);
                        }
                    }
                    _ => {}
                }
            }
            tracing::debug!("mdns browse channel closed");
        }));
        tracing::info!(service_type = SERVICE_TYPE, "mdns browsing");
        Ok(())
    }

    fn stop_discovery(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = self.daemon.stop_browse(SERVICE_TYPE) {
            tracing::warn!(error = %e, "mdns stop_browse failed");
        }
        task.abort();
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        self.stop_discovery();
    }
}

/// `"4bf7ea._flight_tech._tcp.local."` -> `"4bf7ea"`.
fn instance_name(fullname: &str) -> &str {
    fullname.split('.').next().unwrap_or(fullname)
}

/// Prefer IPv4; scoped IPv6 literals that do not parse are skipped.
fn pick_address(candidates: impl Iterator<Item = String>) -> Option<IpAddr> {
    let parsed: Vec<IpAddr> = candidates.filter_map(|a| a.parse().ok()).collect();
    parsed
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| parsed.first())
        .copied()
}
