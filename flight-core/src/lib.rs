//! Flight peer discovery and line-messaging engine.
//!
//! Nodes advertise a name derived from a raw identifier and the current month, discover peers
//! advertising the name they search for, and exchange one line per connection: a message goes
//! out, an acknowledgment comes back. Platform discovery is supplied by the host through the
//! traits in [`registrar`]; everything else runs on Tokio inside this crate.

pub mod config;
pub mod directory;
pub mod dispatch;
pub mod ffi;
pub mod identity;
pub mod listener;
pub mod ports;
pub mod registrar;
pub mod session;
pub mod state;
pub mod wire;

pub use config::CoreConfig;
pub use directory::{PeerDirectory, PeerRecord};
pub use dispatch::{BatchReport, DispatchError, Dispatcher};
pub use identity::{derive_name, Clock, FixedClock, LocalIdentity, SystemClock};
pub use listener::{BindError, ListenerService};
pub use ports::{pick_port, ConfigError, PortRange, DEFAULT_PORT_RANGE};
pub use registrar::{
    AdvertisementRegistrar, DiscoveredService, DiscoveryRegistrar, InProcessRegistry,
    RegistrarError, ServiceFoundFn, ServiceLostFn,
};
pub use session::{SessionController, SessionError};
pub use state::{Session, SessionState, DEFAULT_OUTBOUND_MESSAGE};
pub use wire::{ProtocolError, ACK_PREFIX, NO_RESPONSE};
