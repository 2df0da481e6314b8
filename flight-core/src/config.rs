//! Engine configuration. Hosts deserialize it from their own config source.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ports::{ConfigError, PortRange, DEFAULT_PORT_RANGE};

/// Engine settings shared by the listener, dispatcher and discovery filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    /// Lowest listening port, inclusive (default 10000).
    #[serde(default = "default_port_range_low")]
    pub port_range_low: u16,
    /// Highest listening port, exclusive (default 50000).
    #[serde(default = "default_port_range_high")]
    pub port_range_high: u16,
    /// Outbound connect timeout (default 5000 ms).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Deadline for reading one line. Unset means wait forever.
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    /// Peers contacted at once during a send. 1 visits them in order.
    #[serde(default = "default_dispatch_concurrency")]
    pub dispatch_concurrency: usize,
}

fn default_port_range_low() -> u16 {
    DEFAULT_PORT_RANGE.low()
}
fn default_port_range_high() -> u16 {
    DEFAULT_PORT_RANGE.high()
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_dispatch_concurrency() -> usize {
    1
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            port_range_low: default_port_range_low(),
            port_range_high: default_port_range_high(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: None,
            dispatch_concurrency: default_dispatch_concurrency(),
        }
    }
}

impl CoreConfig {
    pub fn port_range(&self) -> Result<PortRange, ConfigError> {
        PortRange::new(self.port_range_low, self.port_range_high)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Check every field; the session refuses to start on a bad config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.port_range()?;
        if self.dispatch_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }
}
