//! Listening-port allocation inside a shared range.
//!
//! Every node binds inside the same range, so a discovered peer that advertises a port outside
//! it is almost certainly an unrelated service and is dropped.

use rand::Rng;

/// Half-open port range `[low, high)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    low: u16,
    high: u16,
}

/// Default range, shared by all nodes unless configured otherwise.
pub const DEFAULT_PORT_RANGE: PortRange = PortRange {
    low: 10_000,
    high: 50_000,
};

impl PortRange {
    /// Requires `0 < low < high`.
    pub fn new(low: u16, high: u16) -> Result<Self, ConfigError> {
        if low == 0 || low >= high {
            return Err(ConfigError::InvalidPortRange { low, high });
        }
        Ok(PortRange { low, high })
    }

    pub fn low(&self) -> u16 {
        self.low
    }

    pub fn high(&self) -> u16 {
        self.high
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.low && port < self.high
    }

    /// Uniformly random port in the range.
    pub fn pick(&self) -> u16 {
        rand::thread_rng().gen_range(self.low..self.high)
    }
}

impl Default for PortRange {
    fn default() -> Self {
        DEFAULT_PORT_RANGE
    }
}

/// Pick a uniformly random port in `[low, high)`.
pub fn pick_port(low: u16, high: u16) -> Result<u16, ConfigError> {
    Ok(PortRange::new(low, high)?.pick())
}

/// Invalid engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid port range [{low}, {high}): need 0 < low < high")]
    InvalidPortRange { low: u16, high: u16 },
    #[error("dispatch concurrency must be at least 1")]
    ZeroConcurrency,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn picks_inside_range() {
        for _ in 0..10_000 {
            let p = pick_port(10_000, 50_000).unwrap();
            assert!((10_000..50_000).contains(&p));
        }
    }

    #[test]
    fn narrow_range_is_exact() {
        for _ in 0..100 {
            assert_eq!(pick_port(40_000, 40_001).unwrap(), 40_000);
        }
    }

    #[test]
    fn picks_vary() {
        let seen: HashSet<u16> = (0..1_000).map(|_| pick_port(10_000, 10_010).unwrap()).collect();
        assert!(seen.len() >= 2);
        assert!(seen.iter().all(|p| (10_000..10_010).contains(p)));
    }

    #[test]
    fn rejects_bad_ranges() {
        assert_eq!(
            pick_port(50_000, 10_000),
            Err(ConfigError::InvalidPortRange {
                low: 50_000,
                high: 10_000
            })
        );
        assert!(pick_port(5, 5).is_err());
        assert!(pick_port(0, 10).is_err());
    }

    #[test]
    fn contains_is_half_open() {
        let r = PortRange::new(10_000, 50_000).unwrap();
        assert!(r.contains(10_000));
        assert!(r.contains(49_999));
        assert!(!r.contains(50_000));
        assert!(!r.contains(9_999));
        assert_eq!(PortRange::default(), r);
    }
}
