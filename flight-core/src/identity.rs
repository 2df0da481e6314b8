//! Service identity: hash-derived names for advertising and for filtering discovery results.

use chrono::Utc;
use sha2::{Digest, Sha256};

/// Prefix mixed into every derived name.
pub const NAME_PREFIX: &str = "POS";

/// Number of trailing hex characters kept from the digest. Fits the advertising
/// protocol's service-name limit.
pub const DERIVED_NAME_LEN: usize = 6;

/// Derive the advertised service name for `raw_identifier` in the month `year_month` (`YYYY-MM`).
///
/// SHA-256 over `"POS" + year_month + raw_identifier`, rendered as lowercase hex, keeping the
/// last six characters. The same inputs always give the same name, so two devices agree on it
/// without talking to each other, and the name rotates every month.
pub fn derive_name(raw_identifier: &str, year_month: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(NAME_PREFIX.as_bytes());
    hasher.update(year_month.as_bytes());
    hasher.update(raw_identifier.as_bytes());
    let hex = hex::encode(hasher.finalize());
    let start = hex.len().saturating_sub(DERIVED_NAME_LEN);
    hex[start..].to_string()
}

/// Source of the current UTC year-month.
pub trait Clock: Send + Sync {
    /// Current month as `YYYY-MM`, UTC.
    fn year_month(&self) -> String;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn year_month(&self) -> String {
        Utc::now().format("%Y-%m").to_string()
    }
}

/// Clock pinned to one month. Used by tests and by hosts that agree on a month out of band.
#[derive(Debug, Clone)]
pub struct FixedClock(String);

impl FixedClock {
    pub fn new(year_month: impl Into<String>) -> Self {
        FixedClock(year_month.into())
    }
}

impl Clock for FixedClock {
    fn year_month(&self) -> String {
        self.0.clone()
    }
}

/// This node's own identity and the identity it is searching for.
/// Derived names are only ever written together with their raw input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalIdentity {
    raw_identifier: String,
    derived_service_name: String,
    search_identifier: String,
    derived_search_name: String,
}

impl LocalIdentity {
    /// An empty `raw` clears the derived name.
    pub fn set_identifier(&mut self, raw: &str, year_month: &str) {
        self.raw_identifier = raw.to_string();
        self.derived_service_name = derive_if_set(raw, year_month);
    }

    /// An empty `raw` clears the derived name, so nothing matches the search.
    pub fn set_search_identifier(&mut self, raw: &str, year_month: &str) {
        self.search_identifier = raw.to_string();
        self.derived_search_name = derive_if_set(raw, year_month);
    }

    /// Recompute both derived names for a new month. Unset identifiers stay unset.
    pub fn refresh(&mut self, year_month: &str) {
        self.derived_service_name = derive_if_set(&self.raw_identifier, year_month);
        self.derived_search_name = derive_if_set(&self.search_identifier, year_month);
    }

    pub fn raw_identifier(&self) -> &str {
        &self.raw_identifier
    }

    pub fn derived_service_name(&self) -> &str {
        &self.derived_service_name
    }

    pub fn search_identifier(&self) -> &str {
        &self.search_identifier
    }

    pub fn derived_search_name(&self) -> &str {
        &self.derived_search_name
    }
}

fn derive_if_set(raw: &str, year_month: &str) -> String {
    if raw.is_empty() {
        String::new()
    } else {
        derive_name(raw, year_month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // sha256("POS2024-01P211199V00225") ends in ...ba524b
        assert_eq!(derive_name("P211199V00225", "2024-01"), "ba524b");
    }

    #[test]
    fn empty_identifier_still_hashes_prefix_and_month() {
        assert_eq!(derive_name("", "2024-01"), "ad292c");
    }

    #[test]
    fn deterministic_lowercase_six_chars() {
        for raw in ["alice", "bob", "", "ünïcødé", "a much longer identifier with spaces"] {
            let a = derive_name(raw, "2026-10");
            let b = derive_name(raw, "2026-10");
            assert_eq!(a, b);
            assert_eq!(a.len(), DERIVED_NAME_LEN);
            assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn month_rotates_name() {
        assert_ne!(derive_name("alice", "2026-10"), derive_name("alice", "2026-11"));
    }

    #[test]
    fn system_clock_format() {
        let ym = SystemClock.year_month();
        assert_eq!(ym.len(), 7);
        assert_eq!(&ym[4..5], "-");
        assert!(ym[..4].chars().all(|c| c.is_ascii_digit()));
        assert!(ym[5..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn identity_tracks_raw_input() {
        let mut id = LocalIdentity::default();
        id.set_identifier("alice", "2026-10");
        id.set_search_identifier("bob", "2026-10");
        assert_eq!(id.raw_identifier(), "alice");
        assert_eq!(id.derived_service_name(), "4bf7ea");
        assert_eq!(id.search_identifier(), "bob");
        assert_eq!(id.derived_search_name(), "f078d2");

        id.refresh("2026-11");
        assert_eq!(id.derived_service_name(), derive_name("alice", "2026-11"));
        assert_eq!(id.derived_search_name(), derive_name("bob", "2026-11"));
    }

    #[test]
    fn refresh_leaves_unset_names_empty() {
        let mut id = LocalIdentity::default();
        id.refresh("2026-10");
        assert_eq!(id.derived_service_name(), "");
        assert_eq!(id.derived_search_name(), "");
    }

    #[test]
    fn empty_identifier_is_unset_across_months() {
        let mut id = LocalIdentity::default();
        id.set_identifier("alice", "2026-10");
        id.set_search_identifier("bob", "2026-10");
        id.set_identifier("", "2026-10");
        id.set_search_identifier("", "2026-10");
        assert_eq!(id.derived_service_name(), "");
        assert_eq!(id.derived_search_name(), "");

        id.refresh("2026-11");
        assert_eq!(id.derived_service_name(), "");
        assert_eq!(id.derived_search_name(), "");

        id.set_identifier("alice", "2026-11");
        id.refresh("2026-12");
        assert_eq!(id.derived_service_name(), derive_name("alice", "2026-12"));
    }
}
