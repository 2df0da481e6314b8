//! Load config from file and environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use flight_core::CoreConfig;
use serde::Deserialize;

/// Daemon configuration. File: `$FLIGHT_CONFIG`, else ~/.config/flight/config.toml, else
/// /etc/flight/config.toml. Engine settings live under `[engine]`.
///
/// Env overrides: FLIGHT_PORT_RANGE_LOW, FLIGHT_PORT_RANGE_HIGH, FLIGHT_CONNECT_TIMEOUT_MS,
/// FLIGHT_READ_TIMEOUT_MS, FLIGHT_DISPATCH_CONCURRENCY.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Raw identifier to advertise under.
    #[serde(default)]
    pub identifier: Option<String>,
    /// Raw identifier of the peer to look for.
    #[serde(default)]
    pub search: Option<String>,
    /// Fixed listening port. Random from the engine range when unset.
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub engine: CoreConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Load config: defaults, then the config file (if any), then env vars.
///
/// An explicit path (flag or `$FLIGHT_CONFIG`) must exist. Of the default locations the first
/// existing one wins; none existing means defaults.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigFileError> {
    let from_env = std::env::var_os("FLIGHT_CONFIG").map(PathBuf::from);
    let mut c = match explicit.map(Path::to_path_buf).or(from_env) {
        Some(path) => read_file(&path)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(path) => read_file(&path)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c.engine, |key| std::env::var(key).ok());
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(home.join(".config/flight/config.toml"));
    }
    out.push(PathBuf::from("/etc/flight/config.toml"));
    out
}

fn read_file(path: &Path) -> Result<Config, ConfigFileError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let c = toml::from_str(&text).map_err(|source| ConfigFileError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "config loaded");
    Ok(c)
}

fn apply_env(engine: &mut CoreConfig, lookup: impl Fn(&str) -> Option<String>) {
    override_from(&lookup, "FLIGHT_PORT_RANGE_LOW", &mut engine.port_range_low);
    override_from(&lookup, "FLIGHT_PORT_RANGE_HIGH", &mut engine.port_range_high);
    override_from(&lookup, "FLIGHT_CONNECT_TIMEOUT_MS", &mut engine.connect_timeout_ms);
    override_from(&lookup, "FLIGHT_DISPATCH_CONCURRENCY", &mut engine.dispatch_concurrency);
    let mut read_timeout = 0u64;
    if override_from(&lookup, "FLIGHT_READ_TIMEOUT_MS", &mut read_timeout) {
        // 0 switches the deadline off.
        engine.read_timeout_ms = (read_timeout > 0).then_some(read_timeout);
    }
}

fn override_from<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) -> bool {
    let Some(raw) = lookup(key) else {
        return false;
    };
    match raw.trim().parse() {
        Ok(v) => {
            *target = v;
            true
        }
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            false
        }
    }
}
