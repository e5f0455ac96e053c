//! Peer configuration (`§1` ambient stack).
//!
//! A plain struct with a [`Default`] impl and named presets, loadable from a
//! TOML file plus CLI overrides, following `sombra::db::config::Config`'s
//! shape (`wal_sync_mode`/`production()`/`balanced()` there; listener
//! address/timeouts/presets here).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PlasmaError, Result};

/// Runtime configuration for a peer process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the RPC server binds to, e.g. `"0.0.0.0:9000"`.
    pub listen_addr: String,
    /// This peer's externally reachable URL, advertised to others.
    pub advertise_url: String,
    /// Default wall-clock timeout for a top-level `query`, in milliseconds.
    pub query_timeout_ms: u64,
    /// Default per-remote-channel timeout at `receive` operators.
    pub remote_channel_timeout_ms: u64,
    /// Default hops-to-live budget for recursive/iterated plans.
    pub default_htl: u32,
    /// Bounded channel capacity between adjacent operator tasks.
    pub channel_capacity: usize,
    /// Optional path to a seed-file loaded into the in-memory graph adapter
    /// at startup.
    pub seed_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9000".into(),
            advertise_url: "plasma://127.0.0.1:9000".into(),
            query_timeout_ms: 30_000,
            remote_channel_timeout_ms: 5_000,
            default_htl: 16,
            channel_capacity: 64,
            seed_file: None,
        }
    }
}

impl Config {
    /// A preset tuned for low-latency local development: tight timeouts,
    /// small channels.
    pub fn development() -> Self {
        Self {
            query_timeout_ms: 5_000,
            remote_channel_timeout_ms: 1_000,
            channel_capacity: 16,
            ..Self::default()
        }
    }

    /// A preset tuned for production peers talking over slower links:
    /// generous timeouts, larger channel buffers.
    pub fn production() -> Self {
        Self {
            query_timeout_ms: 60_000,
            remote_channel_timeout_ms: 15_000,
            default_htl: 32,
            channel_capacity: 256,
            ..Self::default()
        }
    }

    /// Loads configuration from a TOML file, falling back to defaults for
    /// any field the file omits.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|err| PlasmaError::Io(format!("invalid config: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_from_default() {
        assert_ne!(Config::production().query_timeout_ms, Config::default().query_timeout_ms);
        assert_ne!(Config::development().channel_capacity, Config::production().channel_capacity);
    }

    #[test]
    fn load_missing_file_errors() {
        let result = Config::load(Path::new("/nonexistent/plasma.toml"));
        assert!(result.is_err());
    }
}
