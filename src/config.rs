//! Configuration.
//!
//! `legato-broker` and `legato-demo` take their rendezvous socket paths from
//! CLI flags (with environment variable fallbacks, see [`crate::cli`]), but
//! a broker embedded in a larger application more often wants a config file
//! it can template and version alongside the rest of its deployment. This
//! is that file's schema.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_offers_socket() -> PathBuf {
    crate::broker::default_offers_path()
}

fn default_opens_socket() -> PathBuf {
    crate::broker::default_opens_path()
}

fn default_watchdog_timeout_ms() -> u64 {
    crate::watchdog::DEFAULT_TIMEOUT.as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_offers_socket")]
    pub offers_socket: PathBuf,
    #[serde(default = "default_opens_socket")]
    pub opens_socket: PathBuf,
    /// Default watchdog timeout, in milliseconds, for clients that don't
    /// register their own.
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,
    /// Per-app watchdog timeout overrides, in milliseconds.
    #[serde(default)]
    pub app_watchdog_timeouts_ms: std::collections::HashMap<String, u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            offers_socket: default_offers_socket(),
            opens_socket: default_opens_socket(),
            watchdog_timeout_ms: default_watchdog_timeout_ms(),
            app_watchdog_timeouts_ms: std::collections::HashMap::new(),
        }
    }
}

impl Config {
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    /// Load from a JSON file. Missing fields fall back to their defaults,
    /// so a config file only needs to name what it overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn apply_watchdog_defaults(&self, watchdog: &crate::watchdog::Watchdog) {
        for (app_id, ms) in &self.app_watchdog_timeouts_ms {
            watchdog.set_app_default_timeout(app_id.clone(), Duration::from_millis(*ms));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reports_an_error_rather_than_panicking() {
        let result = Config::load(Path::new("/nonexistent/legato.json"));
        assert!(result.is_err());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legato.json");
        std::fs::write(&path, r#"{"watchdog_timeout_ms": 5000}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.watchdog_timeout_ms, 5000);
        assert_eq!(config.opens_socket, default_opens_socket());
    }
}
