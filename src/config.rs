//! Connector configuration.
//!
//! Loads from `config.toml` at the project root. Transport and
//! reconciliation parameters are runtime-configurable - no recompilation
//! needed. Credentials come from the environment, never from the file.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::core::{Error, Result};
use crate::orders::GuardPolicy;
use crate::session::SessionConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorConfig {
    /// Normalized instruments to stream, e.g. ["BTC-ZAR", "ETH-ZAR"].
    #[serde(default = "default_instruments")]
    pub instruments: Vec<String>,

    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_market_ws_url")]
    pub market_ws_url: String,
    #[serde(default = "default_account_ws_url")]
    pub account_ws_url: String,

    /// Keepalive ping interval (the venue expects one every ~30s).
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    #[serde(default = "default_healthy_after_secs")]
    pub healthy_after_secs: u64,
    /// Consecutive abnormal failures before a channel reports degraded.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_recovery_delay_secs")]
    pub recovery_delay_secs: u64,

    /// Minimum order age before absence from the open-orders list may infer
    /// cancellation. Policy constant - calibrate against observed venue lag.
    #[serde(default = "default_reconcile_grace_ms")]
    pub reconcile_grace_ms: u64,
    /// Authoritative-event quiet window vetoing inferred cancellation.
    #[serde(default = "default_status_quiet_ms")]
    pub status_quiet_ms: u64,
    /// Terminal order retention before eviction.
    #[serde(default = "default_eviction_delay_secs")]
    pub eviction_delay_secs: u64,

    /// REST open-orders polling interval (degraded mode and periodic audit).
    #[serde(default = "default_open_orders_poll_secs")]
    pub open_orders_poll_secs: u64,
}

fn default_instruments() -> Vec<String> {
    vec!["BTC-ZAR".to_string()]
}
fn default_rest_url() -> String {
    "https://api.valr.com".to_string()
}
fn default_market_ws_url() -> String {
    "wss://api.valr.com/ws/trade".to_string()
}
fn default_account_ws_url() -> String {
    "wss://api.valr.com/ws/account".to_string()
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_cap_secs() -> u64 {
    60
}
fn default_healthy_after_secs() -> u64 {
    60
}
fn default_max_consecutive_failures() -> u32 {
    5
}
fn default_recovery_delay_secs() -> u64 {
    300
}
fn default_reconcile_grace_ms() -> u64 {
    5_000
}
fn default_status_quiet_ms() -> u64 {
    2_000
}
fn default_eviction_delay_secs() -> u64 {
    30
}
fn default_open_orders_poll_secs() -> u64 {
    10
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        toml::from_str("").expect("defaults are total")
    }
}

impl ConnectorConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from the default location (project root config.toml).
    pub fn load_default() -> Self {
        let candidates = [
            "config.toml",
            concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml"),
        ];
        for path in &candidates {
            if let Ok(cfg) = Self::load(Path::new(path)) {
                tracing::info!("loaded config from {}", path);
                return cfg;
            }
        }
        tracing::warn!("no config.toml found, using defaults");
        Self::default()
    }

    pub fn market_session(&self) -> SessionConfig {
        self.session("market", self.market_ws_url.clone())
    }

    pub fn account_session(&self) -> SessionConfig {
        self.session("account", self.account_ws_url.clone())
    }

    fn session(&self, label: &'static str, url: String) -> SessionConfig {
        SessionConfig {
            label,
            url,
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_secs(self.backoff_cap_secs),
            healthy_after: Duration::from_secs(self.healthy_after_secs),
            max_consecutive_failures: self.max_consecutive_failures,
            recovery_delay: Duration::from_secs(self.recovery_delay_secs),
        }
    }

    pub fn guard_policy(&self) -> GuardPolicy {
        GuardPolicy {
            reconcile_grace_ms: self.reconcile_grace_ms,
            status_quiet_ms: self.status_quiet_ms,
            eviction_delay_ms: self.eviction_delay_secs * 1_000,
        }
    }
}

/// API credentials, read from the environment (`.env` is honored).
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("VALR_API_KEY")
            .map_err(|_| Error::Config("VALR_API_KEY not set".to_string()))?;
        let api_secret = std::env::var("VALR_API_SECRET")
            .map_err(|_| Error::Config("VALR_API_SECRET not set".to_string()))?;
        Ok(Self { api_key, api_secret })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_venue_expectations() {
        let cfg = ConnectorConfig::default();
        assert_eq!(cfg.ping_interval_secs, 30);
        assert_eq!(cfg.reconcile_grace_ms, 5_000);
        assert_eq!(cfg.market_ws_url, "wss://api.valr.com/ws/trade");
        assert_eq!(cfg.instruments, vec!["BTC-ZAR".to_string()]);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let cfg: ConnectorConfig =
            toml::from_str("instruments = [\"ETH-ZAR\"]\nreconcile_grace_ms = 8000").unwrap();
        assert_eq!(cfg.instruments, vec!["ETH-ZAR".to_string()]);
        assert_eq!(cfg.reconcile_grace_ms, 8_000);
        assert_eq!(cfg.status_quiet_ms, 2_000);
    }
}
