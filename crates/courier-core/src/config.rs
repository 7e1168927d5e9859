//! TOML configuration for the Courier service.

use crate::error::CourierError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level Courier configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub courier: CourierConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierConfig {
    /// Account this deployment ingests for.
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Stable external session identifier.
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            account_id: default_account_id(),
            session_id: default_session_id(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Provider connector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    /// Sent as `X-Api-Key` when set.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Bound on every provider call.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            api_key: None,
            timeout_secs: default_provider_timeout(),
        }
    }
}

/// Webhook delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookConfig {
    /// HMAC secret for signature verification. Unsigned deliveries are
    /// accepted when unset.
    #[serde(default)]
    pub secret: Option<String>,
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Reconnection watchdog attempts before giving up.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_max_attempts: u32,
    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_secs: u64,
    /// How long an in-flight control operation must be stuck before
    /// `force_restart` is allowed to interrupt it.
    #[serde(default = "default_lock_stuck_timeout")]
    pub lock_stuck_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_max_attempts: default_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay(),
            reconnect_max_delay_secs: default_reconnect_max_delay(),
            lock_stuck_timeout_secs: default_lock_stuck_timeout(),
        }
    }
}

/// Message store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Deployment-wide dedup defaults. Per-account overrides live in the
/// store's `account_policies` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default)]
    pub refresh_mode: bool,
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window_hours: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            refresh_mode: false,
            duplicate_window_hours: default_duplicate_window(),
        }
    }
}

fn default_account_id() -> String {
    "default".to_string()
}

fn default_session_id() -> String {
    "primary".to_string()
}

fn default_data_dir() -> String {
    "~/.courier".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_provider_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_provider_timeout() -> u64 {
    20
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay() -> u64 {
    500
}

fn default_reconnect_max_delay() -> u64 {
    60
}

fn default_lock_stuck_timeout() -> u64 {
    120
}

fn default_db_path() -> String {
    "~/.courier/courier.db".to_string()
}

fn default_duplicate_window() -> i64 {
    4
}

/// Expand a leading `~/` to the user's home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, CourierError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| CourierError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| CourierError::Config(format!("failed to parse config: {e}")))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.session.reconnect_max_attempts, 5);
        assert_eq!(cfg.dedup.duplicate_window_hours, 4);
        assert!(!cfg.dedup.refresh_mode);
        assert_eq!(cfg.provider.timeout_secs, 20);
        assert!(cfg.webhook.secret.is_none());
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [courier]
            account_id = "acct-1"
            session_id = "wa-main"

            [provider]
            base_url = "http://provider:3000"
            api_key = "secret"

            [dedup]
            refresh_mode = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.courier.account_id, "acct-1");
        assert_eq!(cfg.provider.base_url, "http://provider:3000");
        assert!(cfg.dedup.refresh_mode);
        // Unspecified sections keep their defaults.
        assert_eq!(cfg.dedup.duplicate_window_hours, 4);
        assert_eq!(cfg.session.reconnect_base_delay_ms, 500);
    }

    #[test]
    fn shellexpand_home() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(shellexpand("~/data"), "/home/tester/data");
        assert_eq!(shellexpand("/abs/path"), "/abs/path");
    }
}
