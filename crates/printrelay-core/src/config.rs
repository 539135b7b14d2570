// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Application configuration.
//
// Loaded from a TOML file; every section and field has a default so a
// minimal file only needs the platform instance URL and tenant id.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RelayError, Result};

/// Environment variable that overrides `auth.access_token`.
pub const ACCESS_TOKEN_ENV: &str = "PRINTRELAY_ACCESS_TOKEN";

/// Plain key/value view over configuration, keyed by dotted paths such as
/// `platform.instance_url`.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Persistent connector settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub platform: PlatformConfig,
    pub auth: AuthConfig,
    pub printing: PrintingConfig,
    pub reconnect: ReconnectConfig,
    pub logging: LoggingConfig,
}

/// Event bus and platform instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Base URL of the authenticated platform instance.
    pub instance_url: String,
    /// Org / tenant identifier sent with every RPC.
    pub tenant_id: String,
    /// Event channel to subscribe to.
    pub channel: String,
    /// Pub/Sub gRPC endpoint.
    pub endpoint: String,
    /// Number of outstanding fetch requests (credit window).
    pub window_size: u32,
    /// Events asked for by each fetch request.
    pub num_requested: i32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            instance_url: String::new(),
            tenant_id: String::new(),
            channel: "/event/SF_Printer_Event__e".into(),
            endpoint: "https://api.pubsub.salesforce.com:7443".into(),
            window_size: 1,
            num_requested: 1,
        }
    }
}

/// Credentials. Token acquisition itself happens outside the connector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub access_token: String,
}

/// Device-side timeouts and behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintingConfig {
    pub raw_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub lp_command: String,
    pub lp_timeout_secs: u64,
    /// Probe ZPL printers and prepend a setup block.
    pub auto_config: bool,
}

impl Default for PrintingConfig {
    fn default() -> Self {
        Self {
            raw_timeout_secs: 10,
            probe_timeout_secs: 3,
            download_timeout_secs: 60,
            lp_command: "lp".into(),
            lp_timeout_secs: 30,
            auto_config: true,
        }
    }
}

/// Outer reconnect loop around the subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml(&text)?;
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV)
            && !token.trim().is_empty()
        {
            debug!("access token taken from environment");
            config.auth.access_token = token.trim().to_string();
        }
        info!(path = %path.display(), channel = %config.platform.channel, "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| RelayError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the connector cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.platform.window_size == 0 {
            return Err(RelayError::Config(
                "platform.window_size must be at least 1".into(),
            ));
        }
        if self.platform.num_requested < 1 {
            return Err(RelayError::Config(
                "platform.num_requested must be at least 1".into(),
            ));
        }
        if self.platform.channel.trim().is_empty() {
            return Err(RelayError::Config("platform.channel is empty".into()));
        }
        Ok(())
    }
}

impl ConfigSource for AppConfig {
    fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "platform.instance_url" => self.platform.instance_url.clone(),
            "platform.tenant_id" => self.platform.tenant_id.clone(),
            "platform.channel" => self.platform.channel.clone(),
            "platform.endpoint" => self.platform.endpoint.clone(),
            "platform.window_size" => self.platform.window_size.to_string(),
            "platform.num_requested" => self.platform.num_requested.to_string(),
            "auth.access_token" => self.auth.access_token.clone(),
            "logging.level" => self.logging.level.clone(),
            _ => return None,
        };
        if value.is_empty() { None } else { Some(value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [platform]
            instance_url = "https://acme.my.salesforce.com"
            tenant_id = "00D000000000001"
            "#,
        )
        .unwrap();
        assert_eq!(config.platform.channel, "/event/SF_Printer_Event__e");
        assert_eq!(config.platform.window_size, 1);
        assert_eq!(config.printing.download_timeout_secs, 60);
        assert_eq!(config.printing.probe_timeout_secs, 3);
        assert!(config.reconnect.enabled);
    }

    #[test]
    fn zero_window_is_rejected() {
        let err = AppConfig::from_toml("[platform]\nwindow_size = 0\n").unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn config_source_lookups() {
        let mut config = AppConfig::default();
        config.platform.instance_url = "https://acme.my.salesforce.com".into();
        assert_eq!(
            config.get("platform.instance_url").as_deref(),
            Some("https://acme.my.salesforce.com")
        );
        assert_eq!(config.get("platform.tenant_id"), None);
        assert_eq!(config.get("no.such.key"), None);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printrelay.toml");
        std::fs::write(&path, "[printing]\nauto_config = false\n").unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert!(!config.printing.auto_config);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = AppConfig::load(Path::new("/nonexistent/printrelay.toml")).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
