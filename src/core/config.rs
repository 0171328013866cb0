//! Configuration parsing and validation.
//!
//! Strata configuration is loaded from TOML files with CLI overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level Strata configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Record storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Listener configuration.
    #[serde(default)]
    pub listeners: ListenerConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Record storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage DSN: `memory://` for an ephemeral store, or
    /// `file:///path/to/db` for a persistent store.
    #[serde(default = "default_storage_dsn")]
    pub dsn: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dsn: default_storage_dsn(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// gRPC listener.
    #[serde(default)]
    pub grpc: Option<GrpcListenerConfig>,
}

/// gRPC listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcListenerConfig {
    /// Bind address (e.g., "127.0.0.1:5443").
    pub bind: String,

    /// When set, run a forwarding server that proxies every request to
    /// this upstream endpoint instead of serving the local store.
    #[serde(default)]
    pub forward_to: Option<String>,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_storage_dsn() -> String {
    "memory://".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.storage.dsn.starts_with("memory://") && !self.storage.dsn.starts_with("file://") {
            anyhow::bail!(
                "storage dsn must use the memory:// or file:// scheme, got {:?}",
                self.storage.dsn
            );
        }

        if let Some(grpc) = &self.listeners.grpc {
            grpc.bind
                .parse::<std::net::SocketAddr>()
                .with_context(|| format!("invalid grpc bind address {:?}", grpc.bind))?;
        }

        match &self.telemetry.log_level[..] {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("invalid log level {:?}", other),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.storage.dsn, "memory://");
        assert_eq!(config.telemetry.log_level, "info");
        assert!(config.listeners.grpc.is_none());
    }

    #[test]
    fn full_config() {
        let config = Config::from_toml(
            r#"
[storage]
dsn = "file:///var/lib/strata"

[listeners.grpc]
bind = "0.0.0.0:5443"

[telemetry]
log_level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.storage.dsn, "file:///var/lib/strata");
        assert_eq!(config.listeners.grpc.unwrap().bind, "0.0.0.0:5443");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Config::from_toml("[storage]\ndsn = \"postgres://x\"\n").is_err());
    }

    #[test]
    fn rejects_bad_bind() {
        assert!(Config::from_toml("[listeners.grpc]\nbind = \"nope\"\n").is_err());
    }
}
