/// Config schema types (database, storage, webhook delivery, protocol, logging).
use std::{path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub webhook: WebhookConfig,
    pub protocol: ProtocolConfig,
    pub logging: LoggingConfig,
    pub shutdown: ShutdownConfig,
}

/// Where the user table lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file path. Relative paths resolve against the working directory.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dbdata/users.db"),
        }
    }
}

/// Downloaded media and history dumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root under which `user_<id>/` directories are created.
    pub files_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            files_dir: PathBuf::from("files"),
        }
    }
}

/// Outbound webhook HTTP client and delivery queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum redirect hops followed per request.
    pub max_redirects: usize,
    /// Pending deliveries buffered per user before new ones are dropped.
    pub queue_capacity: usize,
    /// Total attempts per delivery, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            max_redirects: 15,
            queue_capacity: 256,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Verbosity of the messaging protocol client and per-session HTTP clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtocolLogLevel {
    #[default]
    Off,
    Info,
    Debug,
}

impl ProtocolLogLevel {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }

    /// HTTP connection tracing is only turned on at `DEBUG`.
    pub fn verbose_http(&self) -> bool {
        matches!(self, Self::Debug)
    }
}

impl FromStr for ProtocolLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "OFF" => Ok(Self::Off),
            "INFO" => Ok(Self::Info),
            "DEBUG" => Ok(Self::Debug),
            other => Err(format!("unknown protocol log level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub debug: ProtocolLogLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Structured JSON output. Also suppresses console QR rendering.
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for sessions to acknowledge shutdown.
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_session_http_policy() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.webhook.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.webhook.max_redirects, 15);
        assert_eq!(cfg.protocol.debug, ProtocolLogLevel::Off);
        assert!(!cfg.logging.json);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: GatewayConfig = toml::from_str(
            r#"
            [webhook]
            max_attempts = 5

            [protocol]
            debug = "DEBUG"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.webhook.max_attempts, 5);
        assert_eq!(cfg.webhook.queue_capacity, 256);
        assert_eq!(cfg.protocol.debug, ProtocolLogLevel::Debug);
        assert_eq!(cfg.storage.files_dir, PathBuf::from("files"));
    }

    #[test]
    fn protocol_level_parsing() {
        assert_eq!("".parse::<ProtocolLogLevel>(), Ok(ProtocolLogLevel::Off));
        assert_eq!("info".parse::<ProtocolLogLevel>(), Ok(ProtocolLogLevel::Info));
        assert_eq!("DEBUG".parse::<ProtocolLogLevel>(), Ok(ProtocolLogLevel::Debug));
        assert!("trace".parse::<ProtocolLogLevel>().is_err());
        assert!(ProtocolLogLevel::Debug.verbose_http());
        assert!(!ProtocolLogLevel::Info.verbose_http());
    }
}
