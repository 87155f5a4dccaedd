//! Configuration loading, validation, and hash-based hot reload.
//!
//! The config file is TOML. A `CachedConfig` keeps the parsed config, the
//! compiled routing table, and a content hash; `reload_if_changed` swaps
//! all three atomically between poll cycles when the file content changes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::route::RoutingTable;

/// Top-level service configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Mail source connection settings.
    pub imap: ImapConfig,

    /// Notification sink settings.
    pub telegram: TelegramConfig,

    /// Folders to poll, each with its ordered routing rules.
    pub folders: Vec<FolderConfig>,

    /// Seconds between mailbox checks.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// How long a dependency must stay failing before an alert is sent.
    #[serde(default = "default_alert_delay")]
    pub alert_delay_secs: u64,

    /// Port for the health/metrics HTTP endpoint.
    #[serde(default = "default_service_port")]
    pub service_port: u16,

    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

/// IMAP connection settings.
#[derive(Debug, Deserialize)]
pub struct ImapConfig {
    /// Hostname of the IMAP server.
    pub host: String,

    /// IMAP port.
    #[serde(default = "default_imap_port")]
    pub port: u16,

    /// Username for IMAP authentication.
    pub username: String,

    /// Password for IMAP authentication.
    pub password: SecretString,
}

/// Telegram sink settings.
#[derive(Debug, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token.
    pub bot_token: SecretString,

    /// Chat id receiving messages that match no rule.
    pub default_channel: i64,

    /// Chat id receiving dependency alerts and panic reports.
    pub errors_channel: i64,
}

/// One polled folder and its ordered rule list.
#[derive(Debug, Deserialize)]
pub struct FolderConfig {
    /// IMAP folder name (e.g. "INBOX").
    pub name: String,

    /// First match wins; no match routes to the default channel.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// A single subject-matching rule.
#[derive(Debug, Deserialize)]
pub struct RuleConfig {
    /// Regex matched against the decoded message subject.
    pub pattern: String,

    /// Destination chat id when the pattern matches.
    pub channel: i64,
}

/// Logging settings.
#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Directory for rolling JSON log files.
    #[serde(default = "default_log_directory")]
    pub directory: String,

    /// Log level filter when RUST_LOG is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to also log human-readable output to stderr.
    #[serde(default = "default_log_console")]
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            level: default_log_level(),
            console: default_log_console(),
        }
    }
}

fn default_check_interval() -> u64 {
    60
}

fn default_alert_delay() -> u64 {
    300
}

fn default_service_port() -> u16 {
    9090
}

fn default_imap_port() -> u16 {
    993
}

fn default_log_directory() -> String {
    "logs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_console() -> bool {
    true
}

impl Config {
    /// Parse and validate a config from raw file bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, ConfigError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| ConfigError::ParseError(format!("config is not UTF-8: {e}")))?;
        let config: Config =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "check_interval_secs".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.folders.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "folders".into(),
                message: "at least one folder must be configured".into(),
            });
        }
        Ok(())
    }

    /// Poll interval as a `Duration`.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Alert de-bounce threshold as a `Duration`.
    pub fn alert_delay(&self) -> Duration {
        Duration::from_secs(self.alert_delay_secs)
    }
}

/// Parsed config plus its compiled routing table and content hash.
///
/// Owned by the scheduler; a reload swaps the `Arc`s between ticks, so a
/// tick in progress keeps working against the snapshot it started with.
pub struct CachedConfig {
    pub config: Arc<Config>,
    pub routes: Arc<RoutingTable>,
    hash: [u8; 32],
}

impl CachedConfig {
    /// Load a config file, compile its routing table, and remember the hash.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path)?;
        let hash: [u8; 32] = Sha256::digest(&raw).into();
        let config = Config::parse(&raw)?;
        let routes = RoutingTable::compile(&config)?;
        Ok(Self {
            config: Arc::new(config),
            routes: Arc::new(routes),
            hash,
        })
    }

    /// Build from an already-parsed config (no backing file).
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let routes = RoutingTable::compile(&config)?;
        Ok(Self {
            config: Arc::new(config),
            routes: Arc::new(routes),
            hash: [0; 32],
        })
    }

    /// Re-read the file and swap the config if its content hash changed.
    ///
    /// A missing file is not an error — the previous config stays in effect.
    /// Returns `Ok(true)` only when a new config was installed.
    pub fn reload_if_changed(&mut self, path: &Path) -> Result<bool, ConfigError> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let hash: [u8; 32] = Sha256::digest(&raw).into();
        if hash == self.hash {
            return Ok(false);
        }

        let config = Config::parse(&raw)?;
        let routes = RoutingTable::compile(&config)?;
        self.config = Arc::new(config);
        self.routes = Arc::new(routes);
        self.hash = hash;
        Ok(true)
    }
}
