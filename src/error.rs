//! Error types for Mailgram.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mail source error: {0}")]
    Mail(#[from] MailError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mail-source errors, split by the operation that failed.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Failed to connect to IMAP server: {0}")]
    Connect(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("IMAP login failed: {0}")]
    Login(String),

    #[error("Failed to select folder {folder}: {reason}")]
    Select { folder: String, reason: String },

    #[error("Failed to search folder {folder}: {reason}")]
    Search { folder: String, reason: String },

    #[error("Failed to fetch message {seq}: {reason}")]
    Fetch { seq: String, reason: String },

    #[error("IMAP connection closed")]
    Closed,
}

/// Notification-sink errors.
///
/// `RateLimited` carries the sink's retry-after hint; the delivery worker
/// honors it verbatim instead of its own backoff for that attempt.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Sink rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Sink API error (status {status}): {description}")]
    Api { status: u16, description: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

impl NotifyError {
    /// Extract the sink-supplied retry-after hint, if the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
