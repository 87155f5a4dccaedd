//! Mail-source collaborator: session traits and the IMAP implementation.
//!
//! The traits are blocking from the core's point of view; the scheduler
//! runs a whole poll cycle inside `spawn_blocking`, so sessions never
//! hold a connection across an async suspension point.

pub mod decode;
pub mod imap;

pub use imap::ImapSource;

use crate::config::ImapConfig;
use crate::error::MailError;

/// Reference to one unread message within the selected folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    /// IMAP sequence number, as returned by SEARCH.
    pub seq: String,
}

/// A fetched message in raw RFC 822 form.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub data: String,
}

/// Opens authenticated sessions with the mail source.
pub trait MailSource: Send + Sync {
    fn open_session(&self, credentials: &ImapConfig) -> Result<Box<dyn MailSession>, MailError>;
}

/// One authenticated session with the mail source.
pub trait MailSession: Send {
    /// List unread messages in a folder.
    fn list_unread(&mut self, folder: &str) -> Result<Vec<MessageRef>, MailError>;

    /// Fetch one message and mark it seen.
    fn fetch(&mut self, msg: &MessageRef) -> Result<RawMessage, MailError>;

    /// Log out. Errors here are logged by the caller, never propagated.
    fn close(&mut self) -> Result<(), MailError>;
}
