//! Outbound notification path: queue, delivery worker, Telegram sink.

pub mod queue;
pub mod telegram;

pub use queue::{Backoff, DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_CAPACITY, DeliveryWorker, NotifyQueue};
pub use telegram::TelegramNotifier;

use async_trait::async_trait;

use crate::error::NotifyError;

/// A notification waiting to be delivered.
///
/// Owned by the queue until the worker claims it; `attempt` is only
/// touched by the worker performing retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel_id: i64,
    pub text: String,
    pub attempt: u32,
}

impl OutboundMessage {
    pub fn new(channel_id: i64, text: impl Into<String>) -> Self {
        Self {
            channel_id,
            text: text.into(),
            attempt: 0,
        }
    }
}

/// Notification sink collaborator.
///
/// An error may carry a retry-after hint (see [`NotifyError::retry_after`]);
/// absent a hint, the caller applies its own backoff.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel_id: i64, text: &str) -> Result<(), NotifyError>;
}
