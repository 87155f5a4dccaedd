//! Bounded outbound queue and the delivery worker draining it.
//!
//! `enqueue` never blocks: a full queue drops the message, which is
//! counted and logged. A single worker drains the queue in FIFO order,
//! retrying each send with exponential backoff and honoring sink
//! retry-after hints. Retries of one message block the messages behind
//! it; at mailbox volumes that head-of-line blocking is acceptable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;
use crate::notify::{Notifier, OutboundMessage};

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default maximum delivery attempts per message.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Retry-delay state machine.
///
/// Starts at one second and doubles after every consumed step. A sink
/// retry-after hint is returned verbatim and does not advance the
/// doubling sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: Duration::from_secs(1),
        }
    }

    /// Next delay to sleep before retrying.
    pub fn next(&mut self, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => hint,
            None => {
                let delay = self.current;
                self.current *= 2;
                delay
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer handle onto the bounded outbound queue.
#[derive(Clone)]
pub struct NotifyQueue {
    tx: mpsc::Sender<OutboundMessage>,
    metrics: Arc<Metrics>,
}

impl NotifyQueue {
    /// Create a queue of the given capacity, returning the producer handle
    /// and the receiver to hand to a [`DeliveryWorker`].
    pub fn bounded(
        capacity: usize,
        metrics: Arc<Metrics>,
    ) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, metrics }, rx)
    }

    /// Enqueue without blocking. Returns `false` if the queue was full and
    /// the message was dropped.
    pub fn enqueue(&self, msg: OutboundMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(
                    channel_id = msg.channel_id,
                    "outbound queue full, dropping message"
                );
                self.metrics
                    .queue_full_drops
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(msg)) => {
                warn!(
                    channel_id = msg.channel_id,
                    "outbound queue closed, dropping message"
                );
                false
            }
        }
    }
}

/// Background worker delivering queued messages one at a time.
pub struct DeliveryWorker {
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
    max_retries: u32,
}

impl DeliveryWorker {
    pub fn new(notifier: Arc<dyn Notifier>, metrics: Arc<Metrics>, max_retries: u32) -> Self {
        Self {
            notifier,
            metrics,
            max_retries,
        }
    }

    /// Spawn the drain loop. The worker exits once every producer handle
    /// has been dropped and the queue is empty.
    pub fn spawn(self, mut rx: mpsc::Receiver<OutboundMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("delivery worker started");
            while let Some(msg) = rx.recv().await {
                self.deliver(msg).await;
            }
            info!("delivery worker shutting down");
        })
    }

    /// Send one message, retrying up to `max_retries` attempts.
    ///
    /// A message whose retry budget is exhausted is dropped, not re-queued.
    async fn deliver(&self, mut msg: OutboundMessage) {
        let mut backoff = Backoff::new();

        loop {
            msg.attempt += 1;
            let start = std::time::Instant::now();
            let result = self.notifier.send(msg.channel_id, &msg.text).await;
            self.metrics.send_duration.observe(start.elapsed());

            match result {
                Ok(()) => {
                    debug!(
                        channel_id = msg.channel_id,
                        attempt = msg.attempt,
                        "message delivered"
                    );
                    self.metrics
                        .sends
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    self.metrics
                        .send_errors
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

                    if msg.attempt >= self.max_retries {
                        error!(
                            channel_id = msg.channel_id,
                            attempts = msg.attempt,
                            error = %e,
                            "giving up on message after exhausting retries"
                        );
                        return;
                    }

                    let hint = e.retry_after();
                    let delay = backoff.next(hint);
                    if hint.is_some() {
                        warn!(
                            channel_id = msg.channel_id,
                            delay_secs = delay.as_secs(),
                            "sink asked to retry later"
                        );
                    } else {
                        warn!(
                            channel_id = msg.channel_id,
                            attempt = msg.attempt,
                            delay_secs = delay.as_secs(),
                            error = %e,
                            "send failed, backing off"
                        );
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
