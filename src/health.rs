//! Dependency health tracking and edge-triggered alerting.
//!
//! One status record per monitored dependency, all behind a single lock:
//! observations share the downstream alert path and must not interleave a
//! half-updated status with alert emission. An outage alerts at most once,
//! and only after it has persisted past the configured delay, so a single
//! failed poll cycle never pages anyone. Recovery notices are only
//! meaningful once at least one alert has been exchanged.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::config::Config;
use crate::error::MailError;
use crate::metrics::Metrics;
use crate::notify::{NotifyQueue, OutboundMessage};

/// The monitored dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// Opening a session with the mail source.
    SourceConnect,
    /// Fetching unread messages from a folder.
    SourceFetch,
}

impl Dependency {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SourceConnect => "source-connect",
            Self::SourceFetch => "source-fetch",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::SourceConnect => 0,
            Self::SourceFetch => 1,
        }
    }

    fn failure_text(&self, err: &MailError, last_success: DateTime<Utc>) -> String {
        let ts = last_success.format("%Y-%m-%d %H:%M:%S");
        match self {
            Self::SourceConnect => {
                format!("Mail connection error: {err}. Last successful check at {ts}")
            }
            Self::SourceFetch => {
                format!("Failed to fetch unread mail: {err}. Last successful check at {ts}")
            }
        }
    }

    fn recovery_text(&self, at: DateTime<Utc>) -> String {
        let ts = at.format("%Y-%m-%d %H:%M:%S");
        match self {
            Self::SourceConnect => format!("Mail connection restored at {ts}"),
            Self::SourceFetch => format!("Unread mail fetching restored at {ts}"),
        }
    }
}

/// Alerting thresholds and destination, taken from the config snapshot of
/// the observing poll cycle.
#[derive(Debug, Clone, Copy)]
pub struct AlertPolicy {
    pub alert_delay: Duration,
    pub errors_channel: i64,
}

impl AlertPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            alert_delay: config.alert_delay(),
            errors_channel: config.telegram.errors_channel,
        }
    }
}

#[derive(Debug)]
struct DependencyStatus {
    last_success: Option<DateTime<Utc>>,
    healthy: bool,
    alert_sent: bool,
    initialized: bool,
}

impl Default for DependencyStatus {
    fn default() -> Self {
        Self {
            last_success: None,
            healthy: true,
            alert_sent: false,
            initialized: false,
        }
    }
}

/// Per-dependency health state machine feeding the alert channel.
pub struct HealthTracker {
    statuses: Mutex<[DependencyStatus; 2]>,
    queue: NotifyQueue,
    metrics: Arc<Metrics>,
}

impl HealthTracker {
    pub fn new(queue: NotifyQueue, metrics: Arc<Metrics>) -> Self {
        Self {
            statuses: Mutex::new([DependencyStatus::default(), DependencyStatus::default()]),
            queue,
            metrics,
        }
    }

    /// Record the outcome of one dependency operation, stamped now.
    pub fn observe(&self, dep: Dependency, result: Result<(), &MailError>, policy: &AlertPolicy) {
        self.observe_at(dep, result, policy, Utc::now());
    }

    /// Record an outcome at an explicit time.
    pub fn observe_at(
        &self,
        dep: Dependency,
        result: Result<(), &MailError>,
        policy: &AlertPolicy,
        now: DateTime<Utc>,
    ) {
        let mut statuses = self.statuses.lock().unwrap();
        let status = &mut statuses[dep.index()];

        match result {
            Ok(()) => {
                let was_unhealthy = !status.healthy;
                status.last_success = Some(now);
                status.healthy = true;

                if was_unhealthy && status.initialized {
                    status.alert_sent = false;
                    let text = dep.recovery_text(now);
                    info!(dependency = dep.label(), "dependency recovered");
                    self.queue
                        .enqueue(OutboundMessage::new(policy.errors_channel, text));
                }
            }
            Err(err) => {
                error!(dependency = dep.label(), error = %err, "dependency check failed");
                self.metrics.mail_errors.fetch_add(1, Ordering::Relaxed);

                // First-ever observation: treat "time since last success"
                // as zero so startup failures don't alert immediately.
                let last_success = *status.last_success.get_or_insert(now);
                status.healthy = false;

                let outage = now
                    .signed_duration_since(last_success)
                    .to_std()
                    .unwrap_or_default();
                if outage > policy.alert_delay && !status.alert_sent {
                    let text = dep.failure_text(err, last_success);
                    self.queue
                        .enqueue(OutboundMessage::new(policy.errors_channel, text));
                    status.alert_sent = true;
                    status.initialized = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup() -> (HealthTracker, tokio::sync::mpsc::Receiver<OutboundMessage>) {
        let metrics = Arc::new(Metrics::new());
        let (queue, rx) = NotifyQueue::bounded(16, Arc::clone(&metrics));
        (HealthTracker::new(queue, metrics), rx)
    }

    fn policy() -> AlertPolicy {
        AlertPolicy {
            alert_delay: Duration::from_secs(60),
            errors_channel: -500,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn connect_err() -> MailError {
        MailError::Connect("connection refused".into())
    }

    #[test]
    fn first_success_is_quiet() {
        let (tracker, mut rx) = setup();
        tracker.observe_at(Dependency::SourceConnect, Ok(()), &policy(), at(0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn outage_shorter_than_delay_never_alerts() {
        let (tracker, mut rx) = setup();
        let p = policy();
        tracker.observe_at(Dependency::SourceConnect, Ok(()), &p, at(0));
        tracker.observe_at(Dependency::SourceConnect, Err(&connect_err()), &p, at(30));
        tracker.observe_at(Dependency::SourceConnect, Err(&connect_err()), &p, at(59));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn alert_fires_once_after_delay() {
        let (tracker, mut rx) = setup();
        let p = policy();
        tracker.observe_at(Dependency::SourceConnect, Ok(()), &p, at(0));
        tracker.observe_at(Dependency::SourceConnect, Err(&connect_err()), &p, at(61));

        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.channel_id, -500);
        assert!(alert.text.contains("connection refused"));
        assert!(alert.text.contains("Last successful check at"));

        // Continued failures in the same outage stay silent
        tracker.observe_at(Dependency::SourceConnect, Err(&connect_err()), &p, at(120));
        tracker.observe_at(Dependency::SourceConnect, Err(&connect_err()), &p, at(600));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn startup_failure_does_not_alert_immediately() {
        let (tracker, mut rx) = setup();
        let p = policy();
        // Very first observation is a failure: baseline is set to now
        tracker.observe_at(Dependency::SourceConnect, Err(&connect_err()), &p, at(0));
        assert!(rx.try_recv().is_err());

        // The outage alerts once it outlives the delay
        tracker.observe_at(Dependency::SourceConnect, Err(&connect_err()), &p, at(61));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn recovery_requires_a_prior_alert_exchange() {
        let (tracker, mut rx) = setup();
        let p = policy();
        tracker.observe_at(Dependency::SourceConnect, Ok(()), &p, at(0));
        // Short blip, no alert
        tracker.observe_at(Dependency::SourceConnect, Err(&connect_err()), &p, at(10));
        tracker.observe_at(Dependency::SourceConnect, Ok(()), &p, at(20));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn alert_then_recovery_pair() {
        let (tracker, mut rx) = setup();
        let p = policy();
        tracker.observe_at(Dependency::SourceFetch, Ok(()), &p, at(0));
        tracker.observe_at(Dependency::SourceFetch, Err(&connect_err()), &p, at(100));
        let alert = rx.try_recv().unwrap();
        assert!(alert.text.contains("Failed to fetch unread mail"));

        tracker.observe_at(Dependency::SourceFetch, Ok(()), &p, at(200));
        let recovery = rx.try_recv().unwrap();
        assert!(recovery.text.contains("restored"));

        // Steady health stays quiet
        tracker.observe_at(Dependency::SourceFetch, Ok(()), &p, at(300));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn new_outage_after_recovery_alerts_again() {
        let (tracker, mut rx) = setup();
        let p = policy();
        tracker.observe_at(Dependency::SourceConnect, Ok(()), &p, at(0));
        tracker.observe_at(Dependency::SourceConnect, Err(&connect_err()), &p, at(100));
        rx.try_recv().unwrap(); // alert
        tracker.observe_at(Dependency::SourceConnect, Ok(()), &p, at(200));
        rx.try_recv().unwrap(); // recovery

        tracker.observe_at(Dependency::SourceConnect, Err(&connect_err()), &p, at(300));
        let second = rx.try_recv().unwrap();
        assert!(second.text.contains("Mail connection error"));
    }

    #[test]
    fn dependencies_are_tracked_independently() {
        let (tracker, mut rx) = setup();
        let p = policy();
        tracker.observe_at(Dependency::SourceConnect, Ok(()), &p, at(0));
        tracker.observe_at(Dependency::SourceFetch, Ok(()), &p, at(0));

        // Connect goes down long enough to alert; fetch stays healthy
        tracker.observe_at(Dependency::SourceConnect, Err(&connect_err()), &p, at(100));
        let alert = rx.try_recv().unwrap();
        assert!(alert.text.contains("Mail connection error"));

        tracker.observe_at(Dependency::SourceFetch, Ok(()), &p, at(100));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failure_observations_count_as_mail_errors() {
        let metrics = Arc::new(Metrics::new());
        let (queue, _rx) = NotifyQueue::bounded(16, Arc::clone(&metrics));
        let tracker = HealthTracker::new(queue, Arc::clone(&metrics));
        let p = policy();
        tracker.observe_at(Dependency::SourceConnect, Err(&connect_err()), &p, at(0));
        tracker.observe_at(Dependency::SourceFetch, Err(&connect_err()), &p, at(0));
        assert_eq!(metrics.mail_errors.load(Ordering::Relaxed), 2);
    }
}
