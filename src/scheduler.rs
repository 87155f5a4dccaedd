//! Poll-cycle orchestrator.
//!
//! A fixed-interval timer drives at most one tick at a time. Each tick
//! reloads the config if its file changed, opens a mail session, walks
//! the configured folders, and feeds routed messages into the outbound
//! queue. The tick body runs in `spawn_blocking`; a panic there is
//! recovered, logged, counted, and reported to the errors channel —
//! nothing inside a tick can take down the scheduling loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{CachedConfig, Config, FolderConfig};
use crate::health::{AlertPolicy, Dependency, HealthTracker};
use crate::mail::decode::decode_message;
use crate::mail::{MailSession, MailSource};
use crate::metrics::Metrics;
use crate::notify::{NotifyQueue, OutboundMessage};
use crate::route::RoutingTable;

/// Drives the poll cycle.
pub struct Scheduler {
    config: CachedConfig,
    config_path: PathBuf,
    source: Arc<dyn MailSource>,
    tracker: Arc<HealthTracker>,
    queue: NotifyQueue,
    metrics: Arc<Metrics>,
}

impl Scheduler {
    pub fn new(
        config: CachedConfig,
        config_path: PathBuf,
        source: Arc<dyn MailSource>,
        tracker: Arc<HealthTracker>,
        queue: NotifyQueue,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            config_path,
            source,
            tracker,
            queue,
            metrics,
        }
    }

    /// Spawn the tick loop. Returns the task handle and a shutdown flag;
    /// set the flag to stop after the current tick.
    pub fn spawn(mut self, interval: Duration) -> (JoinHandle<()>, Arc<AtomicBool>) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                "scheduler started — polling mailbox"
            );

            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tick.tick().await;

                if shutdown.load(Ordering::Relaxed) {
                    info!("scheduler shutting down");
                    return;
                }

                self.run_cycle().await;
            }
        });

        (handle, shutdown_flag)
    }

    /// Run one complete poll cycle.
    async fn run_cycle(&mut self) {
        let start = Instant::now();

        match self.config.reload_if_changed(&self.config_path) {
            Ok(true) => info!("config reloaded due to changes"),
            Ok(false) => {}
            Err(e) => error!(error = %e, "config reload failed, keeping previous config"),
        }

        let config = Arc::clone(&self.config.config);
        let routes = Arc::clone(&self.config.routes);
        let source = Arc::clone(&self.source);
        let tracker = Arc::clone(&self.tracker);
        let queue = self.queue.clone();
        let metrics = Arc::clone(&self.metrics);

        let errors_channel = config.telegram.errors_channel;
        let result = tokio::task::spawn_blocking(move || {
            run_tick(&config, &routes, source.as_ref(), &tracker, &queue, &metrics);
        })
        .await;

        self.metrics.tick_duration.observe(start.elapsed());

        if let Err(e) = result {
            if e.is_panic() {
                let reason = panic_message(e.into_panic());
                error!(reason = %reason, "panic recovered in mail processing");
                self.metrics.mail_errors.fetch_add(1, Ordering::Relaxed);
                self.queue.enqueue(OutboundMessage::new(
                    errors_channel,
                    format!("Panic while processing mail: {reason}"),
                ));
            }
        }
    }
}

/// The tick body (blocking).
fn run_tick(
    config: &Config,
    routes: &RoutingTable,
    source: &dyn MailSource,
    tracker: &HealthTracker,
    queue: &NotifyQueue,
    metrics: &Metrics,
) {
    let policy = AlertPolicy::from_config(config);

    let session = source.open_session(&config.imap);
    tracker.observe(
        Dependency::SourceConnect,
        session.as_ref().map(|_| ()),
        &policy,
    );

    // Nothing else can proceed without a session
    let mut session = match session {
        Ok(session) => session,
        Err(_) => return,
    };

    for folder in &config.folders {
        let outcome = check_folder(session.as_mut(), folder, routes, queue, metrics);
        tracker.observe(
            Dependency::SourceFetch,
            outcome.as_ref().map(|_| ()),
            &policy,
        );
    }

    if let Err(e) = session.close() {
        warn!(error = %e, "failed to close mail session");
    }
}

/// Fetch, decode, route, and enqueue every unread message in one folder.
fn check_folder(
    session: &mut dyn MailSession,
    folder: &FolderConfig,
    routes: &RoutingTable,
    queue: &NotifyQueue,
    metrics: &Metrics,
) -> Result<(), crate::error::MailError> {
    let refs = session.list_unread(&folder.name)?;
    metrics.mailbox_checks.fetch_add(1, Ordering::Relaxed);

    for msg_ref in &refs {
        let raw = session.fetch(msg_ref)?;
        metrics.messages_received.fetch_add(1, Ordering::Relaxed);

        let Some(mail) = decode_message(&raw) else {
            warn!(
                folder = %folder.name,
                seq = %msg_ref.seq,
                "failed to decode message, dropping"
            );
            continue;
        };

        queue.enqueue(routes.route(&folder.name, &mail.subject, &mail.body));
    }

    Ok(())
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
