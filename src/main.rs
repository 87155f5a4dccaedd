use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use mailgram::config::CachedConfig;
use mailgram::health::HealthTracker;
use mailgram::mail::{ImapSource, MailSource};
use mailgram::metrics::{self, Metrics};
use mailgram::notify::{
    DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_CAPACITY, DeliveryWorker, Notifier, NotifyQueue,
    TelegramNotifier,
};
use mailgram::scheduler::Scheduler;

/// How long queued notifications get to drain after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(version, about = "Forwards unread mail to Telegram channels")]
struct Args {
    /// Path to the config file.
    #[arg(long, default_value = "config/config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let cached = CachedConfig::load(&args.config)?;
    let _log_guard = mailgram::logging::init(&cached.config.log)?;

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    info!(
        config = %args.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "starting mailgram"
    );

    let metrics = Arc::new(Metrics::new());

    // Health/metrics HTTP endpoint
    let service_port = cached.config.service_port;
    let app = metrics::router(Arc::clone(&metrics));
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", service_port))
            .await
            .expect("Failed to bind metrics port");
        info!(port = service_port, "metrics server started");
        axum::serve(listener, app).await.ok();
    });

    // Outbound path: Telegram sink behind the bounded queue and worker
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(&cached.config.telegram));
    let (queue, queue_rx) = NotifyQueue::bounded(DEFAULT_QUEUE_CAPACITY, Arc::clone(&metrics));
    let worker = DeliveryWorker::new(notifier, Arc::clone(&metrics), DEFAULT_MAX_RETRIES);
    let worker_handle = worker.spawn(queue_rx);

    // Poll loop
    let tracker = Arc::new(HealthTracker::new(queue.clone(), Arc::clone(&metrics)));
    let source: Arc<dyn MailSource> = Arc::new(ImapSource::new());
    let interval = cached.config.check_interval();
    let scheduler = Scheduler::new(
        cached,
        args.config.clone(),
        source,
        tracker,
        queue.clone(),
        Arc::clone(&metrics),
    );
    let (scheduler_handle, scheduler_shutdown) = scheduler.spawn(interval);

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping");

    // Stop the poll loop first so its queue handles are released; an
    // in-flight blocking tick still runs to completion on the blocking pool.
    scheduler_shutdown.store(true, Ordering::Relaxed);
    scheduler_handle.abort();
    let _ = scheduler_handle.await;

    // Give the worker a moment to drain what's already queued. Anything
    // still queued after the grace period is lost by design.
    drop(queue);
    if tokio::time::timeout(SHUTDOWN_GRACE, worker_handle).await.is_err() {
        error!("delivery worker did not drain in time, exiting anyway");
    }

    info!("mailgram stopped");
    Ok(())
}
