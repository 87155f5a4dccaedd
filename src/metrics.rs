//! Operational metrics and the health/metrics HTTP endpoints.
//!
//! Counters are plain atomics on a shared state struct, served as JSON
//! snapshots over axum. Histograms use fixed exponential buckets.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

/// Latency histogram over fixed exponential buckets.
pub struct Histogram {
    /// Upper bounds in seconds, ascending. Observations above the last
    /// bound land in the overflow bucket.
    bounds: Vec<f64>,
    counts: Vec<AtomicU64>,
    overflow: AtomicU64,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Buckets at `start, start*factor, start*factor^2, ...` (`n` bounds).
    pub fn exponential(start: f64, factor: f64, n: usize) -> Self {
        let mut bounds = Vec::with_capacity(n);
        let mut bound = start;
        for _ in 0..n {
            bounds.push(bound);
            bound *= factor;
        }
        let counts = (0..n).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            counts,
            overflow: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, duration: Duration) {
        let secs = duration.as_secs_f64();
        match self.bounds.iter().position(|b| secs <= *b) {
            Some(i) => self.counts[i].fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
        self.sum_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum_seconds: self.sum_micros.load(Ordering::Relaxed) as f64 / 1e6,
            buckets: self
                .bounds
                .iter()
                .zip(&self.counts)
                .map(|(le, c)| Bucket {
                    le: *le,
                    count: c.load(Ordering::Relaxed),
                })
                .collect(),
            overflow: self.overflow.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Bucket {
    pub le: f64,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum_seconds: f64,
    pub buckets: Vec<Bucket>,
    pub overflow: u64,
}

/// Shared service metrics.
pub struct Metrics {
    started_at: Instant,
    /// Successful per-folder mailbox checks.
    pub mailbox_checks: AtomicU64,
    /// Messages fetched from the source.
    pub messages_received: AtomicU64,
    /// Mail-source errors (connect, fetch, tick panics).
    pub mail_errors: AtomicU64,
    /// Messages dropped because the outbound queue was full.
    pub queue_full_drops: AtomicU64,
    /// Successful sends to the sink.
    pub sends: AtomicU64,
    /// Failed send attempts (one per attempt, not per message).
    pub send_errors: AtomicU64,
    /// Per-tick processing duration.
    pub tick_duration: Histogram,
    /// Per-send latency.
    pub send_duration: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            mailbox_checks: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            mail_errors: AtomicU64::new(0),
            queue_full_drops: AtomicU64::new(0),
            sends: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            tick_duration: Histogram::exponential(0.1, 2.0, 10),
            send_duration: Histogram::exponential(0.05, 2.0, 12),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.uptime().as_secs_f64(),
            mailbox_checks: self.mailbox_checks.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            mail_errors: self.mail_errors.load(Ordering::Relaxed),
            queue_full_drops: self.queue_full_drops.load(Ordering::Relaxed),
            sends: self.sends.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            tick_duration: self.tick_duration.snapshot(),
            send_duration: self.send_duration.snapshot(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: f64,
    pub mailbox_checks: u64,
    pub messages_received: u64,
    pub mail_errors: u64,
    pub queue_full_drops: u64,
    pub sends: u64,
    pub send_errors: u64,
    pub tick_duration: HistogramSnapshot,
    pub send_duration: HistogramSnapshot,
}

// ── HTTP surface ────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: f64,
}

async fn healthz(State(metrics): State<Arc<Metrics>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: metrics.uptime().as_secs_f64(),
    })
}

async fn metrics_endpoint(State(metrics): State<Arc<Metrics>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

/// Build the health/metrics router.
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .with_state(metrics)
}
