use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Running counters shared by executors and detectors.
#[derive(Default, Debug)]
pub struct Telemetry {
    chunks_completed: AtomicU64,
    chunk_retries: AtomicU64,
    chunk_failures: AtomicU64,
    logs_fetched: AtomicU64,
    candidates_verified: AtomicU64,
    candidates_discarded: AtomicU64,
    bundles_found: AtomicU64,
}

impl Telemetry {
    pub fn record_chunk_completed(&self, logs: u64) {
        self.chunks_completed.fetch_add(1, Ordering::Relaxed);
        self.logs_fetched.fetch_add(logs, Ordering::Relaxed);
    }

    pub fn record_chunk_retry(&self) {
        self.chunk_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_failure(&self) {
        self.chunk_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_candidate_verified(&self) {
        self.candidates_verified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_candidate_discarded(&self) {
        self.candidates_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bundle_found(&self) {
        self.bundles_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            chunks_completed: self.chunks_completed.load(Ordering::Relaxed),
            chunk_retries: self.chunk_retries.load(Ordering::Relaxed),
            chunk_failures: self.chunk_failures.load(Ordering::Relaxed),
            logs_fetched: self.logs_fetched.load(Ordering::Relaxed),
            candidates_verified: self.candidates_verified.load(Ordering::Relaxed),
            candidates_discarded: self.candidates_discarded.load(Ordering::Relaxed),
            bundles_found: self.bundles_found.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub chunks_completed: u64,
    pub chunk_retries: u64,
    pub chunk_failures: u64,
    pub logs_fetched: u64,
    pub candidates_verified: u64,
    pub candidates_discarded: u64,
    pub bundles_found: u64,
}

/// Spawns a task that logs chunk throughput and bundle counters every `interval`
/// until `shutdown` fires.
pub fn spawn_progress_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "rangelog::progress", "progress reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let chunk_delta = current
                        .chunks_completed
                        .saturating_sub(last_snapshot.chunks_completed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let chunks_per_sec = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        chunk_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "rangelog::progress",
                        chunks_per_sec = format!("{chunks_per_sec:.2}"),
                        chunks_completed = current.chunks_completed,
                        chunk_retries = current.chunk_retries,
                        chunk_failures = current.chunk_failures,
                        logs_fetched = current.logs_fetched,
                        candidates_verified = current.candidates_verified,
                        candidates_discarded = current.candidates_discarded,
                        bundles_found = current.bundles_found,
                        "scan progress"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
