use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
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
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters shared by the fetch client, the coordinators,
/// and the dispatcher.
#[derive(Default, Debug)]
pub struct Telemetry {
    fetch_retries: AtomicU64,
    blocks_detected: AtomicU64,
    pauses_triggered: AtomicU64,
    rotations_performed: AtomicU64,
    rotation_waits: AtomicU64,
    targets_settled: AtomicU64,
    stories_saved: AtomicU64,
}

impl Telemetry {
    pub fn record_fetch_retry(&self) {
        self.fetch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_detected(&self) {
        self.blocks_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pause_triggered(&self) {
        self.pauses_triggered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rotation_performed(&self) {
        self.rotations_performed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rotation_wait(&self) {
        self.rotation_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_target_settled(&self) {
        self.targets_settled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stories_saved(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.stories_saved.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
            blocks_detected: self.blocks_detected.load(Ordering::Relaxed),
            pauses_triggered: self.pauses_triggered.load(Ordering::Relaxed),
            rotations_performed: self.rotations_performed.load(Ordering::Relaxed),
            rotation_waits: self.rotation_waits.load(Ordering::Relaxed),
            targets_settled: self.targets_settled.load(Ordering::Relaxed),
            stories_saved: self.stories_saved.load(Ordering::Relaxed),
        }
    }

    pub fn rotations_performed(&self) -> u64 {
        self.rotations_performed.load(Ordering::Relaxed)
    }

    pub fn blocks_detected(&self) -> u64 {
        self.blocks_detected.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub fetch_retries: u64,
    pub blocks_detected: u64,
    pub pauses_triggered: u64,
    pub rotations_performed: u64,
    pub rotation_waits: u64,
    pub targets_settled: u64,
    pub stories_saved: u64,
}
