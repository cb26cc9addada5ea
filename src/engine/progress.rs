use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Byte and connection counters shared by every download of one run.
///
/// Writers are the download tasks, the single reader is the sampler.
#[derive(Debug, Default)]
pub struct TransferProgress {
    bytes: AtomicU64,
    connections: AtomicUsize,
}

impl TransferProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Connections that received a successful response so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn sample(&self) -> ProgressSample {
        ProgressSample {
            bytes: self.total_bytes(),
            at: Instant::now(),
        }
    }
}

/// Cumulative byte count at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSample {
    pub bytes: u64,
    pub at: Instant,
}

impl ProgressSample {
    /// Kilobits per second transferred between `earlier` and `self`.
    pub fn kbps_since(&self, earlier: &ProgressSample) -> f64 {
        kbps(
            self.bytes.saturating_sub(earlier.bytes),
            self.at.saturating_duration_since(earlier.at),
        )
    }
}

pub fn kbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / (secs * 1_000.0)
}
