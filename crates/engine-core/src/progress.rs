use serde::Serialize;
use std::{
    collections::BTreeMap,
    error::Error,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tracing::warn;

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

pub type ProgressCallback =
    Arc<dyn Fn(&ProgressSnapshot) -> Result<(), Box<dyn Error + Send + Sync>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChunkPhase {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for ChunkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkPhase::Running => f.write_str("Running"),
            ChunkPhase::Completed => f.write_str("Completed"),
            ChunkPhase::Failed => f.write_str("Failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkProgress {
    pub phase: ChunkPhase,
    pub rows_processed: u64,
    pub rows_succeeded: u64,
    pub rows_failed: u64,
}

/// Point-in-time copy of the tracker's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub chunks_total: usize,
    pub chunks_started: usize,
    pub chunks_completed: usize,
    pub chunks_failed: usize,
    pub rows_processed: u64,
    pub rows_succeeded: u64,
    pub rows_failed: u64,
    pub elapsed: Duration,
    /// `None` until the first chunk completed.
    pub estimated_remaining: Option<Duration>,
    pub chunks: BTreeMap<usize, ChunkProgress>,
}

impl ProgressSnapshot {
    pub fn chunks_finished(&self) -> usize {
        self.chunks_completed + self.chunks_failed
    }
}

#[derive(Debug, Default)]
struct Counters {
    chunks_total: usize,
    chunks_started: usize,
    chunks_completed: usize,
    chunks_failed: usize,
    rows_processed: u64,
    rows_succeeded: u64,
    rows_failed: u64,
    chunks: BTreeMap<usize, ChunkProgress>,
    last_emit: Option<Instant>,
}

/// Shared progress counters for one run.
///
/// Workers report through `&self`; the callback runs outside the lock, on
/// whichever task crosses the interval boundary.
pub struct ProgressTracker {
    started_at: Instant,
    interval: Duration,
    counters: Mutex<Counters>,
    callback: Option<ProgressCallback>,
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("interval", &self.interval)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new(chunks_total: usize) -> Self {
        ProgressTracker {
            started_at: Instant::now(),
            interval: DEFAULT_PROGRESS_INTERVAL,
            counters: Mutex::new(Counters {
                chunks_total,
                ..Counters::default()
            }),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // Counters stay usable even if a reporting task panicked.
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_total_chunks(&self, total: usize) {
        self.lock().chunks_total = total;
    }

    pub fn chunk_started(&self, index: usize) {
        let mut counters = self.lock();
        counters.chunks_started += 1;
        counters.chunks.insert(
            index,
            ChunkProgress {
                phase: ChunkPhase::Running,
                rows_processed: 0,
                rows_succeeded: 0,
                rows_failed: 0,
            },
        );
    }

    /// Adds the counts of one processed batch.
    pub fn record_rows(&self, index: usize, processed: u64, succeeded: u64, failed: u64) {
        {
            let mut counters = self.lock();
            counters.rows_processed += processed;
            counters.rows_succeeded += succeeded;
            counters.rows_failed += failed;
            let chunk = counters.chunks.entry(index).or_insert(ChunkProgress {
                phase: ChunkPhase::Running,
                rows_processed: 0,
                rows_succeeded: 0,
                rows_failed: 0,
            });
            chunk.rows_processed += processed;
            chunk.rows_succeeded += succeeded;
            chunk.rows_failed += failed;
        }
        self.maybe_notify();
    }

    pub fn chunk_completed(&self, index: usize) {
        self.finish_chunk(index, ChunkPhase::Completed);
    }

    /// Marks a chunk failed. `rows` counts rows the chunk was expected to
    /// deliver but did not.
    pub fn chunk_failed(&self, index: usize, rows: u64) {
        {
            let mut counters = self.lock();
            counters.rows_failed += rows;
            if let Some(chunk) = counters.chunks.get_mut(&index) {
                chunk.rows_failed += rows;
            }
        }
        self.finish_chunk(index, ChunkPhase::Failed);
    }

    fn finish_chunk(&self, index: usize, phase: ChunkPhase) {
        {
            let mut counters = self.lock();
            match phase {
                ChunkPhase::Completed => counters.chunks_completed += 1,
                ChunkPhase::Failed => counters.chunks_failed += 1,
                ChunkPhase::Running => {}
            }
            let chunk = counters.chunks.entry(index).or_insert(ChunkProgress {
                phase,
                rows_processed: 0,
                rows_succeeded: 0,
                rows_failed: 0,
            });
            chunk.phase = phase;
        }
        self.maybe_notify();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let counters = self.lock();
        self.snapshot_of(&counters)
    }

    fn snapshot_of(&self, counters: &Counters) -> ProgressSnapshot {
        let elapsed = self.started_at.elapsed();
        let estimated_remaining = (counters.chunks_completed > 0).then(|| {
            let remaining = counters
                .chunks_total
                .saturating_sub(counters.chunks_completed + counters.chunks_failed);
            elapsed.div_f64(counters.chunks_completed as f64).mul_f64(remaining as f64)
        });

        ProgressSnapshot {
            chunks_total: counters.chunks_total,
            chunks_started: counters.chunks_started,
            chunks_completed: counters.chunks_completed,
            chunks_failed: counters.chunks_failed,
            rows_processed: counters.rows_processed,
            rows_succeeded: counters.rows_succeeded,
            rows_failed: counters.rows_failed,
            elapsed,
            estimated_remaining,
            chunks: counters.chunks.clone(),
        }
    }

    fn maybe_notify(&self) {
        if self.callback.is_none() {
            return;
        }
        let snapshot = {
            let mut counters = self.lock();
            let now = Instant::now();
            let due = counters
                .last_emit
                .is_none_or(|last| now.duration_since(last) >= self.interval);
            if !due {
                return;
            }
            counters.last_emit = Some(now);
            self.snapshot_of(&counters)
        };
        self.emit(&snapshot);
    }

    /// Fires the callback regardless of the interval, e.g. once a run ends.
    pub fn flush(&self) {
        if self.callback.is_none() {
            return;
        }
        let snapshot = {
            let mut counters = self.lock();
            counters.last_emit = Some(Instant::now());
            self.snapshot_of(&counters)
        };
        self.emit(&snapshot);
    }

    fn emit(&self, snapshot: &ProgressSnapshot) {
        let Some(callback) = &self.callback else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| callback(snapshot))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Progress callback failed"),
            Err(_) => warn!("Progress callback panicked"),
        }
    }
}
