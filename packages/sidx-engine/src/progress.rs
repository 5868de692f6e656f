//! Progress reporting for long-running index builds.
//!
//! A [`ProgressMeter`] is a monotonic hit counter with coarse reporting:
//! one `info` event each time another 10% of the expected total is
//! consumed, and one on completion. Counting is lock-free.
//!
//! # Example
//!
//! ```
//! use sidx::progress::ProgressMeter;
//!
//! let pm = ProgressMeter::new("Index: (2/3) BTree Bottom Up Progress", 4);
//! for _ in 0..4 {
//!     pm.hit();
//! }
//! pm.finished();
//! assert_eq!(pm.hits(), 4);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Percent of the total between two progress reports.
const REPORT_STEP_PCT: u64 = 10;

/// Monotonic progress counter.
pub struct ProgressMeter {
    name: String,
    total: AtomicU64,
    hits: AtomicU64,
    /// Last reported step (`pct / REPORT_STEP_PCT`).
    last_step: AtomicU64,
    finished: AtomicBool,
    started_at: Instant,
}

/// Point-in-time copy of a meter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub name: String,
    pub hits: u64,
    pub total: u64,
    pub elapsed_ms: u64,
    pub finished: bool,
}

impl ProgressMeter {
    /// `total` is the expected number of hits; 0 disables percentage reports.
    pub fn new(name: &str, total: u64) -> Self {
        Self {
            name: name.to_string(),
            total: AtomicU64::new(total),
            hits: AtomicU64::new(0),
            last_step: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Count one unit of work. Returns the new hit count.
    pub fn hit(&self) -> u64 {
        let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total.load(Ordering::Relaxed);
        if total > 0 {
            let pct = hits.saturating_mul(100) / total;
            let step = pct / REPORT_STEP_PCT;
            let prev = self.last_step.fetch_max(step, Ordering::Relaxed);
            if step > prev {
                tracing::info!(name = %self.name, hits, total, pct, "progress");
            }
        }
        hits
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    /// Mark complete. Only the first call reports.
    pub fn finished(&self) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            tracing::info!(
                name = %self.name,
                hits = self.hits(),
                elapsed_ms = self.started_at.elapsed().as_millis() as u64,
                "finished"
            );
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            name: self.name.clone(),
            hits: self.hits(),
            total: self.total(),
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            finished: self.is_finished(),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
