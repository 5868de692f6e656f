//! Transaction context: units of work, write-conflict retry, interruption.
//!
//! The engine takes no locks of its own. Isolation comes from the
//! [`OperationContext`] the caller supplies; the engine only opens units of
//! work, registers undo actions through the store, and retries whole units
//! on write conflict.
//!
//! [`LocalOperationContext`] is a self-contained implementation used by the
//! bulk tool and the tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{IndexError, Result};
use crate::progress::ProgressMeter;

/// Compensating action replayed when a unit of work aborts.
pub type UndoAction = Box<dyn FnOnce() + Send>;

/// Whether a unit of work records undo actions.
///
/// `Disabled` is only sound when everything the unit writes is discarded
/// wholesale on failure, as with an index that is still being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UndoTracking {
    #[default]
    Enabled,
    Disabled,
}

/// Execution context of one index-maintenance call.
pub trait OperationContext: Send + Sync {
    /// True when this process is the authoritative writer for `ns`.
    fn is_primary_for(&self, ns: &str) -> bool;

    /// `Err(Interrupted)` once the caller asked the operation to stop.
    fn check_for_interrupt(&self) -> Result<()>;

    fn begin_unit(&self, undo: UndoTracking);

    fn commit_unit(&self);

    fn abort_unit(&self);

    /// Record how to undo a write made inside the current unit.
    fn register_undo(&self, undo: UndoAction);

    /// Current-operation status line.
    fn set_message(&self, _msg: &str) {}

    /// Set the status line and attach a fresh meter expecting `total` hits.
    /// Observers read the attached meter through [`progress`](Self::progress).
    fn start_progress(&self, msg: &str, meter_name: &str, total: u64) -> Arc<ProgressMeter> {
        self.set_message(msg);
        Arc::new(ProgressMeter::new(meter_name, total))
    }

    /// Meter attached by the last `start_progress`, if the context keeps one.
    fn progress(&self) -> Option<Arc<ProgressMeter>> {
        None
    }
}

// ── WriteUnitOfWork ────────────────────────────────────────────────

/// RAII unit of work. Dropping without `commit()` aborts.
pub struct WriteUnitOfWork<'a> {
    ctx: &'a dyn OperationContext,
    committed: bool,
}

impl<'a> WriteUnitOfWork<'a> {
    pub fn begin(ctx: &'a dyn OperationContext, undo: UndoTracking) -> Self {
        ctx.begin_unit(undo);
        Self {
            ctx,
            committed: false,
        }
    }

    pub fn commit(mut self) {
        self.committed = true;
        self.ctx.commit_unit();
    }
}

impl Drop for WriteUnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.ctx.abort_unit();
        }
    }
}

// ── Write conflict retry ───────────────────────────────────────────

/// Run `body` until it finishes with anything other than a write conflict.
///
/// The body must re-derive all of its work from scratch; it is re-run whole.
/// Attempts are unbounded, but interruption is checked before every retry.
pub fn write_conflict_retry<T>(
    ctx: &dyn OperationContext,
    op: &str,
    ns: &str,
    mut body: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempts: u32 = 0;
    loop {
        match body() {
            Err(IndexError::WriteConflict) => {
                attempts += 1;
                tracing::debug!(op, ns, attempts, "write conflict, retrying unit of work");
                backoff(attempts);
                ctx.check_for_interrupt()?;
            }
            other => return other,
        }
    }
}

fn backoff(attempts: u32) {
    match attempts {
        0..=3 => std::thread::yield_now(),
        4..=99 => std::thread::sleep(Duration::from_millis(1)),
        _ => std::thread::sleep(Duration::from_millis(5)),
    }
}

// ── LocalOperationContext ──────────────────────────────────────────

/// Counters over top-level units of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitStats {
    pub begun: u64,
    pub committed: u64,
    pub aborted: u64,
    /// Top-level units begun with undo tracking disabled.
    pub undo_disabled: u64,
    /// Undo actions replayed by aborts.
    pub undo_replayed: u64,
}

struct UnitState {
    depth: usize,
    tracking: UndoTracking,
    log: Vec<UndoAction>,
    stats: UnitStats,
}

/// In-process operation context.
///
/// Nested units commit only at the outermost level. Aborting any unit
/// replays every undo action registered since the outermost unit began.
pub struct LocalOperationContext {
    primary: AtomicBool,
    interrupt: Arc<AtomicBool>,
    state: Mutex<UnitState>,
    message: Mutex<String>,
    progress: Mutex<Option<Arc<ProgressMeter>>>,
}

impl LocalOperationContext {
    /// Primary context, not interrupted.
    pub fn new() -> Self {
        Self {
            primary: AtomicBool::new(true),
            interrupt: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(UnitState {
                depth: 0,
                tracking: UndoTracking::Enabled,
                log: Vec::new(),
                stats: UnitStats::default(),
            }),
            message: Mutex::new(String::new()),
            progress: Mutex::new(None),
        }
    }

    /// Context acting as a non-authoritative replica.
    pub fn secondary() -> Self {
        let ctx = Self::new();
        ctx.set_primary(false);
        ctx
    }

    pub fn set_primary(&self, primary: bool) {
        self.primary.store(primary, Ordering::Release);
    }

    /// Request interruption of the running operation.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Release);
    }

    /// Shared flag, e.g. for a signal handler.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    pub fn unit_stats(&self) -> UnitStats {
        self.lock_state().stats
    }

    pub fn in_unit(&self) -> bool {
        self.lock_state().depth > 0
    }

    pub fn message(&self) -> String {
        self.message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, UnitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replay(log: Vec<UndoAction>) -> u64 {
        let n = log.len() as u64;
        for undo in log.into_iter().rev() {
            undo();
        }
        n
    }
}

impl Default for LocalOperationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationContext for LocalOperationContext {
    fn is_primary_for(&self, _ns: &str) -> bool {
        self.primary.load(Ordering::Acquire)
    }

    fn check_for_interrupt(&self) -> Result<()> {
        if self.interrupt.load(Ordering::Acquire) {
            Err(IndexError::Interrupted)
        } else {
            Ok(())
        }
    }

    fn begin_unit(&self, undo: UndoTracking) {
        let mut state = self.lock_state();
        if state.depth == 0 {
            state.tracking = undo;
            state.stats.begun += 1;
            if undo == UndoTracking::Disabled {
                state.stats.undo_disabled += 1;
            }
        }
        state.depth += 1;
    }

    fn commit_unit(&self) {
        let mut state = self.lock_state();
        if state.depth == 0 {
            tracing::warn!("commit without an open unit of work");
            return;
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.log.clear();
            state.stats.committed += 1;
        }
    }

    fn abort_unit(&self) {
        // Undo actions run without the state lock held.
        let log = {
            let mut state = self.lock_state();
            if state.depth == 0 {
                tracing::warn!("abort without an open unit of work");
                return;
            }
            state.depth -= 1;
            if state.depth == 0 {
                state.stats.aborted += 1;
            }
            std::mem::take(&mut state.log)
        };
        let replayed = Self::replay(log);
        self.lock_state().stats.undo_replayed += replayed;
    }

    fn register_undo(&self, undo: UndoAction) {
        let mut state = self.lock_state();
        if state.depth > 0 && state.tracking == UndoTracking::Enabled {
            state.log.push(undo);
        }
    }

    fn set_message(&self, msg: &str) {
        tracing::info!("{}", msg);
        *self.message.lock().unwrap_or_else(PoisonError::into_inner) = msg.to_string();
    }

    fn start_progress(&self, msg: &str, meter_name: &str, total: u64) -> Arc<ProgressMeter> {
        self.set_message(msg);
        let pm = Arc::new(ProgressMeter::new(meter_name, total));
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&pm));
        pm
    }

    fn progress(&self) -> Option<Arc<ProgressMeter>> {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
