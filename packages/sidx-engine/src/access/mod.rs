//! Index access method: keeps a sorted index in step with its documents.
//!
//! Single-document maintenance (insert, remove, two-phase update) runs inside
//! the caller's unit of work. Bulk construction drains an external sort
//! stream into the store's bottom-up builder, one unit per entry.

pub mod ticket;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bulk::{BulkBuilder, BulkCommitStats, BulkRecord};
use crate::catalog::{IndexCatalogEntry, IndexSpec};
use crate::config::EngineConfig;
use crate::delta;
use crate::error::{IndexError, Result};
use crate::key::{Key, KeyOrdering, RecordId};
use crate::keygen::{Document, KeyExtractor};
use crate::store::{
    CursorDirection, SortedBuilder, SortedCursor, SortedDataStore, ValidateReport,
};
use crate::txn::{write_conflict_retry, OperationContext, UndoTracking, WriteUnitOfWork};

pub use ticket::{SortedUpdatePlan, UpdatePlan, UpdateTicket};

/// Builds slower than this report their completion at info level.
const SLOW_BULK_COMMIT: Duration = Duration::from_secs(10);

/// Per-call write options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertDeleteOptions {
    /// Accept order-equal keys under different record ids on a unique index.
    pub dups_allowed: bool,
}

impl InsertDeleteOptions {
    pub fn dups_allowed() -> Self {
        Self { dups_allowed: true }
    }
}

/// Maintenance front-end for one sorted index.
pub struct IndexAccessMethod {
    entry: Arc<IndexCatalogEntry>,
    store: Arc<dyn SortedDataStore>,
    extractor: Arc<dyn KeyExtractor>,
    ordering: KeyOrdering,
    config: EngineConfig,
}

impl IndexAccessMethod {
    pub fn new(
        entry: Arc<IndexCatalogEntry>,
        store: Arc<dyn SortedDataStore>,
        extractor: Arc<dyn KeyExtractor>,
        config: EngineConfig,
    ) -> Self {
        let ordering = entry.descriptor().ordering();
        Self {
            entry,
            store,
            extractor,
            ordering,
            config,
        }
    }

    pub fn descriptor(&self) -> &IndexSpec {
        self.entry.descriptor()
    }

    pub fn entry(&self) -> &Arc<IndexCatalogEntry> {
        &self.entry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Oversized keys are skipped instead of failing the write when this
    /// node is not primary for the namespace, or when configured to.
    pub fn ignore_key_too_long(&self, ctx: &dyn OperationContext) -> bool {
        !ctx.is_primary_for(self.entry.ns()) || !self.config.fail_index_key_too_long
    }

    // ── Single-document maintenance ────────────────────────────────

    /// Index every key of `doc` under `rid`. Returns the number of keys
    /// written.
    ///
    /// On a fatal store error the keys already written by this call are
    /// removed again before the error is returned.
    pub fn insert(
        &self,
        ctx: &dyn OperationContext,
        doc: &Document,
        rid: RecordId,
        options: &InsertDeleteOptions,
    ) -> Result<u64> {
        let keys = self.extractor.keys_for(doc)?;
        let mut inserted: Vec<&Key> = Vec::with_capacity(keys.len());

        for key in &keys {
            let err = match self.store.insert(ctx, key, rid, options.dups_allowed) {
                Ok(()) => {
                    inserted.push(key);
                    continue;
                }
                Err(e) => e,
            };

            if err.is_key_too_long() && self.ignore_key_too_long(ctx) {
                tracing::debug!(index = %self.descriptor().index_namespace(), key = %key, "skipping key too long");
                continue;
            }

            // A document can be indexed twice while a background build
            // races ahead of the collection scan. Only the exact entry is
            // tolerated; another record's key still violates uniqueness.
            if err.is_duplicate_key_value() && !self.entry.is_ready() {
                tracing::debug!(key = %key, "key already in index during background indexing (ok)");
                continue;
            }

            for done in &inserted {
                if let Err(undo_err) = self.remove_one_key(ctx, done, rid, options.dups_allowed) {
                    tracing::warn!(
                        index = %self.descriptor().index_namespace(),
                        key = %done,
                        %rid,
                        error = %undo_err,
                        "failed to undo partial insert"
                    );
                }
            }
            return Err(err);
        }

        if inserted.len() > 1 {
            self.entry.set_multikey();
        }
        Ok(inserted.len() as u64)
    }

    /// Remove one entry. Store corruption is logged and absorbed; every
    /// other error propagates.
    pub fn remove_one_key(
        &self,
        ctx: &dyn OperationContext,
        key: &Key,
        rid: RecordId,
        dups_allowed: bool,
    ) -> Result<()> {
        match self.store.unindex(ctx, key, rid, dups_allowed) {
            Err(IndexError::Corruption(msg)) => {
                tracing::error!(
                    index = %self.descriptor().index_namespace(),
                    key = %key,
                    %rid,
                    error = %msg,
                    "unindex failed, ignoring"
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Remove every key of `doc` for `rid`. Returns the number of keys.
    pub fn remove(
        &self,
        ctx: &dyn OperationContext,
        doc: &Document,
        rid: RecordId,
        options: &InsertDeleteOptions,
    ) -> Result<u64> {
        let keys = self.extractor.keys_for(doc)?;
        for key in &keys {
            self.remove_one_key(ctx, key, rid, options.dups_allowed)?;
        }
        Ok(keys.len() as u64)
    }

    /// Plan an update from `from` to `to`. Touches nothing.
    pub fn validate_update(
        &self,
        _ctx: &dyn OperationContext,
        from: &Document,
        to: &Document,
        rid: RecordId,
        options: &InsertDeleteOptions,
    ) -> Result<UpdateTicket> {
        let old_keys = self.extractor.keys_for(from)?;
        let new_keys = self.extractor.keys_for(to)?;
        let delta = delta::diff(&old_keys, &new_keys);

        Ok(UpdateTicket::new(UpdatePlan::Sorted(SortedUpdatePlan {
            old_keys,
            new_keys,
            delta,
            record_id: rid,
            dups_allowed: options.dups_allowed,
        })))
    }

    /// Apply a planned update. Returns the number of keys added.
    ///
    /// Removals happen first. An insertion failure returns immediately and
    /// leaves the removals applied; the enclosing unit of work owns rollback.
    /// The ticket is spent either way.
    pub fn update(&self, ctx: &dyn OperationContext, ticket: &mut UpdateTicket) -> Result<u64> {
        let plan = match ticket.take_plan() {
            Some(UpdatePlan::Sorted(plan)) => plan,
            None => {
                return Err(IndexError::InvalidState(
                    "invalid update ticket in update".to_string(),
                ))
            }
        };

        if plan.keys_after() > 1 {
            self.entry.set_multikey();
        }

        for key in &plan.delta.removed {
            self.store.unindex(ctx, key, plan.record_id, plan.dups_allowed)?;
        }
        for key in &plan.delta.added {
            self.store.insert(ctx, key, plan.record_id, plan.dups_allowed)?;
        }

        Ok(plan.delta.added.len() as u64)
    }

    // ── Lookup and passthroughs ────────────────────────────────────

    /// Record id of the first entry whose key is order-equal to `key`.
    pub fn find_single(&self, ctx: &dyn OperationContext, key: &Key) -> Result<Option<RecordId>> {
        let mut cursor = self.store.new_cursor(ctx, CursorDirection::Forward);
        cursor.locate(key, RecordId::MIN)?;

        if cursor.is_eof() {
            return Ok(None);
        }
        match cursor.key() {
            Some(found) if self.ordering.keys_equal(key, found) => Ok(cursor.record_id()),
            _ => Ok(None),
        }
    }

    pub fn new_cursor<'a>(
        &'a self,
        ctx: &dyn OperationContext,
        direction: CursorDirection,
    ) -> Box<dyn SortedCursor + 'a> {
        self.store.new_cursor(ctx, direction)
    }

    /// Page in the index entries `doc` would use.
    pub fn touch_document(&self, ctx: &dyn OperationContext, doc: &Document) -> Result<()> {
        let keys = self.extractor.keys_for(doc)?;
        let mut cursor = self.store.new_cursor(ctx, CursorDirection::Forward);
        for key in &keys {
            cursor.locate(key, RecordId::MIN)?;
        }
        Ok(())
    }

    pub fn touch(&self, ctx: &dyn OperationContext) -> Result<()> {
        self.store.touch(ctx)
    }

    pub fn validate(&self, ctx: &dyn OperationContext, full: bool) -> Result<ValidateReport> {
        self.store.full_validate(ctx, full)
    }

    pub fn append_custom_stats(
        &self,
        ctx: &dyn OperationContext,
        out: &mut serde_json::Map<String, serde_json::Value>,
        scale: f64,
    ) -> bool {
        self.store.append_custom_stats(ctx, out, scale)
    }

    pub fn space_used_bytes(&self, ctx: &dyn OperationContext) -> u64 {
        self.store.space_used_bytes(ctx)
    }

    pub fn initialize_as_empty(&self, ctx: &dyn OperationContext) -> Result<()> {
        self.store.init_as_empty(ctx)
    }

    // ── Bulk build ─────────────────────────────────────────────────

    pub fn initiate_bulk(&self) -> BulkBuilder {
        BulkBuilder::new(
            Arc::clone(&self.extractor),
            self.ordering.clone(),
            self.config.bulk_sort.clone(),
        )
    }

    /// Drain `bulk` into the store bottom-up.
    ///
    /// Each entry is added in its own unit of work with undo tracking
    /// disabled; nothing is rolled back on failure and a partial index is
    /// the caller's to drop. With `dups_allowed == false`, duplicate entries
    /// either go to `dups_to_drop` (and are skipped) or fail the build.
    pub fn commit_bulk(
        &self,
        ctx: &dyn OperationContext,
        bulk: BulkBuilder,
        may_interrupt: bool,
        dups_allowed: bool,
        mut dups_to_drop: Option<&mut BTreeSet<RecordId>>,
    ) -> Result<BulkCommitStats> {
        let started = Instant::now();
        let ns = self.descriptor().index_namespace();
        let is_multikey = bulk.is_multikey();
        let keys_inserted = bulk.keys_inserted();
        let records = bulk.into_sorted()?;

        let pm = ctx.start_progress(
            "Index Bulk Build: (2/3) btree bottom up",
            "Index: (2/3) BTree Bottom Up Progress",
            keys_inserted,
        );

        let mut builder = write_conflict_retry(ctx, "setting index multikey flag", &ns, || {
            let wunit = WriteUnitOfWork::begin(ctx, UndoTracking::Enabled);
            if is_multikey {
                self.entry.set_multikey();
            }
            let builder = self.store.bulk_builder(ctx, dups_allowed)?;
            wunit.commit();
            Ok(builder)
        })?;

        let mut stats = BulkCommitStats::default();
        for record in records {
            let BulkRecord { key, rid } = record?;
            if may_interrupt {
                ctx.check_for_interrupt()?;
            }
            stats.records_consumed += 1;
            pm.hit();

            // The index is discarded wholesale if the build fails, so the
            // per-entry units keep no undo log.
            let added = write_conflict_retry(ctx, "bulk index build", &ns, || {
                let wunit = WriteUnitOfWork::begin(ctx, UndoTracking::Disabled);
                builder.add_key(ctx, &key, rid)?;
                wunit.commit();
                Ok(())
            });

            match added {
                Ok(()) => stats.keys_added += 1,
                Err(e) if e.is_key_too_long() && self.ignore_key_too_long(ctx) => {
                    stats.too_long_skipped += 1;
                }
                Err(e) if e.is_duplicate_key() && !dups_allowed => match dups_to_drop.as_deref_mut() {
                    Some(sink) => {
                        sink.insert(rid);
                        stats.duplicates_dropped += 1;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
        pm.finished();

        ctx.set_message("Index Bulk Build: (3/3) btree-middle");
        builder.commit(ctx, may_interrupt)?;

        stats.elapsed = started.elapsed();
        let elapsed_ms = stats.elapsed.as_millis() as u64;
        if stats.elapsed > SLOW_BULK_COMMIT {
            tracing::info!(index = %ns, elapsed_ms, keys = stats.keys_added, "done building bottom layer");
        } else {
            tracing::debug!(index = %ns, elapsed_ms, keys = stats.keys_added, "done building bottom layer");
        }
        Ok(stats)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
