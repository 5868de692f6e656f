//! In-memory sorted store.
//!
//! Entries live in one `Vec` kept sorted by (key, record id) under the
//! index ordering; lookups are binary searches. Every insert and removal
//! made inside a unit of work registers its inverse with the context, so an
//! aborted unit leaves the entry set as it was.
//!
//! Keys are limited by their encoded size (`max_key_bytes`). Unique stores
//! reject an order-equal key held by a different record unless the caller
//! allows duplicates.

use std::cmp::Ordering;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::catalog::IndexSpec;
use crate::error::{IndexError, Result};
use crate::key::{Key, KeyOrdering, RecordId};
use crate::store::{
    CursorDirection, SortedBuilder, SortedCursor, SortedDataStore, ValidateReport,
};
use crate::txn::OperationContext;

/// Default key size limit in bytes.
pub const DEFAULT_MAX_KEY_BYTES: usize = 1024;

/// Per-entry overhead counted by `space_used_bytes` (record id).
const ENTRY_OVERHEAD_BYTES: u64 = 8;

#[derive(Debug, Clone)]
struct Entry {
    key: Key,
    rid: RecordId,
    size: usize,
}

struct Inner {
    ident: String,
    ordering: KeyOrdering,
    unique: bool,
    max_key_bytes: usize,
    entries: RwLock<Vec<Entry>>,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, Vec<Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn cmp_entry(&self, e: &Entry, key: &Key, rid: RecordId) -> Ordering {
        self.ordering.compare_entries(&e.key, e.rid, key, rid)
    }

    fn search(&self, entries: &[Entry], key: &Key, rid: RecordId) -> std::result::Result<usize, usize> {
        entries.binary_search_by(|e| self.cmp_entry(e, key, rid))
    }

    /// Encoded size of `key`, or `KeyTooLong`.
    fn sized(&self, key: &Key) -> Result<usize> {
        let len = key.encoded_len()?;
        if len > self.max_key_bytes {
            return Err(IndexError::KeyTooLong {
                index: self.ident.clone(),
                len,
                max: self.max_key_bytes,
            });
        }
        Ok(len)
    }

    /// True when an order-equal key is held by a record other than `rid`.
    fn has_dup(&self, entries: &[Entry], key: &Key, rid: RecordId) -> bool {
        let start = entries.partition_point(|e| self.ordering.compare(&e.key, key) == Ordering::Less);
        entries[start..]
            .iter()
            .take_while(|e| self.ordering.keys_equal(&e.key, key))
            .any(|e| e.rid != rid)
    }

    /// Returns false if the exact entry already exists.
    fn insert_entry(&self, entry: Entry) -> bool {
        let mut entries = self.write();
        match self.search(&entries, &entry.key, entry.rid) {
            Ok(_) => false,
            Err(pos) => {
                entries.insert(pos, entry);
                true
            }
        }
    }

    fn remove_entry(&self, key: &Key, rid: RecordId) -> Option<Entry> {
        let mut entries = self.write();
        match self.search(&entries, key, rid) {
            Ok(pos) => Some(entries.remove(pos)),
            Err(_) => None,
        }
    }

    fn duplicate_error(&self, key: &Key) -> IndexError {
        IndexError::DuplicateKey {
            index: self.ident.clone(),
            key: key.to_string(),
        }
    }

    fn duplicate_value_error(&self, key: &Key, rid: RecordId) -> IndexError {
        IndexError::DuplicateKeyValue {
            index: self.ident.clone(),
            key: key.to_string(),
            rid: rid.get(),
        }
    }
}

/// In-process [`SortedDataStore`].
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new(spec: &IndexSpec) -> Self {
        Self::with_max_key_bytes(spec, DEFAULT_MAX_KEY_BYTES)
    }

    pub fn with_max_key_bytes(spec: &IndexSpec, max_key_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                ident: spec.index_namespace(),
                ordering: spec.ordering(),
                unique: spec.unique,
                max_key_bytes,
                entries: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Snapshot of all entries in index order.
    pub fn entries(&self) -> Vec<(Key, RecordId)> {
        self.inner
            .read()
            .iter()
            .map(|e| (e.key.clone(), e.rid))
            .collect()
    }

    pub fn contains(&self, key: &Key, rid: RecordId) -> bool {
        let entries = self.inner.read();
        self.inner.search(&entries, key, rid).is_ok()
    }

    /// Record ids stored under keys order-equal to `key`.
    pub fn record_ids_for(&self, key: &Key) -> Vec<RecordId> {
        self.entries()
            .into_iter()
            .filter(|(k, _)| self.inner.ordering.keys_equal(k, key))
            .map(|(_, rid)| rid)
            .collect()
    }

    fn register_remove(&self, ctx: &dyn OperationContext, key: &Key, rid: RecordId) {
        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        ctx.register_undo(Box::new(move || {
            inner.remove_entry(&key, rid);
        }));
    }

    fn register_reinsert(&self, ctx: &dyn OperationContext, entry: Entry) {
        let inner = Arc::clone(&self.inner);
        ctx.register_undo(Box::new(move || {
            inner.insert_entry(entry);
        }));
    }
}

impl SortedDataStore for MemoryStore {
    fn insert(
        &self,
        ctx: &dyn OperationContext,
        key: &Key,
        rid: RecordId,
        dups_allowed: bool,
    ) -> Result<()> {
        let size = self.inner.sized(key)?;
        {
            let mut entries = self.inner.write();
            let pos = match self.inner.search(&entries, key, rid) {
                Ok(_) => return Err(self.inner.duplicate_value_error(key, rid)),
                Err(pos) => pos,
            };
            if self.inner.unique && !dups_allowed && self.inner.has_dup(&entries, key, rid) {
                return Err(self.inner.duplicate_error(key));
            }
            entries.insert(
                pos,
                Entry {
                    key: key.clone(),
                    rid,
                    size,
                },
            );
        }
        self.register_remove(ctx, key, rid);
        Ok(())
    }

    fn unindex(
        &self,
        ctx: &dyn OperationContext,
        key: &Key,
        rid: RecordId,
        _dups_allowed: bool,
    ) -> Result<()> {
        if let Some(entry) = self.inner.remove_entry(key, rid) {
            self.register_reinsert(ctx, entry);
        }
        Ok(())
    }

    fn new_cursor<'a>(
        &'a self,
        _ctx: &dyn OperationContext,
        direction: CursorDirection,
    ) -> Box<dyn SortedCursor + 'a> {
        Box::new(MemoryCursor {
            inner: Arc::clone(&self.inner),
            direction,
            current: None,
        })
    }

    fn bulk_builder<'a>(
        &'a self,
        _ctx: &dyn OperationContext,
        dups_allowed: bool,
    ) -> Result<Box<dyn SortedBuilder + 'a>> {
        Ok(Box::new(MemoryBuilder {
            store: self.clone(),
            dups_allowed,
            last: None,
            added: 0,
        }))
    }

    fn full_validate(&self, _ctx: &dyn OperationContext, full: bool) -> Result<ValidateReport> {
        let entries = self.inner.read();
        let mut report = ValidateReport {
            num_keys: entries.len() as u64,
            errors: Vec::new(),
        };

        for (i, pair) in entries.windows(2).enumerate() {
            let (a, b) = (&pair[0], &pair[1]);
            if self.inner.cmp_entry(a, &b.key, b.rid) != Ordering::Less {
                report
                    .errors
                    .push(format!("entries {} and {} out of order: {} / {}", i, i + 1, a.key, b.key));
            }
            if self.inner.unique && self.inner.ordering.keys_equal(&a.key, &b.key) {
                report
                    .errors
                    .push(format!("duplicate key {} in unique index ({} / {})", a.key, a.rid, b.rid));
            }
        }

        if full {
            for e in entries.iter() {
                let len = e.key.encoded_len()?;
                if len != e.size || len > self.inner.max_key_bytes {
                    report
                        .errors
                        .push(format!("bad key size for {} at {}: {} bytes", e.key, e.rid, len));
                }
            }
        }

        Ok(report)
    }

    fn append_custom_stats(
        &self,
        ctx: &dyn OperationContext,
        out: &mut serde_json::Map<String, serde_json::Value>,
        scale: f64,
    ) -> bool {
        let scale = if scale > 0.0 { scale } else { 1.0 };
        out.insert("type".to_string(), "memory".into());
        out.insert("entries".to_string(), (self.len() as u64).into());
        out.insert("unique".to_string(), self.inner.unique.into());
        out.insert("maxKeyBytes".to_string(), (self.inner.max_key_bytes as u64).into());
        out.insert(
            "size".to_string(),
            (self.space_used_bytes(ctx) as f64 / scale).into(),
        );
        true
    }

    fn space_used_bytes(&self, _ctx: &dyn OperationContext) -> u64 {
        self.inner
            .read()
            .iter()
            .map(|e| e.size as u64 + ENTRY_OVERHEAD_BYTES)
            .sum()
    }

    fn init_as_empty(&self, _ctx: &dyn OperationContext) -> Result<()> {
        self.inner.write().clear();
        Ok(())
    }

    fn touch(&self, _ctx: &dyn OperationContext) -> Result<()> {
        tracing::trace!(index = %self.inner.ident, entries = self.len(), "touch");
        Ok(())
    }
}

// ── Cursor ─────────────────────────────────────────────────────────

/// Re-seeks from its last position on every step, so concurrent writes
/// never invalidate it.
struct MemoryCursor {
    inner: Arc<Inner>,
    direction: CursorDirection,
    current: Option<(Key, RecordId)>,
}

impl MemoryCursor {
    fn position_at(&mut self, entries: &[Entry], pos: Option<usize>) {
        self.current = pos
            .and_then(|p| entries.get(p))
            .map(|e| (e.key.clone(), e.rid));
    }
}

impl SortedCursor for MemoryCursor {
    fn locate(&mut self, key: &Key, rid: RecordId) -> Result<bool> {
        let inner = Arc::clone(&self.inner);
        let entries = inner.read();
        let pos = match self.direction {
            CursorDirection::Forward => {
                Some(entries.partition_point(|e| inner.cmp_entry(e, key, rid) == Ordering::Less))
            }
            CursorDirection::Backward => entries
                .partition_point(|e| inner.cmp_entry(e, key, rid) != Ordering::Greater)
                .checked_sub(1),
        };
        self.position_at(&entries, pos);
        Ok(self
            .current
            .as_ref()
            .is_some_and(|(k, _)| inner.ordering.keys_equal(k, key)))
    }

    fn is_eof(&self) -> bool {
        self.current.is_none()
    }

    fn key(&self) -> Option<&Key> {
        self.current.as_ref().map(|(k, _)| k)
    }

    fn record_id(&self) -> Option<RecordId> {
        self.current.as_ref().map(|(_, rid)| *rid)
    }

    fn advance(&mut self) -> Result<()> {
        let Some((key, rid)) = self.current.take() else {
            return Ok(());
        };
        let inner = Arc::clone(&self.inner);
        let entries = inner.read();
        let pos = match self.direction {
            CursorDirection::Forward => {
                Some(entries.partition_point(|e| inner.cmp_entry(e, &key, rid) != Ordering::Greater))
            }
            CursorDirection::Backward => entries
                .partition_point(|e| inner.cmp_entry(e, &key, rid) == Ordering::Less)
                .checked_sub(1),
        };
        self.position_at(&entries, pos);
        Ok(())
    }
}

// ── Builder ────────────────────────────────────────────────────────

struct MemoryBuilder {
    store: MemoryStore,
    dups_allowed: bool,
    last: Option<(Key, RecordId)>,
    added: u64,
}

impl SortedBuilder for MemoryBuilder {
    fn add_key(&mut self, ctx: &dyn OperationContext, key: &Key, rid: RecordId) -> Result<()> {
        let inner = &self.store.inner;
        let size = inner.sized(key)?;

        if let Some((last_key, last_rid)) = &self.last {
            let ord = inner.ordering.compare_entries(last_key, *last_rid, key, rid);
            if ord == Ordering::Greater {
                return Err(IndexError::Corruption(format!(
                    "bulk builder input out of order for {}: {} after {}",
                    inner.ident, key, last_key
                )));
            }
            if !self.dups_allowed && inner.ordering.keys_equal(last_key, key) {
                return Err(inner.duplicate_error(key));
            }
        }

        if inner.insert_entry(Entry {
            key: key.clone(),
            rid,
            size,
        }) {
            self.store.register_remove(ctx, key, rid);
        }
        self.last = Some((key.clone(), rid));
        self.added += 1;
        Ok(())
    }

    fn commit(self: Box<Self>, ctx: &dyn OperationContext, may_interrupt: bool) -> Result<()> {
        if may_interrupt {
            ctx.check_for_interrupt()?;
        }
        tracing::debug!(index = %self.store.inner.ident, added = self.added, "bulk builder committed");
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
