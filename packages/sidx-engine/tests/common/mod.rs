//! Shared helpers for integration tests.
//!
//! `FaultyStore` wraps a `MemoryStore` and injects store errors on chosen
//! keys, which the in-memory store never produces on its own.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::Value;
use sidx::{
    CursorDirection, EngineConfig, FieldPathExtractor, IndexAccessMethod, IndexCatalogEntry,
    IndexError, IndexSpec, Key, KeyOrdering, MemoryStore, OperationContext, RecordId, Result,
    SortedCursor, SortedDataStore, ValidateReport,
};
use sidx::store::SortedBuilder;

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Store,
    Corruption,
    WriteConflict,
}

impl Fault {
    fn to_error(self) -> IndexError {
        match self {
            Fault::Store => IndexError::Store("injected failure".to_string()),
            Fault::Corruption => IndexError::Corruption("injected assertion".to_string()),
            Fault::WriteConflict => IndexError::WriteConflict,
        }
    }
}

#[derive(Default)]
struct Faults {
    insert: Option<(Key, Fault)>,
    unindex: Option<Fault>,
    /// Write conflicts left to inject into builder `add_key` calls.
    builder_conflicts: u32,
    /// Progress hits seen through the context at each builder `add_key`.
    progress_seen: Vec<u64>,
}

pub struct FaultyStore {
    inner: MemoryStore,
    ordering: KeyOrdering,
    faults: Mutex<Faults>,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore, spec: &IndexSpec) -> Self {
        Self {
            inner,
            ordering: spec.ordering(),
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn fail_insert_of(&self, key: Key, fault: Fault) {
        self.faults.lock().unwrap().insert = Some((key, fault));
    }

    pub fn fail_unindex(&self, fault: Fault) {
        self.faults.lock().unwrap().unindex = Some(fault);
    }

    pub fn inject_builder_conflicts(&self, n: u32) {
        self.faults.lock().unwrap().builder_conflicts = n;
    }

    pub fn progress_seen(&self) -> Vec<u64> {
        self.faults.lock().unwrap().progress_seen.clone()
    }

    fn take_builder_conflict(&self) -> bool {
        let mut faults = self.faults.lock().unwrap();
        if faults.builder_conflicts > 0 {
            faults.builder_conflicts -= 1;
            true
        } else {
            false
        }
    }
}

impl SortedDataStore for FaultyStore {
    fn insert(
        &self,
        ctx: &dyn OperationContext,
        key: &Key,
        rid: RecordId,
        dups_allowed: bool,
    ) -> Result<()> {
        if let Some((bad, fault)) = &self.faults.lock().unwrap().insert {
            if self.ordering.keys_equal(bad, key) {
                return Err(fault.to_error());
            }
        }
        self.inner.insert(ctx, key, rid, dups_allowed)
    }

    fn unindex(
        &self,
        ctx: &dyn OperationContext,
        key: &Key,
        rid: RecordId,
        dups_allowed: bool,
    ) -> Result<()> {
        if let Some(fault) = self.faults.lock().unwrap().unindex {
            return Err(fault.to_error());
        }
        self.inner.unindex(ctx, key, rid, dups_allowed)
    }

    fn new_cursor<'a>(
        &'a self,
        ctx: &dyn OperationContext,
        direction: CursorDirection,
    ) -> Box<dyn SortedCursor + 'a> {
        self.inner.new_cursor(ctx, direction)
    }

    fn bulk_builder<'a>(
        &'a self,
        ctx: &dyn OperationContext,
        dups_allowed: bool,
    ) -> Result<Box<dyn SortedBuilder + 'a>> {
        Ok(Box::new(FaultyBuilder {
            inner: self.inner.bulk_builder(ctx, dups_allowed)?,
            store: self,
        }))
    }

    fn full_validate(&self, ctx: &dyn OperationContext, full: bool) -> Result<ValidateReport> {
        self.inner.full_validate(ctx, full)
    }

    fn append_custom_stats(
        &self,
        ctx: &dyn OperationContext,
        out: &mut serde_json::Map<String, Value>,
        scale: f64,
    ) -> bool {
        self.inner.append_custom_stats(ctx, out, scale)
    }

    fn space_used_bytes(&self, ctx: &dyn OperationContext) -> u64 {
        self.inner.space_used_bytes(ctx)
    }

    fn init_as_empty(&self, ctx: &dyn OperationContext) -> Result<()> {
        self.inner.init_as_empty(ctx)
    }

    fn touch(&self, ctx: &dyn OperationContext) -> Result<()> {
        self.inner.touch(ctx)
    }
}

struct FaultyBuilder<'a> {
    inner: Box<dyn SortedBuilder + 'a>,
    store: &'a FaultyStore,
}

impl SortedBuilder for FaultyBuilder<'_> {
    fn add_key(&mut self, ctx: &dyn OperationContext, key: &Key, rid: RecordId) -> Result<()> {
        if let Some(pm) = ctx.progress() {
            self.store.faults.lock().unwrap().progress_seen.push(pm.hits());
        }
        if self.store.take_builder_conflict() {
            return Err(IndexError::WriteConflict);
        }
        self.inner.add_key(ctx, key, rid)
    }

    fn commit(self: Box<Self>, ctx: &dyn OperationContext, may_interrupt: bool) -> Result<()> {
        self.inner.commit(ctx, may_interrupt)
    }
}

// ---------------------------------------------------------------------------
// Index fixtures
// ---------------------------------------------------------------------------

pub struct TestIndex {
    pub am: IndexAccessMethod,
    pub store: MemoryStore,
    pub faulty: Arc<FaultyStore>,
}

pub fn make_spec(paths: &[&str], unique: bool) -> IndexSpec {
    IndexSpec::ascending("test.docs", paths, unique).unwrap()
}

/// Index on `spec` backed by a fault-injecting wrapper over a `MemoryStore`.
pub fn make_index_with(
    spec: IndexSpec,
    entry: IndexCatalogEntry,
    store: MemoryStore,
    config: EngineConfig,
) -> TestIndex {
    let faulty = Arc::new(FaultyStore::new(store.clone(), &spec));
    let am = IndexAccessMethod::new(
        Arc::new(entry),
        faulty.clone(),
        Arc::new(FieldPathExtractor::new(&spec)),
        config,
    );
    TestIndex { am, store, faulty }
}

pub fn make_index(paths: &[&str], unique: bool) -> TestIndex {
    let spec = make_spec(paths, unique);
    let store = MemoryStore::new(&spec);
    make_index_with(spec.clone(), IndexCatalogEntry::new(spec), store, EngineConfig::default())
}

/// Entries of the store as `(key, raw record id)`.
pub fn entries(store: &MemoryStore) -> Vec<(Key, u64)> {
    store
        .entries()
        .into_iter()
        .map(|(k, r)| (k, r.get()))
        .collect()
}
