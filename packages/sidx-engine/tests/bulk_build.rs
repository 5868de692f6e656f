//! Integration test: bulk index construction.
//!
//! Validates that:
//! - a bulk build produces the same entries as one-by-one inserts,
//!   with and without spilling sorted runs to disk
//! - duplicates are reported to the sink or fail the build
//! - oversized keys follow the same role/config policy as inserts
//! - every entry is added in its own undo-less unit of work
//! - interruption and write conflicts are honored

mod common;

use std::collections::BTreeSet;

use common::{make_index, make_index_with, make_spec, TestIndex};
use serde_json::{json, Value};
use sidx::{
    BulkSortConfig, EngineConfig, IndexCatalogEntry, InsertDeleteOptions, LocalOperationContext,
    MemoryStore, OperationContext, RecordId,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_docs(count: u64) -> Vec<(Value, RecordId)> {
    (0..count)
        .map(|i| {
            let doc = if i % 4 == 0 {
                json!({"a": [i % 13, (i * 3) % 13], "b": "multi"})
            } else if i % 7 == 0 {
                json!({"b": "missing a"})
            } else {
                json!({"a": i % 13, "b": format!("doc_{}", i)})
            };
            (doc, RecordId(i + 1))
        })
        .collect()
}

fn spilling_index(paths: &[&str], unique: bool, dir: &TempDir) -> TestIndex {
    let spec = make_spec(paths, unique);
    let store = MemoryStore::new(&spec);
    let config = EngineConfig {
        bulk_sort: BulkSortConfig {
            max_memory_bytes: 256,
            temp_dir: dir.path().join("_tmp"),
            ext_sort_allowed: true,
        },
        ..EngineConfig::default()
    };
    make_index_with(spec.clone(), IndexCatalogEntry::building(spec), store, config)
}

fn bulk_load(
    ix: &TestIndex,
    ctx: &LocalOperationContext,
    docs: &[(Value, RecordId)],
    dups_allowed: bool,
    sink: Option<&mut BTreeSet<RecordId>>,
) -> sidx::Result<sidx::BulkCommitStats> {
    let mut bulk = ix.am.initiate_bulk();
    let opts = InsertDeleteOptions { dups_allowed };
    for (doc, rid) in docs {
        bulk.insert(doc, *rid, &opts)?;
    }
    ix.am.commit_bulk(ctx, bulk, true, dups_allowed, sink)
}

// ---------------------------------------------------------------------------
// Tests: equivalence
// ---------------------------------------------------------------------------

#[test]
fn bulk_build_matches_incremental_inserts() {
    let docs = make_docs(200);
    let ctx = LocalOperationContext::new();

    let incremental = make_index(&["a"], false);
    for (doc, rid) in &docs {
        incremental.am.insert(&ctx, doc, *rid, &InsertDeleteOptions::default()).unwrap();
    }

    let bulk = make_index(&["a"], false);
    let stats = bulk_load(&bulk, &ctx, &docs, true, None).unwrap();

    assert_eq!(common::entries(&bulk.store), common::entries(&incremental.store));
    assert_eq!(stats.keys_added as usize, incremental.store.len());
    assert!(bulk.am.entry().is_multikey());
    assert!(incremental.am.entry().is_multikey());
}

#[test]
fn spilled_bulk_build_matches_in_memory_build() {
    let docs = make_docs(300);
    let ctx = LocalOperationContext::new();
    let dir = TempDir::new().unwrap();

    let in_memory = make_index(&["b", "a"], false);
    bulk_load(&in_memory, &ctx, &docs, true, None).unwrap();

    let spilled = spilling_index(&["b", "a"], false, &dir);
    let mut bulk = spilled.am.initiate_bulk();
    for (doc, rid) in &docs {
        bulk.insert(doc, *rid, &InsertDeleteOptions::dups_allowed()).unwrap();
    }
    assert!(bulk.spilled_runs() > 1);
    spilled.am.commit_bulk(&ctx, bulk, true, true, None).unwrap();

    assert_eq!(common::entries(&spilled.store), common::entries(&in_memory.store));
    assert!(spilled.am.validate(&ctx, true).unwrap().is_valid());
}

#[test]
fn progress_counts_every_record() {
    let docs = make_docs(50);
    let ctx = LocalOperationContext::new();
    let ix = make_index(&["a"], false);

    let mut bulk = ix.am.initiate_bulk();
    for (doc, rid) in &docs {
        bulk.insert(doc, *rid, &InsertDeleteOptions::default()).unwrap();
    }
    let queued = bulk.keys_inserted();
    let stats = ix.am.commit_bulk(&ctx, bulk, false, true, None).unwrap();

    assert_eq!(stats.records_consumed, queued);
    assert_eq!(ctx.message(), "Index Bulk Build: (3/3) btree-middle");

    let pm = ctx.progress().unwrap();
    assert_eq!(pm.hits(), queued);
    assert_eq!(pm.total(), queued);
    assert!(pm.is_finished());
}

#[test]
fn progress_is_visible_while_building() {
    let ix = make_index(&["a"], false);
    let ctx = LocalOperationContext::new();
    let docs = make_docs(12);
    let mut bulk = ix.am.initiate_bulk();
    for (doc, rid) in &docs {
        bulk.insert(doc, *rid, &InsertDeleteOptions::default()).unwrap();
    }
    let n = bulk.keys_inserted();

    ix.am.commit_bulk(&ctx, bulk, true, true, None).unwrap();

    // The store saw the meter advance one record at a time.
    let seen = ix.faulty.progress_seen();
    assert_eq!(seen, (1..=n).collect::<Vec<_>>());
}

// ---------------------------------------------------------------------------
// Tests: duplicates
// ---------------------------------------------------------------------------

fn dup_docs() -> Vec<(Value, RecordId)> {
    vec![
        (json!({"a": 1}), RecordId(1)),
        (json!({"a": 1}), RecordId(2)),
        (json!({"a": 2}), RecordId(3)),
        (json!({"a": 1}), RecordId(4)),
    ]
}

#[test]
fn duplicates_go_to_sink() {
    let ix = make_index(&["a"], true);
    let ctx = LocalOperationContext::new();
    let mut dropped = BTreeSet::new();

    let stats = bulk_load(&ix, &ctx, &dup_docs(), false, Some(&mut dropped)).unwrap();

    assert_eq!(dropped, BTreeSet::from([RecordId(2), RecordId(4)]));
    assert_eq!(stats.records_consumed, 4);
    assert_eq!(stats.keys_added, 2);
    assert_eq!(stats.duplicates_dropped, 2);
    let rids: Vec<u64> = common::entries(&ix.store).into_iter().map(|(_, r)| r).collect();
    assert_eq!(rids, vec![1, 3]);
}

#[test]
fn duplicates_without_sink_fail_the_build() {
    let ix = make_index(&["a"], true);
    let ctx = LocalOperationContext::new();

    let err = bulk_load(&ix, &ctx, &dup_docs(), false, None).unwrap_err();

    assert!(err.is_duplicate_key());
    // No rollback: what was built before the failure stays.
    assert_eq!(ix.store.len(), 1);
}

// ---------------------------------------------------------------------------
// Tests: oversized keys
// ---------------------------------------------------------------------------

fn small_key_index() -> TestIndex {
    let spec = make_spec(&["a"], false);
    let store = MemoryStore::with_max_key_bytes(&spec, 64);
    make_index_with(
        spec.clone(),
        IndexCatalogEntry::building(spec),
        store,
        EngineConfig::default(),
    )
}

fn long_key_docs() -> Vec<(Value, RecordId)> {
    vec![
        (json!({"a": "ok"}), RecordId(1)),
        (json!({"a": "x".repeat(300)}), RecordId(2)),
        (json!({"a": "fine"}), RecordId(3)),
    ]
}

#[test]
fn bulk_skips_long_keys_on_secondary() {
    let ix = small_key_index();
    let ctx = LocalOperationContext::secondary();

    let stats = bulk_load(&ix, &ctx, &long_key_docs(), true, None).unwrap();

    assert_eq!(stats.too_long_skipped, 1);
    assert_eq!(stats.keys_added, 2);
    assert_eq!(ix.store.len(), 2);
}

#[test]
fn bulk_fails_on_long_key_on_primary() {
    let ix = small_key_index();
    let ctx = LocalOperationContext::new();

    let err = bulk_load(&ix, &ctx, &long_key_docs(), true, None).unwrap_err();
    assert!(err.is_key_too_long());
}

// ---------------------------------------------------------------------------
// Tests: units of work, interruption, conflicts
// ---------------------------------------------------------------------------

#[test]
fn each_entry_gets_an_undo_less_unit() {
    let ix = make_index(&["a"], false);
    let ctx = LocalOperationContext::new();
    let docs = make_docs(20);
    let mut bulk = ix.am.initiate_bulk();
    for (doc, rid) in &docs {
        bulk.insert(doc, *rid, &InsertDeleteOptions::default()).unwrap();
    }
    let n = bulk.keys_inserted();

    ix.am.commit_bulk(&ctx, bulk, true, true, None).unwrap();

    let units = ctx.unit_stats();
    // One leading unit for the multikey flag and builder, then one per entry.
    assert_eq!(units.begun, n + 1);
    assert_eq!(units.committed, n + 1);
    assert_eq!(units.undo_disabled, n);
    assert_eq!(units.undo_replayed, 0);
    assert!(!ctx.in_unit());
}

#[test]
fn interrupted_build_stops() {
    let ix = make_index(&["a"], false);
    let ctx = LocalOperationContext::new();
    let docs = make_docs(10);
    ctx.interrupt();

    let err = bulk_load(&ix, &ctx, &docs, true, None).unwrap_err();
    assert_eq!(err.code(), "INTERRUPTED");
    assert!(ix.store.is_empty());
}

#[test]
fn uninterruptible_build_ignores_interrupt() {
    let ix = make_index(&["a"], false);
    let ctx = LocalOperationContext::new();
    let docs = make_docs(10);
    ctx.interrupt();

    let mut bulk = ix.am.initiate_bulk();
    for (doc, rid) in &docs {
        bulk.insert(doc, *rid, &InsertDeleteOptions::default()).unwrap();
    }
    let n = bulk.keys_inserted();
    let stats = ix.am.commit_bulk(&ctx, bulk, false, true, None).unwrap();
    assert_eq!(stats.keys_added, n);
}

#[test]
fn write_conflicts_are_retried() {
    let ix = make_index(&["a"], false);
    let ctx = LocalOperationContext::new();
    ix.faulty.inject_builder_conflicts(3);

    let stats = bulk_load(&ix, &ctx, &make_docs(5), true, None).unwrap();

    assert_eq!(stats.keys_added as usize, ix.store.len());
    assert_eq!(ctx.unit_stats().aborted, 3);
}

#[test]
fn sort_without_spill_fails_past_memory_limit() {
    let spec = make_spec(&["a"], false);
    let config = EngineConfig {
        bulk_sort: BulkSortConfig {
            max_memory_bytes: 128,
            ext_sort_allowed: false,
            ..BulkSortConfig::default()
        },
        ..EngineConfig::default()
    };
    let ix = make_index_with(
        spec.clone(),
        IndexCatalogEntry::new(spec.clone()),
        MemoryStore::new(&spec),
        config,
    );

    let mut bulk = ix.am.initiate_bulk();
    let result = make_docs(50)
        .iter()
        .try_for_each(|(doc, rid)| bulk.insert(doc, *rid, &InsertDeleteOptions::default()).map(|_| ()));
    assert_eq!(result.unwrap_err().code(), "SORT_MEMORY_EXCEEDED");
}
