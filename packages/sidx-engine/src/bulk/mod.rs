//! Bulk index construction, phase 1.
//!
//! A [`BulkBuilder`] collects every document's keys into an
//! [`ExternalSorter`]. Phase 2 (draining the sorted stream into the store)
//! lives on [`IndexAccessMethod::commit_bulk`](crate::access::IndexAccessMethod::commit_bulk).

pub mod sorter;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::access::InsertDeleteOptions;
use crate::config::BulkSortConfig;
use crate::error::Result;
use crate::key::{KeyOrdering, RecordId};
use crate::keygen::{Document, KeyExtractor};

pub use sorter::{BulkRecord, ExternalSorter, SortedRecords};

/// Accumulates `(key, record id)` pairs for a bottom-up build.
pub struct BulkBuilder {
    sorter: ExternalSorter,
    extractor: Arc<dyn KeyExtractor>,
    keys_inserted: u64,
    is_multikey: bool,
}

impl BulkBuilder {
    pub fn new(
        extractor: Arc<dyn KeyExtractor>,
        ordering: KeyOrdering,
        config: BulkSortConfig,
    ) -> Self {
        Self {
            sorter: ExternalSorter::new(ordering, config),
            extractor,
            keys_inserted: 0,
            is_multikey: false,
        }
    }

    /// Queue the keys of one document. Returns how many were queued.
    pub fn insert(
        &mut self,
        doc: &Document,
        rid: RecordId,
        _options: &InsertDeleteOptions,
    ) -> Result<u64> {
        let keys = self.extractor.keys_for(doc)?;
        if keys.len() > 1 {
            self.is_multikey = true;
        }

        let mut count = 0;
        for key in keys.into_vec() {
            self.sorter.add(key, rid)?;
            self.keys_inserted += 1;
            count += 1;
        }
        Ok(count)
    }

    pub fn keys_inserted(&self) -> u64 {
        self.keys_inserted
    }

    /// True once any document produced more than one key.
    pub fn is_multikey(&self) -> bool {
        self.is_multikey
    }

    pub fn spilled_runs(&self) -> usize {
        self.sorter.spilled_runs()
    }

    /// Close input and hand over the sorted stream.
    pub(crate) fn into_sorted(self) -> Result<SortedRecords> {
        self.sorter.done()
    }
}

/// Outcome of a bottom-up build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkCommitStats {
    /// Sorted entries consumed from the sorter.
    pub records_consumed: u64,
    /// Entries handed to the store builder.
    pub keys_added: u64,
    /// Entries skipped because the key was too long.
    pub too_long_skipped: u64,
    /// Entries skipped as duplicates and reported to the caller.
    pub duplicates_dropped: u64,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

// ── Tests ──────────────────────────────────────────────────────────
