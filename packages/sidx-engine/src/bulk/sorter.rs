//! External sorter for bulk index builds.
//!
//! Entries are buffered in memory until the configured ceiling, then the
//! buffer is sorted (rayon parallel sort) and spilled as one run file of
//! bincode records. `done()` yields every entry in `(key, record id)`
//! order: straight from memory when nothing spilled, otherwise through a
//! k-way merge over the runs plus the final buffer.
//!
//! Run files are anonymous temp files; they disappear when the sorter's
//! output is dropped.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};

use rayon::slice::ParallelSliceMut;
use serde::{Deserialize, Serialize};

use crate::config::BulkSortConfig;
use crate::error::{IndexError, Result};
use crate::key::{Key, KeyOrdering, RecordId};

/// Per-entry bookkeeping charged on top of the key's encoded size.
const ENTRY_OVERHEAD_BYTES: usize = 16;

/// One `(key, record id)` pair fed to the sorter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkRecord {
    pub key: Key,
    pub rid: RecordId,
}

/// A spilled, sorted run.
struct SpillRun {
    file: File,
    count: u64,
}

pub struct ExternalSorter {
    ordering: KeyOrdering,
    config: BulkSortConfig,
    buffer: Vec<BulkRecord>,
    buffered_bytes: usize,
    runs: Vec<SpillRun>,
    total: u64,
}

impl ExternalSorter {
    pub fn new(ordering: KeyOrdering, config: BulkSortConfig) -> Self {
        Self {
            ordering,
            config,
            buffer: Vec::new(),
            buffered_bytes: 0,
            runs: Vec::new(),
            total: 0,
        }
    }

    /// Buffer one entry, spilling when the memory ceiling is crossed.
    ///
    /// Without external sort, an entry that would cross the ceiling is
    /// rejected and not buffered.
    pub fn add(&mut self, key: Key, rid: RecordId) -> Result<()> {
        let size = key.encoded_len()? + ENTRY_OVERHEAD_BYTES;
        let over = self.buffered_bytes + size > self.config.max_memory_bytes;
        if over && !self.config.ext_sort_allowed {
            return Err(IndexError::SortMemoryExceeded {
                limit: self.config.max_memory_bytes,
            });
        }

        self.buffered_bytes += size;
        self.buffer.push(BulkRecord { key, rid });
        self.total += 1;
        if over {
            self.spill()?;
        }
        Ok(())
    }

    /// Entries added so far.
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn spilled_runs(&self) -> usize {
        self.runs.len()
    }

    fn sort_buffer(&mut self) {
        let ordering = &self.ordering;
        self.buffer
            .par_sort_by(|a, b| ordering.compare_entries(&a.key, a.rid, &b.key, b.rid));
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.sort_buffer();

        std::fs::create_dir_all(&self.config.temp_dir)?;
        let file = tempfile::tempfile_in(&self.config.temp_dir)?;
        let mut writer = BufWriter::new(file);
        for record in &self.buffer {
            bincode::serialize_into(&mut writer, record)?;
        }
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;

        let count = self.buffer.len() as u64;
        tracing::debug!(
            run = self.runs.len(),
            records = count,
            bytes = self.buffered_bytes,
            "spilled sorted run"
        );
        self.runs.push(SpillRun { file, count });
        self.buffer.clear();
        self.buffered_bytes = 0;
        Ok(())
    }

    /// Finish input and return the entries in index order.
    pub fn done(mut self) -> Result<SortedRecords> {
        if self.runs.is_empty() {
            self.sort_buffer();
            return Ok(SortedRecords {
                inner: Source::Memory(self.buffer.into_iter()),
            });
        }

        self.spill()?;
        tracing::debug!(runs = self.runs.len(), records = self.total, "merging sorted runs");

        let readers = self
            .runs
            .into_iter()
            .map(RunReader::open)
            .collect::<Result<Vec<_>>>()?;
        Ok(SortedRecords {
            inner: Source::Merge(KWayMerge::new(readers, self.ordering)?),
        })
    }
}

// ── Run reader ─────────────────────────────────────────────────────

struct RunReader {
    reader: BufReader<File>,
    remaining: u64,
}

impl RunReader {
    fn open(run: SpillRun) -> Result<Self> {
        let mut file = run.file;
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader: BufReader::new(file),
            remaining: run.count,
        })
    }

    fn read_next(&mut self) -> Result<Option<BulkRecord>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(bincode::deserialize_from(&mut self.reader)?))
    }
}

// ── K-way merge ────────────────────────────────────────────────────

struct HeapEntry {
    record: BulkRecord,
    run: usize,
}

/// Manual min-heap over the head record of each run. Equal entries come
/// out in run order.
struct KWayMerge {
    heap: Vec<HeapEntry>,
    runs: Vec<RunReader>,
    ordering: KeyOrdering,
}

impl KWayMerge {
    fn new(mut runs: Vec<RunReader>, ordering: KeyOrdering) -> Result<Self> {
        let mut heap = Vec::with_capacity(runs.len());
        for (run, reader) in runs.iter_mut().enumerate() {
            if let Some(record) = reader.read_next()? {
                heap.push(HeapEntry { record, run });
            }
        }

        let mut me = Self {
            heap,
            runs,
            ordering,
        };
        if me.heap.len() > 1 {
            let last_internal = (me.heap.len() / 2).saturating_sub(1);
            for i in (0..=last_internal).rev() {
                me.sift_down(i);
            }
        }
        Ok(me)
    }

    fn heap_less(&self, i: usize, j: usize) -> bool {
        let (a, b) = (&self.heap[i], &self.heap[j]);
        match self
            .ordering
            .compare_entries(&a.record.key, a.record.rid, &b.record.key, b.record.rid)
        {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => a.run < b.run,
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len && self.heap_less(right, left) {
                smallest = right;
            }
            if self.heap_less(smallest, pos) {
                self.heap.swap(pos, smallest);
                pos = smallest;
            } else {
                break;
            }
        }
    }

    fn next_record(&mut self) -> Result<Option<BulkRecord>> {
        if self.heap.is_empty() {
            return Ok(None);
        }
        let run = self.heap[0].run;
        let top = match self.runs[run].read_next()? {
            Some(record) => {
                let top = std::mem::replace(&mut self.heap[0], HeapEntry { record, run });
                self.sift_down(0);
                top
            }
            None => {
                let top = self.heap.swap_remove(0);
                if !self.heap.is_empty() {
                    self.sift_down(0);
                }
                top
            }
        };
        Ok(Some(top.record))
    }
}

// ── Output ─────────────────────────────────────────────────────────

enum Source {
    Memory(std::vec::IntoIter<BulkRecord>),
    Merge(KWayMerge),
}

/// Sorted output of an [`ExternalSorter`]. Stops after the first error.
pub struct SortedRecords {
    inner: Source,
}

impl Iterator for SortedRecords {
    type Item = Result<BulkRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            Source::Memory(iter) => iter.next().map(Ok),
            Source::Merge(merge) => match merge.next_record() {
                Ok(record) => record.map(Ok),
                Err(e) => {
                    merge.heap.clear();
                    Some(Err(e))
                }
            },
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
