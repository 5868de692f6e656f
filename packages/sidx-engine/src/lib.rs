//! sidx - sorted secondary index maintenance and bulk-build engine.
//!
//! Keeps an ordered key-value store consistent with a stream of document
//! inserts, removes and updates, and builds a fresh index over an existing
//! collection through an external sort followed by a bottom-up load.
//!
//! Entry point: [`IndexAccessMethod`]. Collaborators plug in through
//! [`KeyExtractor`], [`SortedDataStore`] and [`OperationContext`]; the crate
//! ships [`FieldPathExtractor`], [`MemoryStore`] and
//! [`LocalOperationContext`] as ready-made implementations.

pub mod access;
pub mod bulk;
pub mod catalog;
pub mod config;
pub mod delta;
pub mod error;
pub mod key;
pub mod keygen;
pub mod progress;
pub mod store;
pub mod txn;

pub use access::{IndexAccessMethod, InsertDeleteOptions, UpdateTicket};
pub use bulk::{BulkBuilder, BulkCommitStats};
pub use catalog::{IndexCatalogEntry, IndexSpec, KeyPatternField};
pub use config::{BulkSortConfig, EngineConfig};
pub use delta::KeyDelta;
pub use error::{IndexError, Result};
pub use key::{IndexVersion, Key, KeyOrdering, KeySet, KeyValue, RecordId, SortDirection};
pub use keygen::{Document, FieldPathExtractor, KeyExtractor};
pub use progress::ProgressMeter;
pub use store::{CursorDirection, MemoryStore, SortedCursor, SortedDataStore, ValidateReport};
pub use txn::{
    write_conflict_retry, LocalOperationContext, OperationContext, UndoTracking, WriteUnitOfWork,
};
