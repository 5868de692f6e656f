//! Sorted data store boundary.
//!
//! The physical index lives behind [`SortedDataStore`]. The engine only
//! needs point insert/remove, a positioned cursor, and a bottom-up builder
//! for bulk construction. [`MemoryStore`] is the in-process implementation.

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::key::{Key, RecordId};
use crate::txn::OperationContext;

pub use memory::MemoryStore;

/// Cursor traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CursorDirection {
    #[default]
    Forward,
    Backward,
}

/// Result of a store validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateReport {
    pub num_keys: u64,
    pub errors: Vec<String>,
}

impl ValidateReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Positioned cursor over `(key, record id)` entries.
///
/// A new cursor is unpositioned and reports EOF until `locate` is called.
pub trait SortedCursor {
    /// Forward: position on the first entry at or after `(key, rid)`.
    /// Backward: position on the last entry at or before `(key, rid)`.
    ///
    /// Returns true when the positioned entry's key is order-equal to `key`.
    fn locate(&mut self, key: &Key, rid: RecordId) -> Result<bool>;

    fn is_eof(&self) -> bool;

    fn key(&self) -> Option<&Key>;

    fn record_id(&self) -> Option<RecordId>;

    /// Step once in the cursor's direction.
    fn advance(&mut self) -> Result<()>;
}

/// Bottom-up builder fed with entries in index order.
pub trait SortedBuilder {
    /// Append the next entry. Fails with `DuplicateKey` when duplicates are
    /// not allowed and `key` equals the previously added key, and with
    /// `KeyTooLong` when the key exceeds the store's limit.
    fn add_key(&mut self, ctx: &dyn OperationContext, key: &Key, rid: RecordId) -> Result<()>;

    /// Finish the build. May honor an interruption request.
    fn commit(self: Box<Self>, ctx: &dyn OperationContext, may_interrupt: bool) -> Result<()>;
}

/// Ordered key-value store that physically holds index entries.
pub trait SortedDataStore: Send + Sync {
    /// Add one entry. Fails with `DuplicateKeyValue` when the exact
    /// `(key, rid)` entry is already present, and with `DuplicateKey` when a
    /// unique index holds `key` for another record and duplicates are not
    /// allowed.
    fn insert(
        &self,
        ctx: &dyn OperationContext,
        key: &Key,
        rid: RecordId,
        dups_allowed: bool,
    ) -> Result<()>;

    fn unindex(
        &self,
        ctx: &dyn OperationContext,
        key: &Key,
        rid: RecordId,
        dups_allowed: bool,
    ) -> Result<()>;

    fn new_cursor<'a>(
        &'a self,
        ctx: &dyn OperationContext,
        direction: CursorDirection,
    ) -> Box<dyn SortedCursor + 'a>;

    fn bulk_builder<'a>(
        &'a self,
        ctx: &dyn OperationContext,
        dups_allowed: bool,
    ) -> Result<Box<dyn SortedBuilder + 'a>>;

    fn full_validate(&self, ctx: &dyn OperationContext, full: bool) -> Result<ValidateReport>;

    /// Write store statistics into `out`, byte figures divided by `scale`.
    fn append_custom_stats(
        &self,
        ctx: &dyn OperationContext,
        out: &mut serde_json::Map<String, serde_json::Value>,
        scale: f64,
    ) -> bool;

    fn space_used_bytes(&self, ctx: &dyn OperationContext) -> u64;

    fn init_as_empty(&self, ctx: &dyn OperationContext) -> Result<()>;

    /// Pull the store into memory.
    fn touch(&self, ctx: &dyn OperationContext) -> Result<()>;
}
