//! Engine configuration.
//!
//! Plain structs with defaults, deserializable from JSON. Missing fields
//! take their defaults, so `{}` is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

const MB: usize = 1024 * 1024;

/// Default in-memory ceiling for the bulk-build sorter (100 MB).
pub const DEFAULT_SORT_MEMORY_BYTES: usize = 100 * MB;

/// Sorter settings for bulk index builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkSortConfig {
    /// Buffered bytes before a sorted run is spilled to disk.
    pub max_memory_bytes: usize,
    /// Directory for spill files.
    pub temp_dir: PathBuf,
    /// When false, exceeding `max_memory_bytes` fails the build instead of
    /// spilling.
    pub ext_sort_allowed: bool,
}

impl BulkSortConfig {
    /// Spill into `<db_path>/_tmp`.
    pub fn for_db_path(db_path: &Path) -> Self {
        Self {
            temp_dir: db_path.join("_tmp"),
            ..Self::default()
        }
    }
}

impl Default for BulkSortConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: DEFAULT_SORT_MEMORY_BYTES,
            temp_dir: std::env::temp_dir(),
            ext_sort_allowed: true,
        }
    }
}

/// Configuration handed to an index access method at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// When true, an oversized key fails the write on a primary. Secondaries
    /// always skip oversized keys.
    pub fail_index_key_too_long: bool,
    pub bulk_sort: BulkSortConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fail_index_key_too_long: true,
            bulk_sort: BulkSortConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
