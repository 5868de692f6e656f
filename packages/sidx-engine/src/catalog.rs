//! Index descriptor and per-index catalog state.
//!
//! The catalog entry owns the immutable [`IndexSpec`] and the two mutable
//! flags the engine reads and writes: multikey (monotonic) and ready.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::key::{IndexVersion, KeyOrdering, SortDirection, MAX_KEY_FIELDS};

/// One field of a key pattern, e.g. `a.b: -1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPatternField {
    pub path: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Immutable index descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    /// Collection namespace, e.g. `test.users`.
    pub ns: String,
    pub key_pattern: Vec<KeyPatternField>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub version: IndexVersion,
}

impl IndexSpec {
    /// Build and validate a descriptor.
    pub fn new(
        name: &str,
        ns: &str,
        key_pattern: Vec<KeyPatternField>,
        unique: bool,
        version: IndexVersion,
    ) -> Result<Self> {
        let spec = Self {
            name: name.to_string(),
            ns: ns.to_string(),
            key_pattern,
            unique,
            version,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Ascending single-field or compound index on `paths`, V1 semantics.
    pub fn ascending(ns: &str, paths: &[&str], unique: bool) -> Result<Self> {
        let key_pattern = paths
            .iter()
            .map(|p| KeyPatternField {
                path: p.to_string(),
                direction: SortDirection::Ascending,
            })
            .collect::<Vec<_>>();
        let name = paths
            .iter()
            .map(|p| format!("{}_1", p))
            .collect::<Vec<_>>()
            .join("_");
        Self::new(&name, ns, key_pattern, unique, IndexVersion::V1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_pattern.is_empty() {
            return Err(IndexError::InvalidSpec("empty key pattern".to_string()));
        }
        if self.key_pattern.len() > MAX_KEY_FIELDS {
            return Err(IndexError::InvalidSpec(format!(
                "key pattern has {} fields, max {}",
                self.key_pattern.len(),
                MAX_KEY_FIELDS
            )));
        }
        if let Some(field) = self.key_pattern.iter().find(|f| f.path.is_empty()) {
            return Err(IndexError::InvalidSpec(format!(
                "empty field path in key pattern ({:?})",
                field
            )));
        }
        Ok(())
    }

    pub fn ordering(&self) -> KeyOrdering {
        KeyOrdering::new(
            self.key_pattern.iter().map(|f| f.direction).collect(),
            self.version,
        )
    }

    /// `<ns>.$<name>`, used in log records.
    pub fn index_namespace(&self) -> String {
        format!("{}.${}", self.ns, self.name)
    }
}

/// Catalog state for one index.
pub struct IndexCatalogEntry {
    spec: IndexSpec,
    multikey: AtomicBool,
    ready: AtomicBool,
}

impl IndexCatalogEntry {
    /// Entry for a fully built index.
    pub fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            multikey: AtomicBool::new(false),
            ready: AtomicBool::new(true),
        }
    }

    /// Entry for an index whose build is still in progress.
    pub fn building(spec: IndexSpec) -> Self {
        let entry = Self::new(spec);
        entry.ready.store(false, Ordering::Release);
        entry
    }

    pub fn descriptor(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn ns(&self) -> &str {
        &self.spec.ns
    }

    pub fn is_multikey(&self) -> bool {
        self.multikey.load(Ordering::Acquire)
    }

    /// Mark the index multikey. Never cleared: a false positive is safe.
    pub fn set_multikey(&self) {
        if !self.multikey.swap(true, Ordering::AcqRel) {
            tracing::debug!(index = %self.spec.index_namespace(), "index is now multikey");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Called by the build driver once the index is complete.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }
}

// ── Tests ──────────────────────────────────────────────────────────
