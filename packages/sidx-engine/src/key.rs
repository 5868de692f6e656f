//! Index key model: values, keys, record ids, orderings and key sets.
//!
//! Keys are compared positionally under a [`KeyOrdering`]. Field names ride
//! along for diagnostics only; no comparison in this crate looks at them.
//!
//! Two comparison semantics exist, selected by [`IndexVersion`]:
//! - **V1**: numbers compare by value across `Int` and `Double`.
//! - **V0** (legacy): `Int` and `Double` are separate type classes and every
//!   `Int` sorts before every `Double`.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// Maximum number of fields in a key pattern.
pub const MAX_KEY_FIELDS: usize = 32;

// ── RecordId ───────────────────────────────────────────────────────

/// Opaque locator of a document in its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Sorts before every other record id.
    pub const MIN: RecordId = RecordId(0);
    /// Sorts after every other record id.
    pub const MAX: RecordId = RecordId(u64::MAX);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

// ── KeyValue ───────────────────────────────────────────────────────

/// A single component of an index key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyValue {
    MinKey,
    Null,
    Int(i64),
    Double(f64),
    String(String),
    Bool(bool),
    MaxKey,
}

impl KeyValue {
    /// Type-class rank used before comparing values of the same class.
    fn rank(&self, version: IndexVersion) -> u8 {
        match (self, version) {
            (KeyValue::MinKey, _) => 0,
            (KeyValue::Null, _) => 1,
            (KeyValue::Int(_), _) => 2,
            (KeyValue::Double(_), IndexVersion::V1) => 2,
            (KeyValue::Double(_), IndexVersion::V0) => 3,
            (KeyValue::String(_), _) => 4,
            (KeyValue::Bool(_), _) => 5,
            (KeyValue::MaxKey, _) => 6,
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<f64> for KeyValue {
    fn from(v: f64) -> Self {
        KeyValue::Double(v)
    }
}

impl From<bool> for KeyValue {
    fn from(v: bool) -> Self {
        KeyValue::Bool(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::String(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::String(v)
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::MinKey => write!(f, "MinKey"),
            KeyValue::Null => write!(f, "null"),
            KeyValue::Int(v) => write!(f, "{}", v),
            KeyValue::Double(v) => write!(f, "{:?}", v),
            KeyValue::String(s) => write!(f, "{:?}", s),
            KeyValue::Bool(b) => write!(f, "{}", b),
            KeyValue::MaxKey => write!(f, "MaxKey"),
        }
    }
}

/// NaN sorts below every other number.
fn cmp_doubles(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Exact comparison of an integer against a double, without rounding the
/// integer through `f64`.
fn cmp_int_double(i: i64, d: f64) -> Ordering {
    if d.is_nan() {
        return Ordering::Greater;
    }
    if d >= 9_223_372_036_854_775_808.0 {
        return Ordering::Less;
    }
    if d < -9_223_372_036_854_775_808.0 {
        return Ordering::Greater;
    }
    let whole = d.trunc() as i64;
    match i.cmp(&whole) {
        Ordering::Equal => {
            let frac = d.fract();
            if frac > 0.0 {
                Ordering::Less
            } else if frac < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        other => other,
    }
}

/// Compare two key values under the given comparison semantics.
pub fn compare_values(a: &KeyValue, b: &KeyValue, version: IndexVersion) -> Ordering {
    let by_rank = a.rank(version).cmp(&b.rank(version));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    match (a, b) {
        (KeyValue::Int(x), KeyValue::Int(y)) => x.cmp(y),
        (KeyValue::Double(x), KeyValue::Double(y)) => cmp_doubles(*x, *y),
        (KeyValue::Int(x), KeyValue::Double(y)) => cmp_int_double(*x, *y),
        (KeyValue::Double(x), KeyValue::Int(y)) => cmp_int_double(*y, *x).reverse(),
        (KeyValue::String(x), KeyValue::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (KeyValue::Bool(x), KeyValue::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

// ── Key ────────────────────────────────────────────────────────────

/// One named component of a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyField {
    pub name: String,
    pub value: KeyValue,
}

/// A structured index key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Key {
    fields: Vec<KeyField>,
}

impl Key {
    pub fn new(fields: Vec<KeyField>) -> Self {
        Self { fields }
    }

    /// Key with unnamed fields, the way stored keys look.
    pub fn from_values(values: impl IntoIterator<Item = KeyValue>) -> Self {
        Self {
            fields: values
                .into_iter()
                .map(|value| KeyField { name: String::new(), value })
                .collect(),
        }
    }

    /// Single unnamed field.
    pub fn single(value: impl Into<KeyValue>) -> Self {
        Self::from_values([value.into()])
    }

    /// Builder-style append of a named field.
    pub fn with_field(mut self, name: &str, value: impl Into<KeyValue>) -> Self {
        self.fields.push(KeyField {
            name: name.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn fields(&self) -> &[KeyField] {
        &self.fields
    }

    pub fn values(&self) -> impl Iterator<Item = &KeyValue> {
        self.fields.iter().map(|f| &f.value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Size of the key's binary encoding. Stores limit keys by this size.
    pub fn encoded_len(&self) -> Result<usize> {
        Ok(bincode::serialized_size(self)? as usize)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", field.name, field.value)?;
        }
        write!(f, " }}")
    }
}

// ── Ordering ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Key comparison semantics of an index. Serialized as `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum IndexVersion {
    V0,
    #[default]
    V1,
}

impl TryFrom<u32> for IndexVersion {
    type Error = IndexError;

    fn try_from(v: u32) -> Result<Self> {
        match v {
            0 => Ok(IndexVersion::V0),
            1 => Ok(IndexVersion::V1),
            other => Err(IndexError::InvalidSpec(format!(
                "unsupported index version {}",
                other
            ))),
        }
    }
}

impl From<IndexVersion> for u32 {
    fn from(v: IndexVersion) -> u32 {
        match v {
            IndexVersion::V0 => 0,
            IndexVersion::V1 => 1,
        }
    }
}

/// Total order over keys: per-field direction plus comparison semantics.
///
/// Fields past the end of `directions` compare ascending. A key that is a
/// strict prefix of another sorts first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOrdering {
    directions: Vec<SortDirection>,
    version: IndexVersion,
}

impl KeyOrdering {
    pub fn new(directions: Vec<SortDirection>, version: IndexVersion) -> Self {
        Self { directions, version }
    }

    /// `n` ascending fields under V1 semantics.
    pub fn ascending(n: usize) -> Self {
        Self::new(vec![SortDirection::Ascending; n], IndexVersion::V1)
    }

    pub fn version(&self) -> IndexVersion {
        self.version
    }

    fn direction(&self, i: usize) -> SortDirection {
        self.directions.get(i).copied().unwrap_or_default()
    }

    pub fn compare(&self, a: &Key, b: &Key) -> Ordering {
        for (i, (fa, fb)) in a.fields.iter().zip(b.fields.iter()).enumerate() {
            let ord = compare_values(&fa.value, &fb.value, self.version);
            let ord = match self.direction(i) {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.len().cmp(&b.len())
    }

    /// Order-equality, field names ignored.
    pub fn keys_equal(&self, a: &Key, b: &Key) -> bool {
        self.compare(a, b) == Ordering::Equal
    }

    /// Entry order: key first, record id as tie-break.
    pub fn compare_entries(
        &self,
        a_key: &Key,
        a_rid: RecordId,
        b_key: &Key,
        b_rid: RecordId,
    ) -> Ordering {
        self.compare(a_key, b_key).then(a_rid.cmp(&b_rid))
    }
}

// ── KeySet ─────────────────────────────────────────────────────────

/// Sorted, order-deduplicated keys of one document.
#[derive(Debug, Clone)]
pub struct KeySet {
    ordering: KeyOrdering,
    keys: Vec<Key>,
}

impl KeySet {
    pub fn new(ordering: KeyOrdering) -> Self {
        Self {
            ordering,
            keys: Vec::new(),
        }
    }

    /// Sort and collapse order-equal keys (first occurrence wins).
    pub fn from_keys(ordering: KeyOrdering, keys: impl IntoIterator<Item = Key>) -> Self {
        let mut keys: Vec<Key> = keys.into_iter().collect();
        keys.sort_by(|a, b| ordering.compare(a, b));
        keys.dedup_by(|later, earlier| ordering.keys_equal(later, earlier));
        Self { ordering, keys }
    }

    /// Insert keeping order. Returns false if an order-equal key exists.
    pub fn insert(&mut self, key: Key) -> bool {
        match self
            .keys
            .binary_search_by(|probe| self.ordering.compare(probe, &key))
        {
            Ok(_) => false,
            Err(pos) => {
                self.keys.insert(pos, key);
                true
            }
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.keys
            .binary_search_by(|probe| self.ordering.compare(probe, key))
            .is_ok()
    }

    pub fn ordering(&self) -> &KeyOrdering {
        &self.ordering
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Key> {
        self.keys.iter()
    }

    pub fn as_slice(&self) -> &[Key] {
        &self.keys
    }

    pub fn into_vec(self) -> Vec<Key> {
        self.keys
    }
}

impl<'a> IntoIterator for &'a KeySet {
    type Item = &'a Key;
    type IntoIter = std::slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
