//! Key extraction from documents.
//!
//! [`FieldPathExtractor`] resolves each key-pattern path in a JSON document:
//! - missing paths index as `null`
//! - an array (at the end of the path or on the way) yields one key per
//!   element; an empty array indexes as `null`
//! - at most one field of a compound key may be array-valued
//! - objects and nested arrays are not indexable values

use serde_json::Value;

use crate::catalog::IndexSpec;
use crate::error::{IndexError, Result};
use crate::key::{Key, KeyField, KeyOrdering, KeySet, KeyValue};

/// Documents are JSON values.
pub type Document = Value;

/// Derives the key set of a document for one index.
pub trait KeyExtractor: Send + Sync {
    /// Deterministic for a given document.
    fn keys_for(&self, doc: &Document) -> Result<KeySet>;
}

/// Dotted-path extractor over JSON documents.
pub struct FieldPathExtractor {
    paths: Vec<String>,
    ordering: KeyOrdering,
}

/// Values found at one path.
struct FieldValues {
    values: Vec<KeyValue>,
    /// An array was traversed or reached.
    expanded: bool,
}

impl FieldPathExtractor {
    pub fn new(spec: &IndexSpec) -> Self {
        Self {
            paths: spec.key_pattern.iter().map(|f| f.path.clone()).collect(),
            ordering: spec.ordering(),
        }
    }

    fn field_values(doc: &Value, path: &str) -> Result<FieldValues> {
        let parts: Vec<&str> = path.split('.').collect();
        let mut found = Vec::new();
        let mut expanded = false;
        collect(doc, &parts, &mut found, &mut expanded);

        let mut values = found
            .into_iter()
            .map(|v| to_key_value(v, path))
            .collect::<Result<Vec<_>>>()?;
        if values.is_empty() {
            values.push(KeyValue::Null);
        }
        Ok(FieldValues { values, expanded })
    }
}

fn collect<'a>(v: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>, expanded: &mut bool) {
    match (parts.split_first(), v) {
        (None, Value::Array(items)) => {
            *expanded = true;
            out.extend(items.iter());
        }
        (None, _) => out.push(v),
        (Some((head, rest)), Value::Object(map)) => {
            if let Some(child) = map.get(*head) {
                collect(child, rest, out, expanded);
            }
        }
        (Some(_), Value::Array(items)) => {
            *expanded = true;
            for item in items.iter().filter(|i| i.is_object()) {
                collect(item, parts, out, expanded);
            }
        }
        (Some(_), _) => {}
    }
}

fn to_key_value(v: &Value, path: &str) -> Result<KeyValue> {
    match v {
        Value::Null => Ok(KeyValue::Null),
        Value::Bool(b) => Ok(KeyValue::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(KeyValue::Int(i)),
            None => Ok(KeyValue::Double(n.as_f64().unwrap_or(f64::NAN))),
        },
        Value::String(s) => Ok(KeyValue::String(s.clone())),
        Value::Array(_) => Err(IndexError::KeyExtraction(format!(
            "nested array at '{}' is not indexable",
            path
        ))),
        Value::Object(_) => Err(IndexError::KeyExtraction(format!(
            "object at '{}' is not indexable",
            path
        ))),
    }
}

impl KeyExtractor for FieldPathExtractor {
    fn keys_for(&self, doc: &Document) -> Result<KeySet> {
        let fields = self
            .paths
            .iter()
            .map(|p| Self::field_values(doc, p))
            .collect::<Result<Vec<_>>>()?;

        let array_fields: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.expanded)
            .map(|(i, _)| i)
            .collect();
        if array_fields.len() > 1 {
            return Err(IndexError::KeyExtraction(format!(
                "cannot index parallel arrays [{}] [{}]",
                self.paths[array_fields[0]], self.paths[array_fields[1]]
            )));
        }

        // Non-array fields hold exactly one value; the array field (if any)
        // fans out into one key per element.
        let fan_out = array_fields.first().copied();
        let width = fan_out.map_or(1, |i| fields[i].values.len());
        let keys = (0..width).map(|n| {
            Key::new(
                fields
                    .iter()
                    .zip(&self.paths)
                    .enumerate()
                    .map(|(i, (f, path))| KeyField {
                        name: path.clone(),
                        value: if Some(i) == fan_out {
                            f.values[n].clone()
                        } else {
                            f.values[0].clone()
                        },
                    })
                    .collect(),
            )
        });

        Ok(KeySet::from_keys(self.ordering.clone(), keys))
    }
}

// ── Tests ──────────────────────────────────────────────────────────
