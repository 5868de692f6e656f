//! Key delta between the old and new key sets of a document.
//!
//! Both inputs are already sorted under the same ordering, so each
//! difference is a single linear merge-walk. Membership is decided by
//! order-equality, never by field names.

use std::cmp::Ordering;

use crate::key::{Key, KeySet};

/// Keys to add and remove to move an index from `old` to `new`.
#[derive(Debug, Clone, Default)]
pub struct KeyDelta {
    /// Keys of `new` with no order-equal key in `old`, in index order.
    pub added: Vec<Key>,
    /// Keys of `old` with no order-equal key in `new`, in index order.
    pub removed: Vec<Key>,
}

impl KeyDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Keys in `l` that are not in `r`.
///
/// Complexity: O(|l| + |r|)
pub fn set_difference(l: &KeySet, r: &KeySet) -> Vec<Key> {
    debug_assert_eq!(l.ordering(), r.ordering(), "key sets must share one ordering");
    let ordering = l.ordering();
    let right = r.as_slice();
    let mut j = 0;
    let mut diff = Vec::new();

    for key in l.iter() {
        while j < right.len() && ordering.compare(&right[j], key) == Ordering::Less {
            j += 1;
        }
        if j == right.len() || !ordering.keys_equal(key, &right[j]) {
            diff.push(key.clone());
        }
    }

    diff
}

/// Compute the (added, removed) delta between two key sets.
pub fn diff(old_keys: &KeySet, new_keys: &KeySet) -> KeyDelta {
    KeyDelta {
        added: set_difference(new_keys, old_keys),
        removed: set_difference(old_keys, new_keys),
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyOrdering, KeyValue};
    use proptest::prelude::*;

    fn set(values: &[i64]) -> KeySet {
        KeySet::from_keys(
            KeyOrdering::ascending(1),
            values.iter().map(|v| Key::single(*v)),
        )
    }

    fn ints(keys: &[Key]) -> Vec<i64> {
        keys.iter()
            .map(|k| match k.fields()[0].value {
                KeyValue::Int(v) => v,
                ref other => panic!("unexpected value {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_diff_disjoint_and_overlapping() {
        let delta = diff(&set(&[1, 2, 3]), &set(&[2, 3, 4, 5]));
        assert_eq!(ints(&delta.added), vec![4, 5]);
        assert_eq!(ints(&delta.removed), vec![1]);
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let delta = diff(&set(&[1, 2]), &set(&[2, 1]));
        assert!(delta.is_empty());
    }

    #[test]
    fn test_diff_empty_sides() {
        let delta = diff(&set(&[]), &set(&[7]));
        assert_eq!(ints(&delta.added), vec![7]);
        assert!(delta.removed.is_empty());

        let delta = diff(&set(&[7]), &set(&[]));
        assert!(delta.added.is_empty());
        assert_eq!(ints(&delta.removed), vec![7]);
    }

    #[test]
    fn test_diff_ignores_field_names_and_numeric_type() {
        let ordering = KeyOrdering::ascending(1);
        let old = KeySet::from_keys(ordering.clone(), vec![Key::default().with_field("a", 1i64)]);
        let new = KeySet::from_keys(ordering, vec![Key::default().with_field("b", 1.0f64)]);
        assert!(diff(&old, &new).is_empty());
    }

    proptest! {
        #[test]
        fn prop_delta_reconstructs_new(
            old in proptest::collection::vec(-20i64..20, 0..12),
            new in proptest::collection::vec(-20i64..20, 0..12),
        ) {
            let old_set = set(&old);
            let new_set = set(&new);
            let delta = diff(&old_set, &new_set);

            for k in &delta.added {
                prop_assert!(!old_set.contains(k));
                prop_assert!(new_set.contains(k));
            }
            for k in &delta.removed {
                prop_assert!(!new_set.contains(k));
                prop_assert!(old_set.contains(k));
            }

            // (old \ removed) ∪ added == new
            let mut rebuilt = KeySet::new(KeyOrdering::ascending(1));
            for k in old_set.iter() {
                if !delta.removed.iter().any(|r| old_set.ordering().keys_equal(r, k)) {
                    rebuilt.insert(k.clone());
                }
            }
            for k in &delta.added {
                rebuilt.insert(k.clone());
            }
            prop_assert_eq!(ints(rebuilt.as_slice()), ints(new_set.as_slice()));
        }
    }
}
