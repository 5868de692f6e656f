//! Update tickets: the plan half of a two-phase index update.

use crate::delta::KeyDelta;
use crate::key::{KeySet, RecordId};

/// Prepared key delta for one document update.
///
/// Produced by `validate_update`, consumed by `update`. A default ticket is
/// invalid, and a ticket becomes invalid once applied.
#[derive(Debug, Default)]
pub struct UpdateTicket {
    pub(crate) plan: Option<UpdatePlan>,
}

impl UpdateTicket {
    pub(crate) fn new(plan: UpdatePlan) -> Self {
        Self { plan: Some(plan) }
    }

    pub fn is_valid(&self) -> bool {
        self.plan.is_some()
    }

    pub fn plan(&self) -> Option<&UpdatePlan> {
        self.plan.as_ref()
    }

    pub(crate) fn take_plan(&mut self) -> Option<UpdatePlan> {
        self.plan.take()
    }
}

/// Access-method specific update plan.
#[derive(Debug)]
pub enum UpdatePlan {
    Sorted(SortedUpdatePlan),
}

#[derive(Debug)]
pub struct SortedUpdatePlan {
    pub old_keys: KeySet,
    pub new_keys: KeySet,
    pub delta: KeyDelta,
    pub record_id: RecordId,
    pub dups_allowed: bool,
}

impl SortedUpdatePlan {
    /// Key count after the update: `|old| + |added| - |removed|`.
    pub fn keys_after(&self) -> usize {
        (self.old_keys.len() + self.delta.added.len()).saturating_sub(self.delta.removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::diff;
    use crate::key::{Key, KeyOrdering};

    #[test]
    fn test_default_is_invalid() {
        assert!(!UpdateTicket::default().is_valid());
    }

    #[test]
    fn test_take_invalidates() {
        let ord = KeyOrdering::ascending(1);
        let old = KeySet::from_keys(ord.clone(), [Key::single(1)]);
        let new = KeySet::from_keys(ord, [Key::single(2), Key::single(3)]);
        let delta = diff(&old, &new);
        let mut ticket = UpdateTicket::new(UpdatePlan::Sorted(SortedUpdatePlan {
            old_keys: old,
            new_keys: new,
            delta,
            record_id: RecordId(7),
            dups_allowed: false,
        }));
        assert!(ticket.is_valid());
        match ticket.take_plan() {
            Some(UpdatePlan::Sorted(p)) => assert_eq!(p.keys_after(), 2),
            None => panic!("expected a plan"),
        }
        assert!(!ticket.is_valid());
    }
}
