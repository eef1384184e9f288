//! Ordinal-indexed value storage for one record.

use std::sync::Arc;
use workset_core::{ColumnInfo, Value};

/// Outcome of a value-store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The new value equals the stored one; nothing was written.
    Unchanged,
    /// The value was written and differs from the original snapshot.
    Changed,
    /// The value was written and now equals the original snapshot again,
    /// so the column's dirty tracking must be demoted rather than grown.
    Reverted,
}

/// Current and original column values for one record.
///
/// Slots are ordinal-indexed through the record type's shared
/// [`ColumnInfo`] and lazily allocated: a freshly constructed store holds no
/// slot vector until the first write. An unset slot (`None`) is distinct
/// from an explicit `Value::Null`. The `original` snapshot stays empty until
/// the first accept.
#[derive(Debug, Clone)]
pub struct ValueStore {
    columns: Arc<ColumnInfo>,
    current: Option<Vec<Option<Value>>>,
    original: Option<Vec<Option<Value>>>,
}

impl ValueStore {
    /// Create an unallocated store over the given column mapping.
    pub fn new(columns: Arc<ColumnInfo>) -> Self {
        Self {
            columns,
            current: None,
            original: None,
        }
    }

    /// The shared name-to-ordinal mapping.
    pub fn columns(&self) -> &Arc<ColumnInfo> {
        &self.columns
    }

    /// Whether the store has been touched at all.
    pub fn is_allocated(&self) -> bool {
        self.current.is_some()
    }

    /// Whether an original snapshot exists.
    pub fn has_original(&self) -> bool {
        self.original.is_some()
    }

    fn allocate(&mut self) -> &mut Vec<Option<Value>> {
        let len = self.columns.len();
        self.current.get_or_insert_with(|| vec![None; len])
    }

    /// Current value of a column, if it has ever been set.
    pub fn get(&self, ordinal: usize) -> Option<&Value> {
        self.current
            .as_ref()
            .and_then(|slots| slots.get(ordinal))
            .and_then(Option::as_ref)
    }

    /// Original (last accepted) value of a column, if snapshotted and set.
    pub fn original(&self, ordinal: usize) -> Option<&Value> {
        self.original
            .as_ref()
            .and_then(|slots| slots.get(ordinal))
            .and_then(Option::as_ref)
    }

    /// Write a column value with change detection.
    ///
    /// An absent slot always accepts the write as a change. Otherwise the
    /// old and new values are compared by value equality: equal values
    /// (including both-null) are a no-op. A real write that lands back on
    /// the original snapshot reports [`WriteOutcome::Reverted`].
    pub fn set(&mut self, ordinal: usize, value: Value) -> WriteOutcome {
        let slots = self.allocate();
        let slot = &mut slots[ordinal];

        if let Some(old) = slot {
            if *old == value {
                return WriteOutcome::Unchanged;
            }
        }

        *slot = Some(value);

        let reverted = match &self.original {
            Some(originals) => originals[ordinal] == slots_value(&self.current, ordinal),
            None => false,
        };
        if reverted {
            WriteOutcome::Reverted
        } else {
            WriteOutcome::Changed
        }
    }

    /// Write a value without change detection or dirty tracking.
    ///
    /// Used for database write-back of generated columns and for nulling
    /// discarded records.
    pub fn write_back(&mut self, ordinal: usize, value: Value) {
        let slots = self.allocate();
        slots[ordinal] = Some(value);
    }

    /// Promote the current values to be the new original snapshot.
    pub fn snapshot_original(&mut self) {
        self.original = Some(self.allocate().clone());
    }

    /// Restore the current values from the original snapshot.
    ///
    /// Without a snapshot this is a no-op.
    pub fn restore_original(&mut self) {
        if let Some(original) = &self.original {
            self.current = Some(original.clone());
        }
    }

    /// Discard both snapshots, returning the store to its unallocated state.
    pub fn clear(&mut self) {
        self.current = None;
        self.original = None;
    }

    /// All set (column name, current value) pairs, in ordinal order.
    pub fn current_pairs(&self) -> Vec<(String, Value)> {
        self.pairs(self.current.as_ref())
    }

    /// All set (column name, original value) pairs, in ordinal order.
    pub fn original_pairs(&self) -> Vec<(String, Value)> {
        self.pairs(self.original.as_ref())
    }

    fn pairs(&self, slots: Option<&Vec<Option<Value>>>) -> Vec<(String, Value)> {
        let Some(slots) = slots else {
            return Vec::new();
        };
        slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref().map(|value| {
                    let name = self.columns.name_at(i).unwrap_or_default().to_string();
                    (name, value.clone())
                })
            })
            .collect()
    }
}

fn slots_value(current: &Option<Vec<Option<Value>>>, ordinal: usize) -> Option<Value> {
    current
        .as_ref()
        .and_then(|slots| slots.get(ordinal))
        .and_then(Option::as_ref)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ValueStore {
        ValueStore::new(Arc::new(ColumnInfo::new(vec!["id", "name", "qty"])))
    }

    #[test]
    fn test_lazy_allocation() {
        let mut s = store();
        assert!(!s.is_allocated());
        assert_eq!(s.get(0), None);
        assert_eq!(s.set(1, "x".into()), WriteOutcome::Changed);
        assert!(s.is_allocated());
        assert_eq!(s.get(1), Some(&Value::Text("x".to_string())));
    }

    #[test]
    fn test_equal_write_is_unchanged() {
        let mut s = store();
        s.set(1, "x".into());
        assert_eq!(s.set(1, "x".into()), WriteOutcome::Unchanged);
    }

    #[test]
    fn test_null_transitions() {
        let mut s = store();
        // absent -> null still counts as a write
        assert_eq!(s.set(1, Value::Null), WriteOutcome::Changed);
        // null -> null is a no-op
        assert_eq!(s.set(1, Value::Null), WriteOutcome::Unchanged);
        // null -> non-null is a change
        assert_eq!(s.set(1, "x".into()), WriteOutcome::Changed);
        // non-null -> null is a change
        assert_eq!(s.set(1, Value::Null), WriteOutcome::Changed);
    }

    #[test]
    fn test_revert_to_original() {
        let mut s = store();
        s.set(1, "a".into());
        s.snapshot_original();
        assert_eq!(s.set(1, "b".into()), WriteOutcome::Changed);
        assert_eq!(s.set(1, "a".into()), WriteOutcome::Reverted);
    }

    #[test]
    fn test_no_revert_without_snapshot() {
        let mut s = store();
        s.set(1, "a".into());
        assert_eq!(s.set(1, "b".into()), WriteOutcome::Changed);
        assert_eq!(s.set(1, "a".into()), WriteOutcome::Changed);
    }

    #[test]
    fn test_restore_original() {
        let mut s = store();
        s.set(1, "a".into());
        s.snapshot_original();
        s.set(1, "b".into());
        s.restore_original();
        assert_eq!(s.get(1), Some(&Value::Text("a".to_string())));
    }

    #[test]
    fn test_pairs_skip_unset_slots() {
        let mut s = store();
        s.set(2, Value::Int(3));
        let pairs = s.current_pairs();
        assert_eq!(pairs, vec![("qty".to_string(), Value::Int(3))]);
        assert!(s.original_pairs().is_empty());
    }

    #[test]
    fn test_clear() {
        let mut s = store();
        s.set(0, Value::Int(1));
        s.snapshot_original();
        s.clear();
        assert!(!s.is_allocated());
        assert!(!s.has_original());
    }
}
