//! An ordered collection of live records plus its pending deletions.
//!
//! A record set owns its live records exclusively: a record belongs to at
//! most one set at a time, enforced by `add`/`detach`. Records removed for
//! deletion move to a separate pending-deletion list and are never counted
//! or enumerated as live members.

use crate::observe::{ListChange, ObserverList, SubscriptionId};
use crate::record::{Record, RowState, SharedRecord, column_mapping};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use workset_core::{Error, Result, ResultTable, StateError, StateErrorKind, TableSchema};

/// Shared handle to a record set.
pub type SharedRecordSet = Rc<RefCell<RecordSet>>;

/// An ordered sequence of live records plus a side list of records removed
/// and pending deletion.
pub struct RecordSet {
    schema: Arc<TableSchema>,
    live: Vec<SharedRecord>,
    pending_delete: Vec<SharedRecord>,
    observers: ObserverList,
    save_depth: u32,
    self_weak: Weak<RefCell<RecordSet>>,
}

impl RecordSet {
    /// Create an empty record set for the given schema.
    pub fn new_shared(schema: Arc<TableSchema>) -> SharedRecordSet {
        Rc::new_cyclic(|self_weak| {
            RefCell::new(Self {
                schema,
                live: Vec::new(),
                pending_delete: Vec::new(),
                observers: ObserverList::new(),
                save_depth: 0,
                self_weak: self_weak.clone(),
            })
        })
    }

    /// The schema shared by every record of this set.
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Number of live records. Pending deletions are never counted.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Check if there are no live records.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Whether the set holds any live records.
    pub fn has_data(&self) -> bool {
        !self.live.is_empty()
    }

    /// The live records, in order.
    pub fn records(&self) -> &[SharedRecord] {
        &self.live
    }

    /// Records removed from the live sequence and awaiting deletion.
    pub fn pending_deletes(&self) -> &[SharedRecord] {
        &self.pending_delete
    }

    /// A live record by index.
    pub fn get(&self, index: usize) -> Option<SharedRecord> {
        self.live.get(index).cloned()
    }

    /// Create a fresh `Added` record owned by this set.
    pub fn add_new(&mut self) -> SharedRecord {
        let record = Record::new_shared(Arc::clone(&self.schema));
        record.borrow_mut().set_owner(self.self_weak.clone());
        self.live.push(Rc::clone(&record));
        let index = self.live.len() - 1;
        self.notify(&ListChange::Added(index));
        record
    }

    /// Append a detached record to the live sequence.
    ///
    /// Fails with `AlreadyOwned` if the record currently belongs to any
    /// record set (including this one): live ownership is exclusive.
    pub fn add(&mut self, record: SharedRecord) -> Result<()> {
        if record.borrow().owner().is_some() {
            return Err(Error::State(StateError {
                kind: StateErrorKind::AlreadyOwned,
                message: format!(
                    "record already belongs to a record set of '{}'",
                    self.schema.name()
                ),
            }));
        }
        record.borrow_mut().set_owner(self.self_weak.clone());
        self.live.push(record);
        let index = self.live.len() - 1;
        self.notify(&ListChange::Added(index));
        Ok(())
    }

    /// Attach a detached record. Alias of [`RecordSet::add`], kept for
    /// symmetry with [`RecordSet::detach`].
    pub fn attach(&mut self, record: SharedRecord) -> Result<()> {
        self.add(record)
    }

    /// Remove a record from the live sequence without any deletion
    /// semantics, returning it to detached life.
    pub fn detach(&mut self, record: &SharedRecord) -> Result<()> {
        let ptr = Rc::as_ptr(record);
        let Some(index) = self.live.iter().position(|r| Rc::as_ptr(r) == ptr) else {
            return Err(Error::State(StateError {
                kind: StateErrorKind::NotOwned,
                message: format!("record is not a live member of '{}'", self.schema.name()),
            }));
        };
        let removed = self.live.remove(index);
        removed.borrow_mut().set_owner(Weak::new());
        self.notify(&ListChange::Removed(index));
        Ok(())
    }

    /// Remove a record from the live sequence. Alias of
    /// [`RecordSet::detach`].
    pub fn remove(&mut self, record: &SharedRecord) -> Result<()> {
        self.detach(record)
    }

    /// Whether any live record is dirty or any deletion is pending.
    pub fn is_dirty(&self) -> bool {
        !self.pending_delete.is_empty() || self.live.iter().any(|r| r.borrow().is_dirty())
    }

    /// Records (live and pending-deletion) carrying a save error.
    pub fn errors(&self) -> Vec<SharedRecord> {
        self.live
            .iter()
            .chain(self.pending_delete.iter())
            .filter(|r| r.borrow().row_error().is_some())
            .cloned()
            .collect()
    }

    /// Accept changes across the whole set.
    ///
    /// Live records snapshot current as original and become `Unchanged`;
    /// pending-deletion records become `Invalid` tombstones and are
    /// dropped.
    pub fn accept_changes(&mut self) {
        for record in &self.live {
            record.borrow_mut().accept_changes();
        }
        for record in self.pending_delete.drain(..) {
            let mut r = record.borrow_mut();
            r.accept_changes();
            r.set_owner(Weak::new());
        }
    }

    /// Accept changes after a save, leaving errored records untouched so
    /// their `row_error` stays inspectable.
    pub(crate) fn accept_after_save(&mut self) {
        for record in &self.live {
            let mut r = record.borrow_mut();
            if r.row_error().is_none() {
                r.accept_changes();
            }
        }
        let mut remaining = Vec::new();
        for record in self.pending_delete.drain(..) {
            let errored = record.borrow().row_error().is_some();
            if errored {
                remaining.push(record);
            } else {
                let mut r = record.borrow_mut();
                r.accept_changes();
                r.set_owner(Weak::new());
            }
        }
        self.pending_delete = remaining;
    }

    /// Reject changes across the whole set.
    ///
    /// Pending deletions return to the live sequence as `Unchanged`;
    /// modified records restore their original values; records that were
    /// still `Added` are discarded from the set entirely.
    pub fn reject_changes(&mut self) {
        let mut kept = Vec::new();
        for record in self.live.drain(..) {
            let added = record.borrow().state() == RowState::Added;
            record.borrow_mut().reject_changes();
            if added {
                record.borrow_mut().set_owner(Weak::new());
            } else {
                kept.push(record);
            }
        }
        self.live = kept;
        for record in self.pending_delete.drain(..).collect::<Vec<_>>() {
            record.borrow_mut().reject_changes();
            self.live.push(record);
        }
        self.notify(&ListChange::Reset);
    }

    /// Populate the set from a flat result table.
    ///
    /// Each row becomes an `Unchanged` record; the column-to-ordinal
    /// mapping is computed once and reused. Returns the number of records
    /// appended.
    pub fn fill_from(&mut self, table: &ResultTable) -> Result<usize> {
        let mapping = column_mapping(&self.schema, &table.column_info());
        for row in table.rows() {
            let record = Record::from_row(Arc::clone(&self.schema), row, &mapping);
            record.borrow_mut().set_owner(self.self_weak.clone());
            self.live.push(record);
        }
        if !table.is_empty() {
            self.notify(&ListChange::Reset);
        }
        Ok(table.len())
    }

    /// Clear the pending-deletion list, detaching its records.
    pub(crate) fn clear_pending(&mut self) {
        for record in self.pending_delete.drain(..) {
            record.borrow_mut().set_owner(Weak::new());
        }
    }

    pub(crate) fn remove_live_ptr(&mut self, ptr: *const RefCell<Record>) -> Option<SharedRecord> {
        let index = self.live.iter().position(|r| Rc::as_ptr(r) == ptr)?;
        let removed = self.live.remove(index);
        self.notify(&ListChange::Removed(index));
        Some(removed)
    }

    pub(crate) fn push_pending(&mut self, record: SharedRecord) {
        self.pending_delete.push(record);
    }

    /// Move an undeleted record from the pending list back to the live
    /// sequence. The caller is the record itself, so its cell stays
    /// untouched here.
    pub(crate) fn restore_pending_ptr(&mut self, ptr: *const RefCell<Record>) -> bool {
        let Some(index) = self
            .pending_delete
            .iter()
            .position(|r| Rc::as_ptr(r) == ptr)
        else {
            return false;
        };
        let record = self.pending_delete.remove(index);
        self.live.push(record);
        let index = self.live.len() - 1;
        self.notify(&ListChange::Added(index));
        true
    }

    /// Drop an accepted-deleted record from the pending list. The record
    /// clears its own owner reference.
    pub(crate) fn drop_pending_ptr(&mut self, ptr: *const RefCell<Record>) -> bool {
        let Some(index) = self
            .pending_delete
            .iter()
            .position(|r| Rc::as_ptr(r) == ptr)
        else {
            return false;
        };
        self.pending_delete.remove(index);
        true
    }

    pub(crate) fn self_weak(&self) -> Weak<RefCell<RecordSet>> {
        self.self_weak.clone()
    }

    // ------------------------------------------------------------------
    // Save nesting and notification
    // ------------------------------------------------------------------

    pub(crate) fn enter_save(&mut self) -> u32 {
        self.save_depth += 1;
        self.save_depth
    }

    pub(crate) fn exit_save(&mut self) -> u32 {
        self.save_depth = self.save_depth.saturating_sub(1);
        self.save_depth
    }

    /// Register a list-change observer.
    pub fn subscribe(&mut self, observer: Box<dyn FnMut(&ListChange)>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    /// Remove a previously registered observer.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Deliver an event unless a save is in flight; mid-save changes are
    /// coalesced into one `Saved` event when the nesting fully unwinds.
    pub(crate) fn notify(&mut self, change: &ListChange) {
        if self.save_depth == 0 {
            self.observers.emit(change);
        }
    }
}

impl fmt::Debug for RecordSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSet")
            .field("table", &self.schema.name())
            .field("live", &self.live.len())
            .field("pending_delete", &self.pending_delete.len())
            .finish()
    }
}

/// Mark every live record of the set deleted.
///
/// Records that were still `Added` are discarded; the rest move to the
/// pending-deletion list.
pub fn mark_all_deleted(set: &SharedRecordSet) -> Result<()> {
    let handles: Vec<SharedRecord> = set.borrow().live.clone();
    for record in handles {
        record.borrow_mut().mark_deleted()?;
    }
    Ok(())
}

/// Move every live record of `source` into `target`, leaving `source`
/// empty. Both sets must share a schema.
pub fn combine(target: &SharedRecordSet, source: &SharedRecordSet) -> Result<()> {
    if Rc::ptr_eq(target, source) {
        return Ok(());
    }
    let target_weak = {
        let t = target.borrow();
        let s = source.borrow();
        if !Arc::ptr_eq(t.schema(), s.schema()) {
            return Err(Error::Custom(format!(
                "cannot combine record sets of '{}' and '{}'",
                t.schema().name(),
                s.schema().name()
            )));
        }
        t.self_weak()
    };
    let moved: Vec<SharedRecord> = {
        let mut s = source.borrow_mut();
        s.live.drain(..).collect()
    };
    for record in &moved {
        record.borrow_mut().set_owner(target_weak.clone());
    }
    {
        let mut t = target.borrow_mut();
        t.live.extend(moved);
        t.notify(&ListChange::Reset);
    }
    source.borrow_mut().notify(&ListChange::Reset);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use workset_core::{ColumnDef, SqlType, Value};

    fn hero_schema() -> Arc<TableSchema> {
        Arc::new(TableSchema::new(
            "heroes",
            vec![
                ColumnDef::new("id", SqlType::BigInt).primary_key(true),
                ColumnDef::new("name", SqlType::Text),
            ],
        ))
    }

    fn set_with(names: &[&str]) -> SharedRecordSet {
        let set = RecordSet::new_shared(hero_schema());
        {
            let mut s = set.borrow_mut();
            for (i, name) in names.iter().enumerate() {
                let rec = s.add_new();
                let mut r = rec.borrow_mut();
                r.set_column("id", i as i64 + 1).unwrap();
                r.set_column("name", *name).unwrap();
                r.accept_changes();
            }
        }
        set
    }

    #[test]
    fn test_add_new_is_owned_and_counted() {
        let set = RecordSet::new_shared(hero_schema());
        let rec = set.borrow_mut().add_new();
        assert_eq!(set.borrow().len(), 1);
        assert!(rec.borrow().owner().is_some());
        assert!(set.borrow().has_data());
    }

    #[test]
    fn test_exclusive_ownership() {
        let set_a = RecordSet::new_shared(hero_schema());
        let set_b = RecordSet::new_shared(hero_schema());
        let rec = set_a.borrow_mut().add_new();
        let err = set_b.borrow_mut().add(rec).unwrap_err();
        assert!(matches!(err, Error::State(ref e) if e.kind == StateErrorKind::AlreadyOwned));
    }

    #[test]
    fn test_detach_then_reattach() {
        let set_a = RecordSet::new_shared(hero_schema());
        let set_b = RecordSet::new_shared(hero_schema());
        let rec = set_a.borrow_mut().add_new();
        set_a.borrow_mut().detach(&rec).unwrap();
        assert!(rec.borrow().owner().is_none());
        set_b.borrow_mut().add(rec).unwrap();
        assert_eq!(set_a.borrow().len(), 0);
        assert_eq!(set_b.borrow().len(), 1);
    }

    #[test]
    fn test_detach_unknown_record_fails() {
        let set = RecordSet::new_shared(hero_schema());
        let stray = Record::new_shared(hero_schema());
        let err = set.borrow_mut().detach(&stray).unwrap_err();
        assert!(matches!(err, Error::State(ref e) if e.kind == StateErrorKind::NotOwned));
    }

    #[test]
    fn test_delete_moves_to_pending_never_both() {
        let set = set_with(&["a", "b"]);
        let rec = set.borrow().get(0).unwrap();
        rec.borrow_mut().mark_deleted().unwrap();

        let s = set.borrow();
        assert_eq!(s.len(), 1);
        assert_eq!(s.pending_deletes().len(), 1);
        assert!(s.is_dirty());
        // never double-counted, never in both places
        let ptr = Rc::as_ptr(&rec);
        assert!(!s.records().iter().any(|r| Rc::as_ptr(r) == ptr));
        assert!(s.pending_deletes().iter().any(|r| Rc::as_ptr(r) == ptr));
    }

    #[test]
    fn test_delete_added_record_discards() {
        let set = set_with(&["a"]);
        let rec = set.borrow_mut().add_new();
        rec.borrow_mut().set_column("name", "temp").unwrap();
        rec.borrow_mut().mark_deleted().unwrap();

        let s = set.borrow();
        assert_eq!(s.len(), 1);
        assert!(s.pending_deletes().is_empty());
        assert_eq!(rec.borrow().state(), RowState::Unchanged);
        assert!(rec.borrow().owner().is_none());
    }

    #[test]
    fn test_mark_all_deleted() {
        let set = set_with(&["a", "b", "c"]);
        mark_all_deleted(&set).unwrap();
        let s = set.borrow();
        assert_eq!(s.len(), 0);
        assert_eq!(s.pending_deletes().len(), 3);
    }

    #[test]
    fn test_accept_changes_drops_pending() {
        let set = set_with(&["a", "b"]);
        let rec = set.borrow().get(0).unwrap();
        rec.borrow_mut().mark_deleted().unwrap();

        set.borrow_mut().accept_changes();

        let s = set.borrow();
        assert!(s.pending_deletes().is_empty());
        assert!(!s.is_dirty());
        assert_eq!(rec.borrow().state(), RowState::Invalid);
    }

    #[test]
    fn test_reject_changes_restores_pending() {
        let set = set_with(&["a", "b"]);
        let rec = set.borrow().get(0).unwrap();
        rec.borrow_mut().mark_deleted().unwrap();

        set.borrow_mut().reject_changes();

        let s = set.borrow();
        assert_eq!(s.len(), 2);
        assert!(s.pending_deletes().is_empty());
        assert!(!s.is_dirty());
        assert_eq!(rec.borrow().state(), RowState::Unchanged);
    }

    #[test]
    fn test_record_level_reject_of_deleted_restores_membership() {
        let set = set_with(&["a", "b"]);
        let rec = set.borrow().get(0).unwrap();
        rec.borrow_mut().mark_deleted().unwrap();

        rec.borrow_mut().reject_changes();

        let s = set.borrow();
        assert_eq!(s.len(), 2);
        assert!(s.pending_deletes().is_empty());
        assert_eq!(rec.borrow().state(), RowState::Unchanged);
    }

    #[test]
    fn test_record_level_accept_of_deleted_leaves_pending() {
        let set = set_with(&["a", "b"]);
        let rec = set.borrow().get(0).unwrap();
        rec.borrow_mut().mark_deleted().unwrap();

        rec.borrow_mut().accept_changes();

        assert_eq!(rec.borrow().state(), RowState::Invalid);
        assert!(set.borrow().pending_deletes().is_empty());
        assert!(rec.borrow().owner().is_none());
    }

    #[test]
    fn test_reject_changes_discards_added() {
        let set = set_with(&["a"]);
        set.borrow_mut().add_new();
        assert_eq!(set.borrow().len(), 2);

        set.borrow_mut().reject_changes();

        assert_eq!(set.borrow().len(), 1);
        assert!(!set.borrow().is_dirty());
    }

    #[test]
    fn test_combine_moves_all_live() {
        let target = set_with(&["a"]);
        let source = set_with(&["b", "c"]);
        combine(&target, &source).unwrap();

        assert_eq!(target.borrow().len(), 3);
        assert_eq!(source.borrow().len(), 0);
        for rec in target.borrow().records() {
            let owner = rec.borrow().owner().unwrap();
            assert!(Rc::ptr_eq(&owner, &target));
        }
    }

    #[test]
    fn test_combine_schema_mismatch() {
        let target = RecordSet::new_shared(hero_schema());
        let source = RecordSet::new_shared(Arc::new(TableSchema::new(
            "villains",
            vec![ColumnDef::new("id", SqlType::BigInt).primary_key(true)],
        )));
        assert!(combine(&target, &source).is_err());
    }

    #[test]
    fn test_fill_from_result_table() {
        let mut table = ResultTable::new(vec!["id", "name"]);
        table.push(vec![Value::BigInt(1), "x".into()]).unwrap();
        table.push(vec![Value::BigInt(2), "y".into()]).unwrap();

        let set = RecordSet::new_shared(hero_schema());
        let count = set.borrow_mut().fill_from(&table).unwrap();
        assert_eq!(count, 2);

        let s = set.borrow();
        assert_eq!(s.len(), 2);
        assert!(!s.is_dirty());
        let rec = s.get(1).unwrap();
        assert_eq!(
            rec.borrow_mut().get_column("name").unwrap(),
            Value::Text("y".to_string())
        );
    }

    #[test]
    fn test_observers_fire_outside_save() {
        let set = RecordSet::new_shared(hero_schema());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        set.borrow_mut()
            .subscribe(Box::new(move |c| seen2.borrow_mut().push(*c)));

        set.borrow_mut().add_new();
        assert_eq!(*seen.borrow(), vec![ListChange::Added(0)]);
    }

    #[test]
    fn test_observers_suppressed_during_save() {
        let set = RecordSet::new_shared(hero_schema());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        set.borrow_mut()
            .subscribe(Box::new(move |c| seen2.borrow_mut().push(*c)));

        set.borrow_mut().enter_save();
        set.borrow_mut().add_new();
        assert!(seen.borrow().is_empty());
        set.borrow_mut().exit_save();
    }

    #[test]
    fn test_errors_accessor_spans_live_and_pending() {
        let set = set_with(&["a", "b"]);
        let live = set.borrow().get(0).unwrap();
        let doomed = set.borrow().get(1).unwrap();
        doomed.borrow_mut().mark_deleted().unwrap();

        live.borrow_mut().set_row_error("boom".to_string());
        doomed.borrow_mut().set_row_error("crash".to_string());

        assert_eq!(set.borrow().errors().len(), 2);
    }
}
