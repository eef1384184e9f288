//! A single change-tracked record.
//!
//! A `Record` owns one value store plus its lifecycle state and the set of
//! modified columns. Records are always handled through [`SharedRecord`]
//! handles: a record set owns its live records exclusively, while the
//! record's back-reference to its owner is a non-owning `Weak`, keeping the
//! graph acyclic in ownership terms even when it is cyclic in reachability.

use crate::set::{RecordSet, SharedRecordSet};
use crate::store::{ValueStore, WriteOutcome};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use workset_core::{
    ChildDecl, ChildKind, ColumnIssue, ColumnInfo, Error, Result, Row, StateError, TableSchema,
    TypeError, Value, check_column,
};

/// Lifecycle state of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    /// New, not yet persisted
    Added,
    /// Matches the last known persisted snapshot
    Unchanged,
    /// At least one column differs from the original snapshot
    Modified,
    /// Marked for removal, pending persistence
    Deleted,
    /// Terminal tombstone after a deleted record's changes were accepted
    Invalid,
}

impl RowState {
    /// Whether a record in this state has pending work for a save.
    #[must_use]
    pub fn is_dirty(self) -> bool {
        matches!(self, RowState::Added | RowState::Modified | RowState::Deleted)
    }
}

/// Shared handle to a record.
pub type SharedRecord = Rc<RefCell<Record>>;

/// A declared relationship slot materialized on one record.
#[derive(Clone)]
pub struct Slot {
    decl: ChildDecl,
    record: Option<SharedRecord>,
    set: Option<SharedRecordSet>,
}

impl Slot {
    fn new(decl: ChildDecl) -> Self {
        Self {
            decl,
            record: None,
            set: None,
        }
    }

    /// Slot name.
    pub fn name(&self) -> &'static str {
        self.decl.slot
    }

    /// Declared slot kind.
    pub fn kind(&self) -> ChildKind {
        self.decl.kind
    }

    /// The child record, for `ChildKind::Record` slots.
    pub fn record(&self) -> Option<SharedRecord> {
        self.record.clone()
    }

    /// The child record set, for `ChildKind::RecordSet` slots.
    pub fn set(&self) -> Option<SharedRecordSet> {
        self.set.clone()
    }

    /// Whether the slot currently holds nothing.
    pub fn is_empty(&self) -> bool {
        self.record.is_none() && self.set.is_none()
    }
}

/// Snapshot taken by `begin_edit`, restored by `cancel_edit`.
struct EditBackup {
    store: ValueStore,
    state: RowState,
    modified: BTreeSet<usize>,
}

/// One change-tracked record.
pub struct Record {
    schema: Arc<TableSchema>,
    store: ValueStore,
    state: RowState,
    modified: BTreeSet<usize>,
    owner: Weak<RefCell<RecordSet>>,
    self_weak: Weak<RefCell<Record>>,
    slots: Vec<Slot>,
    row_error: Option<String>,
    edit: Option<EditBackup>,
    defaults_applied: bool,
}

impl Record {
    /// Create a fresh detached record in the `Added` state.
    pub fn new_shared(schema: Arc<TableSchema>) -> SharedRecord {
        Rc::new_cyclic(|self_weak| {
            RefCell::new(Self {
                store: ValueStore::new(schema.column_info()),
                state: RowState::Added,
                modified: BTreeSet::new(),
                owner: Weak::new(),
                self_weak: self_weak.clone(),
                slots: schema.children().iter().copied().map(Slot::new).collect(),
                row_error: None,
                edit: None,
                defaults_applied: false,
                schema,
            })
        })
    }

    /// Build an `Unchanged` record from a loaded result row.
    ///
    /// `mapping` pairs each schema ordinal with the row ordinal holding its
    /// value (`None` when the result does not carry that column); it is
    /// computed once per result table and reused for every row.
    pub fn from_row(schema: Arc<TableSchema>, row: &Row, mapping: &[Option<usize>]) -> SharedRecord {
        let handle = Self::new_shared(schema);
        {
            let mut record = handle.borrow_mut();
            for (ordinal, row_ordinal) in mapping.iter().enumerate() {
                if let Some(row_ordinal) = row_ordinal {
                    if let Some(value) = row.get(*row_ordinal) {
                        record.store.write_back(ordinal, value.clone());
                    }
                }
            }
            record.store.snapshot_original();
            record.state = RowState::Unchanged;
            record.defaults_applied = true;
        }
        handle
    }

    /// The record's schema.
    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RowState {
        self.state
    }

    /// Whether this record has pending work for a save.
    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    /// Names of the currently modified columns, in ordinal order.
    pub fn modified_columns(&self) -> Vec<String> {
        let columns = self.store.columns().clone();
        self.modified
            .iter()
            .filter_map(|&i| columns.name_at(i).map(str::to_string))
            .collect()
    }

    /// The record set owning this record, if any.
    pub fn owner(&self) -> Option<SharedRecordSet> {
        self.owner.upgrade()
    }

    pub(crate) fn set_owner(&mut self, owner: Weak<RefCell<RecordSet>>) {
        self.owner = owner;
    }

    pub(crate) fn self_handle(&self) -> Option<SharedRecord> {
        self.self_weak.upgrade()
    }

    /// Error message recorded for this record by a `continue_on_error` save.
    pub fn row_error(&self) -> Option<&str> {
        self.row_error.as_deref()
    }

    pub(crate) fn set_row_error(&mut self, message: String) {
        self.row_error = Some(message);
    }

    pub(crate) fn clear_row_error(&mut self) {
        self.row_error = None;
    }

    // ------------------------------------------------------------------
    // Column access
    // ------------------------------------------------------------------

    /// Write a column value, tracking the change.
    ///
    /// Returns `true` when the store actually changed. Equal writes are
    /// no-ops; a write that lands back on the original snapshot demotes the
    /// column from the modified set, and can return the whole record to
    /// `Unchanged` when no other column stays modified.
    pub fn set_column(&mut self, name: &str, value: impl Into<Value>) -> Result<bool> {
        self.write_column(name, value.into(), false)
    }

    /// Write a column value without marking it modified.
    ///
    /// Virtual writes never affect dirty tracking.
    pub fn set_column_virtual(&mut self, name: &str, value: impl Into<Value>) -> Result<bool> {
        self.write_column(name, value.into(), true)
    }

    fn write_column(&mut self, name: &str, value: Value, virtual_write: bool) -> Result<bool> {
        match self.state {
            RowState::Deleted => {
                return Err(StateError::deleted_write(self.schema.name()).into());
            }
            RowState::Invalid => {
                return Err(StateError::invalid_access(self.schema.name()).into());
            }
            _ => {}
        }

        let ordinal = self.ordinal(name)?;
        match self.store.set(ordinal, value) {
            WriteOutcome::Unchanged => Ok(false),
            WriteOutcome::Changed => {
                if !virtual_write {
                    self.modified.insert(ordinal);
                    if self.state == RowState::Unchanged {
                        self.state = RowState::Modified;
                    }
                }
                Ok(true)
            }
            WriteOutcome::Reverted => {
                if !virtual_write {
                    self.modified.remove(&ordinal);
                    if self.modified.is_empty() && self.state == RowState::Modified {
                        self.state = RowState::Unchanged;
                    }
                }
                Ok(true)
            }
        }
    }

    /// Read a column's current value; unset columns read as `Value::Null`.
    ///
    /// The first read of an untouched `Added` record materializes the
    /// schema's client-side defaults.
    pub fn get_column(&mut self, name: &str) -> Result<Value> {
        if self.state == RowState::Invalid {
            return Err(StateError::invalid_access(self.schema.name()).into());
        }
        self.apply_defaults()?;
        let ordinal = self.ordinal(name)?;
        Ok(self.store.get(ordinal).cloned().unwrap_or(Value::Null))
    }

    /// Read a column's current value without triggering default
    /// materialization. Unset columns read as `Value::Null`.
    pub fn column_value(&self, name: &str) -> Result<Value> {
        if self.state == RowState::Invalid {
            return Err(StateError::invalid_access(self.schema.name()).into());
        }
        let ordinal = self.ordinal(name)?;
        Ok(self.store.get(ordinal).cloned().unwrap_or(Value::Null))
    }

    /// Read a column's current value, substituting `default` when unset.
    pub fn get_column_or(&mut self, name: &str, default: Value) -> Result<Value> {
        if self.state == RowState::Invalid {
            return Err(StateError::invalid_access(self.schema.name()).into());
        }
        self.apply_defaults()?;
        let ordinal = self.ordinal(name)?;
        Ok(self.store.get(ordinal).cloned().unwrap_or(default))
    }

    /// Read a column coerced to a concrete type.
    pub fn get_as<T>(&mut self, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let value = self.get_column(name)?;
        T::try_from(value).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            e => e,
        })
    }

    /// A column's original (last accepted) value, if any.
    pub fn original_column(&self, name: &str) -> Result<Option<Value>> {
        let ordinal = self.ordinal(name)?;
        Ok(self.store.original(ordinal).cloned())
    }

    fn ordinal(&self, name: &str) -> Result<usize> {
        self.schema
            .ordinal(name)
            .ok_or_else(|| StateError::unknown_column(self.schema.name(), name).into())
    }

    fn apply_defaults(&mut self) -> Result<()> {
        if self.defaults_applied || self.state != RowState::Added || self.store.is_allocated() {
            return Ok(());
        }
        self.defaults_applied = true;
        let defaults: Vec<(String, Value)> = self
            .schema
            .columns()
            .iter()
            .filter_map(|c| c.default.map(|d| (c.name.to_string(), d.to_value())))
            .collect();
        for (name, value) in defaults {
            self.write_column(&name, value, false)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Mark this record deleted.
    ///
    /// Owned records leave their set's live sequence. A record that was
    /// still `Added` never reaches the server: it is discarded back to a
    /// clean `Unchanged` husk with non-key columns nulled, instead of being
    /// queued for deletion.
    pub fn mark_deleted(&mut self) -> Result<()> {
        match self.state {
            RowState::Deleted => return Ok(()),
            RowState::Invalid => {
                return Err(StateError::invalid_access(self.schema.name()).into());
            }
            _ => {}
        }

        let was_added = self.state == RowState::Added;
        let handle = self.self_handle();

        if let Some(owner) = self.owner.upgrade() {
            let removed = {
                let mut owner = owner.borrow_mut();
                let removed = handle
                    .as_ref()
                    .and_then(|h| owner.remove_live_ptr(Rc::as_ptr(h)));
                if let (false, Some(h)) = (was_added, removed.as_ref()) {
                    owner.push_pending(Rc::clone(h));
                }
                removed
            };
            if was_added || removed.is_none() {
                self.owner = Weak::new();
            }
        }

        if was_added {
            self.discard_added();
        } else {
            self.state = RowState::Deleted;
        }
        Ok(())
    }

    /// Null out non-key columns and return to a clean husk.
    fn discard_added(&mut self) {
        let key_ordinals = self.schema.key_ordinals();
        for ordinal in 0..self.schema.columns().len() {
            if !key_ordinals.contains(&ordinal) {
                self.store.write_back(ordinal, Value::Null);
            }
        }
        self.modified.clear();
        self.state = RowState::Unchanged;
    }

    /// Accept pending changes: snapshot current as the new original.
    ///
    /// A `Deleted` record becomes an `Invalid` tombstone with both
    /// snapshots discarded. `Invalid` records are left alone.
    pub fn accept_changes(&mut self) {
        match self.state {
            RowState::Invalid => {}
            RowState::Deleted => {
                self.store.clear();
                self.modified.clear();
                self.state = RowState::Invalid;
                // Leave the owner's pending list too. When the owner is
                // mid-operation (set-level accept or save) it is already
                // draining the list itself and its cell is unborrowable.
                if let (Some(owner), Some(handle)) = (self.owner.upgrade(), self.self_handle()) {
                    if let Ok(mut o) = owner.try_borrow_mut() {
                        o.drop_pending_ptr(Rc::as_ptr(&handle));
                    }
                }
                self.owner = Weak::new();
            }
            _ => {
                self.store.snapshot_original();
                self.modified.clear();
                self.state = RowState::Unchanged;
            }
        }
        self.edit = None;
    }

    /// Reject pending changes, restoring the original snapshot.
    ///
    /// An `Added` record resets to an empty store; `Modified` and `Deleted`
    /// records restore their current values from the original snapshot.
    pub fn reject_changes(&mut self) {
        match self.state {
            RowState::Invalid => {}
            RowState::Added => {
                self.store.clear();
                self.modified.clear();
                self.defaults_applied = false;
                self.state = RowState::Unchanged;
            }
            RowState::Modified | RowState::Deleted => {
                let was_deleted = self.state == RowState::Deleted;
                self.store.restore_original();
                self.modified.clear();
                self.state = RowState::Unchanged;
                // An undeleted record returns to its owner's live sequence,
                // unless the owner is mid-operation and restoring it itself.
                if was_deleted {
                    if let (Some(owner), Some(handle)) =
                        (self.owner.upgrade(), self.self_handle())
                    {
                        if let Ok(mut o) = owner.try_borrow_mut() {
                            o.restore_pending_ptr(Rc::as_ptr(&handle));
                        }
                    }
                }
            }
            RowState::Unchanged => {
                self.modified.clear();
            }
        }
        self.edit = None;
    }

    // ------------------------------------------------------------------
    // Edit transaction
    // ------------------------------------------------------------------

    /// Begin a cancellable edit, snapshotting the store and state aside.
    ///
    /// Re-entrant calls while already editing are no-ops.
    pub fn begin_edit(&mut self) -> Result<()> {
        match self.state {
            RowState::Deleted => {
                return Err(StateError::deleted_write(self.schema.name()).into());
            }
            RowState::Invalid => {
                return Err(StateError::invalid_access(self.schema.name()).into());
            }
            _ => {}
        }
        if self.edit.is_none() {
            self.edit = Some(EditBackup {
                store: self.store.clone(),
                state: self.state,
                modified: self.modified.clone(),
            });
        }
        Ok(())
    }

    /// Commit the edit in progress, keeping the working values.
    ///
    /// A no-op when no edit is in progress.
    pub fn end_edit(&mut self) {
        self.edit = None;
    }

    /// Abandon the edit in progress, restoring the pre-edit snapshot.
    ///
    /// A no-op when no edit is in progress.
    pub fn cancel_edit(&mut self) {
        if let Some(backup) = self.edit.take() {
            self.store = backup.store;
            self.state = backup.state;
            self.modified = backup.modified;
        }
    }

    /// Whether an edit transaction is in progress.
    pub fn is_editing(&self) -> bool {
        self.edit.is_some()
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Evaluate one column's soft validation rules against its value.
    pub fn column_error(&self, name: &str) -> Result<Option<ColumnIssue>> {
        let ordinal = self.ordinal(name)?;
        let def = &self.schema.columns()[ordinal];
        Ok(check_column(def, self.store.get(ordinal)))
    }

    /// Evaluate every column's soft validation rules.
    pub fn validation_issues(&self) -> Vec<ColumnIssue> {
        self.schema
            .columns()
            .iter()
            .enumerate()
            .filter_map(|(i, def)| check_column(def, self.store.get(i)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Relationship slots
    // ------------------------------------------------------------------

    /// The record's materialized relationship slots.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// The child record set held by a declared slot.
    pub fn child_set(&self, slot: &str) -> Result<Option<SharedRecordSet>> {
        Ok(self.slot_ref(slot, ChildKind::RecordSet)?.set())
    }

    /// The child record held by a declared slot.
    pub fn child_record(&self, slot: &str) -> Result<Option<SharedRecord>> {
        Ok(self.slot_ref(slot, ChildKind::Record)?.record())
    }

    /// Attach (or clear) the child record set of a declared slot.
    pub fn set_child_set(&mut self, slot: &str, value: Option<SharedRecordSet>) -> Result<()> {
        let slot = self.slot_mut(slot, ChildKind::RecordSet)?;
        slot.set = value;
        Ok(())
    }

    /// Attach (or clear) the child record of a declared slot.
    pub fn set_child_record(&mut self, slot: &str, value: Option<SharedRecord>) -> Result<()> {
        let slot = self.slot_mut(slot, ChildKind::Record)?;
        slot.record = value;
        Ok(())
    }

    fn slot_ref(&self, name: &str, kind: ChildKind) -> Result<&Slot> {
        let slot = self
            .slots
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| Error::from(StateError::unknown_slot(self.schema.name(), name)))?;
        if slot.kind() != kind {
            return Err(Error::Type(TypeError {
                expected: match kind {
                    ChildKind::Record => "record slot",
                    ChildKind::RecordSet => "record-set slot",
                },
                actual: format!("slot '{name}' holds the other kind"),
                column: None,
            }));
        }
        Ok(slot)
    }

    fn slot_mut(&mut self, name: &str, kind: ChildKind) -> Result<&mut Slot> {
        // Borrow-check friendly duplicate of `slot_ref`.
        let table = self.schema.name();
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.name() == name)
            .ok_or_else(|| Error::from(StateError::unknown_slot(table, name)))?;
        if slot.kind() != kind {
            return Err(Error::Type(TypeError {
                expected: match kind {
                    ChildKind::Record => "record slot",
                    ChildKind::RecordSet => "record-set slot",
                },
                actual: format!("slot '{name}' holds the other kind"),
                column: None,
            }));
        }
        Ok(slot)
    }

    // ------------------------------------------------------------------
    // Save support
    // ------------------------------------------------------------------

    /// All set (name, current value) pairs for packet construction.
    pub fn current_values(&self) -> Vec<(String, Value)> {
        self.store.current_pairs()
    }

    /// All set (name, original value) pairs for packet construction.
    pub fn original_values(&self) -> Vec<(String, Value)> {
        self.store.original_pairs()
    }

    pub(crate) fn write_back_generated(&mut self, name: &str, value: Value) {
        if let Some(ordinal) = self.schema.ordinal(name) {
            self.store.write_back(ordinal, value);
        } else {
            tracing::warn!(
                table = self.schema.name(),
                column = name,
                "generated value for unknown column ignored"
            );
        }
    }
}

/// Scoped edit guard over a shared record.
///
/// Begins an edit transaction on construction and cancels it on drop
/// unless [`EditScope::commit`] was called, so an abandoned scope can
/// never leave half-applied values behind. One scope per record at a
/// time; nesting degenerates to the outermost snapshot.
pub struct EditScope {
    record: SharedRecord,
    committed: bool,
}

impl EditScope {
    /// Begin an edit on the record.
    pub fn begin(record: &SharedRecord) -> Result<Self> {
        record.borrow_mut().begin_edit()?;
        Ok(Self {
            record: Rc::clone(record),
            committed: false,
        })
    }

    /// The record under edit.
    pub fn record(&self) -> &SharedRecord {
        &self.record
    }

    /// Keep the working values and end the edit.
    pub fn commit(mut self) {
        self.record.borrow_mut().end_edit();
        self.committed = true;
    }
}

impl Drop for EditScope {
    fn drop(&mut self) {
        if !self.committed {
            self.record.borrow_mut().cancel_edit();
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("table", &self.schema.name())
            .field("state", &self.state)
            .field("modified", &self.modified.len())
            .field("owned", &(self.owner.strong_count() > 0))
            .finish()
    }
}

/// Pair each schema ordinal with the result-column ordinal holding its
/// value. Computed once per result table and reused for every row.
pub(crate) fn column_mapping(schema: &TableSchema, columns: &ColumnInfo) -> Vec<Option<usize>> {
    schema
        .columns()
        .iter()
        .map(|c| columns.index_of(c.name))
        .collect()
}
