//! Save orchestration.
//!
//! Partitions a record set's members by state into insert/update and delete
//! batches, drives the persistence collaborator inside one transaction
//! scope, supports per-row continuation on failure, and defers the set's
//! change notification until the outermost nested save unwinds.

use crate::graph::{GraphNode, collect_sets};
use crate::observe::ListChange;
use crate::persist::{Persistence, RowOutcome, SavePacket};
use crate::record::{RowState, SharedRecord};
use crate::set::SharedRecordSet;
use std::rc::Rc;
use std::sync::Arc;
use workset_core::{
    AuditRole, ConcurrencyError, Error, PersistenceError, PersistenceErrorKind, Result,
    TableSchema, Value,
};

pub use crate::persist::AccessMode;

/// Who and when to stamp into audit-role columns during a save.
#[derive(Debug, Clone)]
pub struct AuditInfo {
    pub user: String,
    pub timestamp: Value,
}

/// Options for one save operation.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Direct SQL or stored procedures
    pub mode: AccessMode,
    /// Capture per-row failures on the record instead of aborting
    pub continue_on_error: bool,
    /// Stamp audit-role columns before building packets
    pub audit: Option<AuditInfo>,
}

/// Counts reported by a completed save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Rows physically written
    pub written: usize,
    /// Rows that failed and were captured under `continue_on_error`
    pub failed: usize,
}

/// The partitioned work of one record set.
struct SetWork {
    set: SharedRecordSet,
    schema: Arc<TableSchema>,
    upserts: Vec<SharedRecord>,
    deletes: Vec<SharedRecord>,
}

impl SetWork {
    fn partition(set: &SharedRecordSet) -> Self {
        let s = set.borrow();
        let upserts: Vec<SharedRecord> = s
            .records()
            .iter()
            .filter(|r| {
                matches!(
                    r.borrow().state(),
                    RowState::Added | RowState::Modified
                )
            })
            .cloned()
            .collect();
        let deletes: Vec<SharedRecord> = s.pending_deletes().to_vec();
        for record in upserts.iter().chain(deletes.iter()) {
            record.borrow_mut().clear_row_error();
        }
        Self {
            set: Rc::clone(set),
            schema: Arc::clone(s.schema()),
            upserts,
            deletes,
        }
    }

    fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// Save a record set's pending changes.
///
/// No-ops (without opening a transaction) when there is nothing to insert,
/// update, or delete. Inserts and updates are sent as one batch before
/// deletes are sent as a second batch, never interleaved. On success every
/// written record is accepted; under `continue_on_error` failed rows keep
/// their state and expose the failure through `row_error`.
#[tracing::instrument(level = "debug", skip_all)]
pub fn save(
    set: &SharedRecordSet,
    db: &mut dyn Persistence,
    options: &SaveOptions,
) -> Result<SaveReport> {
    let work = SetWork::partition(set);
    if work.is_empty() {
        tracing::trace!("nothing to save");
        return Ok(SaveReport::default());
    }

    db.begin()?;
    set.borrow_mut().enter_save();
    match drive_batches(&work, db, options) {
        Ok(report) => {
            if let Err(e) = db.commit() {
                let _ = db.rollback();
                set.borrow_mut().exit_save();
                return Err(e);
            }
            finish_set(&work, report);
            Ok(report)
        }
        Err(e) => {
            let _ = db.rollback();
            set.borrow_mut().exit_save();
            Err(e)
        }
    }
}

/// Save every record set reachable from `root` under one transaction.
///
/// Sets are driven in depth-first pre-order (parents before children).
/// Acceptance and notifications are deferred until the whole transaction
/// commits, so a failure in any set leaves every set's tracking state
/// untouched.
#[tracing::instrument(level = "debug", skip_all)]
pub fn save_graph(
    root: &SharedRecordSet,
    db: &mut dyn Persistence,
    options: &SaveOptions,
) -> Result<SaveReport> {
    let work: Vec<SetWork> = collect_sets(&GraphNode::set(root))
        .iter()
        .map(SetWork::partition)
        .filter(|w| !w.is_empty())
        .collect();
    if work.is_empty() {
        return Ok(SaveReport::default());
    }

    db.begin()?;
    for w in &work {
        w.set.borrow_mut().enter_save();
    }

    let mut reports = Vec::with_capacity(work.len());
    let mut failure = None;
    for w in &work {
        match drive_batches(w, db, options) {
            Ok(report) => reports.push(report),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    if failure.is_none() {
        if let Err(e) = db.commit() {
            failure = Some(e);
        }
    }
    if let Some(e) = failure {
        let _ = db.rollback();
        for w in &work {
            w.set.borrow_mut().exit_save();
        }
        return Err(e);
    }

    let mut total = SaveReport::default();
    for (w, report) in work.iter().zip(reports) {
        finish_set(w, report);
        total.written += report.written;
        total.failed += report.failed;
    }
    Ok(total)
}

/// Save one record's pending changes, always failing hard.
///
/// Returns `false` when the record has nothing to save.
pub fn save_record(
    record: &SharedRecord,
    db: &mut dyn Persistence,
    options: &SaveOptions,
) -> Result<bool> {
    let (state, schema) = {
        let r = record.borrow();
        (r.state(), Arc::clone(r.schema()))
    };
    if !matches!(state, RowState::Added | RowState::Modified) {
        return Ok(false);
    }
    record.borrow_mut().clear_row_error();

    db.begin()?;
    let hard = SaveOptions {
        continue_on_error: false,
        ..options.clone()
    };
    let result = (|| {
        stamp_audit(&schema, std::slice::from_ref(record), &hard)?;
        let packets = build_packets(std::slice::from_ref(record));
        let outcomes = db.save_batch(&schema, hard.mode, &packets)?;
        let mut written = 0;
        let mut failed = 0;
        apply_outcomes(
            &schema,
            std::slice::from_ref(record),
            outcomes,
            &hard,
            &mut written,
            &mut failed,
        )
    })();
    match result {
        Ok(()) => {
            if let Err(e) = db.commit() {
                let _ = db.rollback();
                return Err(e);
            }
            record.borrow_mut().accept_changes();
            Ok(true)
        }
        Err(e) => {
            let _ = db.rollback();
            Err(e)
        }
    }
}

/// Drive the insert/update batch then the delete batch for one set.
fn drive_batches(
    work: &SetWork,
    db: &mut dyn Persistence,
    options: &SaveOptions,
) -> Result<SaveReport> {
    let mut written = 0;
    let mut failed = 0;

    if !work.upserts.is_empty() {
        stamp_audit(&work.schema, &work.upserts, options)?;
        let packets = build_packets(&work.upserts);
        tracing::debug!(
            table = work.schema.name(),
            rows = packets.len(),
            "sending insert/update batch"
        );
        let outcomes = db.save_batch(&work.schema, options.mode, &packets)?;
        apply_outcomes(
            &work.schema,
            &work.upserts,
            outcomes,
            options,
            &mut written,
            &mut failed,
        )?;
    }

    if !work.deletes.is_empty() {
        let packets = build_packets(&work.deletes);
        tracing::debug!(
            table = work.schema.name(),
            rows = packets.len(),
            "sending delete batch"
        );
        let outcomes = db.save_batch(&work.schema, options.mode, &packets)?;
        apply_outcomes(
            &work.schema,
            &work.deletes,
            outcomes,
            options,
            &mut written,
            &mut failed,
        )?;
    }

    Ok(SaveReport { written, failed })
}

/// Accept the set's surviving changes and fire the deferred notification
/// once the nesting fully unwinds.
fn finish_set(work: &SetWork, report: SaveReport) {
    work.set.borrow_mut().accept_after_save();
    let depth = work.set.borrow_mut().exit_save();
    if depth == 0 && report.written > 0 {
        work.set.borrow_mut().notify(&ListChange::Saved {
            written: report.written,
        });
    }
}

/// Stamp audit-role columns onto the records about to be written.
fn stamp_audit(
    schema: &TableSchema,
    records: &[SharedRecord],
    options: &SaveOptions,
) -> Result<()> {
    let Some(audit) = &options.audit else {
        return Ok(());
    };
    for record in records {
        let state = record.borrow().state();
        let roles: &[AuditRole] = match state {
            RowState::Added => &[
                AuditRole::DateAdded,
                AuditRole::DateModified,
                AuditRole::AddedBy,
                AuditRole::ModifiedBy,
            ],
            RowState::Modified => &[AuditRole::DateModified, AuditRole::ModifiedBy],
            _ => &[],
        };
        for role in roles {
            if let Some(column) = schema.audit_column(*role) {
                let value = match role {
                    AuditRole::DateAdded | AuditRole::DateModified => audit.timestamp.clone(),
                    AuditRole::AddedBy | AuditRole::ModifiedBy => {
                        Value::Text(audit.user.clone())
                    }
                };
                record.borrow_mut().set_column(column.name, value)?;
            }
        }
    }
    Ok(())
}

/// Snapshot each record into a save packet.
fn build_packets(records: &[SharedRecord]) -> Vec<SavePacket> {
    records
        .iter()
        .map(|record| {
            let r = record.borrow();
            SavePacket {
                state: r.state(),
                original: r.original_values(),
                current: r.current_values(),
                modified: r.modified_columns(),
                record: Rc::clone(record),
            }
        })
        .collect()
}

/// Apply per-row outcomes: write back generated values, or capture/raise
/// failures.
fn apply_outcomes(
    schema: &TableSchema,
    records: &[SharedRecord],
    outcomes: Vec<RowOutcome>,
    options: &SaveOptions,
    written: &mut usize,
    failed: &mut usize,
) -> Result<()> {
    if outcomes.len() != records.len() {
        return Err(Error::Custom(format!(
            "persistence returned {} outcomes for {} packets on '{}'",
            outcomes.len(),
            records.len(),
            schema.name()
        )));
    }
    for (record, outcome) in records.iter().zip(outcomes) {
        match outcome {
            RowOutcome::Applied { generated } => {
                let mut r = record.borrow_mut();
                for (column, value) in generated {
                    r.write_back_generated(&column, value);
                }
                *written += 1;
            }
            RowOutcome::Failed {
                message,
                concurrency,
            } => {
                if options.continue_on_error {
                    tracing::debug!(
                        table = schema.name(),
                        error = %message,
                        "row failed; continuing"
                    );
                    record.borrow_mut().set_row_error(message);
                    *failed += 1;
                } else if concurrency {
                    return Err(Error::Concurrency(ConcurrencyError {
                        table: schema.name().to_string(),
                        message,
                    }));
                } else {
                    return Err(Error::Persistence(PersistenceError {
                        kind: PersistenceErrorKind::Other,
                        table: Some(schema.name().to_string()),
                        message,
                        source: None,
                    }));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::LoadRequest;
    use crate::record::Record;
    use crate::set::RecordSet;
    use std::cell::RefCell;
    use workset_core::{ColumnDef, SqlType};

    fn hero_schema() -> Arc<TableSchema> {
        Arc::new(TableSchema::new(
            "heroes",
            vec![
                ColumnDef::new("id", SqlType::BigInt)
                    .primary_key(true)
                    .auto_increment(true),
                ColumnDef::new("name", SqlType::Text),
            ],
        ))
    }

    /// Scripted collaborator: records calls, optionally failing chosen
    /// packet indexes within each batch.
    #[derive(Default)]
    struct MockDb {
        calls: Vec<String>,
        fail_names: Vec<String>,
        stale_names: Vec<String>,
        next_key: i64,
    }

    impl MockDb {
        fn new() -> Self {
            Self {
                next_key: 100,
                ..Self::default()
            }
        }
    }

    impl Persistence for MockDb {
        fn begin(&mut self) -> Result<()> {
            self.calls.push("begin".to_string());
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            self.calls.push("commit".to_string());
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            self.calls.push("rollback".to_string());
            Ok(())
        }

        fn save_batch(
            &mut self,
            table: &TableSchema,
            _mode: AccessMode,
            packets: &[SavePacket],
        ) -> Result<Vec<RowOutcome>> {
            let kind = match packets.first().map(|p| p.state) {
                Some(RowState::Deleted) => "delete",
                _ => "upsert",
            };
            self.calls
                .push(format!("{}:{}:{}", kind, table.name(), packets.len()));
            Ok(packets
                .iter()
                .map(|p| {
                    let name = p
                        .current
                        .iter()
                        .find(|(c, _)| c == "name")
                        .and_then(|(_, v)| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    if self.fail_names.contains(&name) {
                        RowOutcome::failed(format!("constraint violation on '{name}'"))
                    } else if self.stale_names.contains(&name) {
                        RowOutcome::stale(format!("original values stale for '{name}'"))
                    } else if p.state == RowState::Added {
                        self.next_key += 1;
                        RowOutcome::Applied {
                            generated: vec![("id".to_string(), Value::BigInt(self.next_key))],
                        }
                    } else {
                        RowOutcome::applied()
                    }
                })
                .collect())
        }

        fn load(&mut self, _request: &LoadRequest) -> Result<crate::persist::LoadResult> {
            unimplemented!("not used by save tests")
        }
    }

    fn dirty_set() -> SharedRecordSet {
        let set = RecordSet::new_shared(hero_schema());
        for name in ["Iron Man", "Thor"] {
            let rec = set.borrow_mut().add_new();
            rec.borrow_mut().set_column("name", name).unwrap();
        }
        set
    }

    #[test]
    fn test_save_noop_opens_no_transaction() {
        let set = RecordSet::new_shared(hero_schema());
        let mut db = MockDb::new();
        let report = save(&set, &mut db, &SaveOptions::default()).unwrap();
        assert_eq!(report, SaveReport::default());
        assert!(db.calls.is_empty());
    }

    #[test]
    fn test_save_success_accepts_everything() {
        // After a successful save every Added/Modified record is
        // Unchanged, pending deletions are gone, and the set is clean.
        let set = dirty_set();
        let doomed = {
            let rec = set.borrow_mut().add_new();
            rec.borrow_mut().set_column("name", "Loki").unwrap();
            rec.borrow_mut().accept_changes();
            rec
        };
        doomed.borrow_mut().mark_deleted().unwrap();

        let mut db = MockDb::new();
        let report = save(&set, &mut db, &SaveOptions::default()).unwrap();

        assert_eq!(report.written, 3);
        assert_eq!(report.failed, 0);
        let s = set.borrow();
        assert!(!s.is_dirty());
        assert!(s.pending_deletes().is_empty());
        for rec in s.records() {
            assert_eq!(rec.borrow().state(), RowState::Unchanged);
        }
        assert_eq!(doomed.borrow().state(), RowState::Invalid);
    }

    #[test]
    fn test_upserts_before_deletes_in_one_transaction() {
        let set = dirty_set();
        let doomed = {
            let rec = set.borrow_mut().add_new();
            rec.borrow_mut().set_column("name", "Loki").unwrap();
            rec.borrow_mut().accept_changes();
            rec
        };
        doomed.borrow_mut().mark_deleted().unwrap();

        let mut db = MockDb::new();
        save(&set, &mut db, &SaveOptions::default()).unwrap();

        assert_eq!(
            db.calls,
            vec!["begin", "upsert:heroes:2", "delete:heroes:1", "commit"]
        );
    }

    #[test]
    fn test_generated_keys_written_back() {
        let set = dirty_set();
        let mut db = MockDb::new();
        save(&set, &mut db, &SaveOptions::default()).unwrap();

        let s = set.borrow();
        let first = s.get(0).unwrap();
        assert_eq!(
            first.borrow_mut().get_column("id").unwrap(),
            Value::BigInt(101)
        );
        assert_eq!(first.borrow().state(), RowState::Unchanged);
    }

    #[test]
    fn test_hard_failure_rolls_back() {
        let set = dirty_set();
        let mut db = MockDb::new();
        db.fail_names.push("Thor".to_string());

        let err = save(&set, &mut db, &SaveOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(db.calls.last().unwrap(), "rollback");
        // nothing accepted
        let s = set.borrow();
        for rec in s.records() {
            assert_eq!(rec.borrow().state(), RowState::Added);
        }
    }

    #[test]
    fn test_concurrency_failure_is_typed() {
        let set = dirty_set();
        let mut db = MockDb::new();
        db.stale_names.push("Thor".to_string());

        let err = save(&set, &mut db, &SaveOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Concurrency(_)));
    }

    #[test]
    fn test_continue_on_error_captures_row_error() {
        // With continue_on_error, exactly the failing record keeps its
        // error and state while the others reach Unchanged.
        let set = dirty_set();
        let mut db = MockDb::new();
        db.fail_names.push("Thor".to_string());

        let options = SaveOptions {
            continue_on_error: true,
            ..SaveOptions::default()
        };
        let report = save(&set, &mut db, &options).unwrap();

        assert_eq!(report.written, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(db.calls.last().unwrap(), "commit");

        let s = set.borrow();
        let errors = s.errors();
        assert_eq!(errors.len(), 1);
        let failed = &errors[0];
        assert!(failed.borrow().row_error().unwrap().contains("Thor"));
        assert_eq!(failed.borrow().state(), RowState::Added);

        let ok = s
            .records()
            .iter()
            .find(|r| r.borrow().row_error().is_none())
            .cloned()
            .unwrap();
        assert_eq!(ok.borrow().state(), RowState::Unchanged);
    }

    #[test]
    fn test_errored_pending_delete_is_retained() {
        let set = RecordSet::new_shared(hero_schema());
        let rec = set.borrow_mut().add_new();
        rec.borrow_mut().set_column("name", "Thor").unwrap();
        rec.borrow_mut().accept_changes();
        rec.borrow_mut().mark_deleted().unwrap();

        let mut db = MockDb::new();
        db.fail_names.push("Thor".to_string());
        let options = SaveOptions {
            continue_on_error: true,
            ..SaveOptions::default()
        };
        let report = save(&set, &mut db, &options).unwrap();

        assert_eq!(report.failed, 1);
        let s = set.borrow();
        assert_eq!(s.pending_deletes().len(), 1);
        assert_eq!(rec.borrow().state(), RowState::Deleted);
        assert!(rec.borrow().row_error().is_some());
    }

    #[test]
    fn test_saved_notification_fires_once_after_unwind() {
        let set = dirty_set();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        set.borrow_mut()
            .subscribe(Box::new(move |c| seen2.borrow_mut().push(*c)));

        let mut db = MockDb::new();
        save(&set, &mut db, &SaveOptions::default()).unwrap();

        assert_eq!(*seen.borrow(), vec![ListChange::Saved { written: 2 }]);
    }

    #[test]
    fn test_no_notification_when_nothing_written() {
        let set = RecordSet::new_shared(hero_schema());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        set.borrow_mut()
            .subscribe(Box::new(move |c| seen2.borrow_mut().push(*c)));

        let mut db = MockDb::new();
        save(&set, &mut db, &SaveOptions::default()).unwrap();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_audit_stamping() {
        let schema = Arc::new(TableSchema::new(
            "heroes",
            vec![
                ColumnDef::new("id", SqlType::BigInt).primary_key(true),
                ColumnDef::new("name", SqlType::Text),
                ColumnDef::new("added_by", SqlType::Text)
                    .nullable(true)
                    .audit(AuditRole::AddedBy),
                ColumnDef::new("modified_at", SqlType::Timestamp)
                    .nullable(true)
                    .audit(AuditRole::DateModified),
            ],
        ));
        let set = RecordSet::new_shared(Arc::clone(&schema));
        let rec = set.borrow_mut().add_new();
        rec.borrow_mut().set_column("id", 1i64).unwrap();
        rec.borrow_mut().set_column("name", "Iron Man").unwrap();

        let mut db = MockDb::new();
        let options = SaveOptions {
            audit: Some(AuditInfo {
                user: "tony".to_string(),
                timestamp: Value::Timestamp(1_700_000_000),
            }),
            ..SaveOptions::default()
        };
        save(&set, &mut db, &options).unwrap();

        let mut r = rec.borrow_mut();
        assert_eq!(
            r.get_column("added_by").unwrap(),
            Value::Text("tony".to_string())
        );
        assert_eq!(
            r.get_column("modified_at").unwrap(),
            Value::Timestamp(1_700_000_000)
        );
    }

    #[test]
    fn test_save_record_hard_failure() {
        let rec = Record::new_shared(hero_schema());
        rec.borrow_mut().set_column("name", "Thor").unwrap();

        let mut db = MockDb::new();
        db.fail_names.push("Thor".to_string());
        let err = save_record(&rec, &mut db, &SaveOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(db.calls.last().unwrap(), "rollback");
    }

    #[test]
    fn test_save_record_success_accepts() {
        let rec = Record::new_shared(hero_schema());
        rec.borrow_mut().set_column("name", "Thor").unwrap();

        let mut db = MockDb::new();
        let wrote = save_record(&rec, &mut db, &SaveOptions::default()).unwrap();
        assert!(wrote);
        assert_eq!(rec.borrow().state(), RowState::Unchanged);
        assert!(!save_record(&rec, &mut db, &SaveOptions::default()).unwrap());
    }
}
