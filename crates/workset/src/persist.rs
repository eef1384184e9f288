//! The persistence collaborator boundary.
//!
//! This layer never produces SQL. It organizes the change set into save
//! packets and hands them to a [`Persistence`] implementation, which owns
//! command generation, execution, and the physical transaction.

use crate::record::{RowState, SharedRecord};
use std::fmt;
use workset_core::{PrefetchMap, Result, ResultTable, TableSchema, Value};

/// How the collaborator should execute writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Direct SQL statements
    #[default]
    Sql,
    /// Stored procedures
    StoredProcedure,
}

/// Everything the collaborator needs to persist one record.
#[derive(Clone)]
pub struct SavePacket {
    /// Row state at packet-construction time
    pub state: RowState,
    /// (column, value) pairs of the original snapshot, for optimistic
    /// concurrency checks
    pub original: Vec<(String, Value)>,
    /// (column, value) pairs of the current values
    pub current: Vec<(String, Value)>,
    /// Names of the modified columns, for partial-column statements
    pub modified: Vec<String>,
    /// Handle to the originating record, for generated-value write-back
    pub record: SharedRecord,
}

impl fmt::Debug for SavePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SavePacket")
            .field("state", &self.state)
            .field("columns", &self.current.len())
            .field("modified", &self.modified.len())
            .finish()
    }
}

/// Per-row result of a batch save.
#[derive(Debug, Clone)]
pub enum RowOutcome {
    /// The row was persisted; `generated` carries database-generated
    /// column values (auto-increment keys, server defaults) to write back
    /// onto the originating record.
    Applied {
        generated: Vec<(String, Value)>,
    },
    /// The row failed. `concurrency` marks a failed optimistic-concurrency
    /// check, which surfaces as a distinct error type.
    Failed {
        message: String,
        concurrency: bool,
    },
}

impl RowOutcome {
    /// A plain success with nothing to write back.
    #[must_use]
    pub fn applied() -> Self {
        RowOutcome::Applied {
            generated: Vec::new(),
        }
    }

    /// A generic per-row failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        RowOutcome::Failed {
            message: message.into(),
            concurrency: false,
        }
    }

    /// A failed optimistic-concurrency check.
    #[must_use]
    pub fn stale(message: impl Into<String>) -> Self {
        RowOutcome::Failed {
            message: message.into(),
            concurrency: true,
        }
    }
}

/// A flat load request.
#[derive(Debug, Clone)]
pub enum LoadRequest {
    /// Free-form query text plus parameters
    Query { sql: String, params: Vec<Value> },
    /// Stored procedure name plus parameters
    Procedure { name: String, params: Vec<Value> },
}

/// One prefetch result: the relationship descriptor plus its flat joined
/// rows.
#[derive(Debug, Clone)]
pub struct Prefetch {
    pub map: PrefetchMap,
    pub rows: ResultTable,
}

/// The result of a load: the primary table plus any prefetch results, each
/// tagged with its map.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub table: ResultTable,
    pub prefetches: Vec<Prefetch>,
}

/// The persistence collaborator consumed by the save orchestrator and the
/// load path.
///
/// Implementations translate packets into INSERT/UPDATE/DELETE commands
/// (or stored-procedure calls, per [`AccessMode`]) and own the physical
/// transaction. `save_batch` reports failures two ways: an `Err` return is
/// an overall failure that aborts the surrounding save, while a
/// [`RowOutcome::Failed`] entry is a per-row failure the orchestrator may
/// capture and continue past.
pub trait Persistence {
    /// Open the transaction scope for one save operation.
    fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction scope.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction scope.
    fn rollback(&mut self) -> Result<()>;

    /// Persist one batch of packets against one table.
    ///
    /// Must return exactly one outcome per packet, in order.
    fn save_batch(
        &mut self,
        table: &TableSchema,
        mode: AccessMode,
        packets: &[SavePacket],
    ) -> Result<Vec<RowOutcome>>;

    /// Execute a flat load and return its primary and prefetch results.
    fn load(&mut self, request: &LoadRequest) -> Result<LoadResult>;
}
