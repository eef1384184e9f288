//! Declared relationships between record types.
//!
//! Child relationship slots are declared as static metadata per record type,
//! never discovered by reflection: graph traversal walks exactly the slots a
//! schema declares. Prefetch maps describe how a flat joined result attaches
//! to one level of an already-hydrated tree.

use crate::schema::TableSchema;
use std::sync::Arc;

/// Whether a relationship slot holds a single record or a record set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    /// The slot holds one related record
    Record,
    /// The slot holds a collection of related records
    RecordSet,
}

/// One declared child relationship slot of a record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildDecl {
    /// Slot name, unique within the declaring record type
    pub slot: &'static str,
    /// Whether the slot holds a record or a record set
    pub kind: ChildKind,
}

impl ChildDecl {
    /// Declare a single-record slot.
    #[must_use]
    pub const fn record(slot: &'static str) -> Self {
        Self {
            slot,
            kind: ChildKind::Record,
        }
    }

    /// Declare a record-set slot.
    #[must_use]
    pub const fn set(slot: &'static str) -> Self {
        Self {
            slot,
            kind: ChildKind::RecordSet,
        }
    }
}

/// Describes one parent-to-child relationship for prefetch hydration.
///
/// Maps are applied in order; each one names the dotted path of the
/// already-hydrated level it attaches to (the root level is the empty
/// string), the join columns on both sides, and the slot the resulting child
/// containers occupy on their parent records.
#[derive(Debug, Clone)]
pub struct PrefetchMap {
    /// Dotted path of the parent level this relation attaches to ("" = root)
    pub path: String,
    /// Relationship slot name on the parent record
    pub slot: &'static str,
    /// Parent-side join column(s), in declared order
    pub parent_columns: Vec<&'static str>,
    /// Child-side join column(s), in declared order
    pub child_columns: Vec<&'static str>,
    /// Whether the key is composite (text forms concatenated in order)
    pub composite: bool,
    /// Schema of the hydrated child records
    pub child_schema: Arc<TableSchema>,
}

impl PrefetchMap {
    /// Describe a single-column join.
    pub fn new(
        path: impl Into<String>,
        slot: &'static str,
        parent_column: &'static str,
        child_column: &'static str,
        child_schema: Arc<TableSchema>,
    ) -> Self {
        Self {
            path: path.into(),
            slot,
            parent_columns: vec![parent_column],
            child_columns: vec![child_column],
            composite: false,
            child_schema,
        }
    }

    /// Describe a composite (multi-column, concatenated) join.
    ///
    /// Column order matters: parent and child column lists must pair up
    /// positionally.
    pub fn composite(
        path: impl Into<String>,
        slot: &'static str,
        parent_columns: Vec<&'static str>,
        child_columns: Vec<&'static str>,
        child_schema: Arc<TableSchema>,
    ) -> Self {
        Self {
            path: path.into(),
            slot,
            parent_columns,
            child_columns,
            composite: true,
            child_schema,
        }
    }

    /// The dotted path this map's own containers are published under, so
    /// later maps can attach a further level here.
    #[must_use]
    pub fn own_path(&self) -> String {
        if self.path.is_empty() {
            self.slot.to_string()
        } else {
            format!("{}.{}", self.path, self.slot)
        }
    }
}
