//! Core types for the workset unit-of-work layer.
//!
//! This crate provides the foundational abstractions shared by the record
//! and record-set layer:
//!
//! - `Value` for dynamically-typed column values
//! - `Row` / `ColumnInfo` / `ResultTable` for flat load and prefetch results
//! - `TableSchema` / `ColumnDef` metadata with audit roles and defaults
//! - `ChildDecl` / `PrefetchMap` relationship descriptors
//! - the structured error taxonomy and soft column validation

pub mod error;
pub mod relation;
pub mod row;
pub mod schema;
pub mod types;
pub mod validate;
pub mod value;

pub use error::{
    ColumnIssue, ConcurrencyError, Error, HydrationError, HydrationErrorKind, IssueKind,
    PersistenceError, PersistenceErrorKind, Result, StateError, StateErrorKind, TypeError,
    ValidationError,
};
pub use relation::{ChildDecl, ChildKind, PrefetchMap};
pub use row::{ColumnInfo, ResultTable, Row};
pub use schema::{AuditRole, ColumnDef, ColumnDefault, TableSchema};
pub use types::SqlType;
pub use validate::check_column;
pub use value::Value;
