//! Table and column metadata.
//!
//! Schemas are the metadata collaborator's answer for one record type: the
//! ordered column list with per-column flags, plus the declared child
//! relationship slots used for graph traversal. They are built once at
//! registration time and shared via `Arc` by every record and record set of
//! that type.

use crate::relation::ChildDecl;
use crate::row::ColumnInfo;
use crate::types::SqlType;
use crate::value::Value;
use std::sync::Arc;

/// Client-stamped audit column roles.
///
/// Columns carrying one of these roles are stamped by the save orchestrator
/// (not by the database) when audit info is supplied with the save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditRole {
    /// Timestamp set when the record is first inserted
    DateAdded,
    /// Timestamp set on every insert or update
    DateModified,
    /// User name set when the record is first inserted
    AddedBy,
    /// User name set on every insert or update
    ModifiedBy,
}

/// Client-side default value descriptor for a column.
///
/// Materialized into the value store the first time an empty `Added` record
/// is read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnDefault {
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(&'static str),
    Null,
}

impl ColumnDefault {
    /// Materialize this default into a [`Value`].
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            ColumnDefault::Bool(v) => Value::Bool(*v),
            ColumnDefault::Int(v) => Value::BigInt(*v),
            ColumnDefault::Double(v) => Value::Double(*v),
            ColumnDefault::Text(v) => Value::Text((*v).to_string()),
            ColumnDefault::Null => Value::Null,
        }
    }
}

/// Metadata about one column of a record type.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Column name
    pub name: &'static str,
    /// Declared SQL type
    pub sql_type: SqlType,
    /// Whether this column is nullable
    pub nullable: bool,
    /// Whether this column is part of the primary key
    pub primary_key: bool,
    /// Whether the database generates this column's value on insert
    pub auto_increment: bool,
    /// Whether this column participates in optimistic-concurrency checks
    pub concurrency: bool,
    /// Client-side default value
    pub default: Option<ColumnDefault>,
    /// Audit stamping role, if any
    pub audit_role: Option<AuditRole>,
    /// Maximum text length (soft validation)
    pub max_length: Option<u32>,
    /// Regex the text value must match (soft validation)
    pub pattern: Option<&'static str>,
}

impl ColumnDef {
    /// Create a new column definition with minimal required data.
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            concurrency: false,
            default: None,
            audit_role: None,
            max_length: None,
            pattern: None,
        }
    }

    /// Mark this column nullable.
    pub const fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Mark this column as part of the primary key.
    pub const fn primary_key(mut self, pk: bool) -> Self {
        self.primary_key = pk;
        self
    }

    /// Mark this column as database-generated on insert.
    pub const fn auto_increment(mut self, auto: bool) -> Self {
        self.auto_increment = auto;
        self
    }

    /// Mark this column as an optimistic-concurrency check column.
    pub const fn concurrency(mut self, concurrency: bool) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the client-side default value.
    pub const fn default_value(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    /// Assign an audit stamping role.
    pub const fn audit(mut self, role: AuditRole) -> Self {
        self.audit_role = Some(role);
        self
    }

    /// Set the maximum text length.
    pub const fn max_length(mut self, len: u32) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Set the validation pattern.
    pub const fn pattern(mut self, pattern: &'static str) -> Self {
        self.pattern = Some(pattern);
        self
    }
}

/// Full metadata for one record type: table name, ordered columns, and
/// declared child relationship slots.
#[derive(Debug)]
pub struct TableSchema {
    name: &'static str,
    columns: Vec<ColumnDef>,
    column_info: Arc<ColumnInfo>,
    children: Vec<ChildDecl>,
}

impl TableSchema {
    /// Create a schema from an ordered column list.
    ///
    /// The name-to-ordinal mapping is built once here and shared by every
    /// record of this type.
    pub fn new(name: &'static str, columns: Vec<ColumnDef>) -> Self {
        let column_info = Arc::new(ColumnInfo::new(
            columns.iter().map(|c| c.name).collect::<Vec<_>>(),
        ));
        Self {
            name,
            columns,
            column_info,
            children: Vec::new(),
        }
    }

    /// Declare the child relationship slots of this record type.
    #[must_use]
    pub fn with_children(mut self, children: Vec<ChildDecl>) -> Self {
        self.children = children;
        self
    }

    /// Table name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ordered column definitions.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Shared name-to-ordinal mapping.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.column_info)
    }

    /// Ordinal of a column by name.
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.column_info.index_of(name)
    }

    /// Column definition by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.ordinal(name).map(|i| &self.columns[i])
    }

    /// Column definition by ordinal.
    pub fn column_at(&self, ordinal: usize) -> Option<&ColumnDef> {
        self.columns.get(ordinal)
    }

    /// Ordinals of the primary key columns, in declaration order.
    pub fn key_ordinals(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect()
    }

    /// Declared child relationship slots.
    pub fn children(&self) -> &[ChildDecl] {
        &self.children
    }

    /// Look up a declared child slot by name.
    pub fn child(&self, slot: &str) -> Option<&ChildDecl> {
        self.children.iter().find(|c| c.slot == slot)
    }

    /// The column carrying the given audit role, if declared.
    pub fn audit_column(&self, role: AuditRole) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.audit_role == Some(role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::ChildKind;

    fn order_schema() -> TableSchema {
        TableSchema::new(
            "orders",
            vec![
                ColumnDef::new("id", SqlType::BigInt)
                    .primary_key(true)
                    .auto_increment(true),
                ColumnDef::new("customer", SqlType::Text),
                ColumnDef::new("total", SqlType::Double).default_value(ColumnDefault::Double(0.0)),
                ColumnDef::new("modified_at", SqlType::Timestamp)
                    .nullable(true)
                    .audit(AuditRole::DateModified),
            ],
        )
        .with_children(vec![ChildDecl::set("items")])
    }

    #[test]
    fn test_ordinals_and_lookup() {
        let schema = order_schema();
        assert_eq!(schema.ordinal("customer"), Some(1));
        assert_eq!(schema.column("total").unwrap().name, "total");
        assert!(schema.column("missing").is_none());
        assert_eq!(schema.key_ordinals(), vec![0]);
    }

    #[test]
    fn test_child_slots() {
        let schema = order_schema();
        assert_eq!(schema.children().len(), 1);
        let child = schema.child("items").unwrap();
        assert_eq!(child.kind, ChildKind::RecordSet);
        assert!(schema.child("missing").is_none());
    }

    #[test]
    fn test_audit_column() {
        let schema = order_schema();
        let col = schema.audit_column(AuditRole::DateModified).unwrap();
        assert_eq!(col.name, "modified_at");
        assert!(schema.audit_column(AuditRole::AddedBy).is_none());
    }

    #[test]
    fn test_default_materialization() {
        let schema = order_schema();
        let def = schema.column("total").unwrap().default.unwrap();
        assert_eq!(def.to_value(), Value::Double(0.0));
    }
}
