//! Flat result rows returned by the persistence collaborator.

use crate::error::{Error, Result, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows in a result set.
///
/// Wrapped in `Arc` so every row from the same query (and every value store
/// of a record type) shares one name-to-ordinal mapping instead of carrying
/// its own copy.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column names in order
    names: Vec<String>,
    /// Name -> ordinal mapping for O(1) lookup
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    pub fn new<S: Into<String>>(names: Vec<S>) -> Self {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the ordinal of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Get the name of a column by ordinal.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Check if a column exists.
    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    /// Get all column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single flat row from a load or prefetch result.
#[derive(Debug, Clone)]
pub struct Row {
    /// Column values in order
    values: Vec<Value>,
    /// Shared column metadata
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row with the given columns and values.
    ///
    /// For multiple rows from the same result set, prefer `with_columns`
    /// to share the column metadata.
    pub fn new<S: Into<String>>(column_names: Vec<S>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Get the shared column metadata.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Get the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if this row is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column ordinal. O(1) operation.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Check if a column exists by name.
    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// Get a typed value by column name.
    pub fn get_named<T: TryFrom<Value, Error = Error>>(&self, name: &str) -> Result<T> {
        let value = self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
            })
        })?;
        T::try_from(value.clone()).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            e => e,
        })
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// A tabular result: one shared column list plus its rows.
///
/// Load results and each prefetch result arrive in this shape; the hydrator
/// streams `rows` while computing the name-to-ordinal mapping exactly once
/// through the shared [`ColumnInfo`].
#[derive(Debug, Clone)]
pub struct ResultTable {
    columns: Arc<ColumnInfo>,
    rows: Vec<Row>,
}

impl ResultTable {
    /// Create an empty table with the given column names.
    pub fn new<S: Into<String>>(column_names: Vec<S>) -> Self {
        Self {
            columns: Arc::new(ColumnInfo::new(column_names)),
            rows: Vec::new(),
        }
    }

    /// Shared column metadata for this table.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Append a row of values.
    ///
    /// Returns an error if the value count does not match the column count.
    pub fn push(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(Error::Custom(format!(
                "row has {} values but the result declares {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.rows
            .push(Row::with_columns(Arc::clone(&self.columns), values));
        Ok(())
    }

    /// The rows of this table.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_info_lookup() {
        let info = ColumnInfo::new(vec!["id", "name"]);
        assert_eq!(info.len(), 2);
        assert_eq!(info.index_of("name"), Some(1));
        assert_eq!(info.name_at(0), Some("id"));
        assert!(info.contains("id"));
        assert!(!info.contains("missing"));
    }

    #[test]
    fn test_row_access() {
        let row = Row::new(vec!["id", "name"], vec![Value::Int(1), "x".into()]);
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("name"), Some(&Value::Text("x".to_string())));
        assert_eq!(row.get_by_name("missing"), None);
    }

    #[test]
    fn test_row_get_named_typed() {
        let row = Row::new(vec!["id", "name"], vec![Value::Int(1), "x".into()]);
        let id: i64 = row.get_named("id").unwrap();
        assert_eq!(id, 1);
        let name: String = row.get_named("name").unwrap();
        assert_eq!(name, "x");
        assert!(row.get_named::<i64>("name").is_err());
    }

    #[test]
    fn test_result_table_shares_columns() {
        let mut table = ResultTable::new(vec!["id"]);
        table.push(vec![Value::Int(1)]).unwrap();
        table.push(vec![Value::Int(2)]).unwrap();
        assert_eq!(table.len(), 2);
        assert!(Arc::ptr_eq(
            &table.rows()[0].column_info(),
            &table.rows()[1].column_info()
        ));
    }

    #[test]
    fn test_result_table_arity_check() {
        let mut table = ResultTable::new(vec!["id", "name"]);
        assert!(table.push(vec![Value::Int(1)]).is_err());
        assert!(table.is_empty());
    }
}
