//! Error types for record and record-set operations.

use std::fmt;

/// The primary error type for all workset operations.
#[derive(Debug)]
pub enum Error {
    /// Illegal record lifecycle transition (writing a deleted record, etc.)
    State(StateError),
    /// Type coercion errors from typed column accessors
    Type(TypeError),
    /// Optimistic concurrency check failed during save
    Concurrency(ConcurrencyError),
    /// Any other persistence-collaborator failure
    Persistence(PersistenceError),
    /// A prefetch row could not be matched to a parent container
    Hydration(HydrationError),
    /// Per-column validation failures (soft; surfaced on demand)
    Validation(ValidationError),
    /// Custom error with message
    Custom(String),
}

/// A record was used in a way its lifecycle state forbids.
#[derive(Debug)]
pub struct StateError {
    pub kind: StateErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateErrorKind {
    /// Column write attempted on a record marked deleted
    DeletedWrite,
    /// Value access on an invalid (accepted-deleted) record
    InvalidAccess,
    /// Record is already owned by another record set
    AlreadyOwned,
    /// Record does not belong to the record set it was handed to
    NotOwned,
    /// Column name is not part of the record's schema
    UnknownColumn,
    /// Relationship slot name is not declared for the record's schema
    UnknownSlot,
}

/// A typed accessor could not coerce the stored value.
#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

/// The persistence collaborator reported stale original values.
///
/// Kept distinct from [`PersistenceError`] so callers can offer
/// "reload and retry" instead of a generic failure path.
#[derive(Debug)]
pub struct ConcurrencyError {
    pub table: String,
    pub message: String,
}

/// A provider-side failure (constraint violation, connectivity, timeout).
#[derive(Debug)]
pub struct PersistenceError {
    pub kind: PersistenceErrorKind,
    pub table: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceErrorKind {
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Connection lost or unavailable
    Connection,
    /// Statement timeout
    Timeout,
    /// Transaction scope misuse (begin while open, commit without begin)
    Transaction,
    /// Other provider error
    Other,
}

/// A joined prefetch result did not line up with its parent level.
#[derive(Debug)]
pub struct HydrationError {
    pub kind: HydrationErrorKind,
    /// Dotted path of the prefetch map being applied.
    pub path: String,
    /// Text form of the offending join key, when one was computed.
    pub key: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationErrorKind {
    /// A child row's key has no matching parent container
    MissingParent,
    /// Two parent records produced the same join key at one path
    DuplicateParentKey,
    /// A join column named by the prefetch map is absent from the rows
    MissingColumn,
    /// The prefetch map's path was never hydrated
    UnknownPath,
    /// The slot the map attaches to is missing or of the wrong kind
    BadSlot,
}

/// Soft validation failures for one or more columns.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ColumnIssue>,
}

/// A single column-level validation failure.
#[derive(Debug, Clone)]
pub struct ColumnIssue {
    /// The column that failed validation
    pub column: String,
    /// The kind of rule that was violated
    pub kind: IssueKind,
    /// Human-readable message
    pub message: String,
}

/// The type of validation rule that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// Non-nullable column is null/unset
    Required,
    /// Text value exceeds the declared maximum length
    MaxLength,
    /// Text value does not match the declared pattern
    Pattern,
}

impl ValidationError {
    /// Create a new empty validation error container.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if there are any validation issues.
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Add a column issue.
    pub fn add(&mut self, column: impl Into<String>, kind: IssueKind, message: impl Into<String>) {
        self.issues.push(ColumnIssue {
            column: column.into(),
            kind,
            message: message.into(),
        });
    }

    /// Convert to Result, returning Ok(()) if no issues, Err(self) otherwise.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl Default for ValidationError {
    fn default() -> Self {
        Self::new()
    }
}

impl StateError {
    /// Build the error for a write attempted on a deleted record.
    #[must_use]
    pub fn deleted_write(table: &str) -> Self {
        Self {
            kind: StateErrorKind::DeletedWrite,
            message: format!("cannot modify a deleted record of '{table}'"),
        }
    }

    /// Build the error for value access on an invalid record.
    #[must_use]
    pub fn invalid_access(table: &str) -> Self {
        Self {
            kind: StateErrorKind::InvalidAccess,
            message: format!("record of '{table}' is invalid; its deletion has been accepted"),
        }
    }

    /// Build the error for a column name missing from a schema.
    #[must_use]
    pub fn unknown_column(table: &str, column: &str) -> Self {
        Self {
            kind: StateErrorKind::UnknownColumn,
            message: format!("'{table}' has no column named '{column}'"),
        }
    }

    /// Build the error for an undeclared relationship slot.
    #[must_use]
    pub fn unknown_slot(table: &str, slot: &str) -> Self {
        Self {
            kind: StateErrorKind::UnknownSlot,
            message: format!("'{table}' declares no relationship slot named '{slot}'"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::State(e) => write!(f, "State error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Concurrency(e) => {
                write!(f, "Concurrency error on '{}': {}", e.table, e.message)
            }
            Error::Persistence(e) => write!(f, "Persistence error: {}", e.message),
            Error::Hydration(e) => write!(f, "Hydration error: {}", e),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Persistence(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConcurrencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(table) = &self.table {
            write!(f, "{} (table '{}')", self.message, table)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for HydrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{} (path '{}', key '{}')", self.message, self.path, key),
            None => write!(f, "{} (path '{}')", self.message, self.path),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            write!(f, "validation passed")
        } else if self.issues.len() == 1 {
            let issue = &self.issues[0];
            write!(f, "column '{}': {}", issue.column, issue.message)
        } else {
            writeln!(f, "validation issues:")?;
            for issue in &self.issues {
                writeln!(f, "  - {}: {}", issue.column, issue.message)?;
            }
            Ok(())
        }
    }
}

impl std::error::Error for StateError {}
impl std::error::Error for TypeError {}
impl std::error::Error for ConcurrencyError {}
impl std::error::Error for PersistenceError {}
impl std::error::Error for HydrationError {}
impl std::error::Error for ValidationError {}

impl From<StateError> for Error {
    fn from(err: StateError) -> Self {
        Error::State(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConcurrencyError> for Error {
    fn from(err: ConcurrencyError) -> Self {
        Error::Concurrency(err)
    }
}

impl From<PersistenceError> for Error {
    fn from(err: PersistenceError) -> Self {
        Error::Persistence(err)
    }
}

impl From<HydrationError> for Error {
    fn from(err: HydrationError) -> Self {
        Error::Hydration(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

/// Result type alias for workset operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_error_messages_name_the_table() {
        let err = Error::State(StateError::deleted_write("orders"));
        assert!(err.to_string().contains("orders"));
        assert!(err.to_string().contains("deleted"));
    }

    #[test]
    fn hydration_display_includes_path_and_key() {
        let err = HydrationError {
            kind: HydrationErrorKind::MissingParent,
            path: "orders".to_string(),
            key: Some("42".to_string()),
            message: "no parent container for child row".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("orders"));
        assert!(text.contains("42"));
    }

    #[test]
    fn validation_error_collects_issues() {
        let mut err = ValidationError::new();
        assert!(err.is_empty());
        err.add("name", IssueKind::Required, "is required");
        err.add("code", IssueKind::MaxLength, "too long");
        assert!(err.into_result().is_err());
    }

    #[test]
    fn concurrency_is_distinct_from_persistence() {
        let err = Error::Concurrency(ConcurrencyError {
            table: "orders".to_string(),
            message: "original values are stale".to_string(),
        });
        assert!(matches!(err, Error::Concurrency(_)));
        assert!(err.to_string().contains("stale"));
    }
}
