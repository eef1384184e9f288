//! Soft per-column validation.
//!
//! Validation never blocks a write. Rules declared on a column
//! (nullability, max length, pattern) are evaluated on demand and surfaced
//! through an error-info accessor on the record.

use crate::error::{ColumnIssue, IssueKind};
use crate::schema::ColumnDef;
use crate::value::Value;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Compiled patterns are cached per pattern string; schemas use `'static`
/// pattern literals so the cache stays bounded.
fn pattern_matches(pattern: &'static str, text: &str) -> bool {
    static CACHE: OnceLock<Mutex<HashMap<&'static str, Option<Regex>>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let compiled = cache
        .entry(pattern)
        .or_insert_with(|| Regex::new(pattern).ok());
    match compiled {
        Some(re) => re.is_match(text),
        // An unparseable pattern never matches; the issue surfaces as Pattern.
        None => false,
    }
}

/// Evaluate the soft validation rules of one column against its value.
///
/// `value` is `None` when the column has never been set (distinct from an
/// explicit NULL). Returns the first violated rule, if any.
#[must_use]
pub fn check_column(def: &ColumnDef, value: Option<&Value>) -> Option<ColumnIssue> {
    let effective = match value {
        None | Some(Value::Null) => None,
        Some(v) => Some(v),
    };

    if effective.is_none() {
        // Database-generated columns are legitimately unset before save.
        if !def.nullable && !def.auto_increment {
            return Some(ColumnIssue {
                column: def.name.to_string(),
                kind: IssueKind::Required,
                message: "is required".to_string(),
            });
        }
        return None;
    }

    let value = effective?;

    if let Some(max) = def.max_length {
        if let Some(text) = value.as_str() {
            if text.chars().count() > max as usize {
                return Some(ColumnIssue {
                    column: def.name.to_string(),
                    kind: IssueKind::MaxLength,
                    message: format!("must be at most {max} characters"),
                });
            }
        }
    }

    if let Some(pattern) = def.pattern {
        if let Some(text) = value.as_str() {
            if !pattern_matches(pattern, text) {
                return Some(ColumnIssue {
                    column: def.name.to_string(),
                    kind: IssueKind::Pattern,
                    message: format!("must match pattern '{pattern}'"),
                });
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlType;

    #[test]
    fn test_required_column() {
        let def = ColumnDef::new("name", SqlType::Text);
        let issue = check_column(&def, None).unwrap();
        assert_eq!(issue.kind, IssueKind::Required);

        let issue = check_column(&def, Some(&Value::Null)).unwrap();
        assert_eq!(issue.kind, IssueKind::Required);

        assert!(check_column(&def, Some(&Value::Text("x".to_string()))).is_none());
    }

    #[test]
    fn test_nullable_column_allows_unset() {
        let def = ColumnDef::new("note", SqlType::Text).nullable(true);
        assert!(check_column(&def, None).is_none());
    }

    #[test]
    fn test_auto_increment_not_required_before_save() {
        let def = ColumnDef::new("id", SqlType::BigInt)
            .primary_key(true)
            .auto_increment(true);
        assert!(check_column(&def, None).is_none());
    }

    #[test]
    fn test_max_length() {
        let def = ColumnDef::new("code", SqlType::VarChar(3)).max_length(3);
        assert!(check_column(&def, Some(&Value::Text("abc".to_string()))).is_none());
        let issue = check_column(&def, Some(&Value::Text("abcd".to_string()))).unwrap();
        assert_eq!(issue.kind, IssueKind::MaxLength);
    }

    #[test]
    fn test_pattern() {
        let def = ColumnDef::new("code", SqlType::Text).pattern("^[A-Z]{2}-\\d+$");
        assert!(check_column(&def, Some(&Value::Text("AB-12".to_string()))).is_none());
        let issue = check_column(&def, Some(&Value::Text("nope".to_string()))).unwrap();
        assert_eq!(issue.kind, IssueKind::Pattern);
    }

    #[test]
    fn test_pattern_ignores_non_text() {
        let def = ColumnDef::new("n", SqlType::BigInt).pattern("^\\d$");
        assert!(check_column(&def, Some(&Value::BigInt(123))).is_none());
    }
}
