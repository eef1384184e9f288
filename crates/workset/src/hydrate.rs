//! Prefetch hydration.
//!
//! Reconstitutes nested record sets from flat, pre-joined result sets. Each
//! prefetch map is applied in order: the already-hydrated level it attaches
//! to is indexed by join key, every parent record receives a fresh (possibly
//! empty) child container, and the map's joined rows are streamed into the
//! matching containers. "No related rows" and "relationship not loaded"
//! stay distinguishable: a parent with zero matching rows still ends up
//! with an empty container.

use crate::persist::{LoadRequest, Persistence, Prefetch};
use crate::record::{Record, SharedRecord, column_mapping};
use crate::set::{RecordSet, SharedRecordSet};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;
use workset_core::{
    Error, HydrationError, HydrationErrorKind, PrefetchMap, Result, Row, TableSchema, Value,
};

/// The root of a hydration: the primary query's result.
#[derive(Clone)]
pub enum HydrateRoot {
    Record(SharedRecord),
    Set(SharedRecordSet),
}

impl HydrateRoot {
    fn records(&self) -> Vec<SharedRecord> {
        match self {
            HydrateRoot::Record(record) => vec![Rc::clone(record)],
            HydrateRoot::Set(set) => set.borrow().records().to_vec(),
        }
    }
}

/// A `Value` usable as a hash-map key.
///
/// Equality is plain value equality; floats hash by bit pattern. A NaN key
/// never matches anything, which is the right failure mode for a join key.
#[derive(Debug, Clone)]
struct KeyValue(Value);

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for KeyValue {}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Null => 0u8.hash(state),
            Value::Bool(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            Value::Int(v) => {
                2u8.hash(state);
                v.hash(state);
            }
            Value::BigInt(v) => {
                3u8.hash(state);
                v.hash(state);
            }
            Value::Double(v) => {
                4u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Decimal(v) => {
                5u8.hash(state);
                v.hash(state);
            }
            Value::Text(v) => {
                6u8.hash(state);
                v.hash(state);
            }
            Value::Bytes(v) => {
                7u8.hash(state);
                v.hash(state);
            }
            Value::Date(v) => {
                8u8.hash(state);
                v.hash(state);
            }
            Value::Timestamp(v) => {
                9u8.hash(state);
                v.hash(state);
            }
            Value::Uuid(v) => {
                10u8.hash(state);
                v.hash(state);
            }
            Value::Json(v) => {
                11u8.hash(state);
                v.to_string().hash(state);
            }
        }
    }
}

/// A computed join key.
///
/// Simple keys keep the single column's raw value; composite keys
/// concatenate the text form of each column in declared order with no
/// separator. Key construction is pure and per-row, so parent and child
/// sides always agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum JoinKey {
    Single(KeyValue),
    Composite(String),
}

impl JoinKey {
    fn text(&self) -> String {
        match self {
            JoinKey::Single(v) => v.0.key_text(),
            JoinKey::Composite(s) => s.clone(),
        }
    }
}

fn hydration_error(
    kind: HydrationErrorKind,
    path: &str,
    key: Option<String>,
    message: impl Into<String>,
) -> Error {
    Error::Hydration(HydrationError {
        kind,
        path: path.to_string(),
        key,
        message: message.into(),
    })
}

/// Compute a parent record's join key.
fn parent_key(record: &SharedRecord, map: &PrefetchMap) -> Result<JoinKey> {
    let r = record.borrow();
    let mut values = Vec::with_capacity(map.parent_columns.len());
    for column in &map.parent_columns {
        let value = r.column_value(column).map_err(|_| {
            hydration_error(
                HydrationErrorKind::MissingColumn,
                &map.path,
                None,
                format!(
                    "parent join column '{}' is not part of '{}'",
                    column,
                    r.schema().name()
                ),
            )
        })?;
        values.push(value);
    }
    Ok(build_key(values, map.composite))
}

/// Compute a joined row's key from the child-side columns.
fn row_key(row: &Row, ordinals: &[usize], composite: bool) -> JoinKey {
    let values: Vec<Value> = ordinals
        .iter()
        .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
        .collect();
    build_key(values, composite)
}

fn build_key(mut values: Vec<Value>, composite: bool) -> JoinKey {
    if composite {
        JoinKey::Composite(values.iter().map(Value::key_text).collect())
    } else {
        JoinKey::Single(KeyValue(values.remove(0)))
    }
}

/// Apply a sequence of prefetch maps to the tree rooted at `root`.
///
/// Maps must be ordered parent levels before child levels. Each map builds
/// a `key -> fresh child container` index over its parent level, streams
/// its flat rows into the matching containers, and publishes the new
/// containers under its own path for later maps to attach to.
#[tracing::instrument(level = "debug", skip_all, fields(maps = prefetches.len()))]
pub fn hydrate(root: &HydrateRoot, prefetches: &[Prefetch]) -> Result<()> {
    let mut levels: HashMap<String, Vec<SharedRecordSet>> = HashMap::new();

    for prefetch in prefetches {
        let map = &prefetch.map;
        if map.parent_columns.is_empty()
            || map.child_columns.len() != map.parent_columns.len()
            || (!map.composite && map.parent_columns.len() != 1)
        {
            return Err(hydration_error(
                HydrationErrorKind::MissingColumn,
                &map.path,
                None,
                "prefetch map join columns are malformed",
            ));
        }

        // 1. The already-hydrated parent level (root path is "").
        let parent_records: Vec<SharedRecord> = if map.path.is_empty() {
            root.records()
        } else {
            let sets = levels.get(&map.path).ok_or_else(|| {
                hydration_error(
                    HydrationErrorKind::UnknownPath,
                    &map.path,
                    None,
                    "prefetch map attaches to a level that was never hydrated",
                )
            })?;
            sets.iter()
                .flat_map(|s| s.borrow().records().to_vec())
                .collect()
        };

        // 2. A fresh child container per parent record, indexed by key.
        let mut index: HashMap<JoinKey, SharedRecordSet> =
            HashMap::with_capacity(parent_records.len());
        let mut containers = Vec::with_capacity(parent_records.len());
        for record in &parent_records {
            let key = parent_key(record, map)?;
            let child = RecordSet::new_shared(Arc::clone(&map.child_schema));
            record
                .borrow_mut()
                .set_child_set(map.slot, Some(Rc::clone(&child)))
                .map_err(|e| {
                    hydration_error(
                        HydrationErrorKind::BadSlot,
                        &map.path,
                        None,
                        e.to_string(),
                    )
                })?;
            if index.insert(key.clone(), Rc::clone(&child)).is_some() {
                return Err(hydration_error(
                    HydrationErrorKind::DuplicateParentKey,
                    &map.path,
                    Some(key.text()),
                    "two parent records produced the same join key",
                ));
            }
            containers.push(child);
        }

        // 3. Stream the joined rows. Column-to-ordinal mappings are
        // computed once, on the shared column info, and reused per row.
        let columns = prefetch.rows.column_info();
        let child_ordinals: Vec<usize> = map
            .child_columns
            .iter()
            .map(|column| {
                columns.index_of(column).ok_or_else(|| {
                    hydration_error(
                        HydrationErrorKind::MissingColumn,
                        &map.path,
                        None,
                        format!("child join column '{}' is absent from the joined rows", column),
                    )
                })
            })
            .collect::<Result<_>>()?;
        let mapping = column_mapping(&map.child_schema, &columns);

        for row in prefetch.rows.rows() {
            let key = row_key(row, &child_ordinals, map.composite);
            let Some(container) = index.get(&key) else {
                return Err(hydration_error(
                    HydrationErrorKind::MissingParent,
                    &map.path,
                    Some(key.text()),
                    "joined row has no matching parent container",
                ));
            };
            let record = Record::from_row(Arc::clone(&map.child_schema), row, &mapping);
            container.borrow_mut().add(record)?;
        }

        tracing::debug!(
            path = %map.own_path(),
            containers = containers.len(),
            rows = prefetch.rows.len(),
            "hydrated prefetch level"
        );

        // 4. Publish this level for later maps.
        levels.insert(map.own_path(), containers);
    }
    Ok(())
}

/// Execute a flat load and hydrate its result tree.
#[tracing::instrument(level = "debug", skip_all)]
pub fn load(
    db: &mut dyn Persistence,
    request: &LoadRequest,
    schema: Arc<TableSchema>,
) -> Result<SharedRecordSet> {
    let result = db.load(request)?;
    let set = RecordSet::new_shared(schema);
    set.borrow_mut().fill_from(&result.table)?;
    hydrate(&HydrateRoot::Set(Rc::clone(&set)), &result.prefetches)?;
    Ok(set)
}
