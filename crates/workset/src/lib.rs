//! Client-side unit of work for relational records.
//!
//! `workset` tracks per-row state and per-column modifications, aggregates
//! records into record sets, batches persistence operations, and walks
//! heterogeneous (possibly cyclic) trees of records and record sets for
//! cascading operations. It decides *what* changed and *how* the change set
//! is organized; producing SQL and executing it belongs to the
//! [`Persistence`] collaborator.
//!
//! # Role In The Architecture
//!
//! - **Change tracking**: every record carries current/original snapshots,
//!   a row state, and its modified-column set.
//! - **Aggregation**: record sets own their live records exclusively and
//!   keep removed-but-unsaved records in a pending-deletion list.
//! - **Save orchestration**: members are partitioned by state into
//!   insert/update and delete batches and driven through one transaction,
//!   with per-row continuation and deferred notifications.
//! - **Graph traversal**: one reference-deduplicating visitor implements
//!   cascading dirty checks, accept/reject, and pruning.
//! - **Prefetch hydration**: nested record sets are reconstituted from
//!   flat joined result sets keyed by join columns.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: child relationships are declared per
//!   schema, never discovered by reflection.
//! - **Ownership clarity**: parent-to-child edges own; every reverse edge
//!   is a `Weak` reference.
//! - **Single-threaded by contract**: one unit of work belongs to one
//!   thread; shared handles are `Rc<RefCell<_>>`, not locks.
//!
//! # Example
//!
//! ```ignore
//! let orders = RecordSet::new_shared(order_schema);
//! orders.borrow_mut().fill_from(&result_table)?;
//!
//! let order = orders.borrow().get(0).unwrap();
//! order.borrow_mut().set_column("status", "shipped")?;
//!
//! assert!(is_graph_dirty(&GraphNode::set(&orders)));
//! save(&orders, &mut db, &SaveOptions::default())?;
//! ```

pub mod graph;
pub mod hydrate;
pub mod observe;
pub mod persist;
pub mod record;
pub mod save;
pub mod set;
pub mod store;

pub use graph::{
    GraphNode, NodeRef, Step, accept_changes_graph, collect_sets, is_graph_dirty, prune_graph,
    prune_graph_states, reject_changes_graph, visit,
};
pub use hydrate::{HydrateRoot, hydrate, load};
pub use observe::{ListChange, ObserverList, SubscriptionId};
pub use persist::{
    AccessMode, LoadRequest, LoadResult, Persistence, Prefetch, RowOutcome, SavePacket,
};
pub use record::{EditScope, Record, RowState, SharedRecord, Slot};
pub use save::{AuditInfo, SaveOptions, SaveReport, save, save_graph, save_record};
pub use set::{RecordSet, SharedRecordSet, combine, mark_all_deleted};
pub use store::{ValueStore, WriteOutcome};

pub use workset_core as core;
