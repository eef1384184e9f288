//! Generic traversal over record / record-set graphs.
//!
//! Every cascading operation (dirty check, accept, reject, prune) is one
//! traversal with a different callback pair, instead of a bespoke recursive
//! function per operation. The traversal deduplicates by reference identity,
//! which is what makes it safe over cyclic graphs: a child that back-
//! references its parent is simply skipped on the second encounter.

use crate::record::{RowState, SharedRecord};
use crate::set::SharedRecordSet;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use workset_core::ChildKind;

/// The underlying object a graph node refers to.
#[derive(Clone)]
pub enum NodeRef {
    Record(SharedRecord),
    Set(SharedRecordSet),
}

impl NodeRef {
    /// Address of the underlying object, used for identity dedup.
    fn key(&self) -> usize {
        match self {
            NodeRef::Record(r) => Rc::as_ptr(r) as usize,
            NodeRef::Set(s) => Rc::as_ptr(s) as usize,
        }
    }

    /// Whether the underlying record or set is locally dirty.
    fn is_dirty(&self) -> bool {
        match self {
            NodeRef::Record(r) => r.borrow().is_dirty(),
            NodeRef::Set(s) => s.borrow().is_dirty(),
        }
    }
}

/// One node of the traversal: the underlying object plus the relationship
/// slot name it occupies in its parent (`None` for roots and for records
/// inside a set).
#[derive(Clone)]
pub struct GraphNode {
    pub node: NodeRef,
    pub slot: Option<&'static str>,
}

impl GraphNode {
    /// Root node over a record.
    #[must_use]
    pub fn record(handle: &SharedRecord) -> Self {
        Self {
            node: NodeRef::Record(Rc::clone(handle)),
            slot: None,
        }
    }

    /// Root node over a record set.
    #[must_use]
    pub fn set(handle: &SharedRecordSet) -> Self {
        Self {
            node: NodeRef::Set(Rc::clone(handle)),
            slot: None,
        }
    }

    /// The record handle, if this node is a record.
    #[must_use]
    pub fn as_record(&self) -> Option<SharedRecord> {
        match &self.node {
            NodeRef::Record(r) => Some(Rc::clone(r)),
            NodeRef::Set(_) => None,
        }
    }

    /// The record-set handle, if this node is a set.
    #[must_use]
    pub fn as_set(&self) -> Option<SharedRecordSet> {
        match &self.node {
            NodeRef::Set(s) => Some(Rc::clone(s)),
            NodeRef::Record(_) => None,
        }
    }
}

/// Directive returned by visit callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep going; descend into this node's children.
    Continue,
    /// Keep going, but do not descend into this node's children.
    SkipChildren,
    /// Abort the whole traversal immediately, through every level.
    Abort,
}

type VisitFn<'a, S> = &'a mut dyn FnMut(&GraphNode, Option<&GraphNode>, &mut S) -> Step;

struct Walker<'a, S> {
    seen: HashSet<usize>,
    state: &'a mut S,
    enter: VisitFn<'a, S>,
    exit: Option<VisitFn<'a, S>>,
}

impl<S> Walker<'_, S> {
    /// Returns `false` when the traversal was aborted.
    fn walk(&mut self, node: &GraphNode, parent: Option<&GraphNode>) -> bool {
        if !self.seen.insert(node.node.key()) {
            return true;
        }

        match (self.enter)(node, parent, self.state) {
            Step::Abort => return false,
            Step::SkipChildren => {}
            Step::Continue => {
                // Children are gathered after the enter callback so its
                // mutations (accept, reject, prune) are reflected, and the
                // handles are cloned out so no borrow is held while the
                // callbacks run.
                for child in children(node) {
                    if !self.walk(&child, Some(node)) {
                        return false;
                    }
                }
            }
        }

        if let Some(exit) = self.exit.as_mut() {
            if exit(node, parent, self.state) == Step::Abort {
                return false;
            }
        }
        true
    }
}

fn children(node: &GraphNode) -> Vec<GraphNode> {
    match &node.node {
        NodeRef::Set(set) => set
            .borrow()
            .records()
            .iter()
            .map(|r| GraphNode {
                node: NodeRef::Record(Rc::clone(r)),
                slot: None,
            })
            .collect(),
        NodeRef::Record(record) => record
            .borrow()
            .slots()
            .iter()
            .filter_map(|slot| {
                let node = match slot.kind() {
                    ChildKind::Record => slot.record().map(NodeRef::Record),
                    ChildKind::RecordSet => slot.set().map(NodeRef::Set),
                }?;
                Some(GraphNode {
                    node,
                    slot: Some(slot.name()),
                })
            })
            .collect(),
    }
}

/// Traverse the graph rooted at `root`.
///
/// Each unique object reference is visited at most once per traversal. The
/// enter callback runs before a node's children, the optional exit callback
/// after them ("sandwich" traversal). Returns `false` if a callback
/// aborted the traversal.
pub fn visit<'a, S>(
    root: &GraphNode,
    state: &'a mut S,
    enter: &'a mut dyn FnMut(&GraphNode, Option<&GraphNode>, &mut S) -> Step,
    exit: Option<&'a mut dyn FnMut(&GraphNode, Option<&GraphNode>, &mut S) -> Step>,
) -> bool {
    let mut walker = Walker {
        seen: HashSet::new(),
        state,
        enter,
        exit,
    };
    walker.walk(root, None)
}

// ----------------------------------------------------------------------
// Derived operations
// ----------------------------------------------------------------------

/// Whether any node reachable from `root` is dirty.
///
/// Short-circuits: as soon as a dirty node is found the traversal aborts
/// without visiting further nodes.
pub fn is_graph_dirty(root: &GraphNode) -> bool {
    let mut dirty = false;
    visit(
        root,
        &mut dirty,
        &mut |node, _, dirty| {
            if node.node.is_dirty() {
                *dirty = true;
                Step::Abort
            } else {
                Step::Continue
            }
        },
        None,
    );
    dirty
}

/// Accept changes on every node reachable from `root`.
pub fn accept_changes_graph(root: &GraphNode) {
    tracing::trace!("accepting changes across graph");
    visit(
        root,
        &mut (),
        &mut |node, _, _| {
            match &node.node {
                NodeRef::Record(r) => r.borrow_mut().accept_changes(),
                NodeRef::Set(s) => s.borrow_mut().accept_changes(),
            }
            Step::Continue
        },
        None,
    );
}

/// Reject changes on every node reachable from `root`.
pub fn reject_changes_graph(root: &GraphNode) {
    tracing::trace!("rejecting changes across graph");
    visit(
        root,
        &mut (),
        &mut |node, _, _| {
            match &node.node {
                NodeRef::Record(r) => r.borrow_mut().reject_changes(),
                NodeRef::Set(s) => s.borrow_mut().reject_changes(),
            }
            Step::Continue
        },
        None,
    );
}

/// Collect every record set reachable from `root`, in depth-first
/// pre-order (parents before their children).
pub fn collect_sets(root: &GraphNode) -> Vec<SharedRecordSet> {
    let mut sets = Vec::new();
    visit(
        root,
        &mut sets,
        &mut |node, _, sets: &mut Vec<SharedRecordSet>| {
            if let Some(set) = node.as_set() {
                sets.push(set);
            }
            Step::Continue
        },
        None,
    );
    sets
}

enum PruneMode<'a> {
    /// Prune nodes whose whole subtree is clean.
    Clean,
    /// Prune nodes whose whole subtree's record states intersect the list.
    States(&'a [RowState]),
}

impl PruneMode<'_> {
    /// Whether the whole subtree under `node` is prunable.
    fn node_prunable(&self, node: &GraphNode) -> bool {
        match self {
            PruneMode::Clean => !is_graph_dirty(node),
            PruneMode::States(states) => subtree_states_match(node, states),
        }
    }
}

fn subtree_states_match(root: &GraphNode, states: &[RowState]) -> bool {
    let mut matches = true;
    visit(
        root,
        &mut matches,
        &mut |node, _, matches| {
            let ok = match &node.node {
                NodeRef::Record(r) => states.contains(&r.borrow().state()),
                // A set's pending deletions only match when Deleted itself
                // is prunable.
                NodeRef::Set(s) => {
                    states.contains(&RowState::Deleted)
                        || s.borrow().pending_deletes().is_empty()
                }
            };
            if ok {
                Step::Continue
            } else {
                *matches = false;
                Step::Abort
            }
        },
        None,
    );
    matches
}

/// Remove every wholly-clean record from its containing set and null out
/// wholly-clean relationship slots, leaving only the dirty spine of the
/// graph.
pub fn prune_graph(root: &GraphNode) {
    prune(root, &PruneMode::Clean);
}

/// Like [`prune_graph`], but pruning records whose state intersects
/// `states` instead of clean ones. When `Deleted` is included, each
/// visited set's pending-deletion list is cleared as well.
pub fn prune_graph_states(root: &GraphNode, states: &[RowState]) {
    prune(root, &PruneMode::States(states));
}

fn prune(root: &GraphNode, mode: &PruneMode<'_>) {
    tracing::debug!("pruning graph");
    let clear_pending = matches!(mode, PruneMode::States(s) if s.contains(&RowState::Deleted));

    // Prunable records are collected on enter and physically removed on
    // exit, after their subtrees have been walked.
    let mut removals: HashMap<usize, Vec<SharedRecord>> = HashMap::new();

    visit(
        root,
        &mut removals,
        &mut |node, _, removals| {
            match &node.node {
                NodeRef::Set(set) => {
                    let doomed: Vec<SharedRecord> = set
                        .borrow()
                        .records()
                        .iter()
                        .filter(|r| mode.node_prunable(&GraphNode::record(r)))
                        .cloned()
                        .collect();
                    if !doomed.is_empty() {
                        removals.insert(Rc::as_ptr(set) as usize, doomed);
                    }
                }
                NodeRef::Record(record) => {
                    // Null out wholly-prunable child references up front so
                    // the traversal never descends into them.
                    let cleared: Vec<(&'static str, ChildKind)> = {
                        let r = record.borrow();
                        r.slots()
                            .iter()
                            .filter_map(|slot| {
                                let child = match slot.kind() {
                                    ChildKind::Record => slot.record().map(NodeRef::Record),
                                    ChildKind::RecordSet => slot.set().map(NodeRef::Set),
                                }?;
                                let child = GraphNode {
                                    node: child,
                                    slot: Some(slot.name()),
                                };
                                mode.node_prunable(&child)
                                    .then_some((slot.name(), slot.kind()))
                            })
                            .collect()
                    };
                    let mut r = record.borrow_mut();
                    for (name, kind) in cleared {
                        let _ = match kind {
                            ChildKind::Record => r.set_child_record(name, None),
                            ChildKind::RecordSet => r.set_child_set(name, None),
                        };
                    }
                }
            }
            Step::Continue
        },
        Some(&mut |node, parent, removals| {
            if let NodeRef::Set(set) = &node.node {
                if let Some(doomed) = removals.remove(&(Rc::as_ptr(set) as usize)) {
                    let mut s = set.borrow_mut();
                    for record in doomed {
                        let _ = s.detach(&record);
                    }
                }
                if clear_pending {
                    set.borrow_mut().clear_pending();
                }
                let now_empty = {
                    let s = set.borrow();
                    s.is_empty() && s.pending_deletes().is_empty()
                };
                if now_empty {
                    if let (Some(parent), Some(slot)) = (parent, node.slot) {
                        if let NodeRef::Record(parent_record) = &parent.node {
                            let _ = parent_record.borrow_mut().set_child_set(slot, None);
                        }
                    }
                }
            }
            Step::Continue
        }),
    );
}
