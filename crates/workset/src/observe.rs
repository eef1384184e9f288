//! List-change observation.
//!
//! Record sets notify registered observers when their live membership
//! changes. Notifications raised while a save is in flight are coalesced:
//! observers see a single `Saved` event when the outermost nested save
//! unwinds, never a mid-transaction signal.

use std::fmt;

/// A change to a record set's live membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChange {
    /// A record was appended at the given index
    Added(usize),
    /// A record left the live sequence at the given index
    Removed(usize),
    /// The membership changed wholesale (combine, reject)
    Reset,
    /// A save completed; `written` rows were physically persisted
    Saved { written: usize },
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(usize);

type ObserverFn = Box<dyn FnMut(&ListChange)>;

/// Registered observers of one record set.
///
/// Callbacks must not re-enter the observed record set; they run while the
/// notifying operation is still on the stack.
#[derive(Default)]
pub struct ObserverList {
    next_id: usize,
    observers: Vec<(usize, ObserverFn)>,
}

impl ObserverList {
    /// Create an empty observer list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer, returning its subscription handle.
    pub fn subscribe(&mut self, observer: ObserverFn) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.observers.push((id, observer));
        SubscriptionId(id)
    }

    /// Remove a previously registered observer.
    ///
    /// Returns `true` if the subscription was found.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id.0);
        self.observers.len() != before
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Check if no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver an event to every observer in registration order.
    pub fn emit(&mut self, change: &ListChange) {
        for (_, observer) in &mut self.observers {
            observer(change);
        }
    }
}

impl fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.observers.len())
            .finish()
    }
}
