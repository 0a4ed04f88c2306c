//! Reactive sync adapter
//!
//! Connects a [`ReactiveQuery`](query::ReactiveQuery) to the models it
//! feeds. Incoming events are routed by document identity:
//!
//! - `added`: merged into the addressed model through `set`
//! - `changed`: cleared (`null`) fields are unset first, the rest is set
//! - `removed`: drops the member from a collection; a standalone model
//!   leaves that decision to its owner
//!
//! Events addressed to another identity are ignored. Delivery is
//! synchronous, so events for one document apply in the order the source
//! emits them.

pub mod adapter;
pub mod local;
pub mod query;

use crate::events::{ListenerId, Outbox};
use crate::value::{deep_omit, deep_pick, Record, Selector, Value};
use query::{QueryEvent, SharedQuery};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

pub use local::{LocalQuery, Readiness};
pub use query::{QueryListener, ReactiveQuery, ReadyGate, SharedGate};

/// Something that consumes the events of its own reactive query
pub trait QueryObserver: 'static {
    fn observed_query(&self) -> Option<SharedQuery>;

    fn subscription(&self) -> Option<ListenerId>;

    fn set_subscription(&mut self, subscription: Option<ListenerId>);

    /// Apply one event; the notifications it raises come back undispatched.
    fn handle_event(&mut self, event: &QueryEvent) -> Outbox;
}

/// Subscribe `target` to its reactive query
///
/// Returns false when there is no query or a subscription is already
/// running. The query holds only a weak handle on the target, and
/// notifications are dispatched after the target's borrow is released.
pub fn start_observing_changes<T: QueryObserver>(target: &Rc<RefCell<T>>) -> bool {
    let query = {
        let target = target.borrow();
        if target.subscription().is_some() {
            return false;
        }
        match target.observed_query() {
            Some(query) => query,
            None => return false,
        }
    };

    let weak = Rc::downgrade(target);
    let subscription = query.observe(Box::new(move |event| {
        if let Some(target) = weak.upgrade() {
            let outbox = target.borrow_mut().handle_event(event);
            outbox.flush();
        }
    }));

    target.borrow_mut().set_subscription(Some(subscription));
    debug!(subscription, "started observing reactive query");
    true
}

/// Remove the listeners registered by [`start_observing_changes`]
///
/// Safe to call without a running subscription.
pub fn stop_observing_changes<T: QueryObserver>(target: &mut T) -> bool {
    let query = target.observed_query();
    let mut subscription = target.subscription();
    let stopped = detach(&mut subscription, query.as_ref());
    target.set_subscription(subscription);
    stopped
}

pub(crate) fn detach(subscription: &mut Option<ListenerId>, query: Option<&SharedQuery>) -> bool {
    let Some(id) = subscription.take() else {
        return false;
    };
    if let Some(query) = query {
        query.unobserve(id);
    }
    debug!(subscription = id, "stopped observing reactive query");
    true
}

fn is_cleared(_key: &str, value: &Value) -> bool {
    value.is_null()
}

/// Split changed fields into `(to_unset, to_set)`
///
/// Cleared fields are found at any depth; `to_unset` keeps their full path,
/// `to_set` holds everything else with emptied branches pruned.
pub fn partition_fields(fields: &Record) -> (Record, Record) {
    let to_unset = deep_pick(fields, Selector::Predicate(&is_cleared));
    let to_set = deep_omit(fields, Selector::Predicate(&is_cleared));
    (to_unset, to_set)
}
