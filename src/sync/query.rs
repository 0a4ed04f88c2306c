//! Boundary of the reactive query source
//!
//! The engine consumes a push-based query: `added`/`changed`/`removed`
//! events keyed by document identity, plus `fetch` for the full result set.
//! Transport and subscription readiness live behind these traits.

use crate::events::ListenerId;
use crate::value::Record;
use crate::DocumentID;
use std::rc::Rc;

/// Incremental event emitted by a reactive query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    /// A document entered the result set; `fields` excludes the identity field
    Added { id: DocumentID, fields: Record },

    /// Fields of a document changed; `null` marks a cleared field
    Changed { id: DocumentID, fields: Record },

    /// A document left the result set
    Removed { id: DocumentID },
}

impl QueryEvent {
    /// Identity of the addressed document
    pub fn id(&self) -> &DocumentID {
        match self {
            QueryEvent::Added { id, .. }
            | QueryEvent::Changed { id, .. }
            | QueryEvent::Removed { id } => id,
        }
    }
}

/// Callback registered with a reactive query
pub type QueryListener = Box<dyn Fn(&QueryEvent)>;

/// Push-based query over a set of documents
pub trait ReactiveQuery {
    /// Register a listener for every event kind.
    ///
    /// Sources may replay their current result set as `Added` events to the
    /// new listener before returning.
    fn observe(&self, listener: QueryListener) -> ListenerId;

    /// Remove exactly the listener registered under `id`.
    fn unobserve(&self, id: ListenerId) -> bool;

    /// Full current result set, identity field included
    fn fetch(&self) -> Vec<Record>;
}

/// Query shared between its owner and the models observing it
pub type SharedQuery = Rc<dyn ReactiveQuery>;

/// Single-resolution readiness signal of a subscription
pub trait ReadyGate {
    /// Run `callback` once the gate resolves, or right away if it already has.
    fn when_ready(&self, callback: Box<dyn FnOnce()>);
}

pub type SharedGate = Rc<dyn ReadyGate>;
