//! In-memory reactive query and readiness gate
//!
//! [`LocalQuery`] keeps a result set in memory and emits the same event
//! stream a remote query would: `Added` when a document enters, `Changed`
//! with only the top-level fields whose value differs, `Removed` when it
//! leaves. New observers first receive the current result set as `Added`
//! events.

use super::query::{QueryEvent, QueryListener, ReactiveQuery, ReadyGate};
use crate::config::DEFAULT_ID_ATTRIBUTE;
use crate::events::{ListenerId, Listeners};
use crate::model::identity_of;
use crate::value::{Record, Value};
use crate::DocumentID;
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::trace;
use uuid::Uuid;

/// Result set held in memory
pub struct LocalQuery {
    id_attribute: String,
    /// Fields per document, identity excluded
    documents: RefCell<IndexMap<DocumentID, Record>>,
    listeners: Listeners<QueryEvent>,
}

impl LocalQuery {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::with_id_attribute(DEFAULT_ID_ATTRIBUTE))
    }

    pub fn with_id_attribute(id_attribute: impl Into<String>) -> Self {
        Self {
            id_attribute: id_attribute.into(),
            documents: RefCell::new(IndexMap::new()),
            listeners: Listeners::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.borrow().is_empty()
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.listeners.len()
    }

    /// Document with its identity field
    pub fn get(&self, id: &str) -> Option<Record> {
        self.documents
            .borrow()
            .get(id)
            .map(|fields| self.with_identity(id, fields))
    }

    /// Add a document, or update it if its identity is already present.
    ///
    /// A document without identity gets a fresh UUID.
    pub fn insert(&self, mut document: Record) -> DocumentID {
        let id = document
            .remove(&self.id_attribute)
            .as_ref()
            .and_then(identity_of)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.documents.borrow().contains_key(&id) {
            self.update(&id, document);
            return id;
        }

        self.documents.borrow_mut().insert(id.clone(), document.clone());
        self.listeners.emit(&QueryEvent::Added {
            id: id.clone(),
            fields: document,
        });
        id
    }

    /// Write top-level fields; `null` clears a field.
    ///
    /// Emits `Changed` with the fields that actually changed. Returns false
    /// for an unknown document.
    pub fn update(&self, id: &str, fields: Record) -> bool {
        let changed = {
            let mut documents = self.documents.borrow_mut();
            let Some(document) = documents.get_mut(id) else {
                return false;
            };

            let mut changed = Record::new();
            for (key, value) in fields {
                if key == self.id_attribute {
                    continue;
                }
                if value.is_null() {
                    if document.remove(&key).is_some() {
                        changed.insert(key, Value::Null);
                    }
                } else if document.get(&key) != Some(&value) {
                    document.insert(key.clone(), value.clone());
                    changed.insert(key, value);
                }
            }
            changed
        };

        if changed.is_empty() {
            trace!(id, "update changed nothing");
        } else {
            self.listeners.emit(&QueryEvent::Changed {
                id: id.to_string(),
                fields: changed,
            });
        }
        true
    }

    /// Remove a document; returns false for an unknown document.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.documents.borrow_mut().shift_remove(id).is_some();
        if removed {
            self.listeners.emit(&QueryEvent::Removed { id: id.to_string() });
        }
        removed
    }

    fn with_identity(&self, id: &str, fields: &Record) -> Record {
        let mut document = fields.clone();
        document.insert(self.id_attribute.clone(), Value::from(id));
        document
    }
}

impl ReactiveQuery for LocalQuery {
    fn observe(&self, listener: QueryListener) -> ListenerId {
        let listener: Rc<dyn Fn(&QueryEvent)> = Rc::from(listener);
        let registered = Rc::clone(&listener);
        let id = self.listeners.on(move |event| registered(event));

        let initial: Vec<QueryEvent> = self
            .documents
            .borrow()
            .iter()
            .map(|(id, fields)| QueryEvent::Added {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect();
        for event in &initial {
            listener(event);
        }

        id
    }

    fn unobserve(&self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }

    fn fetch(&self) -> Vec<Record> {
        self.documents
            .borrow()
            .iter()
            .map(|(id, fields)| self.with_identity(id, fields))
            .collect()
    }
}

/// Gate resolved by hand, e.g. when a subscription reports ready
#[derive(Default)]
pub struct Readiness {
    ready: Cell<bool>,
    pending: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl Readiness {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    /// Resolve the gate and run the waiting callbacks; later calls do nothing.
    pub fn resolve(&self) {
        if self.ready.replace(true) {
            return;
        }
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        for callback in pending {
            callback();
        }
    }
}

impl ReadyGate for Readiness {
    fn when_ready(&self, callback: Box<dyn FnOnce()>) {
        if self.is_ready() {
            callback();
        } else {
            self.pending.borrow_mut().push(callback);
        }
    }
}
