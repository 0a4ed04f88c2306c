//! Reconciling model
//!
//! A [`Model`] owns the attribute snapshot of one document. Every update goes
//! through [`Model::set`], which merges the patch into a copy of the current
//! snapshot, diffs the result against the untouched snapshot and applies only
//! the top-level keys that really changed:
//!
//! ```
//! use pubsync_core::{Model, SetOptions};
//! use pubsync_core::value::record_from_json;
//! use serde_json::json;
//!
//! let mut model = Model::new(record_from_json(json!({ "foo": "bar", "buzz": { "fuzz": true, "keep": 1 } })).unwrap());
//!
//! let delta = model.set(json!({ "buzz": { "fuzz": false } }), SetOptions::default()).unwrap();
//!
//! assert_eq!(delta.len(), 1);
//! assert_eq!(model.to_json(), json!({ "foo": "bar", "buzz": { "fuzz": false, "keep": 1 } }));
//! ```
//!
//! # Notifications
//!
//! The attribute store notifies keys whose new value is not nested; the model
//! raises [`ModelEvent::KeyChanged`] for record and sequence values itself,
//! because a plain store cannot see changes inside them. Each effective
//! `set` ends with exactly one aggregate [`ModelEvent::Changed`] carrying the
//! delta.

pub mod store;

use crate::config::{ModelConfig, ModelOptions};
use crate::error::{Result, SyncError};
use crate::events::{ListenerId, Listeners};
use crate::sync::{self, query::SharedQuery};
use crate::value::{changes, deep_clone, deep_clone_record, deep_merge, record_to_json, Record, Value};
use crate::DocumentID;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace};

pub use store::{AttributeStore, MemoryStore};

/// Model shared with the reactive query that drives it
pub type SharedModel<S = MemoryStore> = Rc<RefCell<Model<S>>>;

/// Lifecycle of a model with respect to updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    /// No update in progress
    Idle,
    /// Inside `set`/`unset`
    Applying,
}

/// Change notification raised by a model
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// One top-level attribute changed; `None` once it has been removed
    KeyChanged { key: String, value: Option<Value> },

    /// Aggregate notification for one `set`, carrying its delta
    Changed { delta: Record },
}

/// Flags for [`Model::set`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Apply without notifying
    pub silent: bool,

    /// Remove the changed keys instead of writing them
    pub unset: bool,
}

impl SetOptions {
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_unset(mut self, unset: bool) -> Self {
        self.unset = unset;
        self
    }
}

/// An intended update, in any of the accepted calling conventions
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// Nothing to apply
    Empty,
    Record(Record),
    /// A single `(key, value)` pair
    Entry(String, Value),
}

impl Patch {
    /// Normalize to a record; `None` for an empty patch.
    pub fn into_record(self) -> Option<Record> {
        match self {
            Patch::Empty => None,
            Patch::Record(record) => Some(record),
            Patch::Entry(key, value) => {
                let mut record = Record::new();
                record.insert(key, value);
                Some(record)
            }
        }
    }
}

impl From<Record> for Patch {
    fn from(record: Record) -> Self {
        Patch::Record(record)
    }
}

impl From<Option<Record>> for Patch {
    fn from(record: Option<Record>) -> Self {
        record.map_or(Patch::Empty, Patch::Record)
    }
}

impl<K: Into<String>, V: Into<Value>> From<(K, V)> for Patch {
    fn from((key, value): (K, V)) -> Self {
        Patch::Entry(key.into(), value.into())
    }
}

/// Anything but a JSON object is an empty patch
impl From<serde_json::Value> for Patch {
    fn from(json: serde_json::Value) -> Self {
        match Value::from(json) {
            Value::Record(record) => Patch::Record(record),
            _ => Patch::Empty,
        }
    }
}

/// Identity carried by an identity attribute value
pub fn identity_of(value: &Value) -> Option<DocumentID> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reconciling model over one document
pub struct Model<S: AttributeStore = MemoryStore> {
    id: Option<DocumentID>,
    store: S,
    config: ModelConfig,
    state: ModelState,
    listeners: Rc<Listeners<ModelEvent>>,
    pub(crate) reactive_query: Option<SharedQuery>,
    pub(crate) subscription: Option<ListenerId>,
}

impl Model<MemoryStore> {
    /// Create a model over an in-memory store with the default configuration
    pub fn new(attributes: Record) -> Self {
        Self::with_config(attributes, ModelConfig::default())
    }
}

impl<S: AttributeStore> Model<S> {
    /// Create a model; the initial attributes are taken as-is, without notifying.
    pub fn with_config(attributes: Record, config: ModelConfig) -> Self {
        let id = attributes.get(&config.id_attribute).and_then(identity_of);
        Self {
            id,
            store: S::with_attributes(attributes),
            config,
            state: ModelState::Idle,
            listeners: Rc::new(Listeners::new()),
            reactive_query: None,
            subscription: None,
        }
    }

    pub fn id(&self) -> Option<&DocumentID> {
        self.id.as_ref()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn attributes(&self) -> &Record {
        self.store.attributes()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.store.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.store.get(key).is_some()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Export the current attributes, identity included
    pub fn to_json(&self) -> serde_json::Value {
        record_to_json(self.store.attributes())
    }

    /// Register a change listener
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ModelEvent) + 'static,
    {
        self.listeners.on(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }

    pub(crate) fn listeners(&self) -> &Rc<Listeners<ModelEvent>> {
        &self.listeners
    }

    /// True when this model observes a reactive query of its own
    pub fn has_reactive_query(&self) -> bool {
        self.reactive_query.is_some()
    }

    pub fn reactive_query(&self) -> Option<&SharedQuery> {
        self.reactive_query.as_ref()
    }

    /// True while subscribed to the reactive query
    pub fn is_observing(&self) -> bool {
        self.subscription.is_some()
    }

    /// Swap the reactive query, dropping any running subscription first.
    ///
    /// Observing the new query needs a fresh
    /// [`start_observing_changes`](crate::sync::start_observing_changes).
    pub fn set_reactive_query(&mut self, query: Option<SharedQuery>) {
        sync::detach(&mut self.subscription, self.reactive_query.as_ref());
        self.reactive_query = query;
    }

    /// Stop observing the reactive query; a no-op when not subscribed.
    pub fn stop_observing_changes(&mut self) -> bool {
        sync::detach(&mut self.subscription, self.reactive_query.as_ref())
    }

    /// Merge `patch` into the snapshot and apply what actually changed
    ///
    /// Returns the applied delta: the top-level keys whose value differs,
    /// each holding its whole new subtree. An empty delta means nothing
    /// was applied and nothing was notified.
    pub fn set(&mut self, patch: impl Into<Patch>, options: SetOptions) -> Result<Record> {
        let Some(mut patch) = patch.into().into_record() else {
            trace!(id = ?self.id, "ignoring empty patch");
            return Ok(Record::new());
        };
        if self.state != ModelState::Idle {
            return Err(SyncError::ReentrantUpdate {
                id: self.id.clone(),
            });
        }

        self.adopt_identity(&mut patch);

        self.state = ModelState::Applying;
        let delta = self.apply(&patch, options);
        self.state = ModelState::Idle;

        Ok(delta)
    }

    /// Remove fields; `fields` may be nested, with any leaf value.
    ///
    /// Every top-level key whose subtree the fields touch is removed whole.
    pub fn unset(&mut self, fields: impl Into<Patch>, options: SetOptions) -> Result<Record> {
        self.set(fields, options.with_unset(true))
    }

    /// Remove top-level keys
    pub fn unset_keys<I, K>(&mut self, keys: I, options: SetOptions) -> Result<Record>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let fields: Record = keys.into_iter().map(|key| (key.into(), Value::Null)).collect();
        self.unset(fields, options)
    }

    /// Identity is assigned once; later attempts to change it are dropped.
    fn adopt_identity(&mut self, patch: &mut Record) {
        let Some(value) = patch.remove(&self.config.id_attribute) else {
            return;
        };
        match (&self.id, identity_of(&value)) {
            (None, Some(id)) => {
                let mut identity = Record::new();
                identity.insert(self.config.id_attribute.clone(), value);
                self.store.set(&identity);
                self.id = Some(id);
            }
            (Some(current), Some(id)) if *current == id => {}
            _ => debug!(id = ?self.id, "ignoring attempt to change document identity"),
        }
    }

    /// Snapshot minus reserved attributes, with no structure shared with the store
    fn baseline(&self) -> Record {
        self.store
            .attributes()
            .iter()
            .filter(|(key, _)| !self.config.is_reserved(key))
            .map(|(key, value)| (key.clone(), deep_clone(value)))
            .collect()
    }

    fn apply(&mut self, patch: &Record, options: SetOptions) -> Record {
        let old = self.baseline();
        let mut merged = deep_clone_record(&old);
        deep_merge(&mut merged, patch);
        let mut delta = changes(&old, &merged);

        // The creation timestamp is outside the baseline, so compare it directly.
        if let Some(created_at) = &self.config.created_at_attribute {
            if delta.contains_key(created_at) && delta.get(created_at) == self.store.get(created_at) {
                delta.remove(created_at);
            }
        }

        if options.unset {
            // A key already holding null still has to go.
            for (key, value) in patch {
                if value.is_null() && self.store.get(key).is_some() {
                    delta.entry(key.clone()).or_insert(Value::Null);
                }
            }
            delta.retain(|key, _| self.store.get(key).is_some());
        }

        if delta.is_empty() {
            trace!(id = ?self.id, "patch changes nothing");
            return delta;
        }

        let all_nested = delta.values().all(Value::is_nested);
        let raised = if options.unset {
            self.store.unset(&delta)
        } else {
            self.store.set(&delta)
        };
        debug!(
            id = ?self.id,
            keys = ?delta.keys().collect::<Vec<_>>(),
            unset = options.unset,
            "applied delta"
        );

        if !options.silent {
            self.notify(&delta, raised, all_nested, options.unset);
        }
        delta
    }

    fn notify(&self, delta: &Record, raised: Vec<ModelEvent>, all_nested: bool, unset: bool) {
        let (mut events, aggregates): (Vec<_>, Vec<_>) = raised
            .into_iter()
            .partition(|event| matches!(event, ModelEvent::KeyChanged { .. }));

        for (key, value) in delta.iter().filter(|(_, value)| value.is_nested()) {
            events.push(ModelEvent::KeyChanged {
                key: key.clone(),
                value: (!unset).then(|| value.clone()),
            });
        }

        match aggregates.into_iter().next() {
            Some(aggregate) => events.push(aggregate),
            None if all_nested => events.push(ModelEvent::Changed {
                delta: delta.clone(),
            }),
            None => {}
        }

        for event in &events {
            self.listeners.emit(event);
        }
    }
}

impl<S: AttributeStore + 'static> Model<S> {
    /// Create a model that may observe a reactive query of its own
    pub fn with_options(attributes: Record, options: ModelOptions) -> Result<SharedModel<S>> {
        options.config.validate()?;

        let mut model = Self::with_config(attributes, options.config);
        model.reactive_query = options.reactive_query;

        let shared = Rc::new(RefCell::new(model));
        if options.start_observing_changes {
            sync::start_observing_changes(&shared);
        }
        Ok(shared)
    }
}

impl<S: AttributeStore> Drop for Model<S> {
    fn drop(&mut self) {
        sync::detach(&mut self.subscription, self.reactive_query.as_ref());
    }
}

impl<S: AttributeStore> std::fmt::Debug for Model<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.id)
            .field("attributes", self.store.attributes())
            .field("state", &self.state)
            .field("observing", &self.subscription.is_some())
            .finish()
    }
}
