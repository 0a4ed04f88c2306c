//! Reconciling collection
//!
//! A [`Collection`] owns the models of a result set, keyed by document
//! identity. Reactivity belongs to the collection alone: it observes one
//! query and routes each event to the addressed member, so members must not
//! observe a query of their own.
//!
//! ```
//! use pubsync_core::{Collection, CollectionOptions, SharedCollection};
//! use pubsync_core::sync::{LocalQuery, Readiness};
//! use pubsync_core::value::record_from_json;
//! use serde_json::json;
//!
//! let query = LocalQuery::new();
//! let gate = Readiness::new();
//! query.insert(record_from_json(json!({ "_id": "a", "n": 1 })).unwrap());
//!
//! let options = CollectionOptions::default()
//!     .with_query(query.clone())
//!     .wait_on(gate.clone());
//! let collection: SharedCollection = Collection::with_options(Vec::new(), options).unwrap();
//! assert_eq!(collection.borrow().len(), 0);
//!
//! gate.resolve();
//! assert_eq!(collection.borrow().len(), 1);
//! ```

use crate::config::{CollectionOptions, ModelConfig};
use crate::error::{Result, SyncError};
use crate::events::{ListenerId, Listeners};
use crate::model::{identity_of, AttributeStore, MemoryStore, Model, ModelEvent, SetOptions};
use crate::sync::{self, adapter, query::SharedQuery};
use crate::value::{Record, Value};
use crate::DocumentID;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

/// Collection shared with the reactive query that drives it
pub type SharedCollection<S = MemoryStore> = Rc<RefCell<Collection<S>>>;

/// Something to insert: raw attributes or a ready-made model
pub enum CollectionItem<S: AttributeStore = MemoryStore> {
    Attributes(Record),
    Model(Model<S>),
}

impl<S: AttributeStore> CollectionItem<S> {
    fn has_reactive_query(&self) -> bool {
        matches!(self, CollectionItem::Model(model) if model.has_reactive_query())
    }

    fn id(&self) -> Option<DocumentID> {
        match self {
            CollectionItem::Attributes(_) => None,
            CollectionItem::Model(model) => model.id().cloned(),
        }
    }
}

impl<S: AttributeStore> From<Record> for CollectionItem<S> {
    fn from(attributes: Record) -> Self {
        CollectionItem::Attributes(attributes)
    }
}

impl<S: AttributeStore> From<Model<S>> for CollectionItem<S> {
    fn from(model: Model<S>) -> Self {
        CollectionItem::Model(model)
    }
}

/// Notification raised by a collection
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEvent {
    Added { id: DocumentID },
    Removed { id: DocumentID },
    /// Contents replaced wholesale
    Reset { len: usize },
    /// Forwarded from a member model
    Model { id: DocumentID, event: ModelEvent },
}

/// Flags for [`Collection::add`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Merge into an existing member with the same identity instead of skipping
    pub merge: bool,
}

struct Member<S: AttributeStore> {
    model: Model<S>,
    forwarder: ListenerId,
}

/// Keyed set of reconciling models
pub struct Collection<S: AttributeStore = MemoryStore> {
    members: IndexMap<DocumentID, Member<S>>,
    config: ModelConfig,
    listeners: Rc<Listeners<CollectionEvent>>,
    pub(crate) reactive_query: Option<SharedQuery>,
    pub(crate) subscription: Option<ListenerId>,
}

impl Collection<MemoryStore> {
    /// Empty collection of in-memory models, not observing anything
    pub fn new() -> Self {
        Self::with_config(ModelConfig::default())
    }
}

impl Default for Collection<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: AttributeStore> Collection<S> {
    pub fn with_config(config: ModelConfig) -> Self {
        Self {
            members: IndexMap::new(),
            config,
            listeners: Rc::new(Listeners::new()),
            reactive_query: None,
            subscription: None,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Model<S>> {
        self.members.get(id).map(|member| &member.model)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Model<S>> {
        self.members.get_mut(id).map(|member| &mut member.model)
    }

    /// Identities in insertion order
    pub fn ids(&self) -> impl Iterator<Item = &DocumentID> {
        self.members.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Model<S>> {
        self.members.values().map(|member| &member.model)
    }

    /// Export every member, in insertion order
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.iter().map(Model::to_json).collect())
    }

    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CollectionEvent) + 'static,
    {
        self.listeners.on(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }

    pub(crate) fn listeners(&self) -> &Rc<Listeners<CollectionEvent>> {
        &self.listeners
    }

    pub fn reactive_query(&self) -> Option<&SharedQuery> {
        self.reactive_query.as_ref()
    }

    pub fn is_observing(&self) -> bool {
        self.subscription.is_some()
    }

    /// Swap the reactive query, dropping any running subscription first.
    pub fn set_reactive_query(&mut self, query: Option<SharedQuery>) {
        sync::detach(&mut self.subscription, self.reactive_query.as_ref());
        self.reactive_query = query;
    }

    /// Stop observing the reactive query; a no-op when not subscribed.
    pub fn stop_observing_changes(&mut self) -> bool {
        sync::detach(&mut self.subscription, self.reactive_query.as_ref())
    }

    /// Insert one item
    ///
    /// With an existing member of the same identity the item is merged into
    /// it when `options.merge` is set and skipped otherwise. Returns the
    /// identity of the addressed member.
    pub fn add(&mut self, item: impl Into<CollectionItem<S>>, options: AddOptions) -> Result<DocumentID> {
        let item = item.into();
        Self::check_items(std::slice::from_ref(&item))?;
        Ok(self.insert(item, options.merge, true))
    }

    /// Insert a batch; nothing is inserted if any item is rejected.
    pub fn add_many(&mut self, items: Vec<CollectionItem<S>>, options: AddOptions) -> Result<Vec<DocumentID>> {
        Self::check_items(&items)?;
        Ok(items
            .into_iter()
            .map(|item| self.insert(item, options.merge, true))
            .collect())
    }

    /// Replace all members at once
    ///
    /// Emits a single `Reset` event. Items sharing an identity are merged
    /// silently.
    pub fn reset(&mut self, items: Vec<CollectionItem<S>>) -> Result<()> {
        Self::check_items(&items)?;

        for (_, member) in self.members.drain(..) {
            member.model.off(member.forwarder);
        }
        for item in items {
            self.insert(item, true, false);
        }

        debug!(len = self.members.len(), "collection reset");
        self.listeners.emit(&CollectionEvent::Reset {
            len: self.members.len(),
        });
        Ok(())
    }

    /// Remove and return a member
    pub fn remove(&mut self, id: &str) -> Option<Model<S>> {
        let member = self.members.shift_remove(id)?;
        member.model.off(member.forwarder);
        self.listeners.emit(&CollectionEvent::Removed { id: id.to_string() });
        Some(member.model)
    }

    /// Reject items that bring their own reactivity
    fn check_items(items: &[CollectionItem<S>]) -> Result<()> {
        match items.iter().find(|item| item.has_reactive_query()) {
            Some(item) => Err(SyncError::ReactivityConflict { id: item.id() }),
            None => Ok(()),
        }
    }

    fn insert(&mut self, item: CollectionItem<S>, merge: bool, announce: bool) -> DocumentID {
        let id_attribute = self.config.id_attribute.clone();

        let (id, attributes, model) = match item {
            CollectionItem::Attributes(mut attributes) => {
                let id = match attributes.get(&id_attribute).and_then(identity_of) {
                    Some(id) => id,
                    None => {
                        let id = Uuid::new_v4().to_string();
                        attributes.insert(id_attribute, Value::from(id.as_str()));
                        id
                    }
                };
                (id, Some(attributes), None)
            }
            CollectionItem::Model(mut model) => {
                let id = match model.id() {
                    Some(id) => id.clone(),
                    None => {
                        let id = Uuid::new_v4().to_string();
                        if let Err(err) = model.set((id_attribute, id.as_str()), SetOptions::default().with_silent(true)) {
                            warn!(error = %err, "failed to assign identity");
                        }
                        id
                    }
                };
                (id, None, Some(model))
            }
        };

        if let Some(existing) = self.members.get_mut(&id) {
            if merge {
                let patch = match (attributes, &model) {
                    (Some(attributes), _) => attributes,
                    (None, Some(model)) => model.attributes().clone(),
                    (None, None) => Record::new(),
                };
                let options = SetOptions::default().with_silent(!announce);
                if let Err(err) = existing.model.set(patch, options) {
                    warn!(%id, error = %err, "failed to merge into existing member");
                }
            }
            return id;
        }

        let model = match (model, attributes) {
            (Some(model), _) => model,
            (None, attributes) => Model::with_config(attributes.unwrap_or_default(), self.config.clone()),
        };
        let forwarder = self.forward(&id, &model);
        self.members.insert(id.clone(), Member { model, forwarder });

        if announce {
            self.listeners.emit(&CollectionEvent::Added { id: id.clone() });
        }
        id
    }

    /// Re-emit a member's events on the collection
    fn forward(&self, id: &DocumentID, model: &Model<S>) -> ListenerId {
        let listeners: Weak<Listeners<CollectionEvent>> = Rc::downgrade(&self.listeners);
        let id = id.clone();
        model.on(move |event| {
            if let Some(listeners) = listeners.upgrade() {
                listeners.emit(&CollectionEvent::Model {
                    id: id.clone(),
                    event: event.clone(),
                });
            }
        })
    }
}

impl<S: AttributeStore + 'static> Collection<S> {
    /// Build a collection and wire it to its reactive query
    ///
    /// With a readiness gate the collection stays as given until the gate
    /// resolves, then resets to the query's full result set and subscribes.
    /// Without one it subscribes right away (unless deferred) and merges
    /// incoming additions into the initial items.
    pub fn with_options(items: Vec<CollectionItem<S>>, options: CollectionOptions) -> Result<SharedCollection<S>> {
        options.config.validate()?;

        let mut collection = Self::with_config(options.config);
        collection.add_many(items, AddOptions { merge: true })?;
        collection.reactive_query = options.reactive_query;

        let shared = Rc::new(RefCell::new(collection));
        if let Some(gate) = options.wait_on {
            let weak = Rc::downgrade(&shared);
            gate.when_ready(Box::new(move || {
                if let Some(collection) = weak.upgrade() {
                    adapter::reset_and_observe(&collection);
                }
            }));
        } else if options.start_observing_changes {
            sync::start_observing_changes(&shared);
        }
        Ok(shared)
    }
}

impl<S: AttributeStore> Drop for Collection<S> {
    fn drop(&mut self) {
        sync::detach(&mut self.subscription, self.reactive_query.as_ref());
    }
}

impl<S: AttributeStore> std::fmt::Debug for Collection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("ids", &self.members.keys().collect::<Vec<_>>())
            .field("observing", &self.subscription.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelOptions;
    use crate::model::SharedModel;
    use crate::sync::query::QueryEvent;
    use crate::sync::{LocalQuery, QueryObserver, Readiness};
    use crate::value::record_from_json;
    use serde_json::json;

    fn rec(json: serde_json::Value) -> Record {
        record_from_json(json).unwrap()
    }

    fn recorded(collection: &Collection) -> Rc<RefCell<Vec<CollectionEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        collection.on(move |event| sink.borrow_mut().push(event.clone()));
        events
    }

    #[test]
    fn test_new_collection_is_empty() {
        let collection = Collection::new();
        assert_eq!(collection.len(), 0);
        assert!(collection.is_empty());
    }

    #[test]
    fn test_add_and_get() {
        let mut collection = Collection::new();
        let events = recorded(&collection);

        let id = collection
            .add(rec(json!({ "_id": "a", "n": 1 })), AddOptions::default())
            .unwrap();

        assert_eq!(id, "a");
        assert_eq!(collection.get("a").unwrap().get("n"), Some(&Value::from(1i64)));
        assert_eq!(*events.borrow(), vec![CollectionEvent::Added { id: "a".to_string() }]);
    }

    #[test]
    fn test_add_without_identity_assigns_one() {
        let mut collection = Collection::new();
        let id = collection.add(rec(json!({ "n": 1 })), AddOptions::default()).unwrap();

        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(collection.get(&id).unwrap().id(), Some(&id));

        let model_id = collection.add(Model::new(Record::new()), AddOptions::default()).unwrap();
        assert_eq!(collection.get(&model_id).unwrap().get("_id"), Some(&Value::from(model_id.as_str())));
    }

    #[test]
    fn test_duplicate_add_skips_unless_merging() {
        let mut collection = Collection::new();
        collection.add(rec(json!({ "_id": "a", "n": 1, "keep": true })), AddOptions::default()).unwrap();

        collection.add(rec(json!({ "_id": "a", "n": 2 })), AddOptions::default()).unwrap();
        assert_eq!(collection.get("a").unwrap().get("n"), Some(&Value::from(1i64)));

        collection.add(rec(json!({ "_id": "a", "n": 3 })), AddOptions { merge: true }).unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(
            collection.get("a").unwrap().to_json(),
            json!({ "_id": "a", "n": 3, "keep": true })
        );
    }

    #[test]
    fn test_reactive_model_rejected_before_mutation() {
        let query = LocalQuery::new();
        let mut standalone = Model::new(rec(json!({ "_id": "b" })));
        standalone.set_reactive_query(Some(query));

        let mut collection = Collection::new();
        let items = vec![
            CollectionItem::from(rec(json!({ "_id": "a" }))),
            CollectionItem::from(standalone),
        ];
        let result = collection.add_many(items, AddOptions::default());

        match result {
            Err(SyncError::ReactivityConflict { id }) => assert_eq!(id.as_deref(), Some("b")),
            other => panic!("expected reactivity conflict, got {other:?}"),
        }
        assert!(collection.is_empty());
    }

    #[test]
    fn test_reactive_model_rejected_on_reset() {
        let query = LocalQuery::new();
        let shared: SharedModel = Model::with_options(
            rec(json!({ "_id": "b" })),
            ModelOptions::default().with_query(query).deferred(),
        )
        .unwrap();
        let model = Rc::try_unwrap(shared).ok().unwrap().into_inner();

        let mut collection = Collection::new();
        collection.add(rec(json!({ "_id": "a" })), AddOptions::default()).unwrap();

        assert!(collection.reset(vec![CollectionItem::from(model)]).is_err());
        assert!(collection.contains("a"));
    }

    #[test]
    fn test_reset_replaces_contents() {
        let mut collection = Collection::new();
        collection.add(rec(json!({ "_id": "old" })), AddOptions::default()).unwrap();
        let events = recorded(&collection);

        collection
            .reset(vec![
                rec(json!({ "_id": "a", "n": 1 })).into(),
                rec(json!({ "_id": "b" })).into(),
                rec(json!({ "_id": "a", "m": 2 })).into(),
            ])
            .unwrap();

        let ids: Vec<&DocumentID> = collection.ids().collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(collection.get("a").unwrap().to_json(), json!({ "_id": "a", "n": 1, "m": 2 }));
        assert_eq!(*events.borrow(), vec![CollectionEvent::Reset { len: 2 }]);
    }

    #[test]
    fn test_remove_returns_model() {
        let mut collection = Collection::new();
        collection.add(rec(json!({ "_id": "a" })), AddOptions::default()).unwrap();
        let events = recorded(&collection);

        let removed = collection.remove("a").unwrap();

        assert_eq!(removed.id().map(String::as_str), Some("a"));
        assert!(collection.remove("a").is_none());
        assert_eq!(*events.borrow(), vec![CollectionEvent::Removed { id: "a".to_string() }]);
    }

    #[test]
    fn test_member_events_are_forwarded() {
        let mut collection = Collection::new();
        collection.add(rec(json!({ "_id": "a", "nested": { "x": 1 } })), AddOptions::default()).unwrap();
        let events = recorded(&collection);

        collection
            .get_mut("a")
            .unwrap()
            .set(json!({ "nested": { "x": 2 } }), SetOptions::default())
            .unwrap();

        let events = events.borrow();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| matches!(
            event,
            CollectionEvent::Model { id, .. } if id == "a"
        )));
    }

    #[test]
    fn test_removed_member_stops_forwarding() {
        let mut collection = Collection::new();
        collection.add(rec(json!({ "_id": "a" })), AddOptions::default()).unwrap();
        let mut removed = collection.remove("a").unwrap();
        let events = recorded(&collection);

        removed.set(json!({ "n": 1 }), SetOptions::default()).unwrap();

        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_observes_query_and_merges_initial_models() {
        let query = LocalQuery::new();
        query.insert(rec(json!({ "_id": "a", "remote": true })));
        query.insert(rec(json!({ "_id": "b" })));

        let options = CollectionOptions::default().with_query(query.clone());
        let collection: SharedCollection = Collection::with_options(
            vec![rec(json!({ "_id": "a", "local": true })).into()],
            options,
        )
        .unwrap();

        assert_eq!(collection.borrow().len(), 2);
        assert_eq!(
            collection.borrow().get("a").unwrap().to_json(),
            json!({ "_id": "a", "local": true, "remote": true })
        );

        query.insert(rec(json!({ "_id": "c" })));
        query.update("b", rec(json!({ "n": 1 })));
        query.remove("a");

        let collection = collection.borrow();
        let ids: Vec<&DocumentID> = collection.ids().collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(collection.get("b").unwrap().get("n"), Some(&Value::from(1i64)));
    }

    #[test]
    fn test_readiness_gate_defers_and_resets() {
        let query = LocalQuery::new();
        let gate = Readiness::new();
        for id in ["a", "b"] {
            query.insert(rec(json!({ "_id": id })));
        }

        let options = CollectionOptions::default()
            .with_query(query.clone())
            .wait_on(gate.clone());
        let collection: SharedCollection = Collection::with_options(
            vec![rec(json!({ "_id": "stale" })).into()],
            options,
        )
        .unwrap();

        // Early additions are not observed yet.
        query.insert(rec(json!({ "_id": "c" })));
        assert_eq!(query.observer_count(), 0);
        assert_eq!(collection.borrow().len(), 1);

        gate.resolve();

        {
            let collection = collection.borrow();
            let ids: Vec<&DocumentID> = collection.ids().collect();
            assert_eq!(ids, vec!["a", "b", "c"]);
            assert!(collection.is_observing());
        }

        query.insert(rec(json!({ "_id": "d" })));
        assert_eq!(collection.borrow().len(), 4);
    }

    #[test]
    fn test_readiness_gate_starts_empty() {
        let query = LocalQuery::new();
        let gate = Readiness::new();
        query.insert(rec(json!({ "_id": "a" })));

        let options = CollectionOptions::default().with_query(query.clone()).wait_on(gate.clone());
        let collection: SharedCollection = Collection::with_options(Vec::new(), options).unwrap();
        assert_eq!(collection.borrow().len(), 0);

        for id in ["b", "c"] {
            query.insert(rec(json!({ "_id": id })));
        }
        gate.resolve();

        assert_eq!(collection.borrow().len(), 3);
    }

    #[test]
    fn test_resolved_gate_syncs_immediately() {
        let query = LocalQuery::new();
        let gate = Readiness::new();
        gate.resolve();
        query.insert(rec(json!({ "_id": "a" })));

        let options = CollectionOptions::default().with_query(query.clone()).wait_on(gate);
        let collection: SharedCollection = Collection::with_options(Vec::new(), options).unwrap();

        assert_eq!(collection.borrow().len(), 1);
        assert!(collection.borrow().is_observing());
    }

    #[test]
    fn test_changed_event_routes_to_member() {
        let mut collection = Collection::new();
        collection
            .add(rec(json!({ "_id": "a", "foo": { "bar": 1, "baz": 2 }, "gone": 1 })), AddOptions::default())
            .unwrap();

        collection
            .handle_event(&QueryEvent::Changed {
                id: "a".to_string(),
                fields: rec(json!({ "foo": { "baz": 3 }, "gone": null })),
            })
            .flush();
        let outbox = collection.handle_event(&QueryEvent::Changed {
            id: "unknown".to_string(),
            fields: rec(json!({ "x": 1 })),
        });
        assert!(outbox.is_empty());

        assert_eq!(collection.len(), 1);
        assert_eq!(
            collection.get("a").unwrap().to_json(),
            json!({ "_id": "a", "foo": { "bar": 1, "baz": 3 } })
        );
    }

    #[test]
    fn test_listener_reads_collection_during_events() {
        let query = LocalQuery::new();
        let gate = Readiness::new();
        query.insert(rec(json!({ "_id": "a", "n": 1 })));

        let options = CollectionOptions::default().with_query(query.clone()).wait_on(gate.clone());
        let collection: SharedCollection = Collection::with_options(Vec::new(), options).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let handle = Rc::downgrade(&collection);
        collection.borrow().on(move |event| {
            let Some(collection) = handle.upgrade() else { return };
            let collection = collection.borrow();
            let observed = match event {
                CollectionEvent::Reset { .. } => format!("reset:{}", collection.len()),
                CollectionEvent::Added { id } => format!("added:{}:{}", id, collection.contains(id)),
                CollectionEvent::Removed { id } => format!("removed:{}:{}", id, collection.contains(id)),
                CollectionEvent::Model { id, event: ModelEvent::Changed { .. } } => {
                    let n = collection.get(id).and_then(|model| model.get("n")).cloned();
                    format!("changed:{}:{:?}", id, n.and_then(|n| n.to_json().as_i64()))
                }
                CollectionEvent::Model { .. } => return,
            };
            sink.borrow_mut().push(observed);
        });

        gate.resolve();
        query.insert(rec(json!({ "_id": "b" })));
        query.update("a", rec(json!({ "n": 2 })));
        query.remove("b");

        assert_eq!(
            *seen.borrow(),
            vec![
                "reset:1".to_string(),
                "added:b:true".to_string(),
                "changed:a:Some(2)".to_string(),
                "removed:b:false".to_string(),
            ]
        );
    }

    #[test]
    fn test_stop_observing_without_subscription() {
        let mut collection = Collection::new();
        assert!(!collection.stop_observing_changes());

        let query = LocalQuery::new();
        let options = CollectionOptions::default().with_query(query.clone());
        let shared: SharedCollection = Collection::with_options(Vec::new(), options).unwrap();
        assert!(shared.borrow_mut().stop_observing_changes());
        assert!(!shared.borrow_mut().stop_observing_changes());
        assert_eq!(query.observer_count(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ModelConfig {
            id_attribute: String::new(),
            created_at_attribute: None,
        };
        let options = CollectionOptions::default().with_config(config);
        let result: Result<SharedCollection> = Collection::with_options(Vec::new(), options);
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }
}
