//! Event routing for models and collections

use super::query::{QueryEvent, SharedQuery};
use super::{partition_fields, start_observing_changes, QueryObserver};
use crate::collection::{AddOptions, Collection, CollectionItem};
use crate::error::Result;
use crate::events::{ListenerId, Outbox};
use crate::model::{AttributeStore, Model, SetOptions};
use crate::value::{Record, Value};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Unset cleared fields, then set the rest
///
/// Unsetting first lets a field that lost a leaf and gained new content in
/// the same event end up with exactly the new content.
pub fn apply_changed<S: AttributeStore>(model: &mut Model<S>, fields: &Record) -> Result<()> {
    let (to_unset, to_set) = partition_fields(fields);
    if !to_unset.is_empty() {
        model.unset(to_unset, SetOptions::default())?;
    }
    if !to_set.is_empty() {
        model.set(to_set, SetOptions::default())?;
    }
    Ok(())
}

fn report(result: Result<()>, event: &QueryEvent) {
    if let Err(err) = result {
        warn!(id = %event.id(), error = %err, "failed to apply query event");
    }
}

impl<S: AttributeStore + 'static> QueryObserver for Model<S> {
    fn observed_query(&self) -> Option<SharedQuery> {
        self.reactive_query.clone()
    }

    fn subscription(&self) -> Option<ListenerId> {
        self.subscription
    }

    fn set_subscription(&mut self, subscription: Option<ListenerId>) {
        self.subscription = subscription;
    }

    fn handle_event(&mut self, event: &QueryEvent) -> Outbox {
        let mut outbox = Outbox::new();
        if self.id() != Some(event.id()) {
            trace!(id = %event.id(), model = ?self.id(), "ignoring event for another document");
            return outbox;
        }

        self.listeners().hold();
        match event {
            QueryEvent::Added { fields, .. } => {
                let result = self.set(fields.clone(), SetOptions::default()).map(|_| ());
                report(result, event);
            }
            QueryEvent::Changed { fields, .. } => report(apply_changed(self, fields), event),
            QueryEvent::Removed { id } => {
                trace!(%id, "removal left to the model's owner");
            }
        }
        outbox.collect(self.listeners());
        outbox
    }
}

impl<S: AttributeStore + 'static> QueryObserver for Collection<S> {
    fn observed_query(&self) -> Option<SharedQuery> {
        self.reactive_query.clone()
    }

    fn subscription(&self) -> Option<ListenerId> {
        self.subscription
    }

    fn set_subscription(&mut self, subscription: Option<ListenerId>) {
        self.subscription = subscription;
    }

    fn handle_event(&mut self, event: &QueryEvent) -> Outbox {
        // Member events are forwarded, so they go out before the collection's own.
        let member = self.get(event.id()).map(|model| Rc::clone(model.listeners()));
        if let Some(listeners) = &member {
            listeners.hold();
        }
        self.listeners().hold();

        match event {
            QueryEvent::Added { id, fields } => {
                // May overlap with the models the collection started with.
                let mut document = fields.clone();
                document.insert(self.config().id_attribute.clone(), Value::from(id.as_str()));
                let result = self
                    .add(document, AddOptions { merge: true })
                    .map(|_| ());
                report(result, event);
            }
            QueryEvent::Changed { id, fields } => match self.get_mut(id) {
                Some(model) => report(apply_changed(model, fields), event),
                None => trace!(%id, "ignoring change for unknown document"),
            },
            QueryEvent::Removed { id } => {
                if self.remove(id).is_none() {
                    trace!(%id, "ignoring removal of unknown document");
                }
            }
        }

        let mut outbox = Outbox::new();
        if let Some(listeners) = &member {
            outbox.collect(listeners);
        }
        outbox.collect(self.listeners());
        outbox
    }
}

/// Replace the collection's contents with the query's result set, then subscribe
///
/// Run once the readiness gate resolves: `added` events that fired before
/// that point are covered by the fetched result set.
pub fn reset_and_observe<S: AttributeStore + 'static>(target: &Rc<RefCell<Collection<S>>>) {
    let query = target.borrow().observed_query();
    let Some(query) = query else {
        debug!("readiness gate resolved without a reactive query");
        return;
    };

    let items: Vec<CollectionItem<S>> = query
        .fetch()
        .into_iter()
        .map(CollectionItem::Attributes)
        .collect();
    let outbox = {
        let mut collection = target.borrow_mut();
        let listeners = Rc::clone(collection.listeners());
        listeners.hold();
        if let Err(err) = collection.reset(items) {
            warn!(error = %err, "failed to reset collection to query results");
        }
        let mut outbox = Outbox::new();
        outbox.collect(&listeners);
        outbox
    };
    outbox.flush();
    start_observing_changes(target);
}
