//! Attribute store capability
//!
//! A store holds the flat top-level attributes of one document. The model
//! wraps it: the store applies already-reconciled deltas and raises the
//! notifications a plain attribute store would, the model adds the ones a
//! plain store cannot see.

use super::ModelEvent;
use crate::value::{Record, Value};

/// Get/set/unset over a flat record plus its change notifications
///
/// `set` and `unset` return the notifications raised by the store itself,
/// in order. A store is expected to notify per key only for entries whose
/// incoming value is not nested, followed by one aggregate
/// [`ModelEvent::Changed`] when it notified anything.
pub trait AttributeStore {
    /// Build a store holding `attributes`, without notifying.
    fn with_attributes(attributes: Record) -> Self
    where
        Self: Sized;

    fn attributes(&self) -> &Record;

    fn get(&self, key: &str) -> Option<&Value> {
        self.attributes().get(key)
    }

    /// Write every entry of `attributes` at the top level.
    fn set(&mut self, attributes: &Record) -> Vec<ModelEvent>;

    /// Remove every top-level key named in `attributes`.
    fn unset(&mut self, attributes: &Record) -> Vec<ModelEvent>;
}

/// In-memory attribute store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    attributes: Record,
}

impl AttributeStore for MemoryStore {
    fn with_attributes(attributes: Record) -> Self {
        Self { attributes }
    }

    fn attributes(&self) -> &Record {
        &self.attributes
    }

    fn set(&mut self, attributes: &Record) -> Vec<ModelEvent> {
        let mut events = Vec::new();

        for (key, value) in attributes {
            let previous = self.attributes.insert(key.clone(), value.clone());
            if !value.is_nested() && previous.as_ref() != Some(value) {
                events.push(ModelEvent::KeyChanged {
                    key: key.clone(),
                    value: Some(value.clone()),
                });
            }
        }

        if !events.is_empty() {
            events.push(ModelEvent::Changed {
                delta: attributes.clone(),
            });
        }
        events
    }

    fn unset(&mut self, attributes: &Record) -> Vec<ModelEvent> {
        let mut events = Vec::new();

        for (key, value) in attributes {
            if self.attributes.remove(key).is_some() && !value.is_nested() {
                events.push(ModelEvent::KeyChanged {
                    key: key.clone(),
                    value: None,
                });
            }
        }

        if !events.is_empty() {
            events.push(ModelEvent::Changed {
                delta: attributes.clone(),
            });
        }
        events
    }
}
