//! Listener registry
//!
//! Typed replacement for string-named event channels. Every `on` returns a
//! [`ListenerId`]; `off` with that id removes exactly that listener.
//! Dispatch is synchronous and in registration order.
//!
//! A registry can also hold its events while the emitter is borrowed; an
//! [`Outbox`] carries them out and dispatches them once the borrow ends.

use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Unique identifier for a registered listener
pub type ListenerId = u64;

/// Callback invoked for every emitted event
pub type Listener<E> = Rc<dyn Fn(&E)>;

/// Ordered set of listeners for one event type
///
/// Registration goes through `&self` so a registry can be shared between an
/// emitter and the handles that subscribe to it.
pub struct Listeners<E> {
    entries: RefCell<IndexMap<ListenerId, Listener<E>>>,
    next_id: Cell<ListenerId>,
    held: RefCell<Option<Vec<E>>>,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Listeners<E> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(IndexMap::new()),
            next_id: Cell::new(1),
            held: RefCell::new(None),
        }
    }

    /// Registers a listener.
    ///
    /// Returns the id to pass to [`Listeners::off`].
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&E) + 'static,
    {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.entries.borrow_mut().insert(id, Rc::new(listener));
        id
    }

    /// Removes a listener.
    ///
    /// Returns true if it was registered. Removing an unknown id is a no-op.
    pub fn off(&self, id: ListenerId) -> bool {
        self.entries.borrow_mut().shift_remove(&id).is_some()
    }

    /// Starts holding emitted events instead of dispatching them.
    pub fn hold(&self) {
        self.held.borrow_mut().get_or_insert_with(Vec::new);
    }

    /// Stops holding and returns the events held so far, in emit order.
    pub fn release(&self) -> Vec<E> {
        self.held.borrow_mut().take().unwrap_or_default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Removes every listener.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl<E: Clone> Listeners<E> {
    /// Dispatches an event to every listener registered when the call starts.
    ///
    /// Listeners may register or remove listeners while being notified; the
    /// change applies from the next emit on. While held, the event is queued.
    pub fn emit(&self, event: &E) {
        if let Some(held) = self.held.borrow_mut().as_mut() {
            held.push(event.clone());
            return;
        }
        let snapshot: Vec<Listener<E>> = self.entries.borrow().values().cloned().collect();
        for listener in snapshot {
            listener(event);
        }
    }
}

/// Events taken out of held registries, waiting for dispatch
#[derive(Default)]
#[must_use = "held events are only dispatched by `flush`"]
pub struct Outbox {
    batches: Vec<Box<dyn FnOnce()>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release `listeners` and queue what it held.
    pub fn collect<E: Clone + 'static>(&mut self, listeners: &Rc<Listeners<E>>) {
        let events = listeners.release();
        if events.is_empty() {
            return;
        }
        let listeners = Rc::clone(listeners);
        self.batches.push(Box::new(move || {
            for event in &events {
                listeners.emit(event);
            }
        }));
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Dispatch everything, in collection order.
    pub fn flush(self) {
        for batch in self.batches {
            batch();
        }
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("batches", &self.batches.len())
            .finish()
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish()
    }
}
