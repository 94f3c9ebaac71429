//! Channel: typed publish/subscribe with removable subscriptions.
//!
//! Single-threaded by construction (`Rc`/`RefCell`). Listeners run
//! synchronously, in subscription order, against a snapshot of the listener
//! list taken when `emit` starts: a listener may subscribe or unsubscribe
//! while being called without disturbing the current delivery.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

type Listener<E, X> = Rc<dyn Fn(&E) -> Result<(), X>>;

struct Slots<E, X> {
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(u64, Listener<E, X>)>>,
}

trait Detach {
    fn detach(&self, id: u64) -> bool;
}

impl<E, X> Detach for Slots<E, X> {
    fn detach(&self, id: u64) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(slot, _)| *slot != id);
        listeners.len() != before
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A named event stream with a fixed payload type `E`.
///
/// Listeners may reject an event with an `X`. Rejection by one listener never
/// stops delivery to the others; `emit` reports the first rejection after
/// every listener has run.
pub struct Channel<E, X = Infallible> {
    slots: Rc<Slots<E, X>>,
}

impl<E: 'static, X: 'static> Channel<E, X> {
    pub fn new() -> Self {
        Self {
            slots: Rc::new(Slots {
                next_id: Cell::new(0),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Register a listener. The returned handle removes it again.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) -> Result<(), X> + 'static,
    {
        let id = self.slots.next_id.get();
        self.slots.next_id.set(id + 1);
        self.slots
            .listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));

        let slots: Rc<dyn Detach> = self.slots.clone();
        Subscription {
            slots: Rc::downgrade(&slots),
            id,
        }
    }

    /// Deliver `event` to every listener registered when the call began.
    pub fn emit(&self, event: &E) -> Result<(), X> {
        let snapshot: Vec<Listener<E, X>> = self
            .slots
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();

        trace!(listeners = snapshot.len(), "Channel emit");

        let mut first_err = None;
        for listener in snapshot {
            if let Err(err) = listener(event) {
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static, X: 'static> Default for Channel<E, X> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, X> Clone for Channel<E, X> {
    fn clone(&self) -> Self {
        Self {
            slots: Rc::clone(&self.slots),
        }
    }
}

impl<E, X> fmt::Debug for Channel<E, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("listeners", &self.slots.listeners.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle for one registered listener.
///
/// Dropping the handle leaves the listener attached; call `unsubscribe` to
/// remove it. Outliving the channel is harmless.
pub struct Subscription {
    slots: Weak<dyn Detach>,
    id: u64,
}

impl Subscription {
    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.slots.upgrade() {
            Some(slots) => slots.detach(self.id),
            None => false,
        }
    }

    /// Whether the channel this handle points into still exists.
    pub fn is_live(&self) -> bool {
        self.slots.strong_count() > 0
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}
