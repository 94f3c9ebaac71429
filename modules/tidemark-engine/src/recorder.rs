//! ChangeRecorder: in-memory subscriber that keeps every notification.
//! Used by tests and by callers that want to assert on what a store
//! published.

use std::cell::RefCell;
use std::rc::Rc;

use tidemark_events::Subscription;

use crate::store::{Change, Store};

pub struct ChangeRecorder {
    changes: Rc<RefCell<Vec<Change>>>,
    subscription: Subscription,
}

impl ChangeRecorder {
    pub fn attach(store: &Store) -> Self {
        let changes = Rc::new(RefCell::new(Vec::new()));
        let sink = changes.clone();
        let subscription = store.subscribe(move |current, previous| {
            sink.borrow_mut().push(Change {
                current: current.clone(),
                previous: previous.clone(),
            });
        });
        Self {
            changes,
            subscription,
        }
    }

    /// Every change recorded so far (for test assertions).
    pub fn changes(&self) -> Vec<Change> {
        self.changes.borrow().clone()
    }

    pub fn last(&self) -> Option<Change> {
        self.changes.borrow().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.changes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.changes.borrow_mut().clear();
    }

    /// Stop recording. Returns what was recorded.
    pub fn detach(self) -> Vec<Change> {
        self.subscription.unsubscribe();
        self.changes.take()
    }
}
