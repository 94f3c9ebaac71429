//! Typed, single-threaded publish/subscribe plumbing shared by actions and stores.
//!
//! A `Channel<E>` carries exactly one payload type, so an action exposes one
//! channel per event kind (triggered, undo, redo) instead of dispatching on
//! string event names. Zero knowledge of reducers, history or scheduling.

pub mod channel;
pub mod types;

pub use channel::{Channel, Subscription};
pub use types::{AuditRecord, Revert, Token, Triggered};
