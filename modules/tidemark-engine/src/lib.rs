//! Reactive, versioned state container.
//!
//! Actions are named intent signals; stores bind reducers to them and keep
//! an append-only, index-addressable history of immutable snapshots. Every
//! invocation made before a scheduler tick is batched into one reduce cycle
//! per store and at most one change notification. Any single invocation can
//! later be undone or redone, rippling forward through the history of every
//! store that reduced it.
//!
//! Single-threaded by design: stores, actions and the scheduler are `Rc`
//! handles meant for one thread (or one `LocalSet`).

pub mod action;
pub mod config;
pub mod error;
pub mod history;
pub mod merge;
pub mod middleware;
pub mod recorder;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod traits;

/// A state snapshot: a plain JSON object.
pub type State = serde_json::Map<String, serde_json::Value>;

pub use action::{Action, ActionConfig, Invocation};
pub use config::{load_config, EngineConfig};
pub use error::{EngineError, ErrorKind, Result};
pub use history::{Application, HistoryEntry, Provenance, NOOP_POSITION};
pub use merge::UNSET;
pub use middleware::{ErrorBoundary, Link, ReduceMeta, TraceLogger};
pub use recorder::ChangeRecorder;
pub use registry::Strategy;
pub use scheduler::Scheduler;
pub use store::{Binding, Change, Phase, Store, StoreOptions};
pub use traits::{middleware_fn, reducer_fn, Middleware, Reducer};
pub use tidemark_events::{AuditRecord, Subscription, Token};
