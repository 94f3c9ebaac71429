//! Middleware pipeline wrapped around every reducer resolution.
//!
//! The chain runs outermost-first. The innermost "previous" value is the
//! reducer's delta, computed lazily on first `payload()` call. The terminal
//! link is either the commit into history (a fresh invocation) or a plain
//! pass-through (a history revision, which must not re-run commit
//! bookkeeping). Every value handed to `next` must be an object.

use std::rc::Rc;

use serde::Serialize;
use serde_json::{Map, Value};
use tidemark_events::Token;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{value_kind, EngineError, Result};
use crate::traits::{Middleware, Reducer};
use crate::State;

/// What is being resolved. Handed to every link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReduceMeta {
    pub store_id: Uuid,
    pub action: String,
    pub position: usize,
    /// `None` during revisions: the entry is replayed, not invoked.
    pub token: Option<Token>,
    pub history_index: usize,
    pub revision: bool,
}

enum Pending<'a> {
    Reduce {
        reducer: &'a dyn Reducer,
        state: &'a State,
        payload: &'a Value,
    },
    Ready(Value),
}

/// A middleware's view of the chain: the value so far, the rest of the
/// chain, and the store-wide shared exports map.
pub struct Link<'a> {
    pending: Pending<'a>,
    rest: &'a [Rc<dyn Middleware>],
    terminal: &'a mut dyn FnMut(State) -> Result<State>,
    meta: &'a ReduceMeta,
    exports: &'a mut Map<String, Value>,
}

impl<'a> Link<'a> {
    pub fn meta(&self) -> &ReduceMeta {
        self.meta
    }

    /// Scratch space shared by every middleware of the store, kept across
    /// cycles.
    pub fn exports(&mut self) -> &mut Map<String, Value> {
        &mut *self.exports
    }

    /// The value so far. The first call on the outermost link runs the
    /// reducer; later calls return the cached result.
    pub fn payload(&mut self) -> Result<Value> {
        let delta = match &self.pending {
            Pending::Ready(value) => return Ok(value.clone()),
            Pending::Reduce {
                reducer,
                state,
                payload,
            } => reducer.reduce(state, payload).map_err(|err| {
                err.context(format!("reducer for {} failed", self.meta.action))
            })?,
        };
        self.pending = Pending::Ready(delta.clone());
        Ok(delta)
    }

    /// Hand `value` to the rest of the chain.
    pub fn next(self, value: Value) -> Result<Value> {
        let delta = expect_object(value, &self.meta.action)?;
        Link {
            pending: Pending::Ready(Value::Object(delta)),
            ..self
        }
        .dispatch()
    }

    /// `next(payload())`: pass the value through unchanged.
    pub fn forward(mut self) -> Result<Value> {
        let value = self.payload()?;
        self.next(value)
    }

    fn dispatch(mut self) -> Result<Value> {
        let rest: &'a [Rc<dyn Middleware>] = self.rest;
        match rest.split_first() {
            Some((head, tail)) => head.handle(Link { rest: tail, ..self }),
            None => {
                let value = self.payload()?;
                let delta = expect_object(value, &self.meta.action)?;
                (self.terminal)(delta).map(Value::Object)
            }
        }
    }
}

/// Run one resolution through `chain` and into `terminal`.
pub(crate) fn run<'a>(
    chain: &'a [Rc<dyn Middleware>],
    reducer: &'a dyn Reducer,
    state: &'a State,
    payload: &'a Value,
    meta: &'a ReduceMeta,
    exports: &'a mut Map<String, Value>,
    terminal: &'a mut dyn FnMut(State) -> Result<State>,
) -> Result<State> {
    let link = Link {
        pending: Pending::Reduce {
            reducer,
            state,
            payload,
        },
        rest: chain,
        terminal,
        meta,
        exports,
    };
    let value = link.dispatch()?;
    expect_object(value, &meta.action)
}

pub(crate) fn expect_object(value: Value, action: &str) -> Result<State> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(EngineError::InvalidReturn {
            action: action.to_string(),
            found: value_kind(&other),
        }),
    }
}

// ---------------------------------------------------------------------------
// Built-in middleware
// ---------------------------------------------------------------------------

/// Traps every error raised further down the chain (reducers, inner
/// middleware, commit). Install it first. A trapped resolution yields an
/// empty delta and commits nothing.
pub struct ErrorBoundary {
    report: Box<dyn Fn(&EngineError, &ReduceMeta)>,
}

impl ErrorBoundary {
    pub fn new<F>(report: F) -> Self
    where
        F: Fn(&EngineError, &ReduceMeta) + 'static,
    {
        Self {
            report: Box::new(report),
        }
    }

    /// Trap and log only.
    pub fn logging() -> Self {
        Self::new(|_, _| {})
    }
}

impl Middleware for ErrorBoundary {
    fn handle(&self, link: Link<'_>) -> Result<Value> {
        let meta = link.meta().clone();
        match link.forward() {
            Ok(value) => Ok(value),
            Err(err) => {
                error!(
                    store = %meta.store_id,
                    action = %meta.action,
                    revision = meta.revision,
                    error = %err,
                    "Reducer chain failed, trapped by error boundary"
                );
                (self.report)(&err, &meta);
                Ok(Value::Object(Map::new()))
            }
        }
    }
}

/// Logs every resolution at debug level.
pub struct TraceLogger;

impl Middleware for TraceLogger {
    fn handle(&self, mut link: Link<'_>) -> Result<Value> {
        let meta = link.meta().clone();
        let delta = link.payload()?;
        debug!(
            store = %meta.store_id,
            action = %meta.action,
            position = meta.position,
            token = ?meta.token,
            history_index = meta.history_index,
            revision = meta.revision,
            delta = %delta,
            "Resolving reducer"
        );
        link.next(delta)
    }
}
