//! Action: a named, invokable intent signal.
//!
//! Each invocation gets a fresh token and is broadcast synchronously to every
//! bound store. Stores report back one audit record per reducer invocation;
//! the action keeps them per token so `undo`/`redo` can be routed to the
//! right store and the right history slot later on.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tidemark_events::{AuditRecord, Channel, Revert, Token, Triggered};
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// Per-action options.
#[derive(Debug, Clone, Default, PartialEq, Eq, TypedBuilder)]
pub struct ActionConfig {
    /// Clear the whole audit cache every N invocations. Bounds memory at the
    /// cost of undo/redo for calls made before the clear.
    #[builder(default, setter(strip_option))]
    pub flush_frequency: Option<u64>,
}

impl From<&EngineConfig> for ActionConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            flush_frequency: config.flush_frequency,
        }
    }
}

pub(crate) struct ActionInner {
    name: String,
    config: ActionConfig,
    call_count: Cell<u64>,
    audits: RefCell<HashMap<Token, Vec<AuditRecord>>>,
    canceled: RefCell<HashSet<Token>>,
    pub(crate) triggered: Channel<Triggered, EngineError>,
    pub(crate) undo: Channel<Revert, EngineError>,
    pub(crate) redo: Channel<Revert, EngineError>,
}

/// Cheap to clone; clones share the counter, the audit cache and the
/// bound stores.
#[derive(Clone)]
pub struct Action {
    inner: Rc<ActionInner>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::with_config(name, ActionConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: ActionConfig) -> Result<Self> {
        let name = name.into();
        if !is_identifier(&name) {
            return Err(EngineError::InvalidAction { name });
        }

        Ok(Self {
            inner: Rc::new(ActionInner {
                name,
                config,
                call_count: Cell::new(0),
                audits: RefCell::new(HashMap::new()),
                canceled: RefCell::new(HashSet::new()),
                triggered: Channel::new(),
                undo: Channel::new(),
                redo: Channel::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn call_count(&self) -> u64 {
        self.inner.call_count.get()
    }

    pub fn config(&self) -> &ActionConfig {
        &self.inner.config
    }

    /// Invoke the action. Every bound store is told synchronously; the
    /// reduction itself happens on the stores' next reduce cycle.
    ///
    /// Always accepted when nothing is bound. Fails with
    /// `CircularInvocation` if a bound store is mid-cycle; stores that
    /// accepted the request keep it.
    pub fn invoke(&self, payload: Value) -> Result<Invocation> {
        let token = self.inner.call_count.get() + 1;
        self.inner.call_count.set(token);

        if let Some(every) = self.inner.config.flush_frequency.filter(|n| *n > 0) {
            if token % every == 0 {
                debug!(action = %self.inner.name, token, "Flush frequency reached, clearing audit cache");
                self.flush();
            }
        }

        trace!(action = %self.inner.name, token, "Action invoked");
        self.inner
            .triggered
            .emit(&Triggered::new(token, payload))?;

        Ok(Invocation {
            action: self.clone(),
            token,
        })
    }

    /// Called by a store right before it invokes a reducer for `token`.
    pub fn did_invoke(&self, token: Token, record: AuditRecord) {
        self.inner
            .audits
            .borrow_mut()
            .entry(token)
            .or_default()
            .push(record);
    }

    /// Audit records currently held for `token`.
    pub fn audit_records(&self, token: Token) -> Vec<AuditRecord> {
        self.inner
            .audits
            .borrow()
            .get(&token)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_canceled(&self, token: Token) -> bool {
        self.inner.canceled.borrow().contains(&token)
    }

    /// Revert every history entry this invocation produced, in every store
    /// that audited it.
    pub fn undo(&self, token: Token) -> Result<()> {
        self.broadcast(&self.inner.undo, token)
    }

    /// Restore what `undo` (or `cancel`) reverted. Also lifts a cancel that
    /// has not been resolved yet.
    pub fn redo(&self, token: Token) -> Result<()> {
        self.inner.canceled.borrow_mut().remove(&token);
        self.broadcast(&self.inner.redo, token)
    }

    fn broadcast(&self, channel: &Channel<Revert, EngineError>, token: Token) -> Result<()> {
        let revert = Revert::new(token, self.audit_records(token));
        if revert.is_empty() {
            trace!(action = %self.inner.name, token, "No audit records held for token");
            return Ok(());
        }
        channel.emit(&revert)
    }

    /// Mark a still-pending request as canceled: it will be committed and
    /// immediately reverted when resolved, keeping its history slot. Effects
    /// already committed are undone.
    pub fn cancel(&self, token: Token) -> Result<()> {
        self.inner.canceled.borrow_mut().insert(token);
        self.undo(token)
    }

    /// Forget every audit record and cancel mark. Handles issued so far
    /// become inert.
    pub fn flush(&self) {
        self.inner.audits.borrow_mut().clear();
        self.inner.canceled.borrow_mut().clear();
    }

    pub(crate) fn inner(&self) -> &ActionInner {
        &self.inner
    }

    pub fn same(&self, other: &Action) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.inner.name)
            .field("call_count", &self.inner.call_count.get())
            .field("bound_stores", &self.inner.triggered.len())
            .finish()
    }
}

/// Identifier with optional `.`, `:` and `-` namespace separators.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.' | ':' | '-'))
}

// ---------------------------------------------------------------------------
// Invocation handle
// ---------------------------------------------------------------------------

/// Returned by `Action::invoke`. Holds the token; does not resolve anything.
#[derive(Clone)]
pub struct Invocation {
    action: Action,
    token: Token,
}

impl Invocation {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn undo(&self) -> Result<()> {
        self.action.undo(self.token)
    }

    pub fn redo(&self) -> Result<()> {
        self.action.redo(self.token)
    }

    pub fn cancel(&self) -> Result<()> {
        self.action.cancel(self.token)
    }

    pub fn flush(&self) {
        self.action.flush()
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("action", &self.action.name())
            .field("token", &self.token)
            .finish()
    }
}
