//! Store: versioned state container and reduce-cycle state machine.
//!
//! `READY → QUEUED → REDUCING → READY`. Invocations of bound actions park a
//! request on their registration and queue the store on its scheduler once.
//! A cycle first replays any history revisions (from undo/redo), then folds
//! every registration with pending requests, in position order, each commit
//! becoming a history entry. Subscribers hear about the result once per
//! cycle, and only if the visible state or the cursor changed.
//!
//! No `RefCell` borrow is held while user code (reducers, middleware,
//! subscribers) runs, so that code may read the store freely.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};
use tidemark_events::{AuditRecord, Channel, Revert, Subscription, Triggered};
use tracing::{debug, info, trace, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::action::{Action, Invocation};
use crate::error::{value_kind, EngineError, Result};
use crate::history::{Application, History, HistoryEntry};
use crate::merge::{merge, replacement};
use crate::middleware::{self, ReduceMeta};
use crate::registry::{PendingRequest, Registration, Strategy};
use crate::scheduler::Scheduler;
use crate::traits::{Middleware, Reducer};
use crate::State;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Ready,
    Queued,
    Reducing,
}

/// Delivered to subscribers: the state now visible and the one they saw
/// last.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub current: State,
    pub previous: State,
}

/// Construction options.
#[derive(TypedBuilder)]
pub struct StoreOptions {
    #[builder(default)]
    pub scheduler: Scheduler,
    #[builder(default = Value::Object(Map::new()))]
    pub initial_state: Value,
    #[builder(default = String::from("store"), setter(into))]
    pub name: String,
    #[builder(default)]
    pub middleware: Vec<Rc<dyn Middleware>>,
}

/// One entry of `Store::listen_to`.
pub struct Binding {
    pub action: Action,
    pub reducer: Option<Rc<dyn Reducer>>,
    pub strategy: Strategy,
}

impl Binding {
    pub fn new(action: &Action, reducer: impl Reducer + 'static) -> Self {
        Self {
            action: action.clone(),
            reducer: Some(Rc::new(reducer)),
            strategy: Strategy::default(),
        }
    }

    /// A binding with no reducer. Rejected by `listen_to`.
    pub fn bare(action: &Action) -> Self {
        Self {
            action: action.clone(),
            reducer: None,
            strategy: Strategy::default(),
        }
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
}

// ---------------------------------------------------------------------------
// StoreCore
// ---------------------------------------------------------------------------

pub(crate) struct StoreCore {
    id: Uuid,
    name: String,
    me: Weak<StoreCore>,
    scheduler: Scheduler,
    phase: Cell<Phase>,
    rerun: Cell<bool>,
    history: RefCell<History>,
    registry: RefCell<Vec<Registration>>,
    middleware: RefCell<Vec<Rc<dyn Middleware>>>,
    exports: RefCell<Map<String, Value>>,
    pending_revisions: RefCell<BTreeSet<usize>>,
    /// Cursor and state subscribers saw last.
    published: RefCell<(usize, State)>,
    changes: Channel<Change>,
    set_state: Action,
    replace_state: Action,
}

impl StoreCore {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    fn schedule(&self) {
        match self.phase.get() {
            Phase::Ready => {
                self.phase.set(Phase::Queued);
                self.scheduler.enqueue(self.me.clone());
                trace!(store = %self.id, "Store queued");
            }
            Phase::Queued => {}
            Phase::Reducing => self.rerun.set(true),
        }
    }

    /// Triggered-channel listener for the registration at `position`.
    fn accept(&self, position: usize, triggered: &Triggered) -> Result<()> {
        if self.phase.get() == Phase::Reducing {
            let action = self.registry.borrow()[position].action.name().to_string();
            warn!(
                store = %self.id,
                action = %action,
                token = triggered.token,
                "Circular invocation rejected"
            );
            return Err(EngineError::CircularInvocation {
                action,
                store: self.id,
            });
        }

        self.registry.borrow_mut()[position]
            .pending
            .push(PendingRequest {
                token: triggered.token,
                payload: triggered.payload.clone(),
            });
        self.schedule();
        Ok(())
    }

    pub(crate) fn run_cycle(&self) -> Result<()> {
        self.phase.set(Phase::Reducing);
        let outcome = self
            .apply_revisions()
            .and_then(|()| self.reduce_pending());
        self.phase.set(Phase::Ready);

        // Partial progress before a failure is still visible state.
        self.publish();

        let rerun = self.rerun.replace(false);
        if rerun || self.has_unfinished_work() {
            if outcome.is_err() {
                debug!(store = %self.id, "Requeued after failed cycle");
            }
            self.schedule();
        }
        outcome
    }

    /// Revisions or requests a failed cycle left behind.
    fn has_unfinished_work(&self) -> bool {
        !self.pending_revisions.borrow().is_empty()
            || self
                .registry
                .borrow()
                .iter()
                .any(Registration::has_pending)
    }

    /// Revise from the earliest pending index. A failed revision stays
    /// pending and is retried from the same index next cycle.
    fn apply_revisions(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.pending_revisions.borrow_mut());
        let Some(from) = pending.first().copied() else {
            return Ok(());
        };

        if let Err(err) = self.revise_history(from) {
            warn!(store = %self.id, from, error = %err, "History revision failed");
            self.pending_revisions.borrow_mut().insert(from);
            return Err(err);
        }
        Ok(())
    }

    /// Replay every entry from `from` on against its recomputed predecessor,
    /// overwriting snapshots in place.
    fn revise_history(&self, from: usize) -> Result<()> {
        let mut index = from.max(1);
        loop {
            let (predecessor, application) = {
                let history = self.history.borrow();
                let (Some(prev), Some(entry)) = (history.get(index - 1), history.get(index))
                else {
                    break;
                };
                (prev.state().clone(), entry.application().cloned())
            };

            let next = match application {
                Some(app) => self.replay(index, &predecessor, &app)?,
                None => predecessor,
            };
            self.history.borrow_mut().rewrite(index, next);
            index += 1;
        }

        debug!(store = %self.id, from, to = index, "History revised");
        Ok(())
    }

    fn replay(&self, index: usize, predecessor: &State, app: &Application) -> Result<State> {
        let (action, reducer) = self.reducer_at(app.position);
        let meta = ReduceMeta {
            store_id: self.id,
            action,
            position: app.position,
            token: None,
            history_index: index,
            revision: true,
        };

        let chain = self.middleware.borrow().clone();
        let mut exports = self.exports.take();
        let delta = middleware::run(
            &chain,
            reducer.as_ref(),
            predecessor,
            &app.payload,
            &meta,
            &mut exports,
            &mut |delta: State| -> Result<State> { Ok(delta) },
        );
        *self.exports.borrow_mut() = exports;

        Ok(merge(predecessor, &delta?))
    }

    /// Fold every registration with pending requests, in position order.
    /// Requests are taken from a registration only when it is reached, so
    /// a failure leaves later registrations untouched. The failing request
    /// is reported through the error; the ones selected after it go back.
    fn reduce_pending(&self) -> Result<()> {
        let positions: Vec<usize> = self
            .registry
            .borrow()
            .iter()
            .filter(|registration| registration.has_pending())
            .map(|registration| registration.position)
            .collect();

        for position in positions {
            let (strategy, requests) = {
                let mut registry = self.registry.borrow_mut();
                let registration = &mut registry[position];
                (
                    registration.strategy,
                    std::mem::take(&mut registration.pending),
                )
            };

            let received = requests.len();
            let selected = strategy.select(requests);
            trace!(
                store = %self.id,
                position,
                strategy = %strategy,
                received,
                applied = selected.len(),
                "Resolving registration"
            );

            let mut remaining = selected.into_iter();
            while let Some(request) = remaining.next() {
                if let Err(err) = self.resolve(position, request) {
                    self.return_pending(position, remaining.collect());
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Put unresolved requests back ahead of anything queued since.
    fn return_pending(&self, position: usize, mut requests: Vec<PendingRequest>) {
        if requests.is_empty() {
            return;
        }
        let mut registry = self.registry.borrow_mut();
        let pending = &mut registry[position].pending;
        debug!(
            store = %self.id,
            position,
            returned = requests.len(),
            "Requests returned after failure"
        );
        requests.append(pending);
        *pending = requests;
    }

    fn resolve(&self, position: usize, request: PendingRequest) -> Result<()> {
        let (action, reducer) = {
            let registry = self.registry.borrow();
            let registration = &registry[position];
            (registration.action.clone(), Rc::clone(&registration.reducer))
        };
        let canceled = action.is_canceled(request.token);
        let (state, index) = {
            let history = self.history.borrow();
            (history.current().state().clone(), history.cursor() + 1)
        };

        let guid = Uuid::new_v4();
        action.did_invoke(request.token, AuditRecord::new(self.id, index, guid));

        let meta = ReduceMeta {
            store_id: self.id,
            action: action.name().to_string(),
            position,
            token: Some(request.token),
            history_index: index,
            revision: false,
        };

        let chain = self.middleware.borrow().clone();
        let mut exports = self.exports.take();
        let mut commit =
            |delta: State| self.push_state(delta, guid, position, &request.payload, canceled);
        let result = middleware::run(
            &chain,
            reducer.as_ref(),
            &state,
            &request.payload,
            &meta,
            &mut exports,
            &mut commit,
        );
        *self.exports.borrow_mut() = exports;

        result.map(|_| ())
    }

    /// Terminal link of a fresh resolution: merge, and append unless the
    /// merge changed nothing.
    fn push_state(
        &self,
        delta: State,
        guid: Uuid,
        position: usize,
        payload: &Value,
        canceled: bool,
    ) -> Result<State> {
        let mut history = self.history.borrow_mut();
        let next = merge(history.current().state(), &delta);
        if &next == history.current().state() {
            trace!(store = %self.id, position, "Delta produced no change");
            return Ok(next);
        }

        let index = history.push(HistoryEntry::applied(
            guid,
            next.clone(),
            position,
            payload.clone(),
        ));

        if canceled {
            history.revert(index, guid);
            debug!(store = %self.id, index, "Canceled request committed and reverted");
            return Ok(history.current().state().clone());
        }

        debug!(store = %self.id, index, position, "State committed");
        Ok(next)
    }

    fn undo(&self, index: usize, guid: Uuid) -> bool {
        if !self.history.borrow_mut().revert(index, guid) {
            debug!(store = %self.id, index, %guid, "Undo ignored");
            return false;
        }
        self.pending_revisions.borrow_mut().insert(index);
        self.schedule();
        true
    }

    fn redo(&self, index: usize, guid: Uuid) -> bool {
        if !self.history.borrow_mut().restore(index, guid) {
            debug!(store = %self.id, index, %guid, "Redo ignored");
            return false;
        }
        self.pending_revisions.borrow_mut().insert(index + 1);
        self.schedule();
        true
    }

    fn undo_records(&self, revert: &Revert) {
        for record in revert.records_for(self.id) {
            self.undo(record.history_index, record.guid);
        }
    }

    fn redo_records(&self, revert: &Revert) {
        for record in revert.records_for(self.id) {
            self.redo(record.history_index, record.guid);
        }
    }

    fn reducer_at(&self, position: usize) -> (String, Rc<dyn Reducer>) {
        let registry = self.registry.borrow();
        let registration = &registry[position];
        (
            registration.action.name().to_string(),
            Rc::clone(&registration.reducer),
        )
    }

    /// Notify subscribers if the cursor or the visible state differs from
    /// what they saw last.
    fn publish(&self) {
        let (cursor, current) = {
            let history = self.history.borrow();
            (history.cursor(), history.current().state().clone())
        };
        let previous = {
            let published = self.published.borrow();
            if published.0 == cursor && published.1 == current {
                trace!(store = %self.id, "Nothing to publish");
                return;
            }
            published.1.clone()
        };
        *self.published.borrow_mut() = (cursor, current.clone());

        debug!(store = %self.id, cursor, "Publishing change");
        self.changes
            .emit(&Change { current, previous })
            .unwrap_or_else(|never| match never {});
    }
}

impl Drop for StoreCore {
    fn drop(&mut self) {
        for registration in self.registry.get_mut().drain(..) {
            for subscription in registration.subscriptions {
                subscription.unsubscribe();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to a store. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Store {
    core: Rc<StoreCore>,
}

impl Store {
    pub fn new(scheduler: &Scheduler, initial_state: Value) -> Result<Self> {
        Self::with_options(
            StoreOptions::builder()
                .scheduler(scheduler.clone())
                .initial_state(initial_state)
                .build(),
        )
    }

    pub fn with_options(options: StoreOptions) -> Result<Self> {
        let initial = expect_delta(options.initial_state)?;
        let noop = Action::new("noop")?;
        let set_state = Action::new("setState")?;
        let replace_state = Action::new("replaceState")?;

        let core = Rc::new_cyclic(|me| StoreCore {
            id: Uuid::new_v4(),
            name: options.name,
            me: me.clone(),
            scheduler: options.scheduler,
            phase: Cell::new(Phase::Ready),
            rerun: Cell::new(false),
            history: RefCell::new(History::new(initial.clone())),
            registry: RefCell::new(Vec::new()),
            middleware: RefCell::new(options.middleware),
            exports: RefCell::new(Map::new()),
            pending_revisions: RefCell::new(BTreeSet::new()),
            published: RefCell::new((0, initial)),
            changes: Channel::new(),
            set_state: set_state.clone(),
            replace_state: replace_state.clone(),
        });
        let store = Self { core };

        store.bind(&noop, Rc::new(noop_reducer), Strategy::Tail);
        store.bind(&set_state, Rc::new(set_state_reducer), Strategy::Compound);
        store.bind(&replace_state, Rc::new(replace_state_reducer), Strategy::Tail);

        debug!(store = %store.core.id, name = %store.core.name, "Store created");
        Ok(store)
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn phase(&self) -> Phase {
        self.core.phase.get()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.core.scheduler
    }

    // -- binding ------------------------------------------------------------

    /// Bind `action` to `reducer`. Binding an action already bound to this
    /// store is a no-op.
    pub fn when(
        &self,
        action: &Action,
        reducer: impl Reducer + 'static,
        strategy: Strategy,
    ) -> Result<()> {
        self.bind(action, Rc::new(reducer), strategy);
        Ok(())
    }

    /// Batch form of `when`. Every binding is validated before any is
    /// applied.
    pub fn listen_to(&self, bindings: impl IntoIterator<Item = Binding>) -> Result<()> {
        let bindings: Vec<Binding> = bindings.into_iter().collect();
        if let Some(bare) = bindings.iter().find(|binding| binding.reducer.is_none()) {
            return Err(EngineError::InvalidReducer {
                action: bare.action.name().to_string(),
            });
        }

        for binding in bindings {
            if let Some(reducer) = binding.reducer {
                self.bind(&binding.action, reducer, binding.strategy);
            }
        }
        Ok(())
    }

    fn bind(&self, action: &Action, reducer: Rc<dyn Reducer>, strategy: Strategy) {
        if self
            .core
            .registry
            .borrow()
            .iter()
            .any(|registration| registration.action.same(action))
        {
            debug!(store = %self.core.id, action = %action.name(), "Action already bound");
            return;
        }

        let position = self.core.registry.borrow().len();
        let channels = action.inner();
        let subscriptions = vec![
            {
                let store = Rc::downgrade(&self.core);
                channels.triggered.subscribe(move |triggered: &Triggered| {
                    match store.upgrade() {
                        Some(core) => core.accept(position, triggered),
                        None => Ok(()),
                    }
                })
            },
            {
                let store = Rc::downgrade(&self.core);
                channels.undo.subscribe(move |revert: &Revert| {
                    if let Some(core) = store.upgrade() {
                        core.undo_records(revert);
                    }
                    Ok(())
                })
            },
            {
                let store = Rc::downgrade(&self.core);
                channels.redo.subscribe(move |revert: &Revert| {
                    if let Some(core) = store.upgrade() {
                        core.redo_records(revert);
                    }
                    Ok(())
                })
            },
        ];

        self.core.registry.borrow_mut().push(Registration {
            action: action.clone(),
            position,
            reducer,
            strategy,
            pending: Vec::new(),
            subscriptions,
        });
        debug!(
            store = %self.core.id,
            action = %action.name(),
            position,
            strategy = %strategy,
            "Reducer bound"
        );
    }

    pub fn use_middleware(&self, middleware: impl Middleware + 'static) {
        self.core.middleware.borrow_mut().push(Rc::new(middleware));
    }

    // -- built-in actions ---------------------------------------------------

    /// Deep-merge `delta` into the state on the next cycle.
    pub fn set_state(&self, delta: Value) -> Result<Invocation> {
        let delta = expect_delta(delta)?;
        self.core.set_state.invoke(Value::Object(delta))
    }

    /// Replace the state wholesale on the next cycle.
    pub fn replace_state(&self, state: Value) -> Result<Invocation> {
        let state = expect_delta(state)?;
        self.core.replace_state.invoke(Value::Object(state))
    }

    /// Hard: drop everything but entry 0 and notify now. Soft: replace the
    /// state with the initial snapshot through a normal cycle.
    pub fn reset(&self, hard: bool) -> Result<()> {
        if !hard {
            return self
                .replace_state(Value::Object(self.initial_state()))
                .map(|_| ());
        }

        self.core.history.borrow_mut().truncate_to_initial();
        self.core.pending_revisions.borrow_mut().clear();
        info!(store = %self.core.id, "Hard reset");
        self.core.publish();
        Ok(())
    }

    // -- time travel --------------------------------------------------------

    /// Move the cursor to `index`, clamped to the last entry.
    pub fn goto(&self, index: i64) -> Result<()> {
        let index = checked_index(index)?;
        self.seek(index);
        Ok(())
    }

    pub fn fast_forward(&self, steps: i64) -> Result<()> {
        let steps = checked_index(steps)?;
        let target = self.index().saturating_add(steps);
        self.seek(target);
        Ok(())
    }

    pub fn rewind(&self, steps: i64) -> Result<()> {
        let steps = checked_index(steps)?;
        let target = self.index().saturating_sub(steps);
        self.seek(target);
        Ok(())
    }

    fn seek(&self, index: usize) {
        if self.core.history.borrow_mut().seek(index) {
            self.core.publish();
        }
    }

    /// Revert the entry at `index` if its guid matches and it is live.
    /// Later entries are recomputed on the next cycle.
    pub fn undo(&self, index: usize, guid: Uuid) -> bool {
        self.core.undo(index, guid)
    }

    /// Restore an entry reverted by `undo`.
    pub fn redo(&self, index: usize, guid: Uuid) -> bool {
        self.core.redo(index, guid)
    }

    // -- reads --------------------------------------------------------------

    pub fn state(&self) -> State {
        self.core.history.borrow().current().state().clone()
    }

    pub fn state_at(&self, index: usize) -> Option<State> {
        self.core
            .history
            .borrow()
            .get(index)
            .map(|entry| entry.state().clone())
    }

    pub fn initial_state(&self) -> State {
        self.core.history.borrow().initial().state().clone()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.core.history.borrow().entries().to_vec()
    }

    pub fn entry(&self, index: usize) -> Option<HistoryEntry> {
        self.core.history.borrow().get(index).cloned()
    }

    /// Number of history entries.
    pub fn depth(&self) -> usize {
        self.core.history.borrow().len()
    }

    /// Cursor position.
    pub fn index(&self) -> usize {
        self.core.history.borrow().cursor()
    }

    /// Bound action names, in position order (built-ins first).
    pub fn reducers(&self) -> Vec<String> {
        self.core
            .registry
            .borrow()
            .iter()
            .map(|registration| registration.action.name().to_string())
            .collect()
    }

    /// Listen for `(current, previous)` after each visible change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&State, &State) + 'static,
    {
        self.core.changes.subscribe(move |change: &Change| {
            listener(&change.current, &change.previous);
            Ok(())
        })
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("phase", &self.core.phase.get())
            .field("depth", &self.depth())
            .field("index", &self.index())
            .finish()
    }
}

fn expect_delta(value: Value) -> Result<State> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(EngineError::InvalidDelta {
            found: value_kind(&other),
        }),
    }
}

fn checked_index(index: i64) -> Result<usize> {
    usize::try_from(index).map_err(|_| EngineError::InvalidIndex { index })
}

fn noop_reducer(_state: &State, _payload: &Value) -> anyhow::Result<Value> {
    Ok(Value::Object(Map::new()))
}

fn set_state_reducer(_state: &State, payload: &Value) -> anyhow::Result<Value> {
    Ok(payload.clone())
}

fn replace_state_reducer(state: &State, payload: &Value) -> anyhow::Result<Value> {
    match payload.as_object() {
        Some(next) => Ok(Value::Object(replacement(state, next))),
        None => Ok(payload.clone()),
    }
}
