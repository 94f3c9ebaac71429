//! The batch boundary.
//!
//! Stores do not reduce when an action fires; they enqueue themselves here
//! (once per cycle) and reduce when the scheduler ticks. Everything invoked
//! before a tick is visible to that tick, so a tick is the "next tick" edge
//! that batches same-task invocations into one cycle per store.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use tokio::sync::Notify;
use tracing::{debug, error};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::store::StoreCore;

struct SchedulerInner {
    queue: RefCell<VecDeque<Weak<StoreCore>>>,
    wake: Notify,
    max_ticks: usize,
}

/// Single-threaded work queue of stores waiting for a reduce cycle.
/// Cheap to clone; clones share the queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_max_ticks(crate::config::DEFAULT_MAX_TICKS)
    }

    pub fn with_config(config: &EngineConfig) -> Result<Self> {
        if config.max_ticks == 0 {
            return Err(EngineError::Config("max_ticks must be at least 1".into()));
        }
        Ok(Self::with_max_ticks(config.max_ticks))
    }

    fn with_max_ticks(max_ticks: usize) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                queue: RefCell::new(VecDeque::new()),
                wake: Notify::new(),
                max_ticks,
            }),
        }
    }

    pub(crate) fn enqueue(&self, store: Weak<StoreCore>) {
        self.inner.queue.borrow_mut().push_back(store);
        self.inner.wake.notify_one();
    }

    /// Number of stores waiting for a cycle.
    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Run one reduce cycle for every store queued before this call. Stores
    /// queued while the tick runs wait for the next one.
    ///
    /// Each store runs even if an earlier one failed. The first failure is
    /// returned; later ones are logged. Returns the number of cycles run.
    pub fn tick(&self) -> Result<usize> {
        let batch: Vec<Weak<StoreCore>> = self.inner.queue.borrow_mut().drain(..).collect();

        let mut ran = 0;
        let mut first_err = None;
        for store in batch {
            // Dropped while queued.
            let Some(store) = store.upgrade() else {
                continue;
            };
            ran += 1;
            if let Err(err) = store.run_cycle() {
                if first_err.is_none() {
                    first_err = Some(err);
                } else {
                    error!(store = %store.id(), error = %err, "Reduce cycle failed");
                }
            }
        }

        debug!(cycles = ran, "Tick complete");
        match first_err {
            Some(err) => Err(err),
            None => Ok(ran),
        }
    }

    /// Tick until no store is queued. Fails with `Unsettled` if stores keep
    /// re-queueing each other past the configured bound.
    pub fn run_until_idle(&self) -> Result<usize> {
        let mut total = 0;
        for _ in 0..self.inner.max_ticks {
            if self.is_idle() {
                return Ok(total);
            }
            total += self.tick()?;
        }

        if self.is_idle() {
            Ok(total)
        } else {
            Err(EngineError::Unsettled {
                ticks: self.inner.max_ticks,
            })
        }
    }

    /// Async driver: wait for work, then settle it. Returns on the first
    /// failing cycle. Run it on a `LocalSet`; the scheduler is not `Send`.
    pub async fn run(&self) -> Result<()> {
        loop {
            self.inner.wake.notified().await;
            self.run_until_idle()?;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("max_ticks", &self.inner.max_ticks)
            .finish()
    }
}
