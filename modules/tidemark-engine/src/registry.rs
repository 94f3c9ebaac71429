//! Reducer registrations and resolution strategies.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidemark_events::{Subscription, Token};

use crate::action::Action;
use crate::traits::Reducer;

/// Which of a registration's pending requests a reduce cycle applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// First-arrived request only.
    Head,
    /// Last-arrived request only.
    #[default]
    Tail,
    /// Every request, in arrival order, each with its own history entry.
    Compound,
}

impl Strategy {
    /// Case-insensitive. Unrecognized names resolve to `Tail`.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "head" => Strategy::Head,
            "compound" => Strategy::Compound,
            _ => Strategy::Tail,
        }
    }

    /// Pick the requests to apply; the rest are discarded for good.
    pub(crate) fn select(self, mut requests: Vec<PendingRequest>) -> Vec<PendingRequest> {
        match self {
            Strategy::Compound => requests,
            Strategy::Head => {
                requests.truncate(1);
                requests
            }
            Strategy::Tail => requests.pop().into_iter().collect(),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Head => write!(f, "head"),
            Strategy::Tail => write!(f, "tail"),
            Strategy::Compound => write!(f, "compound"),
        }
    }
}

/// One invocation waiting for the next reduce cycle.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingRequest {
    pub token: Token,
    pub payload: Value,
}

/// An action bound to a store. `position` is assigned at bind time and is
/// never reused; it orders reducers within a cycle.
pub(crate) struct Registration {
    pub action: Action,
    pub position: usize,
    pub reducer: Rc<dyn Reducer>,
    pub strategy: Strategy,
    pub pending: Vec<PendingRequest>,
    pub subscriptions: Vec<Subscription>,
}

impl Registration {
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
