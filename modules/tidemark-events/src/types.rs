//! Payloads carried on an action's channels. Domain-agnostic.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-action invocation number. Strictly increasing, starts at 1.
pub type Token = u64;

/// Emitted once per invocation, synchronously, to every bound store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triggered {
    pub token: Token,
    pub payload: serde_json::Value,
}

impl Triggered {
    pub fn new(token: Token, payload: serde_json::Value) -> Self {
        Self { token, payload }
    }
}

/// Proof that a container invoked a reducer for a token, and which history
/// slot that invocation was headed for.
///
/// The guid, not the index, identifies the slot: indices shift when history
/// is branched or reset, guids do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditRecord {
    pub container_id: Uuid,
    pub history_index: usize,
    pub guid: Uuid,
}

impl AuditRecord {
    pub fn new(container_id: Uuid, history_index: usize, guid: Uuid) -> Self {
        Self {
            container_id,
            history_index,
            guid,
        }
    }

    pub fn belongs_to(&self, container_id: Uuid) -> bool {
        self.container_id == container_id
    }
}

/// Carried by undo and redo: the token plus every audit record the action
/// holds for it. Each store picks out its own records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revert {
    pub token: Token,
    pub records: Vec<AuditRecord>,
}

impl Revert {
    pub fn new(token: Token, records: Vec<AuditRecord>) -> Self {
        Self { token, records }
    }

    /// Records addressed to one container, in the order they were audited.
    pub fn records_for(&self, container_id: Uuid) -> impl Iterator<Item = &AuditRecord> {
        self.records
            .iter()
            .filter(move |record| record.belongs_to(container_id))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
