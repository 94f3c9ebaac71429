//! Append-only history of state snapshots plus a cursor.
//!
//! Entry 0 is the initial state and survives everything except a hard
//! reset (which keeps only it). A reverted entry is an explicit tagged state
//! holding its pre-revert content, so a matching redo restores it exactly.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::State;

/// Position of the built-in pass-through reducer.
pub const NOOP_POSITION: usize = 0;

static NULL_PAYLOAD: Value = Value::Null;

/// Which reducer produced an entry, and with what payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Application {
    pub position: usize,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Provenance {
    Active(Application),
    Reverted {
        original_state: State,
        original: Application,
    },
}

/// One addressable snapshot plus the invocation that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    guid: Uuid,
    state: State,
    provenance: Provenance,
}

impl HistoryEntry {
    pub(crate) fn initial(state: State) -> Self {
        Self {
            guid: Uuid::new_v4(),
            state,
            provenance: Provenance::Active(Application {
                position: NOOP_POSITION,
                payload: Value::Null,
            }),
        }
    }

    pub(crate) fn applied(guid: Uuid, state: State, position: usize, payload: Value) -> Self {
        Self {
            guid,
            state,
            provenance: Provenance::Active(Application { position, payload }),
        }
    }

    pub fn guid(&self) -> Uuid {
        self.guid
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Reducer position this entry replays with. Reverted entries replay
    /// through the pass-through reducer.
    pub fn reducer_position(&self) -> usize {
        match &self.provenance {
            Provenance::Active(app) => app.position,
            Provenance::Reverted { .. } => NOOP_POSITION,
        }
    }

    pub fn payload(&self) -> &Value {
        match &self.provenance {
            Provenance::Active(app) => &app.payload,
            Provenance::Reverted { .. } => &NULL_PAYLOAD,
        }
    }

    pub fn is_reverted(&self) -> bool {
        matches!(self.provenance, Provenance::Reverted { .. })
    }

    /// The live application, if the entry is not reverted.
    pub fn application(&self) -> Option<&Application> {
        match &self.provenance {
            Provenance::Active(app) => Some(app),
            Provenance::Reverted { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Owned by a store; readers go through `Store`.
#[derive(Debug, Clone)]
pub(crate) struct History {
    entries: Vec<HistoryEntry>,
    cursor: usize,
}

impl History {
    pub fn new(initial: State) -> Self {
        Self {
            entries: vec![HistoryEntry::initial(initial)],
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    pub fn current(&self) -> &HistoryEntry {
        &self.entries[self.cursor]
    }

    pub fn initial(&self) -> &HistoryEntry {
        &self.entries[0]
    }

    /// Drop every entry after the cursor, append `entry`, and advance onto it.
    /// Returns the new entry's index.
    pub(crate) fn push(&mut self, entry: HistoryEntry) -> usize {
        self.entries.truncate(self.cursor + 1);
        self.entries.push(entry);
        self.cursor = self.entries.len() - 1;
        self.cursor
    }

    /// Replace the entry with a pass-through of its predecessor, keeping its
    /// content for a later `restore`. False if the guid does not match or the
    /// entry is already reverted.
    pub(crate) fn revert(&mut self, index: usize, guid: Uuid) -> bool {
        if index == 0 || index >= self.entries.len() {
            return false;
        }
        let predecessor = self.entries[index - 1].state.clone();
        let entry = &mut self.entries[index];
        if entry.guid != guid {
            return false;
        }
        let Provenance::Active(app) = &entry.provenance else {
            return false;
        };

        let original = app.clone();
        let original_state = std::mem::replace(&mut entry.state, predecessor);
        entry.provenance = Provenance::Reverted {
            original_state,
            original,
        };
        true
    }

    /// Undo a `revert`. False if the guid does not match or the entry is not
    /// reverted.
    pub(crate) fn restore(&mut self, index: usize, guid: Uuid) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        if entry.guid != guid {
            return false;
        }
        let Provenance::Reverted {
            original_state,
            original,
        } = &entry.provenance
        else {
            return false;
        };

        let state = original_state.clone();
        let restored = original.clone();
        entry.provenance = Provenance::Active(restored);
        entry.state = state;
        true
    }

    /// Overwrite a snapshot in place. Position, guid and cursor are untouched.
    pub(crate) fn rewrite(&mut self, index: usize, state: State) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.state = state;
        }
    }

    /// Move the cursor, clamped to the last entry. Returns whether it moved.
    pub(crate) fn seek(&mut self, index: usize) -> bool {
        let target = index.min(self.entries.len() - 1);
        let moved = target != self.cursor;
        self.cursor = target;
        moved
    }

    /// Keep only entry 0.
    pub(crate) fn truncate_to_initial(&mut self) {
        self.entries.truncate(1);
        self.cursor = 0;
    }
}
