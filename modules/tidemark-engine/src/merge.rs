//! Deep merge of deltas into state snapshots.
//!
//! Rules, applied key by key:
//! - the string `"$unset"` deletes the key
//! - a key absent from the delta keeps its previous value
//! - two objects merge recursively
//! - anything else (including `null`) overwrites

use serde_json::{Map, Value};

use crate::State;

/// Sentinel value that deletes a key when merged.
pub const UNSET: &str = "$unset";

pub fn is_unset(value: &Value) -> bool {
    matches!(value, Value::String(s) if s == UNSET)
}

/// Merge `delta` into a copy of `base`.
pub fn merge(base: &State, delta: &State) -> State {
    let mut merged = base.clone();
    merge_into(&mut merged, delta);
    merged
}

fn merge_into(target: &mut Map<String, Value>, delta: &Map<String, Value>) {
    for (key, incoming) in delta {
        if is_unset(incoming) {
            target.remove(key);
            continue;
        }

        let Value::Object(nested) = incoming else {
            target.insert(key.clone(), incoming.clone());
            continue;
        };

        if let Some(Value::Object(existing)) = target.get_mut(key) {
            merge_into(existing, nested);
            continue;
        }

        // Fresh object: still strip any sentinels it carries.
        let mut fresh = Map::new();
        merge_into(&mut fresh, nested);
        target.insert(key.clone(), Value::Object(fresh));
    }
}

/// The delta that turns `current` into exactly `next` under `merge`.
///
/// Keys of `current` missing from `next` are marked with the unset sentinel,
/// recursively for objects present on both sides.
pub fn replacement(current: &State, next: &State) -> State {
    let mut delta = Map::new();

    for (key, value) in next {
        let entry = match (current.get(key), value) {
            (Some(Value::Object(old)), Value::Object(new)) => Value::Object(replacement(old, new)),
            _ => value.clone(),
        };
        delta.insert(key.clone(), entry);
    }

    for key in current.keys() {
        if !next.contains_key(key) {
            delta.insert(key.clone(), Value::String(UNSET.to_string()));
        }
    }

    delta
}
