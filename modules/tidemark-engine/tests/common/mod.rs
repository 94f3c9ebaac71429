//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use tidemark_engine::{reducer_fn, Reducer, State};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn obj(value: Value) -> State {
    value
        .as_object()
        .cloned()
        .expect("fixture must be a JSON object")
}

/// `qty += payload`
pub fn add_qty() -> impl Reducer {
    reducer_fn(|state, payload| {
        let qty = state.get("qty").and_then(Value::as_i64).unwrap_or(0);
        let by = payload.as_i64().unwrap_or(0);
        Ok(json!({ "qty": qty + by }))
    })
}

/// `name = payload`
pub fn set_name() -> impl Reducer {
    reducer_fn(|_state, payload| Ok(json!({ "name": payload })))
}
