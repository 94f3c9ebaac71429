//! Core traits for the engine.

use serde_json::Value;

use crate::error::Result;
use crate::middleware::Link;
use crate::State;

/// Pure state transformer bound to an action.
///
/// Receives the state the invocation is applied to and the invocation's
/// payload; returns a delta that is deep-merged into that state. The delta
/// must be an object. Must be deterministic: revisions re-run reducers
/// against recomputed predecessors.
pub trait Reducer {
    fn reduce(&self, state: &State, payload: &Value) -> anyhow::Result<Value>;
}

impl<F> Reducer for F
where
    F: Fn(&State, &Value) -> anyhow::Result<Value>,
{
    fn reduce(&self, state: &State, payload: &Value) -> anyhow::Result<Value> {
        self(state, payload)
    }
}

/// One link in the chain wrapped around every reducer resolution.
///
/// A link decides whether and how to continue: `link.forward()` resolves the
/// delta so far and hands it on unchanged; `link.payload()` plus
/// `link.next(value)` lets the link rewrite it; returning without calling
/// `next` short-circuits the rest of the chain, including the commit.
pub trait Middleware {
    fn handle(&self, link: Link<'_>) -> Result<Value>;
}

impl<F> Middleware for F
where
    F: Fn(Link<'_>) -> Result<Value>,
{
    fn handle(&self, link: Link<'_>) -> Result<Value> {
        self(link)
    }
}

/// Pins a closure to the reducer signature so its argument and error types
/// are inferred: `reducer_fn(|state, payload| Ok(json!({})))`.
pub fn reducer_fn<F>(f: F) -> F
where
    F: Fn(&State, &Value) -> anyhow::Result<Value>,
{
    f
}

/// Same as `reducer_fn`, for middleware closures.
pub fn middleware_fn<F>(f: F) -> F
where
    F: Fn(Link<'_>) -> Result<Value>,
{
    f
}
