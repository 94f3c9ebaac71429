//! Store reduce-cycle tests: batching, commit idempotence, strategies,
//! ordering, built-in actions, time travel and binding errors.
//! Everything runs on an explicit scheduler; no runtime needed.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use serde_json::{json, Value};
use tidemark_engine::{
    reducer_fn, Action, Binding, ChangeRecorder, ErrorKind, Phase, Scheduler, Store,
    StoreOptions, Strategy,
};

use common::{add_qty, init_tracing, obj, set_name};

fn cart(scheduler: &Scheduler) -> Result<Store> {
    Ok(Store::new(scheduler, json!({ "qty": 0 }))?)
}

// =========================================================================
// Batching and notification
// =========================================================================

#[test]
fn same_tick_set_states_collapse_into_one_notification() -> Result<()> {
    init_tracing();
    let scheduler = Scheduler::new();
    let store = Store::new(&scheduler, json!({}))?;
    let recorder = ChangeRecorder::attach(&store);

    store.set_state(json!({"a": 1}))?;
    store.set_state(json!({"a": 2}))?;
    store.set_state(json!({"b": 1}))?;

    assert!(recorder.is_empty(), "nothing is reduced before the tick");
    assert_eq!(store.phase(), Phase::Queued);
    assert_eq!(scheduler.pending(), 1, "queued once despite three calls");

    assert_eq!(scheduler.tick()?, 1);

    assert_eq!(recorder.len(), 1);
    let change = recorder.last().unwrap();
    assert_eq!(change.current, obj(json!({"a": 2, "b": 1})));
    assert_eq!(change.previous, obj(json!({})));
    assert_eq!(store.depth(), 4, "setState is compound: one entry per call");
    assert_eq!(store.phase(), Phase::Ready);
    Ok(())
}

#[test]
fn resubmitting_current_state_is_a_no_op() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = Store::new(&scheduler, json!({"a": 1, "b": {"c": 2}}))?;
    let recorder = ChangeRecorder::attach(&store);

    store.set_state(Value::Object(store.state()))?;
    scheduler.tick()?;

    assert_eq!(store.depth(), 1);
    assert_eq!(store.index(), 0);
    assert!(recorder.is_empty());
    Ok(())
}

#[test]
fn no_pending_requests_means_no_cycle_work() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = cart(&scheduler)?;
    let calls = Rc::new(RefCell::new(0));

    let idle = Action::new("idle")?;
    let counted = calls.clone();
    store.when(
        &idle,
        reducer_fn(move |_, _| {
            *counted.borrow_mut() += 1;
            Ok(json!({}))
        }),
        Strategy::Tail,
    )?;

    store.set_state(json!({"qty": 1}))?;
    scheduler.tick()?;

    assert_eq!(*calls.borrow(), 0);
    Ok(())
}

// =========================================================================
// Strategies
// =========================================================================

fn apply_three(strategy: Strategy) -> Result<(Store, Action)> {
    let scheduler = Scheduler::new();
    let store = cart(&scheduler)?;
    let add = Action::new("add")?;
    store.when(&add, add_qty(), strategy)?;

    add.invoke(json!(1))?;
    add.invoke(json!(2))?;
    add.invoke(json!(3))?;
    scheduler.tick()?;
    Ok((store, add))
}

#[test]
fn compound_applies_every_request_in_call_order() -> Result<()> {
    let (store, add) = apply_three(Strategy::Compound)?;

    assert_eq!(store.state(), obj(json!({"qty": 6})));
    assert_eq!(store.depth(), 4);
    for token in 1..=3 {
        let records = add.audit_records(token);
        assert_eq!(records.len(), 1, "token {token} audited once");
        assert_eq!(records[0].history_index, token as usize);
        assert_eq!(records[0].container_id, store.id());
        assert_eq!(
            store.entry(token as usize).unwrap().guid(),
            records[0].guid
        );
    }
    Ok(())
}

#[test]
fn tail_applies_only_the_last_request() -> Result<()> {
    let (store, add) = apply_three(Strategy::Tail)?;

    assert_eq!(store.state(), obj(json!({"qty": 3})));
    assert_eq!(store.depth(), 2);
    assert!(add.audit_records(1).is_empty(), "discarded requests are not audited");
    assert_eq!(add.audit_records(3).len(), 1);
    Ok(())
}

#[test]
fn head_applies_only_the_first_request() -> Result<()> {
    let (store, add) = apply_three(Strategy::Head)?;

    assert_eq!(store.state(), obj(json!({"qty": 1})));
    assert_eq!(store.depth(), 2);
    assert_eq!(add.audit_records(1).len(), 1);
    assert!(add.audit_records(2).is_empty());
    Ok(())
}

#[test]
fn unknown_strategy_name_behaves_as_tail() -> Result<()> {
    let (store, _) = apply_three(Strategy::parse("whatever"))?;
    assert_eq!(store.state(), obj(json!({"qty": 3})));
    Ok(())
}

// =========================================================================
// Ordering
// =========================================================================

#[test]
fn reducers_run_in_registration_order_not_call_order() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = Store::new(&scheduler, json!({}))?;
    let order = Rc::new(RefCell::new(Vec::new()));

    let first = Action::new("first")?;
    let second = Action::new("second")?;
    for (action, label) in [(&first, "first"), (&second, "second")] {
        let order = order.clone();
        store.when(
            action,
            reducer_fn(move |_, _| {
                order.borrow_mut().push(label);
                Ok(json!({ label: true }))
            }),
            Strategy::Tail,
        )?;
    }

    second.invoke(json!(null))?;
    first.invoke(json!(null))?;
    scheduler.tick()?;

    assert_eq!(*order.borrow(), vec!["first", "second"]);
    assert_eq!(store.state(), obj(json!({"first": true, "second": true})));
    Ok(())
}

#[test]
fn each_reducer_sees_the_previous_reducers_result() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = cart(&scheduler)?;
    let add = Action::new("add")?;
    let double = Action::new("double")?;
    store.when(&add, add_qty(), Strategy::Compound)?;
    store.when(
        &double,
        reducer_fn(|state, _| {
            let qty = state["qty"].as_i64().unwrap_or(0);
            Ok(json!({ "qty": qty * 2 }))
        }),
        Strategy::Tail,
    )?;

    double.invoke(json!(null))?;
    add.invoke(json!(5))?;
    scheduler.tick()?;

    assert_eq!(store.state(), obj(json!({"qty": 10})));
    Ok(())
}

// =========================================================================
// Binding
// =========================================================================

#[test]
fn builtin_reducers_occupy_the_first_positions() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = Store::new(&scheduler, json!({}))?;
    let add = Action::new("add")?;
    store.when(&add, add_qty(), Strategy::Compound)?;

    assert_eq!(
        store.reducers(),
        vec!["noop", "setState", "replaceState", "add"]
    );
    Ok(())
}

#[test]
fn rebinding_the_same_action_is_a_no_op() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = cart(&scheduler)?;
    let add = Action::new("add")?;
    store.when(&add, add_qty(), Strategy::Compound)?;
    store.when(&add, add_qty(), Strategy::Compound)?;

    assert_eq!(store.reducers().len(), 4);

    add.invoke(json!(2))?;
    scheduler.tick()?;
    assert_eq!(store.state(), obj(json!({"qty": 2})));
    Ok(())
}

#[test]
fn listen_to_binds_a_batch() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = cart(&scheduler)?;
    let add = Action::new("add")?;
    let rename = Action::new("rename")?;

    store.listen_to([
        Binding::new(&add, add_qty()).strategy(Strategy::Compound),
        Binding::new(&rename, set_name()),
    ])?;

    add.invoke(json!(1))?;
    add.invoke(json!(1))?;
    rename.invoke(json!("basket"))?;
    scheduler.tick()?;

    assert_eq!(store.state(), obj(json!({"qty": 2, "name": "basket"})));
    Ok(())
}

#[test]
fn listen_to_without_reducer_fails_and_binds_nothing() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = cart(&scheduler)?;
    let add = Action::new("add")?;
    let bare = Action::new("bare")?;

    let err = store
        .listen_to([Binding::new(&add, add_qty()), Binding::bare(&bare)])
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::INVALID_REDUCER);
    assert_eq!(store.reducers().len(), 3);
    Ok(())
}

#[test]
fn unbound_invocation_is_accepted() -> Result<()> {
    let lonely = Action::new("lonely")?;
    let handle = lonely.invoke(json!({"x": 1}))?;
    assert_eq!(handle.token(), 1);
    handle.undo()?;
    handle.redo()?;
    Ok(())
}

// =========================================================================
// Built-in actions and reset
// =========================================================================

#[test]
fn set_state_rejects_non_objects() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = cart(&scheduler)?;

    for bad in [json!(1), json!("x"), json!([1]), json!(null)] {
        let err = store.set_state(bad.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::INVALID_DELTA, "{bad}");
        let err = store.replace_state(bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::INVALID_DELTA);
    }
    assert!(scheduler.is_idle());
    Ok(())
}

#[test]
fn initial_state_must_be_an_object() {
    let scheduler = Scheduler::new();
    let err = Store::new(&scheduler, json!([1, 2])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::INVALID_DELTA);
}

#[test]
fn set_state_deep_merges_and_unsets() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = Store::new(&scheduler, json!({"user": {"name": "a", "age": 3}, "flag": true}))?;

    store.set_state(json!({"user": {"age": 4}, "flag": "$unset"}))?;
    scheduler.tick()?;

    assert_eq!(store.state(), obj(json!({"user": {"name": "a", "age": 4}})));
    Ok(())
}

#[test]
fn replace_state_drops_absent_keys() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = Store::new(&scheduler, json!({"a": 1, "b": {"x": 1, "y": 2}}))?;

    store.replace_state(json!({"b": {"x": 1}}))?;
    scheduler.tick()?;

    assert_eq!(store.state(), obj(json!({"b": {"x": 1}})));
    Ok(())
}

#[test]
fn replace_state_is_tail() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = Store::new(&scheduler, json!({}))?;

    store.replace_state(json!({"a": 1}))?;
    store.replace_state(json!({"b": 2}))?;
    scheduler.tick()?;

    assert_eq!(store.state(), obj(json!({"b": 2})));
    assert_eq!(store.depth(), 2);
    Ok(())
}

#[test]
fn soft_reset_goes_through_a_cycle() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = cart(&scheduler)?;
    store.set_state(json!({"qty": 4, "extra": 1}))?;
    scheduler.tick()?;

    store.reset(false)?;
    assert_eq!(store.state(), obj(json!({"qty": 4, "extra": 1})), "async");
    scheduler.tick()?;

    assert_eq!(store.state(), store.initial_state());
    assert_eq!(store.depth(), 3, "soft reset is a new entry");
    Ok(())
}

#[test]
fn hard_reset_truncates_and_notifies_immediately() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = cart(&scheduler)?;
    store.set_state(json!({"qty": 4}))?;
    store.set_state(json!({"qty": 5}))?;
    scheduler.tick()?;
    let recorder = ChangeRecorder::attach(&store);

    store.reset(true)?;

    assert_eq!(store.depth(), 1);
    assert_eq!(store.index(), 0);
    assert_eq!(recorder.len(), 1);
    let change = recorder.last().unwrap();
    assert_eq!(change.current, obj(json!({"qty": 0})));
    assert_eq!(change.previous, obj(json!({"qty": 5})));
    Ok(())
}

// =========================================================================
// Time travel
// =========================================================================

fn three_steps(scheduler: &Scheduler) -> Result<Store> {
    let store = cart(scheduler)?;
    for qty in 1..=3 {
        store.set_state(json!({ "qty": qty }))?;
        scheduler.tick()?;
    }
    Ok(store)
}

#[test]
fn rewind_and_fast_forward_clamp() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = three_steps(&scheduler)?;
    let recorder = ChangeRecorder::attach(&store);

    store.rewind(2)?;
    assert_eq!(store.index(), 1);
    assert_eq!(store.state(), obj(json!({"qty": 1})));

    store.rewind(10)?;
    assert_eq!(store.index(), 0);

    store.fast_forward(10)?;
    assert_eq!(store.index(), 3);
    store.fast_forward(1)?;
    assert_eq!(store.index(), 3);

    assert_eq!(recorder.len(), 3, "the clamped no-op move does not notify");
    assert_eq!(store.depth(), 4, "navigation never alters history");
    Ok(())
}

#[test]
fn goto_clamps_to_the_last_entry() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = three_steps(&scheduler)?;

    store.goto(1)?;
    assert_eq!(store.state(), obj(json!({"qty": 1})));

    store.goto(99)?;
    assert_eq!(store.index(), 3);
    Ok(())
}

#[test]
fn negative_indices_are_rejected() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = three_steps(&scheduler)?;

    for err in [
        store.goto(-1).unwrap_err(),
        store.fast_forward(-2).unwrap_err(),
        store.rewind(-3).unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::INVALID_INDEX);
    }
    assert_eq!(store.index(), 3);
    Ok(())
}

#[test]
fn committing_after_rewind_discards_the_future_branch() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = three_steps(&scheduler)?;

    store.goto(1)?;
    store.set_state(json!({"branch": true}))?;
    scheduler.tick()?;

    assert_eq!(store.depth(), 3);
    assert_eq!(store.index(), 2);
    assert_eq!(store.state(), obj(json!({"qty": 1, "branch": true})));
    Ok(())
}

#[test]
fn state_at_reads_any_entry() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = three_steps(&scheduler)?;

    assert_eq!(store.state_at(0), Some(obj(json!({"qty": 0}))));
    assert_eq!(store.state_at(2), Some(obj(json!({"qty": 2}))));
    assert_eq!(store.state_at(4), None);
    assert_eq!(store.history().len(), 4);
    Ok(())
}

// =========================================================================
// Reentrancy and multi-store fan-out
// =========================================================================

#[test]
fn invoking_a_bound_action_from_a_reducer_is_circular() -> Result<()> {
    init_tracing();
    let scheduler = Scheduler::new();
    let store = cart(&scheduler)?;
    let add = Action::new("add")?;
    let trigger = Action::new("trigger")?;
    store.when(&add, add_qty(), Strategy::Compound)?;

    let inner = add.clone();
    store.when(
        &trigger,
        reducer_fn(move |_, _| {
            inner.invoke(json!(1))?;
            Ok(json!({}))
        }),
        Strategy::Tail,
    )?;

    trigger.invoke(json!(null))?;
    let err = scheduler.tick().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CIRCULAR_INVOCATION);
    assert_eq!(store.phase(), Phase::Ready);
    assert_eq!(store.state(), obj(json!({"qty": 0})));

    // The store recovers for later ticks.
    add.invoke(json!(2))?;
    scheduler.tick()?;
    assert_eq!(store.state(), obj(json!({"qty": 2})));
    Ok(())
}

#[test]
fn reading_the_store_from_a_reducer_is_allowed() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = cart(&scheduler)?;
    let snapshot = Action::new("snapshot")?;

    let reader = store.clone();
    store.when(
        &snapshot,
        reducer_fn(move |_, _| Ok(json!({ "depth_seen": reader.depth() }))),
        Strategy::Tail,
    )?;

    snapshot.invoke(json!(null))?;
    scheduler.tick()?;
    assert_eq!(store.state()["depth_seen"], json!(1));
    Ok(())
}

#[test]
fn one_action_updates_each_store_independently() -> Result<()> {
    let scheduler = Scheduler::new();
    let left = cart(&scheduler)?;
    let right = Store::with_options(
        StoreOptions::builder()
            .scheduler(scheduler.clone())
            .initial_state(json!({"qty": 100}))
            .name("right")
            .build(),
    )?;
    let add = Action::new("add")?;
    left.when(&add, add_qty(), Strategy::Compound)?;
    right.when(&add, add_qty(), Strategy::Tail)?;

    add.invoke(json!(1))?;
    add.invoke(json!(2))?;
    assert_eq!(scheduler.tick()?, 2);

    assert_eq!(left.state(), obj(json!({"qty": 3})));
    assert_eq!(right.state(), obj(json!({"qty": 102})));
    assert_eq!(right.name(), "right");
    assert_eq!(add.audit_records(2).len(), 2, "one record per store");
    Ok(())
}

#[test]
fn a_failing_store_does_not_block_the_others() -> Result<()> {
    init_tracing();
    let scheduler = Scheduler::new();
    let broken = cart(&scheduler)?;
    let healthy = cart(&scheduler)?;
    let add = Action::new("add")?;

    broken.when(
        &add,
        reducer_fn(|_, _| anyhow::bail!("inventory service unavailable")),
        Strategy::Tail,
    )?;
    healthy.when(&add, add_qty(), Strategy::Tail)?;

    add.invoke(json!(4))?;
    let err = scheduler.tick().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Reducer);
    assert!(format!("{err:#}").contains("inventory service unavailable"));
    assert_eq!(broken.state(), obj(json!({"qty": 0})));
    assert_eq!(healthy.state(), obj(json!({"qty": 4})));
    Ok(())
}

#[test]
fn a_failing_reducer_keeps_later_registrations_pending() -> Result<()> {
    init_tracing();
    let scheduler = Scheduler::new();
    let store = cart(&scheduler)?;
    let boom = Action::new("boom")?;
    let add = Action::new("add")?;
    store.when(&boom, reducer_fn(|_, _| anyhow::bail!("boom")), Strategy::Tail)?;
    store.when(&add, add_qty(), Strategy::Compound)?;

    boom.invoke(json!(null))?;
    add.invoke(json!(7))?;
    assert!(scheduler.tick().is_err());
    assert_eq!(scheduler.pending(), 1, "the store requeues itself");

    scheduler.run_until_idle()?;
    assert_eq!(store.state(), obj(json!({"qty": 7})));
    assert_eq!(store.depth(), 2);
    Ok(())
}

#[test]
fn compound_requests_after_a_failure_are_kept() -> Result<()> {
    let scheduler = Scheduler::new();
    let store = cart(&scheduler)?;
    let add = Action::new("add")?;
    store.when(
        &add,
        reducer_fn(|state, payload| {
            let by = payload.as_i64().unwrap_or(0);
            if by < 0 {
                anyhow::bail!("negative quantity {by}");
            }
            let qty = state.get("qty").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!({ "qty": qty + by }))
        }),
        Strategy::Compound,
    )?;

    add.invoke(json!(1))?;
    add.invoke(json!(-1))?;
    add.invoke(json!(3))?;
    let err = scheduler.tick().unwrap_err();
    assert!(format!("{err:#}").contains("negative quantity"));
    assert_eq!(store.state(), obj(json!({"qty": 1})));

    scheduler.run_until_idle()?;
    assert_eq!(store.state(), obj(json!({"qty": 4})));
    assert_eq!(store.depth(), 3, "the failed request gets no entry");
    Ok(())
}
