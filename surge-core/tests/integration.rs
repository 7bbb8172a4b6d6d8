//! Integration Tests
//!
//! These tests drive the store, dispatcher, state proxies and scheduler
//! together through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use surge_core::action::PipelineOptions;
use surge_core::error::BoxError;
use surge_core::{
    ActionContext, Capability, ChunkOptions, Config, ManualHost, Priority, StateError, StateProxy,
    Store, StoreConfig, WriteOutcome,
};

fn ok() -> Result<(), BoxError> {
    Ok(())
}

fn store() -> (Store, Arc<ManualHost>) {
    let host = Arc::new(ManualHost::new());
    (Store::new(Config::default(), host.clone()), host)
}

fn unbatched_store() -> Store {
    let config = Config {
        store: StoreConfig {
            batch_updates: false,
            ..StoreConfig::default()
        },
        ..Config::default()
    };
    Store::new(config, Arc::new(ManualHost::new()))
}

/// Reading right after creation returns the initial value.
#[test]
fn created_signal_reads_back() {
    let (store, _host) = store();
    store.signals().create_signal("name", json!("ada")).unwrap();
    assert_eq!(store.signals().get("name").unwrap(), json!("ada"));
}

/// Derived values are up to date synchronously, before any flush.
#[test]
fn derived_signal_is_current_without_flushing() {
    let (store, host) = store();
    let signals = store.signals();
    signals.create_signal("a", json!(1)).unwrap();
    signals.create_signal("b", json!(10)).unwrap();
    signals
        .create_derived("sum", &["a", "b"], |v| {
            json!(v[0].as_i64().unwrap_or(0) + v[1].as_i64().unwrap_or(0))
        })
        .unwrap();

    signals.set("a", json!(5)).unwrap();

    assert_eq!(signals.get("sum").unwrap(), json!(15));
    assert_eq!(host.pending_microtasks(), 1);
}

/// Two writes in one tick produce one notification with the net change.
#[test]
fn batched_writes_coalesce_per_tick() {
    let (store, host) = store();
    let signals = store.signals();
    signals.create_signal("x", json!(0)).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let _sub = signals
        .watch("x", move |new, old| log.lock().push((new.clone(), old.clone())))
        .unwrap();

    signals.set("x", json!(1)).unwrap();
    signals.set("x", json!(2)).unwrap();
    assert!(seen.lock().is_empty());

    host.run_microtasks();
    assert_eq!(*seen.lock(), vec![(json!(2), json!(0))]);

    // The next tick starts clean.
    signals.set("x", json!(3)).unwrap();
    host.run_microtasks();
    assert_eq!(seen.lock().last(), Some(&(json!(3), json!(2))));
}

/// Writing the current value never notifies.
#[test]
fn equal_write_is_silent() {
    let store = unbatched_store();
    let signals = store.signals();
    signals.create_signal("x", json!({"k": [1, 2]})).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    signals
        .watch("x", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
        .detach();

    let epoch = signals.epoch("x").unwrap();
    signals.set("x", json!({"k": [1, 2]})).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(signals.epoch("x").unwrap(), epoch);
}

/// An unregistered action does not wedge the queue.
#[tokio::test]
async fn unregistered_action_does_not_block_the_queue() {
    let store = unbatched_store();
    store.signals().create_signal("hits", json!(0)).unwrap();
    store.actions().register_action(
        "U",
        |ctx: ActionContext| async move {
            let signals = ctx.signals().ok_or("missing signal capability")?;
            signals.update("hits", |v| json!(v.as_i64().unwrap_or(0) + 1))?;
            ok()
        },
        PipelineOptions::new().capability(Capability::Signals),
    );

    store.actions().trigger("T", json!(1));
    store.actions().trigger("U", json!(2));
    store.actions().settled().await;

    assert_eq!(store.signals().get("hits").unwrap(), json!(1));
}

/// A false guard skips only its own pipeline.
#[tokio::test]
async fn guard_skips_only_its_pipeline() {
    let (store, _host) = store();
    let log = Arc::new(Mutex::new(Vec::new()));

    let first = log.clone();
    let first_effect = log.clone();
    store.actions().register_action(
        "save",
        move |_| {
            let log = first.clone();
            async move {
                log.lock().push("guarded handler");
                ok()
            }
        },
        PipelineOptions::new().guard(|_| false).side_effect(move |_| {
            let log = first_effect.clone();
            async move {
                log.lock().push("guarded effect");
                ok()
            }
        }),
    );
    let second = log.clone();
    store.actions().register_action(
        "save",
        move |_| {
            let log = second.clone();
            async move {
                log.lock().push("open handler");
                ok()
            }
        },
        PipelineOptions::new(),
    );

    store.actions().trigger("save", Value::Null);
    store.actions().settled().await;

    assert_eq!(*log.lock(), vec!["open handler"]);
}

/// A failed transaction restores every key and hands back the error.
#[test]
fn failed_transaction_restores_state() {
    let proxy = StateProxy::new(json!({"a": 0, "b": 0})).unwrap();

    let result = proxy.transaction(|state| -> Result<(), BoxError> {
        state.set("a", json!(1))?;
        state.set("b", json!(2))?;
        Err("x".into())
    });

    assert_eq!(result.unwrap_err().to_string(), "x");
    assert_eq!(proxy.to_value(), json!({"a": 0, "b": 0}));
}

/// Immutable proxies reject nested writes but accept root-level ones.
#[test]
fn immutable_proxy_allows_root_reassignment() {
    let proxy = StateProxy::new(json!({"immutable": true, "nested": {"x": 0}})).unwrap();

    assert!(matches!(
        proxy.set("nested.x", json!(1)),
        Err(StateError::ImmutabilityViolation { .. })
    ));
    assert_eq!(
        proxy.set("nested", json!({"x": 1})).unwrap(),
        WriteOutcome::Applied
    );
}

/// Undo after three writes lands on the second; redo returns to the third.
#[test]
fn undo_redo_over_three_writes() {
    let (store, _host) = store();
    let proxy = store.state(json!({"step": 0})).build().unwrap();
    for step in 1..=3 {
        proxy.set("step", json!(step)).unwrap();
    }

    proxy.undo().unwrap();
    assert_eq!(proxy.get("step"), Some(json!(2)));
    proxy.redo().unwrap();
    assert_eq!(proxy.get("step"), Some(json!(3)));
}

/// Validators gate writes by field.
#[test]
fn email_validator_gates_writes() {
    let proxy = StateProxy::builder(json!({"email": ""}))
        .validator("email", |v| match v.as_str() {
            Some(s) if s.contains('@') => Ok(()),
            _ => Err("email must contain @".into()),
        })
        .build()
        .unwrap();

    assert_eq!(
        proxy.set("email", json!("bad")).unwrap(),
        WriteOutcome::Rejected {
            message: "email must contain @".into()
        }
    );
    assert_eq!(proxy.get("email"), Some(json!("")));

    assert!(proxy.set("email", json!("a@b.com")).unwrap().is_applied());
    assert_eq!(proxy.get("email"), Some(json!("a@b.com")));
}

/// One input task beats a thousand idle ones into the first pass.
#[test]
fn input_task_runs_in_first_pass() {
    let (store, host) = store();
    let scheduler = store.scheduler();
    let input_done = Arc::new(AtomicUsize::new(0));

    for _ in 0..1000 {
        let clock = host.clone();
        scheduler.schedule(move || clock.advance(Duration::from_micros(50)), Priority::Idle);
    }
    let done = input_done.clone();
    scheduler.schedule(
        move || {
            done.fetch_add(1, Ordering::SeqCst);
        },
        Priority::Input,
    );

    host.run_frame();

    assert_eq!(input_done.load(Ordering::SeqCst), 1);
    assert!(scheduler.pending(Priority::Idle) > 0);
    assert_eq!(scheduler.pending(Priority::Input), 0);

    let frames = host.run_frames(100);
    assert!(frames > 1);
    assert!(scheduler.is_idle());
    assert_eq!(scheduler.stats().tasks_run, 1001);
}

/// Chunked work reports cumulative progress and completes once.
#[test]
fn chunk_task_reports_progress() {
    let (store, host) = store();
    let progress = Arc::new(Mutex::new(Vec::new()));
    let completions = Arc::new(AtomicUsize::new(0));

    let log = progress.clone();
    let done = completions.clone();
    store.scheduler().chunk_task(
        (0..250).collect::<Vec<u32>>(),
        |_| {},
        ChunkOptions::new()
            .chunk_size(100)
            .on_progress(move |processed, _| log.lock().push(processed))
            .on_complete(move || {
                done.fetch_add(1, Ordering::SeqCst);
            }),
    );

    host.run_frames(10);

    assert_eq!(*progress.lock(), vec![100, 200, 250]);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

/// Actions write signals, signals feed a bound proxy, the proxy renders
/// through the scheduler.
#[tokio::test]
async fn action_to_render_round_trip() {
    let host = Arc::new(ManualHost::new());
    let config = Config {
        store: StoreConfig {
            batch_updates: false,
            ..StoreConfig::default()
        },
        ..Config::default()
    };
    let store = Store::new(config, host.clone());
    store.signals().create_signal("todos", json!([])).unwrap();

    store.actions().register_action(
        "todo/add",
        |ctx: ActionContext| async move {
            let signals = ctx.signals().ok_or("missing signal capability")?;
            let item = ctx.payload().clone();
            signals.update("todos", move |todos| {
                let mut todos = todos.as_array().cloned().unwrap_or_default();
                todos.push(item);
                Value::Array(todos)
            })?;
            ok()
        },
        PipelineOptions::new().capability(Capability::Signals),
    );

    let proxy = store
        .state(json!({"todos": []}))
        .computed("count", |s| json!(s["todos"].as_array().map_or(0, Vec::len)))
        .build()
        .unwrap();
    proxy.bind_signal(store.signals(), "todos", "todos").unwrap();

    let renders = Arc::new(Mutex::new(Vec::new()));
    let log = renders.clone();
    proxy.mount(
        move |state| log.lock().push(state.get("count").unwrap_or(Value::Null)),
        Some(store.scheduler().clone()),
    );

    store.actions().trigger("todo/add", json!("milk"));
    store.actions().trigger("todo/add", json!("eggs"));
    store.actions().settled().await;

    assert_eq!(proxy.get("count"), Some(json!(2)));
    host.run_frame();
    assert_eq!(*renders.lock(), vec![json!(0), json!(2)]);
}
