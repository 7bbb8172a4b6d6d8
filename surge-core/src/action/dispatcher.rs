//! Action Dispatcher
//!
//! A FIFO queue of triggered actions drained by at most one loop at a time.
//!
//! # Drain Loop
//!
//! `trigger` appends to the queue and returns. If no drain is running it
//! spawns one on the current tokio runtime. The loop pops one action at a
//! time and runs its pipelines in registration order:
//!
//! 1. guard: a `false` skips this pipeline only
//! 2. transform: replaces the payload the later stages see
//! 3. handler: awaited; a failure skips this pipeline's side effects
//! 4. side effects: awaited in order; a failure is logged and the next
//!    side effect still runs
//!
//! Errors and panics never leave the loop. A `trigger` from inside a
//! handler lands at the back of the same queue, so it runs after every
//! pipeline of the current action.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use super::pipeline::{Action, ActionContext, Capability, Handler, Pipeline, PipelineOptions};
use crate::error::{BoxError, PipelineError};
use crate::reactive::{SignalStore, GLOBAL_SCOPE};

#[derive(Default)]
struct QueueState {
    actions: VecDeque<Action>,
    draining: bool,
}

struct DispatcherInner {
    pipelines: DashMap<String, Vec<Arc<Pipeline>>>,
    queue: Mutex<QueueState>,
    idle: Notify,
    signals: SignalStore,
}

/// Serializes actions into their registered pipelines.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

enum StageFailure {
    Failed(BoxError),
    Panicked,
}

impl Dispatcher {
    pub fn new(signals: SignalStore) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                pipelines: DashMap::new(),
                queue: Mutex::new(QueueState::default()),
                idle: Notify::new(),
                signals,
            }),
        }
    }

    /// Append a pipeline for `kind`. Registrations accumulate.
    pub fn register_action<F, Fut>(&self, kind: &str, handler: F, options: PipelineOptions)
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let pipeline = Arc::new(Pipeline::new(handler, options));
        let mut entry = self.inner.pipelines.entry(kind.to_string()).or_default();
        entry.push(pipeline);
        debug!(action = kind, pipelines = entry.len(), "registered pipeline");
    }

    pub fn pipeline_count(&self, kind: &str) -> usize {
        self.inner
            .pipelines
            .get(kind)
            .map(|p| p.len())
            .unwrap_or(0)
    }

    /// Queue an action in the global scope.
    pub fn trigger(&self, kind: &str, payload: Value) {
        self.trigger_in(kind, payload, GLOBAL_SCOPE);
    }

    /// Queue an action tagged with `scope`. Never blocks and never runs a
    /// handler before returning.
    pub fn trigger_in(&self, kind: &str, payload: Value, scope: &str) {
        self.enqueue(Action::new(kind, payload, scope));
    }

    /// Queue a prebuilt action.
    pub fn enqueue(&self, action: Action) {
        let start = {
            let mut queue = self.inner.queue.lock();
            queue.actions.push_back(action);
            !std::mem::replace(&mut queue.draining, true)
        };
        if !start {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                let dispatcher = self.clone();
                handle.spawn(async move { dispatcher.run_drain().await });
            }
            Err(_) => {
                self.inner.queue.lock().draining = false;
                warn!("no async runtime available; queued actions wait for drain()");
            }
        }
    }

    /// Drain the queue on the caller's task.
    ///
    /// If another drain is already running this waits for it instead of
    /// starting a second loop.
    pub async fn drain(&self) {
        let already_running = {
            let mut queue = self.inner.queue.lock();
            std::mem::replace(&mut queue.draining, true)
        };
        if already_running {
            self.settled().await;
        } else {
            self.run_drain().await;
        }
    }

    /// Resolve once the queue is empty and no drain is running.
    pub async fn settled(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let queue = self.inner.queue.lock();
                if !queue.draining && queue.actions.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.lock().actions.len()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.queue.lock().draining
    }

    /// Drop every pipeline and every queued action.
    pub fn reset(&self) {
        self.inner.pipelines.clear();
        self.inner.queue.lock().actions.clear();
        debug!("dispatcher reset");
    }

    async fn run_drain(&self) {
        let mut guard = DrainGuard {
            dispatcher: self,
            finished: false,
        };
        loop {
            let next = {
                let mut queue = self.inner.queue.lock();
                match queue.actions.pop_front() {
                    Some(action) => action,
                    None => {
                        queue.draining = false;
                        guard.finished = true;
                        break;
                    }
                }
            };
            self.process(next).await;
        }
    }

    async fn process(&self, action: Action) {
        let pipelines: Vec<Arc<Pipeline>> = match self.inner.pipelines.get(&action.kind) {
            Some(pipelines) => pipelines.clone(),
            None => {
                warn!(action = %action.kind, "no pipeline registered for action");
                return;
            }
        };

        for (index, pipeline) in pipelines.iter().enumerate() {
            self.run_pipeline(index, pipeline, &action).await;
        }
    }

    async fn run_pipeline(&self, index: usize, pipeline: &Pipeline, action: &Action) {
        let kind = action.kind.as_str();

        if let Some(guard) = &pipeline.guard {
            match panic::catch_unwind(AssertUnwindSafe(|| guard(action))) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(action = kind, pipeline = index, "guard rejected action");
                    return;
                }
                Err(_) => {
                    log_failure(&PipelineError::Panicked {
                        action: kind.to_string(),
                        stage: "guard",
                    });
                    return;
                }
            }
        }

        let mut action = action.clone();
        if let Some(transform) = &pipeline.transform {
            let payload = action.payload.clone();
            match panic::catch_unwind(AssertUnwindSafe(|| transform(payload))) {
                Ok(payload) => action.payload = payload,
                Err(_) => {
                    log_failure(&PipelineError::Panicked {
                        action: kind.to_string(),
                        stage: "transform",
                    });
                    return;
                }
            }
        }

        let ctx = self.context_for(pipeline, action);

        match run_stage(&pipeline.handler, ctx.clone()).await {
            Ok(()) => {}
            Err(StageFailure::Failed(source)) => {
                log_failure(&PipelineError::Handler {
                    action: kind.to_string(),
                    source,
                });
                return;
            }
            Err(StageFailure::Panicked) => {
                log_failure(&PipelineError::Panicked {
                    action: kind.to_string(),
                    stage: "handler",
                });
                return;
            }
        }

        for (effect_index, effect) in pipeline.side_effects.iter().enumerate() {
            match run_stage(effect, ctx.clone()).await {
                Ok(()) => {}
                Err(StageFailure::Failed(source)) => log_failure(&PipelineError::SideEffect {
                    action: kind.to_string(),
                    index: effect_index,
                    source,
                }),
                Err(StageFailure::Panicked) => log_failure(&PipelineError::Panicked {
                    action: kind.to_string(),
                    stage: "side effect",
                }),
            }
        }
    }

    fn context_for(&self, pipeline: &Pipeline, action: Action) -> ActionContext {
        let signals = pipeline
            .needs(Capability::Signals)
            .then(|| self.inner.signals.clone());
        let dispatcher = pipeline.needs(Capability::Dispatch).then(|| self.clone());
        ActionContext::new(action, signals, dispatcher)
    }
}

/// Releases the drain flag even when the draining future is dropped
/// mid-action. Leftover actions get a fresh loop if a runtime is around.
struct DrainGuard<'a> {
    dispatcher: &'a Dispatcher,
    finished: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let inner = &self.dispatcher.inner;
        if !self.finished {
            let leftover = {
                let mut queue = inner.queue.lock();
                let leftover = queue.actions.len();
                if leftover == 0 {
                    queue.draining = false;
                }
                leftover
            };
            warn!(queued = leftover, "drain cancelled before the queue emptied");

            if leftover > 0 {
                match Handle::try_current() {
                    Ok(handle) => {
                        let dispatcher = self.dispatcher.clone();
                        handle.spawn(async move { dispatcher.run_drain().await });
                    }
                    Err(_) => inner.queue.lock().draining = false,
                }
            }
        }
        inner.idle.notify_waiters();
    }
}

async fn run_stage(stage: &Handler, ctx: ActionContext) -> Result<(), StageFailure> {
    let future = panic::catch_unwind(AssertUnwindSafe(|| stage(ctx)))
        .map_err(|_| StageFailure::Panicked)?;
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(StageFailure::Failed(source)),
        Err(_) => Err(StageFailure::Panicked),
    }
}

fn log_failure(failure: &PipelineError) {
    error!(error = %failure, "action pipeline failed");
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("action_types", &self.inner.pipelines.len())
            .field("queued", &self.queued())
            .field("draining", &self.is_draining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::host::ManualHost;
    use futures_util::future::Ready;
    use serde_json::json;
    use std::task::Poll;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    fn dispatcher() -> (Dispatcher, Log) {
        let config = StoreConfig {
            batch_updates: false,
            ..StoreConfig::default()
        };
        let store = SignalStore::new(config, Arc::new(ManualHost::new()));
        (Dispatcher::new(store), Arc::new(Mutex::new(Vec::new())))
    }

    fn ok() -> Result<(), BoxError> {
        Ok(())
    }

    fn logging(
        log: &Log,
        entry: &str,
    ) -> impl Fn(ActionContext) -> Ready<Result<(), BoxError>> + Send + Sync + 'static {
        let log = log.clone();
        let entry = entry.to_string();
        move |_| {
            log.lock().push(entry.clone());
            futures_util::future::ready(ok())
        }
    }

    #[tokio::test]
    async fn trigger_returns_before_handlers_run() {
        let (dispatcher, log) = dispatcher();
        dispatcher.register_action("ping", logging(&log, "ping"), PipelineOptions::new());

        dispatcher.trigger("ping", Value::Null);
        assert!(log.lock().is_empty());

        dispatcher.settled().await;
        assert_eq!(*log.lock(), vec!["ping"]);
    }

    #[test]
    fn cancelled_drain_releases_the_loop() {
        let (dispatcher, log) = dispatcher();
        dispatcher.register_action(
            "slow",
            |_| {
                let mut polled = false;
                std::future::poll_fn(move |cx| {
                    if polled {
                        return Poll::Ready(ok());
                    }
                    polled = true;
                    cx.waker().wake_by_ref();
                    Poll::Pending
                })
            },
            PipelineOptions::new(),
        );
        dispatcher.register_action("fast", logging(&log, "fast"), PipelineOptions::new());

        dispatcher.trigger("slow", Value::Null);
        assert!(dispatcher.drain().now_or_never().is_none());
        assert!(!dispatcher.is_draining());

        dispatcher.trigger("fast", Value::Null);
        assert!(dispatcher.drain().now_or_never().is_some());
        assert_eq!(*log.lock(), vec!["fast"]);
        assert_eq!(dispatcher.queued(), 0);
    }

    #[tokio::test]
    async fn cancelled_drain_resumes_leftover_actions() {
        let (dispatcher, log) = dispatcher();
        dispatcher.register_action(
            "slow",
            |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                ok()
            },
            PipelineOptions::new(),
        );
        dispatcher.register_action("fast", logging(&log, "fast"), PipelineOptions::new());

        {
            let mut queue = dispatcher.inner.queue.lock();
            queue.actions.push_back(Action::new("slow", Value::Null, GLOBAL_SCOPE));
            queue.actions.push_back(Action::new("fast", Value::Null, GLOBAL_SCOPE));
        }
        let timed_out = tokio::time::timeout(Duration::from_millis(10), dispatcher.drain()).await;
        assert!(timed_out.is_err());

        dispatcher.settled().await;
        assert_eq!(*log.lock(), vec!["fast"]);
        assert!(!dispatcher.is_draining());
    }

    #[tokio::test]
    async fn pipelines_run_in_registration_order() {
        let (dispatcher, log) = dispatcher();
        dispatcher.register_action(
            "save",
            logging(&log, "first"),
            PipelineOptions::new().side_effect(logging(&log, "first/effect")),
        );
        dispatcher.register_action("save", logging(&log, "second"), PipelineOptions::new());
        assert_eq!(dispatcher.pipeline_count("save"), 2);

        dispatcher.trigger("save", json!({}));
        dispatcher.settled().await;

        assert_eq!(*log.lock(), vec!["first", "first/effect", "second"]);
    }

    #[tokio::test]
    async fn unregistered_action_does_not_wedge_queue() {
        let (dispatcher, log) = dispatcher();
        dispatcher.register_action("known", logging(&log, "known"), PipelineOptions::new());

        dispatcher.trigger("unknown", json!(1));
        dispatcher.trigger("known", json!(2));
        dispatcher.settled().await;

        assert_eq!(*log.lock(), vec!["known"]);
        assert_eq!(dispatcher.queued(), 0);
    }

    #[tokio::test]
    async fn guard_skips_only_its_pipeline() {
        let (dispatcher, log) = dispatcher();
        dispatcher.register_action(
            "submit",
            logging(&log, "guarded"),
            PipelineOptions::new()
                .guard(|_| false)
                .side_effect(logging(&log, "guarded/effect")),
        );
        dispatcher.register_action("submit", logging(&log, "open"), PipelineOptions::new());

        dispatcher.trigger("submit", Value::Null);
        dispatcher.settled().await;

        assert_eq!(*log.lock(), vec!["open"]);
    }

    #[tokio::test]
    async fn transform_rewrites_payload_for_handler_and_effects() {
        let (dispatcher, log) = dispatcher();
        let seen = log.clone();
        let effect_seen = log.clone();
        dispatcher.register_action(
            "wrap",
            move |ctx: ActionContext| {
                seen.lock().push(ctx.payload().to_string());
                async { ok() }
            },
            PipelineOptions::new()
                .transform(|payload| json!({ "wrapped": payload }))
                .side_effect(move |ctx: ActionContext| {
                    effect_seen.lock().push(ctx.payload()["wrapped"].to_string());
                    async { ok() }
                }),
        );

        dispatcher.trigger("wrap", json!(7));
        dispatcher.settled().await;

        assert_eq!(*log.lock(), vec![r#"{"wrapped":7}"#, "7"]);
    }

    #[tokio::test]
    async fn failures_are_contained() {
        let (dispatcher, log) = dispatcher();
        dispatcher.register_action(
            "risky",
            |_| async { Err::<(), BoxError>("boom".into()) },
            PipelineOptions::new().side_effect(logging(&log, "skipped")),
        );
        dispatcher.register_action(
            "risky",
            logging(&log, "handler"),
            PipelineOptions::new()
                .side_effect(|_| async { Err::<(), BoxError>("effect failed".into()) })
                .side_effect(logging(&log, "after failed effect")),
        );
        dispatcher.register_action(
            "risky",
            |_: ActionContext| async {
                if true {
                    panic!("handler panicked");
                }
                ok()
            },
            PipelineOptions::new(),
        );
        dispatcher.register_action("risky", logging(&log, "last"), PipelineOptions::new());

        dispatcher.trigger("risky", Value::Null);
        dispatcher.trigger("risky", Value::Null);
        dispatcher.settled().await;

        assert_eq!(
            *log.lock(),
            vec!["handler", "after failed effect", "last", "handler", "after failed effect", "last"]
        );
    }

    #[tokio::test]
    async fn nested_trigger_runs_after_current_action() {
        let (dispatcher, log) = dispatcher();
        let outer_log = log.clone();
        dispatcher.register_action(
            "outer",
            move |ctx: ActionContext| {
                let log = outer_log.clone();
                async move {
                    log.lock().push("outer/start".into());
                    if let Some(dispatch) = ctx.dispatcher() {
                        dispatch.trigger("inner", Value::Null);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    log.lock().push("outer/end".into());
                    ok()
                }
            },
            PipelineOptions::new()
                .capability(Capability::Dispatch)
                .side_effect(logging(&log, "outer/effect")),
        );
        dispatcher.register_action("inner", logging(&log, "inner"), PipelineOptions::new());

        dispatcher.trigger("outer", Value::Null);
        dispatcher.settled().await;

        assert_eq!(
            *log.lock(),
            vec!["outer/start", "outer/end", "outer/effect", "inner"]
        );
    }

    #[tokio::test]
    async fn capabilities_gate_context_handles() {
        let (dispatcher, log) = dispatcher();
        dispatcher
            .inner
            .signals
            .create_signal("clicks", json!(0))
            .unwrap();

        let with_log = log.clone();
        dispatcher.register_action(
            "click",
            move |ctx: ActionContext| {
                let log = with_log.clone();
                async move {
                    let signals = ctx.signals().ok_or("signals capability missing")?;
                    signals.update("clicks", |v| json!(v.as_i64().unwrap_or(0) + 1))?;
                    log.lock().push(format!("dispatch:{}", ctx.dispatcher().is_some()));
                    ok()
                }
            },
            PipelineOptions::new().capability(Capability::Signals),
        );

        dispatcher.trigger("click", Value::Null);
        dispatcher.trigger("click", Value::Null);
        dispatcher.settled().await;

        assert_eq!(dispatcher.inner.signals.get("clicks").unwrap(), json!(2));
        assert_eq!(*log.lock(), vec!["dispatch:false", "dispatch:false"]);
    }

    #[test]
    fn without_runtime_actions_wait_for_drain() {
        let (dispatcher, log) = dispatcher();
        dispatcher.register_action("later", logging(&log, "later"), PipelineOptions::new());

        dispatcher.trigger("later", Value::Null);
        assert_eq!(dispatcher.queued(), 1);
        assert!(!dispatcher.is_draining());

        futures_util::FutureExt::now_or_never(dispatcher.drain()).unwrap();
        assert_eq!(*log.lock(), vec!["later"]);
    }

    #[tokio::test]
    async fn reset_drops_pipelines_and_queue() {
        let (dispatcher, log) = dispatcher();
        dispatcher.register_action("a", logging(&log, "a"), PipelineOptions::new());
        dispatcher.reset();

        dispatcher.trigger("a", Value::Null);
        dispatcher.settled().await;

        assert!(log.lock().is_empty());
        assert_eq!(dispatcher.pipeline_count("a"), 0);
    }
}
