//! Actions and Pipelines
//!
//! An action is a named unit of intent. Each action type maps to an ordered
//! list of pipelines; a pipeline is `guard -> transform -> handler ->
//! side effects`.
//!
//! Handlers never discover what they may touch by inspecting themselves.
//! A pipeline declares the [`Capability`]s it needs and its
//! [`ActionContext`] carries exactly those handles.

use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use super::dispatcher::Dispatcher;
use crate::error::BoxError;
use crate::reactive::{SignalStore, GLOBAL_SCOPE};

/// A triggered action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub scope: String,
    /// Milliseconds since the Unix epoch at trigger time.
    pub timestamp: u64,
}

impl Action {
    pub fn new(kind: impl Into<String>, payload: Value, scope: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            kind: kind.into(),
            payload,
            scope: scope.into(),
            timestamp,
        }
    }

    /// An action in the global scope.
    pub fn global(kind: impl Into<String>, payload: Value) -> Self {
        Self::new(kind, payload, GLOBAL_SCOPE)
    }
}

/// Handles a pipeline may ask to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Read and write signals.
    Signals,
    /// Trigger further actions.
    Dispatch,
}

/// What a handler or side effect receives.
#[derive(Clone)]
pub struct ActionContext {
    /// The action, with the pipeline's transform already applied.
    pub action: Action,
    signals: Option<SignalStore>,
    dispatcher: Option<Dispatcher>,
}

impl ActionContext {
    pub(crate) fn new(
        action: Action,
        signals: Option<SignalStore>,
        dispatcher: Option<Dispatcher>,
    ) -> Self {
        Self {
            action,
            signals,
            dispatcher,
        }
    }

    pub fn payload(&self) -> &Value {
        &self.action.payload
    }

    /// The signal store, if the pipeline declared [`Capability::Signals`].
    pub fn signals(&self) -> Option<&SignalStore> {
        self.signals.as_ref()
    }

    /// The dispatcher, if the pipeline declared [`Capability::Dispatch`].
    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        self.dispatcher.as_ref()
    }
}

pub type Guard = Arc<dyn Fn(&Action) -> bool + Send + Sync>;
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;
pub type Handler =
    Arc<dyn Fn(ActionContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

fn boxed_handler<F, Fut>(f: F) -> Handler
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Optional stages of a pipeline.
///
/// ```rust,ignore
/// dispatcher.register_action(
///     "cart/add",
///     |ctx| async move { /* ... */ Ok(()) },
///     PipelineOptions::new()
///         .guard(|action| action.payload.is_object())
///         .side_effect(|ctx| async move { /* ... */ Ok(()) })
///         .capability(Capability::Signals),
/// );
/// ```
#[derive(Default)]
pub struct PipelineOptions {
    guard: Option<Guard>,
    transform: Option<Transform>,
    side_effects: Vec<Handler>,
    capabilities: SmallVec<[Capability; 2]>,
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip this pipeline when `guard` returns false.
    pub fn guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(&Action) -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Replace the payload before the handler sees it.
    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Append a side effect; side effects run in the order added.
    pub fn side_effect<F, Fut>(mut self, effect: F) -> Self
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.side_effects.push(boxed_handler(effect));
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }
}

/// A registered pipeline.
pub struct Pipeline {
    pub(crate) guard: Option<Guard>,
    pub(crate) transform: Option<Transform>,
    pub(crate) handler: Handler,
    pub(crate) side_effects: Vec<Handler>,
    capabilities: SmallVec<[Capability; 2]>,
}

impl Pipeline {
    pub fn new<F, Fut>(handler: F, options: PipelineOptions) -> Self
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self {
            guard: options.guard,
            transform: options.transform,
            handler: boxed_handler(handler),
            side_effects: options.side_effects,
            capabilities: options.capabilities,
        }
    }

    pub fn needs(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn side_effect_count(&self) -> usize {
        self.side_effects.len()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("guard", &self.guard.is_some())
            .field("transform", &self.transform.is_some())
            .field("side_effects", &self.side_effects.len())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
