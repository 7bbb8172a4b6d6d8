//! State Proxy
//!
//! An explicit, versioned store over one component's state object.
//! Every read and write goes through [`StateProxy::get`],
//! [`StateProxy::set`] and [`StateProxy::delete`] with dotted paths.
//!
//! # Write Path
//!
//! `set(path, value)` runs these steps in order:
//!
//! 1. Reject computed and selector keys, and nested paths when immutable.
//! 2. Apply middleware registered for the exact path, else for the bare key.
//! 3. Run the validator found the same way. A rejection leaves state
//!    untouched and is reported as [`WriteOutcome::Rejected`], or as an
//!    error in debug mode.
//! 4. Record the pre-write state for undo, unless restoring or inside a
//!    transaction.
//! 5. Mutate, bump the version, and drop every cached computed value.
//! 6. Notify watchers of the exact path with `(new, old)`.
//! 7. Push the top-level key to a bound signal, then request a render.
//!
//! # Caching
//!
//! Computed and selector values are cached together with the version they
//! were computed at and recomputed on the first read after any write.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use super::history::History;
use super::mount::Mount;
use super::path::{self, Path};
use super::snapshot::{CloneStrategy, Snapshot};
use super::sync::Binding;
use crate::config::StateConfig;
use crate::error::StateError;
use crate::reactive::{SubscriberId, Subscription};

/// Derives a value from the whole state.
pub type ComputedFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
/// Accepts a value or explains why not.
pub type ValidatorFn = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;
/// Receives `(old, new)` and returns the value to store.
pub type MiddlewareFn = Arc<dyn Fn(&Value, Value) -> Value + Send + Sync>;
/// Receives `(new, old)` after a write.
pub type WatchFn = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// Top-level keys that configure a proxy instead of holding state.
pub const RESERVED_KEYS: [&str; 6] = [
    "computed",
    "selectors",
    "middleware",
    "validate",
    "immutable",
    "debug",
];

/// Result of a write that did not fail structurally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// A validator refused the value; state is unchanged.
    Rejected { message: String },
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

#[derive(Default)]
struct Hooks {
    computed: IndexMap<String, ComputedFn>,
    selectors: IndexMap<String, ComputedFn>,
    middleware: HashMap<String, MiddlewareFn>,
    validators: HashMap<String, ValidatorFn>,
}

impl Hooks {
    fn is_read_only(&self, key: &str) -> bool {
        self.computed.contains_key(key) || self.selectors.contains_key(key)
    }

    /// Exact dotted path first, then the bare key.
    fn lookup<'a, T>(table: &'a HashMap<String, T>, path: &Path) -> Option<&'a T> {
        table
            .get(&path.dotted())
            .or_else(|| path.bare_key().and_then(|key| table.get(key)))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CacheKind {
    Computed,
    Selector,
}

struct CacheEntry {
    version: u64,
    value: Value,
}

pub(super) struct ProxyState {
    pub(super) target: Value,
    pub(super) version: u64,
    computed_cache: HashMap<String, CacheEntry>,
    selector_cache: HashMap<String, CacheEntry>,
    pub(super) history: History,
    /// Set while a snapshot is being applied.
    pub(super) restoring: bool,
    pub(super) transaction_depth: usize,
    /// A render was requested inside a transaction.
    pub(super) render_deferred: bool,
}

impl ProxyState {
    pub(super) fn bump(&mut self) {
        self.version += 1;
        self.computed_cache.clear();
        self.selector_cache.clear();
    }

    fn cache(&mut self, kind: CacheKind) -> &mut HashMap<String, CacheEntry> {
        match kind {
            CacheKind::Computed => &mut self.computed_cache,
            CacheKind::Selector => &mut self.selector_cache,
        }
    }

    fn records_history(&self) -> bool {
        self.history.is_enabled() && !self.restoring && self.transaction_depth == 0
    }
}

pub(super) struct ProxyInner {
    pub(super) state: Mutex<ProxyState>,
    hooks: Hooks,
    pub(super) immutable: bool,
    pub(super) debug: bool,
    pub(super) clone_strategy: CloneStrategy,
    watchers: Mutex<HashMap<String, IndexMap<SubscriberId, WatchFn>>>,
    pub(super) bindings: Mutex<HashMap<String, Binding>>,
    pub(super) mount: Mutex<Option<Mount>>,
}

/// Versioned state for one component.
///
/// Cloning is cheap and every clone addresses the same state.
#[derive(Clone)]
pub struct StateProxy {
    pub(super) inner: Arc<ProxyInner>,
}

impl StateProxy {
    pub fn builder(initial: Value) -> StateProxyBuilder {
        StateProxyBuilder::new(initial)
    }

    /// A proxy with default settings.
    pub fn new(initial: Value) -> Result<Self, StateError> {
        Self::builder(initial).build()
    }

    pub fn version(&self) -> u64 {
        self.inner.state.lock().version
    }

    pub fn is_immutable(&self) -> bool {
        self.inner.immutable
    }

    pub fn is_debug(&self) -> bool {
        self.inner.debug
    }

    /// A plain copy of the stored state, without computed keys.
    pub fn to_value(&self) -> Value {
        self.inner.state.lock().target.clone()
    }

    /// Top-level state keys, without computed keys.
    pub fn keys(&self) -> Vec<String> {
        path::top_keys(&self.inner.state.lock().target)
    }

    pub(super) fn snapshot_of(&self, value: &Value) -> Result<Snapshot, StateError> {
        self.inner.clone_strategy.snapshot(value)
    }

    /// Read the value at `path`. Computed and selector keys resolve to
    /// their (cached) derived value. Invalid or missing paths give `None`.
    pub fn get(&self, path: &str) -> Option<Value> {
        match Path::parse(path) {
            Ok(path) => self.get_path(&path),
            Err(err) => {
                trace!(error = %err, "read with invalid path");
                None
            }
        }
    }

    pub(super) fn get_path(&self, path: &Path) -> Option<Value> {
        let Some(top) = path.top() else {
            return Some(self.to_value());
        };
        if let Some(derived) = self.derived(top) {
            return path::lookup(&derived, path.rest()).cloned();
        }
        let state = self.inner.state.lock();
        path::lookup(&state.target, path.segments()).cloned()
    }

    fn derived(&self, key: &str) -> Option<Value> {
        let (compute, kind) = match self.inner.hooks.computed.get(key) {
            Some(f) => (f.clone(), CacheKind::Computed),
            None => (self.inner.hooks.selectors.get(key)?.clone(), CacheKind::Selector),
        };

        let (version, target) = {
            let mut state = self.inner.state.lock();
            let version = state.version;
            if let Some(entry) = state.cache(kind).get(key) {
                if entry.version == version {
                    return Some(entry.value.clone());
                }
            }
            (version, state.target.clone())
        };

        trace!(key, version, "recomputing derived key");
        let value = compute(&target);

        let mut state = self.inner.state.lock();
        if state.version == version {
            state.cache(kind).insert(
                key.to_string(),
                CacheEntry {
                    version,
                    value: value.clone(),
                },
            );
        }
        Some(value)
    }

    /// Write `value` at `path`.
    pub fn set(&self, path: &str, value: Value) -> Result<WriteOutcome, StateError> {
        self.set_path(&Path::parse(path)?, value)
    }

    pub(super) fn set_path(&self, path: &Path, value: Value) -> Result<WriteOutcome, StateError> {
        let Some(top) = path.top() else {
            return Err(StateError::InvalidPath(String::new()));
        };
        if self.inner.hooks.is_read_only(top) {
            return Err(StateError::ReadOnlyKey(path.dotted()));
        }
        if self.inner.immutable && path.len() > 1 {
            return Err(StateError::ImmutabilityViolation { path: path.dotted() });
        }

        let mut value = value;
        if let Some(middleware) = Hooks::lookup(&self.inner.hooks.middleware, path) {
            let old = self.get_path(path).unwrap_or(Value::Null);
            value = middleware(&old, value);
        }

        if let Some(validator) = Hooks::lookup(&self.inner.hooks.validators, path) {
            if let Err(message) = validator(&value) {
                warn!(path = %path, %message, "validation rejected write");
                if self.inner.debug {
                    return Err(StateError::ValidationRejected {
                        path: path.dotted(),
                        message,
                    });
                }
                return Ok(WriteOutcome::Rejected { message });
            }
        }

        let old = {
            let mut state = self.inner.state.lock();
            let before = if state.records_history() {
                Some(self.snapshot_of(&state.target)?)
            } else {
                None
            };
            let old = path::assign(&mut state.target, path, value.clone())?;
            if let Some(before) = before {
                state.history.record(before);
            }
            state.bump();
            old.unwrap_or(Value::Null)
        };

        trace!(path = %path, "state write");
        self.notify(path, &value, &old);
        self.push_binding(path);
        self.request_render();
        Ok(WriteOutcome::Applied)
    }

    /// Remove the value at `path`. Missing paths are a no-op.
    ///
    /// Returns the removed value.
    pub fn delete(&self, path: &str) -> Result<Option<Value>, StateError> {
        let path = Path::parse(path)?;
        let Some(top) = path.top() else {
            return Err(StateError::InvalidPath(String::new()));
        };
        if self.inner.hooks.is_read_only(top) {
            return Err(StateError::ReadOnlyKey(path.dotted()));
        }
        if self.inner.immutable && path.len() > 1 {
            return Err(StateError::ImmutabilityViolation { path: path.dotted() });
        }

        let removed = {
            let mut state = self.inner.state.lock();
            if path::lookup(&state.target, path.segments()).is_none() {
                return Ok(None);
            }
            let before = if state.records_history() {
                Some(self.snapshot_of(&state.target)?)
            } else {
                None
            };
            let removed = path::remove(&mut state.target, &path)?;
            if let Some(before) = before {
                state.history.record(before);
            }
            state.bump();
            removed
        };

        let old = removed.clone().unwrap_or(Value::Null);
        self.notify(&path, &Value::Null, &old);
        self.push_binding(&path);
        self.request_render();
        Ok(removed)
    }

    /// Call `f(new, old)` after every write to exactly `path`.
    pub fn watch<F>(&self, path: &str, f: F) -> Result<Subscription, StateError>
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        let key = Path::parse(path)?.dotted();
        let id = SubscriberId::new();
        self.inner
            .watchers
            .lock()
            .entry(key.clone())
            .or_default()
            .insert(id, Arc::new(f));

        let proxy = Arc::downgrade(&self.inner);
        Ok(Subscription::new(id, move || {
            if let Some(inner) = proxy.upgrade() {
                let mut watchers = inner.watchers.lock();
                if let Some(listeners) = watchers.get_mut(&key) {
                    listeners.shift_remove(&id);
                    if listeners.is_empty() {
                        watchers.remove(&key);
                    }
                }
            }
        }))
    }

    pub fn watcher_count(&self, path: &str) -> usize {
        self.inner
            .watchers
            .lock()
            .get(path)
            .map(IndexMap::len)
            .unwrap_or(0)
    }

    pub(super) fn notify(&self, path: &Path, new: &Value, old: &Value) {
        let listeners: Vec<WatchFn> = match self.inner.watchers.lock().get(&path.dotted()) {
            Some(listeners) => listeners.values().cloned().collect(),
            None => return,
        };
        for listener in listeners {
            listener(new, old);
        }
    }
}

impl std::fmt::Debug for StateProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StateProxy")
            .field("version", &state.version)
            .field("history", &state.history.depth())
            .field("immutable", &self.inner.immutable)
            .field("debug", &self.inner.debug)
            .finish()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Configures and builds a [`StateProxy`].
///
/// Flags resolve in this order: builder method, then the reserved key in
/// the initial object, then the [`StateConfig`].
pub struct StateProxyBuilder {
    initial: Value,
    hooks: Hooks,
    config: StateConfig,
    immutable: Option<bool>,
    debug: Option<bool>,
    history_limit: Option<usize>,
    clone_strategy: Option<CloneStrategy>,
}

impl StateProxyBuilder {
    fn new(initial: Value) -> Self {
        Self {
            initial,
            hooks: Hooks::default(),
            config: StateConfig::default(),
            immutable: None,
            debug: None,
            history_limit: None,
            clone_strategy: None,
        }
    }

    pub fn from_config(mut self, config: &StateConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Register a computed key derived from the whole state.
    pub fn computed<F>(mut self, key: &str, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.hooks.computed.insert(key.to_string(), Arc::new(f));
        self
    }

    /// Register a selector key. Selectors behave like computed keys but are
    /// cached separately.
    pub fn selector<F>(mut self, key: &str, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.hooks.selectors.insert(key.to_string(), Arc::new(f));
        self
    }

    /// Register middleware for a dotted path or a bare key.
    pub fn middleware<F>(mut self, path: &str, f: F) -> Self
    where
        F: Fn(&Value, Value) -> Value + Send + Sync + 'static,
    {
        self.hooks.middleware.insert(path.to_string(), Arc::new(f));
        self
    }

    /// Register a validator for a dotted path or a bare key.
    pub fn validator<F>(mut self, path: &str, f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.hooks.validators.insert(path.to_string(), Arc::new(f));
        self
    }

    pub fn immutable(mut self, immutable: bool) -> Self {
        self.immutable = Some(immutable);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    pub fn clone_strategy(mut self, strategy: CloneStrategy) -> Self {
        self.clone_strategy = Some(strategy);
        self
    }

    pub fn build(self) -> Result<StateProxy, StateError> {
        let mut target = match self.initial {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => return Err(StateError::InvalidRoot(kind_of(&other))),
        };

        let mut data_flags: HashMap<&str, bool> = HashMap::new();
        for key in RESERVED_KEYS {
            let Some(value) = target.remove(key) else {
                continue;
            };
            match (key, value) {
                ("immutable" | "debug", Value::Bool(flag)) => {
                    data_flags.insert(key, flag);
                }
                ("immutable" | "debug", other) => {
                    warn!(key, kind = kind_of(&other), "ignored non-boolean flag");
                }
                _ => debug!(key, "stripped reserved key; register hooks through the builder"),
            }
        }

        let immutable = self
            .immutable
            .or_else(|| data_flags.get("immutable").copied())
            .unwrap_or(self.config.immutable);
        let strict = self
            .debug
            .or_else(|| data_flags.get("debug").copied())
            .unwrap_or(self.config.debug);
        let history_limit = self.history_limit.unwrap_or(self.config.history_limit);
        let clone_strategy = self.clone_strategy.unwrap_or(self.config.clone_strategy);

        debug!(
            immutable,
            strict,
            history_limit,
            computed = self.hooks.computed.len(),
            selectors = self.hooks.selectors.len(),
            "built state proxy"
        );

        Ok(StateProxy {
            inner: Arc::new(ProxyInner {
                state: Mutex::new(ProxyState {
                    target: Value::Object(target),
                    version: 0,
                    computed_cache: HashMap::new(),
                    selector_cache: HashMap::new(),
                    history: History::new(history_limit),
                    restoring: false,
                    transaction_depth: 0,
                    render_deferred: false,
                }),
                hooks: self.hooks,
                immutable,
                debug: strict,
                clone_strategy,
                watchers: Mutex::new(HashMap::new()),
                bindings: Mutex::new(HashMap::new()),
                mount: Mutex::new(None),
            }),
        })
    }
}
