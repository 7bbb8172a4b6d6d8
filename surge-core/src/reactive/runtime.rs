//! Signal Store
//!
//! The store is the central coordinator that owns every signal, the
//! derivation graph between them, and the listener sets.
//!
//! # How It Works
//!
//! 1. `create_signal` / `create_derived` register a cell and a graph node.
//!
//! 2. `set` writes a source signal. Equal values are ignored outright: no
//!    epoch bump, no notification.
//!
//! 3. An effective write:
//!    a. bumps the store clock and stamps the signal's epoch
//!    b. walks the derivation graph in topological order and recomputes
//!       every derived signal whose inputs changed, synchronously
//!    c. announces each changed signal: immediately to listeners when
//!       batching is off, or into the batched notifier's dirty set
//!
//! # Locking
//!
//! No lock is held while user code runs. Compute functions receive owned
//! dependency values and listeners are cloned out of their cell before being
//! called, so listeners may freely read and write the store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::batch::BatchedNotifier;
use super::signal::{ComputeFn, Listener, SignalCell, SignalHandle, SignalKind, GLOBAL_SCOPE};
use super::subscriber::{SubscriberId, Subscription};
use crate::config::StoreConfig;
use crate::error::SignalError;
use crate::graph::{DerivationGraph, DirtyState, NodeId};
use crate::host::Host;

/// One effective write, as recorded in the store journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalChange {
    pub name: String,
    pub scope: String,
    pub old: Value,
    pub new: Value,
    pub epoch: u64,
}

struct StoreInner {
    config: StoreConfig,
    host: Arc<dyn Host>,
    signals: DashMap<String, SignalCell>,
    graph: Mutex<DerivationGraph>,
    clock: AtomicU64,
    batch: BatchedNotifier,
    journal: Mutex<VecDeque<SignalChange>>,
}

/// A store of named signals.
///
/// Cloning is cheap and every clone addresses the same store. There is no
/// global instance: pass the store to whatever needs it.
#[derive(Clone)]
pub struct SignalStore {
    inner: Arc<StoreInner>,
}

impl SignalStore {
    pub fn new(config: StoreConfig, host: Arc<dyn Host>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                host,
                signals: DashMap::new(),
                graph: Mutex::new(DerivationGraph::new()),
                clock: AtomicU64::new(0),
                batch: BatchedNotifier::new(),
                journal: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn is_batching(&self) -> bool {
        self.inner.config.batch_updates
    }

    fn tick(&self) -> u64 {
        self.inner.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Create a source signal in the global scope.
    pub fn create_signal(&self, name: &str, initial: Value) -> Result<SignalHandle, SignalError> {
        self.create_signal_in(name, initial, GLOBAL_SCOPE)
    }

    /// Create a source signal tagged with `scope`.
    pub fn create_signal_in(
        &self,
        name: &str,
        initial: Value,
        scope: &str,
    ) -> Result<SignalHandle, SignalError> {
        let epoch = self.tick();
        match self.inner.signals.entry(name.to_string()) {
            Entry::Occupied(_) => Err(SignalError::DuplicateSignal(name.to_string())),
            Entry::Vacant(slot) => {
                let node = self.inner.graph.lock().add_source(name);
                slot.insert(SignalCell::new(initial, epoch, scope, SignalKind::Source, node));
                debug!(signal = name, scope, "created signal");
                Ok(SignalHandle::new(name, scope, false, self.clone()))
            }
        }
    }

    /// Create a derived signal in the global scope.
    ///
    /// `compute` runs immediately for the initial value and again,
    /// synchronously, whenever one of `dependencies` changes.
    pub fn create_derived<F>(
        &self,
        name: &str,
        dependencies: &[&str],
        compute: F,
    ) -> Result<SignalHandle, SignalError>
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.create_derived_in(name, dependencies, compute, GLOBAL_SCOPE)
    }

    /// Create a derived signal tagged with `scope`.
    pub fn create_derived_in<F>(
        &self,
        name: &str,
        dependencies: &[&str],
        compute: F,
        scope: &str,
    ) -> Result<SignalHandle, SignalError>
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        if self.inner.signals.contains_key(name) {
            return Err(SignalError::DuplicateSignal(name.to_string()));
        }

        let mut inputs = Vec::with_capacity(dependencies.len());
        let mut nodes = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            let cell = self
                .inner
                .signals
                .get(*dependency)
                .ok_or_else(|| SignalError::UnknownSignal(dependency.to_string()))?;
            inputs.push(cell.value.clone());
            nodes.push(cell.node);
        }

        let compute: ComputeFn = Arc::new(compute);
        let initial = compute(&inputs);
        let epoch = self.tick();

        match self.inner.signals.entry(name.to_string()) {
            Entry::Occupied(_) => Err(SignalError::DuplicateSignal(name.to_string())),
            Entry::Vacant(slot) => {
                let node = self.inner.graph.lock().add_derived(name, &nodes);
                let kind = SignalKind::Derived {
                    dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                    compute,
                };
                slot.insert(SignalCell::new(initial, epoch, scope, kind, node));
                debug!(signal = name, scope, ?dependencies, "created derived signal");
                Ok(SignalHandle::new(name, scope, true, self.clone()))
            }
        }
    }

    /// Get a signal's current value.
    ///
    /// Unknown names are an error rather than `Value::Null`, so a typo never
    /// reads as an unset signal.
    pub fn get(&self, name: &str) -> Result<Value, SignalError> {
        self.inner
            .signals
            .get(name)
            .map(|cell| cell.value.clone())
            .ok_or_else(|| SignalError::UnknownSignal(name.to_string()))
    }

    /// Get a handle to an existing signal.
    pub fn handle(&self, name: &str) -> Result<SignalHandle, SignalError> {
        let cell = self
            .inner
            .signals
            .get(name)
            .ok_or_else(|| SignalError::UnknownSignal(name.to_string()))?;
        Ok(SignalHandle::new(name, &cell.scope, cell.is_derived(), self.clone()))
    }

    /// Logical timestamp of the signal's last effective write.
    pub fn epoch(&self, name: &str) -> Result<u64, SignalError> {
        self.inner
            .signals
            .get(name)
            .map(|cell| cell.epoch)
            .ok_or_else(|| SignalError::UnknownSignal(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.signals.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.signals.is_empty()
    }

    /// Names of all signals tagged with `scope`, sorted.
    pub fn signals_in_scope(&self, scope: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .signals
            .iter()
            .filter(|entry| entry.value().scope == scope)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Write a source signal.
    ///
    /// Fails before touching anything if the signal is unknown or derived.
    /// Writing a value equal to the current one is a no-op.
    pub fn set(&self, name: &str, value: Value) -> Result<(), SignalError> {
        let (old, new, scope, node, epoch) = {
            let mut cell = self
                .inner
                .signals
                .get_mut(name)
                .ok_or_else(|| SignalError::UnknownSignal(name.to_string()))?;
            if cell.is_derived() {
                return Err(SignalError::DerivedWrite(name.to_string()));
            }
            if cell.value == value {
                trace!(signal = name, "ignored write of unchanged value");
                return Ok(());
            }

            let epoch = self.tick();
            let old = std::mem::replace(&mut cell.value, value);
            cell.epoch = epoch;
            (old, cell.value.clone(), cell.scope.clone(), cell.node, epoch)
        };

        let mut changes = vec![SignalChange {
            name: name.to_string(),
            scope,
            old,
            new,
            epoch,
        }];
        changes.extend(self.propagate(node));

        for change in &changes {
            self.record(change);
        }
        for change in changes {
            self.announce(&change.name, &change.new, &change.old);
        }
        Ok(())
    }

    /// Write a value computed from the current one.
    pub fn update<F>(&self, name: &str, f: F) -> Result<(), SignalError>
    where
        F: FnOnce(&Value) -> Value,
    {
        let current = self.get(name)?;
        self.set(name, f(&current))
    }

    /// Recompute every derived signal downstream of `source`.
    fn propagate(&self, source: NodeId) -> Vec<SignalChange> {
        let order = self.inner.graph.lock().mark_changed(source);
        let mut changes = Vec::new();

        for node_id in order {
            let (state, name) = {
                let mut graph = self.inner.graph.lock();
                let name = graph.get_node(node_id).map(|n| n.name().to_string());
                (graph.settle(node_id), name)
            };
            let Some(name) = name else { continue };
            if state != DirtyState::Dirty {
                continue;
            }

            let (dependencies, compute) = match self.inner.signals.get(&name) {
                Some(cell) => match &cell.kind {
                    SignalKind::Derived {
                        dependencies,
                        compute,
                    } => (dependencies.clone(), compute.clone()),
                    SignalKind::Source => continue,
                },
                None => continue,
            };

            let inputs: Vec<Value> = dependencies
                .iter()
                .map(|dependency| self.get(dependency).unwrap_or(Value::Null))
                .collect();
            let next = compute(&inputs);

            let change = {
                let Some(mut cell) = self.inner.signals.get_mut(&name) else {
                    continue;
                };
                if cell.value == next {
                    continue;
                }
                let epoch = self.tick();
                let old = std::mem::replace(&mut cell.value, next);
                cell.epoch = epoch;
                SignalChange {
                    name: name.clone(),
                    scope: cell.scope.clone(),
                    old,
                    new: cell.value.clone(),
                    epoch,
                }
            };

            trace!(signal = %name, "recomputed derived signal");
            self.inner.graph.lock().mark_dependents_dirty(node_id);
            changes.push(change);
        }

        changes
    }

    fn record(&self, change: &SignalChange) {
        let limit = self.inner.config.journal_limit;
        if limit == 0 {
            return;
        }
        let mut journal = self.inner.journal.lock();
        journal.push_back(change.clone());
        while journal.len() > limit {
            journal.pop_front();
        }
    }

    fn announce(&self, name: &str, new: &Value, old: &Value) {
        if !self.is_batching() {
            self.deliver(name, new, old);
            return;
        }

        if self.inner.batch.record(name, old) {
            let store = Arc::downgrade(&self.inner);
            self.inner.host.queue_microtask(Box::new(move || {
                if let Some(inner) = store.upgrade() {
                    SignalStore { inner }.flush();
                }
            }));
        }
    }

    fn deliver(&self, name: &str, new: &Value, old: &Value) {
        let listeners: Vec<Listener> = match self.inner.signals.get(name) {
            Some(cell) => cell.listeners(),
            None => return,
        };
        for listener in listeners {
            listener(new, old);
        }
    }

    /// Deliver every pending batched notification now.
    ///
    /// Normally called from the microtask queued by the first write of a
    /// tick. Safe to call at any time; a no-op when nothing is pending.
    pub fn flush(&self) {
        let pending = self.inner.batch.take();
        if pending.is_empty() {
            return;
        }
        trace!(count = pending.len(), "flushing batched notifications");

        for (name, start) in pending {
            let Ok(current) = self.get(&name) else {
                continue;
            };
            if current == start {
                continue;
            }
            self.deliver(&name, &current, &start);
        }
    }

    /// Register a listener called with `(new, old)` on each effective change.
    ///
    /// Listeners on one signal run in registration order.
    pub fn watch<F>(&self, name: &str, listener: F) -> Result<Subscription, SignalError>
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        {
            let mut cell = self
                .inner
                .signals
                .get_mut(name)
                .ok_or_else(|| SignalError::UnknownSignal(name.to_string()))?;
            cell.listeners.insert(id, Arc::new(listener));
        }

        let store: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let name = name.to_string();
        Ok(Subscription::new(id, move || {
            if let Some(inner) = store.upgrade() {
                if let Some(mut cell) = inner.signals.get_mut(&name) {
                    cell.listeners.shift_remove(&id);
                }
            }
        }))
    }

    /// Number of listeners on a signal.
    pub fn listener_count(&self, name: &str) -> usize {
        self.inner
            .signals
            .get(name)
            .map(|cell| cell.listeners.len())
            .unwrap_or(0)
    }

    /// The most recent effective writes, oldest first.
    pub fn journal(&self) -> Vec<SignalChange> {
        self.inner.journal.lock().iter().cloned().collect()
    }

    /// Drop every signal, edge, journal entry and pending notification.
    pub fn reset(&self) {
        self.inner.signals.clear();
        self.inner.graph.lock().clear();
        self.inner.journal.lock().clear();
        self.inner.batch.clear();
        debug!("signal store reset");
    }
}

impl std::fmt::Debug for SignalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalStore")
            .field("signals", &self.len())
            .field("batching", &self.is_batching())
            .field("pending", &self.inner.batch.is_pending())
            .finish()
    }
}
