//! Signal Implementation
//!
//! A signal is a named cell inside a [`SignalStore`]. The store owns the
//! value; callers hold a [`SignalHandle`] or address the signal by name.
//!
//! # Memory Layout
//!
//! Each signal cell consists of:
//! - The current value
//! - An epoch (store-wide logical timestamp of the last effective write)
//! - A free-form scope tag
//! - Its kind: source, or derived with dependency names and a compute fn
//! - The graph node that places it in the derivation DAG
//! - Its listeners, in registration order

use std::fmt::Debug;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::runtime::SignalStore;
use super::subscriber::{SubscriberId, Subscription};
use crate::error::SignalError;
use crate::graph::NodeId;

/// Scope assigned when none is given.
pub const GLOBAL_SCOPE: &str = "global";

/// Listener invoked with `(new_value, old_value)`.
pub type Listener = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// Pure function from dependency values (declaration order) to a value.
pub type ComputeFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

pub(crate) enum SignalKind {
    Source,
    Derived {
        dependencies: Vec<String>,
        compute: ComputeFn,
    },
}

pub(crate) struct SignalCell {
    pub(crate) value: Value,
    pub(crate) epoch: u64,
    pub(crate) scope: String,
    pub(crate) kind: SignalKind,
    pub(crate) node: NodeId,
    pub(crate) listeners: IndexMap<SubscriberId, Listener>,
}

impl SignalCell {
    pub(crate) fn new(
        value: Value,
        epoch: u64,
        scope: &str,
        kind: SignalKind,
        node: NodeId,
    ) -> Self {
        Self {
            value,
            epoch,
            scope: scope.to_string(),
            kind,
            node,
            listeners: IndexMap::new(),
        }
    }

    pub(crate) fn is_derived(&self) -> bool {
        matches!(self.kind, SignalKind::Derived { .. })
    }

    pub(crate) fn listeners(&self) -> Vec<Listener> {
        self.listeners.values().cloned().collect()
    }
}

/// A handle to one signal in a store.
///
/// Cloning the handle does not clone the signal; every clone addresses the
/// same cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = store.create_signal("count", json!(0))?;
/// count.set(json!(5))?;
/// assert_eq!(count.get()?, json!(5));
/// ```
#[derive(Clone)]
pub struct SignalHandle {
    name: Arc<str>,
    scope: Arc<str>,
    derived: bool,
    store: SignalStore,
}

impl SignalHandle {
    pub(crate) fn new(name: &str, scope: &str, derived: bool, store: SignalStore) -> Self {
        Self {
            name: Arc::from(name),
            scope: Arc::from(scope),
            derived,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn is_derived(&self) -> bool {
        self.derived
    }

    /// Get the current value.
    pub fn get(&self) -> Result<Value, SignalError> {
        self.store.get(&self.name)
    }

    /// Write a new value. Fails for derived signals.
    pub fn set(&self, value: Value) -> Result<(), SignalError> {
        self.store.set(&self.name, value)
    }

    /// Write a value computed from the current one.
    pub fn update<F>(&self, f: F) -> Result<(), SignalError>
    where
        F: FnOnce(&Value) -> Value,
    {
        self.store.update(&self.name, f)
    }

    /// Register a `(new, old)` listener.
    pub fn watch<F>(&self, listener: F) -> Result<Subscription, SignalError>
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.store.watch(&self.name, listener)
    }

    /// Logical timestamp of the last effective write.
    pub fn epoch(&self) -> Result<u64, SignalError> {
        self.store.epoch(&self.name)
    }
}

impl Debug for SignalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHandle")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("derived", &self.derived)
            .field("value", &self.get().ok())
            .finish()
    }
}
