//! Path-scoped views into a proxy.

use serde_json::Value;

use super::path::Path;
use super::proxy::{StateProxy, WriteOutcome};
use crate::error::StateError;
use crate::reactive::Subscription;

/// A view of a proxy rooted at a nested path.
///
/// Nodes hold no state of their own. Version, caches, hooks, watchers and
/// history all belong to the owning proxy, so a write through a node is
/// exactly a write through the proxy at the joined path.
#[derive(Debug, Clone)]
pub struct StateNode {
    proxy: StateProxy,
    base: Path,
}

impl StateProxy {
    /// A view rooted at `path`. The path does not have to exist yet.
    pub fn at(&self, path: &str) -> Result<StateNode, StateError> {
        Ok(StateNode {
            proxy: self.clone(),
            base: Path::parse(path)?,
        })
    }
}

impl StateNode {
    pub fn path(&self) -> &Path {
        &self.base
    }

    pub fn proxy(&self) -> &StateProxy {
        &self.proxy
    }

    fn resolve(&self, relative: &str) -> Result<Path, StateError> {
        Ok(self.base.join(&Path::parse(relative)?))
    }

    /// The value this node points at.
    pub fn value(&self) -> Option<Value> {
        self.proxy.get_path(&self.base)
    }

    pub fn get(&self, relative: &str) -> Option<Value> {
        let path = self.resolve(relative).ok()?;
        self.proxy.get_path(&path)
    }

    pub fn set(&self, relative: &str, value: Value) -> Result<WriteOutcome, StateError> {
        self.proxy.set_path(&self.resolve(relative)?, value)
    }

    pub fn delete(&self, relative: &str) -> Result<Option<Value>, StateError> {
        self.proxy.delete(&self.resolve(relative)?.dotted())
    }

    pub fn watch<F>(&self, relative: &str, f: F) -> Result<Subscription, StateError>
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        self.proxy.watch(&self.resolve(relative)?.dotted(), f)
    }

    /// A view further down.
    pub fn at(&self, relative: &str) -> Result<StateNode, StateError> {
        Ok(StateNode {
            proxy: self.proxy.clone(),
            base: self.resolve(relative)?,
        })
    }
}
