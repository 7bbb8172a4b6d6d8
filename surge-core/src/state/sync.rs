//! Two-way sync between a top-level state key and a signal.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::path::Path;
use super::proxy::StateProxy;
use crate::error::{Error, StateError};
use crate::reactive::{SignalStore, Subscription};

pub(super) struct Binding {
    store: SignalStore,
    signal: String,
    _subscription: Subscription,
}

impl StateProxy {
    /// Keep top-level `key` in step with `signal`.
    ///
    /// The signal's current value is pulled into `key` right away. After
    /// that, writes to `key` are pushed to the signal and signal changes are
    /// written to `key` through the normal write path. Restores (undo, redo,
    /// rollback) are never pushed.
    pub fn bind_signal(&self, store: &SignalStore, signal: &str, key: &str) -> Result<(), Error> {
        let path = Path::parse(key)?;
        if path.len() != 1 {
            return Err(StateError::InvalidPath(key.to_string()).into());
        }
        let current = store.get(signal)?;

        let proxy = Arc::downgrade(&self.inner);
        let bound_key = key.to_string();
        let subscription = store.watch(signal, move |new, _| {
            let Some(inner) = proxy.upgrade() else {
                return;
            };
            let proxy = StateProxy { inner };
            if proxy.get(&bound_key).as_ref() == Some(new) {
                return;
            }
            match proxy.set(&bound_key, new.clone()) {
                Ok(outcome) if !outcome.is_applied() => {
                    warn!(key = %bound_key, "bound signal value rejected by validator");
                }
                Ok(_) => {}
                Err(err) => warn!(key = %bound_key, error = %err, "could not pull bound signal"),
            }
        })?;

        if self.get_path(&path).as_ref() != Some(&current) {
            self.set_path(&path, current)?;
        }

        self.inner.bindings.lock().insert(
            key.to_string(),
            Binding {
                store: store.clone(),
                signal: signal.to_string(),
                _subscription: subscription,
            },
        );
        debug!(key, signal, "bound state key to signal");
        Ok(())
    }

    /// Stop syncing `key`. Returns `false` if it was not bound.
    pub fn unbind_signal(&self, key: &str) -> bool {
        let removed = self.inner.bindings.lock().remove(key);
        removed.is_some()
    }

    pub(super) fn push_binding(&self, path: &Path) {
        let Some(top) = path.top() else {
            return;
        };
        if self.inner.state.lock().restoring {
            return;
        }
        let target = self
            .inner
            .bindings
            .lock()
            .get(top)
            .map(|binding| (binding.store.clone(), binding.signal.clone()));
        let Some((store, signal)) = target else {
            return;
        };

        let value = self.get_path(&Path::key(top)).unwrap_or(Value::Null);
        if let Err(err) = store.set(&signal, value) {
            warn!(signal = %signal, error = %err, "could not push state to bound signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::error::SignalError;
    use crate::host::ManualHost;
    use serde_json::json;

    fn store() -> SignalStore {
        let config = StoreConfig {
            batch_updates: false,
            ..StoreConfig::default()
        };
        SignalStore::new(config, Arc::new(ManualHost::new()))
    }

    #[test]
    fn binding_pulls_then_syncs_both_ways() {
        let store = store();
        store.create_signal("theme", json!("dark")).unwrap();
        let proxy = StateProxy::new(json!({"theme": "light"})).unwrap();

        proxy.bind_signal(&store, "theme", "theme").unwrap();
        assert_eq!(proxy.get("theme"), Some(json!("dark")));

        proxy.set("theme", json!("solarized")).unwrap();
        assert_eq!(store.get("theme").unwrap(), json!("solarized"));

        store.set("theme", json!("light")).unwrap();
        assert_eq!(proxy.get("theme"), Some(json!("light")));
    }

    #[test]
    fn undo_is_not_pushed_to_the_signal() {
        let store = store();
        store.create_signal("n", json!(0)).unwrap();
        let proxy = StateProxy::new(json!({"n": 0})).unwrap();
        proxy.bind_signal(&store, "n", "n").unwrap();

        proxy.set("n", json!(1)).unwrap();
        proxy.undo().unwrap();

        assert_eq!(proxy.get("n"), Some(json!(0)));
        assert_eq!(store.get("n").unwrap(), json!(1));
    }

    #[test]
    fn unbinding_stops_both_directions() {
        let store = store();
        store.create_signal("n", json!(0)).unwrap();
        let proxy = StateProxy::new(json!({})).unwrap();
        proxy.bind_signal(&store, "n", "n").unwrap();
        assert_eq!(store.listener_count("n"), 1);

        assert!(proxy.unbind_signal("n"));
        assert_eq!(store.listener_count("n"), 0);

        proxy.set("n", json!(7)).unwrap();
        assert_eq!(store.get("n").unwrap(), json!(0));
    }

    #[test]
    fn binding_requires_a_known_signal_and_top_level_key() {
        let store = store();
        let proxy = StateProxy::new(json!({})).unwrap();

        assert!(matches!(
            proxy.bind_signal(&store, "missing", "k"),
            Err(Error::Signal(SignalError::UnknownSignal(_)))
        ));
        store.create_signal("s", json!(1)).unwrap();
        assert!(matches!(
            proxy.bind_signal(&store, "s", "a.b"),
            Err(Error::State(StateError::InvalidPath(_)))
        ));
    }
}
