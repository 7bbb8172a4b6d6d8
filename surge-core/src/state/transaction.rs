//! Transactions, undo and redo.
//!
//! All three end in [`StateProxy::restore`], which swaps in a snapshot
//! wholesale. Restoring never records history and never pushes values back
//! to bound signals.

use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;
use tracing::{debug, warn};

use super::path::{self, Path};
use super::proxy::{ProxyInner, StateProxy};
use super::snapshot::Snapshot;
use crate::error::StateError;

/// Clears the restoring flag even if a watcher panics.
struct Restoring<'a>(&'a ProxyInner);

impl Drop for Restoring<'_> {
    fn drop(&mut self) {
        self.0.state.lock().restoring = false;
    }
}

impl StateProxy {
    /// Run `f` against this proxy as one unit.
    ///
    /// Writes inside `f` take effect immediately. If `f` returns `Err` or
    /// panics, state is rolled back to what it was before `f` ran, and the
    /// error is returned (or the panic resumed). A committed transaction
    /// counts as a single undo step, and renders requested inside it are
    /// coalesced into one at the end.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StateProxy) -> Result<T, E>,
        E: From<StateError>,
    {
        let (before, version) = {
            let mut state = self.inner.state.lock();
            let before = self.snapshot_of(&state.target)?;
            state.transaction_depth += 1;
            (before, state.version)
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| f(self)));

        let (outermost, render) = {
            let mut state = self.inner.state.lock();
            state.transaction_depth -= 1;
            let outermost = state.transaction_depth == 0;
            let render = outermost && std::mem::take(&mut state.render_deferred);
            (outermost, render)
        };

        match result {
            Ok(Ok(value)) => {
                if outermost {
                    let mut state = self.inner.state.lock();
                    if state.version != version && state.history.is_enabled() && !state.restoring {
                        state.history.record(before);
                    }
                }
                if render {
                    self.request_render();
                }
                Ok(value)
            }
            Ok(Err(err)) => {
                debug!("transaction failed, rolling back");
                self.restore(before);
                Err(err)
            }
            Err(payload) => {
                warn!("transaction panicked, rolling back");
                self.restore(before);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Step back one recorded change. Returns `false` when there is nothing
    /// to undo.
    pub fn undo(&self) -> Result<bool, StateError> {
        let target = {
            let mut state = self.inner.state.lock();
            if !state.history.can_undo() {
                return Ok(false);
            }
            let current = self.snapshot_of(&state.target)?;
            state.history.undo(current)
        };
        Ok(target.map(|snapshot| self.restore(snapshot)).is_some())
    }

    /// Re-apply the last undone change. Returns `false` when there is
    /// nothing to redo.
    pub fn redo(&self) -> Result<bool, StateError> {
        let target = {
            let mut state = self.inner.state.lock();
            if !state.history.can_redo() {
                return Ok(false);
            }
            let current = self.snapshot_of(&state.target)?;
            state.history.redo(current)
        };
        Ok(target.map(|snapshot| self.restore(snapshot)).is_some())
    }

    pub fn can_undo(&self) -> bool {
        self.inner.state.lock().history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.inner.state.lock().history.can_redo()
    }

    /// `(undo steps, redo steps)` available.
    pub fn history_depth(&self) -> (usize, usize) {
        self.inner.state.lock().history.depth()
    }

    pub fn clear_history(&self) {
        self.inner.state.lock().history.clear();
    }

    /// Replace the whole state with `snapshot`.
    ///
    /// Keys missing from the snapshot are removed. Watchers of every
    /// top-level key whose value differs are notified.
    pub(super) fn restore(&self, snapshot: Snapshot) {
        let target = snapshot.into_value();
        let changed: Vec<(String, Value, Value)> = {
            let mut state = self.inner.state.lock();
            state.restoring = true;
            let previous = std::mem::replace(&mut state.target, target);
            state.bump();

            let mut keys = path::top_keys(&previous);
            for key in path::top_keys(&state.target) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            keys.into_iter()
                .filter_map(|key| {
                    let old = previous.get(&key).cloned().unwrap_or(Value::Null);
                    let new = state.target.get(&key).cloned().unwrap_or(Value::Null);
                    (old != new).then_some((key, new, old))
                })
                .collect()
        };

        {
            let _restoring = Restoring(&self.inner);
            for (key, new, old) in &changed {
                self.notify(&Path::key(key), new, old);
            }
        }
        debug!(changed = changed.len(), "restored snapshot");
        self.request_render();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::state::CloneStrategy;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn failed_transaction_rolls_back_and_returns_the_error() {
        let proxy = StateProxy::new(json!({"a": 0, "b": 0})).unwrap();

        let result = proxy.transaction(|state| -> Result<(), BoxError> {
            state.set("a", json!(1))?;
            state.set("b", json!(2))?;
            Err("x".into())
        });

        assert_eq!(result.unwrap_err().to_string(), "x");
        assert_eq!(proxy.get("a"), Some(json!(0)));
        assert_eq!(proxy.get("b"), Some(json!(0)));
        assert!(!proxy.can_undo());
    }

    #[test]
    fn panicking_transaction_rolls_back_and_resumes() {
        let proxy = StateProxy::new(json!({"a": 0})).unwrap();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), StateError> = proxy.transaction(|state| {
                state.set("a", json!(1))?;
                panic!("boom");
            });
        }));

        assert!(outcome.is_err());
        assert_eq!(proxy.get("a"), Some(json!(0)));
    }

    #[test]
    fn rollback_also_removes_added_keys() {
        let proxy = StateProxy::new(json!({"a": 0})).unwrap();
        let _ = proxy.transaction(|state| -> Result<(), StateError> {
            state.set("added", json!(true))?;
            state.delete("a")?;
            Err(StateError::InvalidPath("abort".into()))
        });
        assert_eq!(proxy.to_value(), json!({"a": 0}));
    }

    #[test]
    fn committed_transaction_is_one_undo_step() {
        let proxy = StateProxy::new(json!({"a": 0, "b": 0})).unwrap();
        proxy
            .transaction(|state| -> Result<(), StateError> {
                state.set("a", json!(1))?;
                state.set("b", json!(1))?;
                Ok(())
            })
            .unwrap();

        assert_eq!(proxy.history_depth(), (1, 0));
        assert!(proxy.undo().unwrap());
        assert_eq!(proxy.to_value(), json!({"a": 0, "b": 0}));
    }

    #[test]
    fn undo_and_redo_walk_three_mutations() {
        let proxy = StateProxy::new(json!({"n": 0})).unwrap();
        for n in 1..=3 {
            proxy.set("n", json!(n)).unwrap();
        }

        assert!(proxy.undo().unwrap());
        assert_eq!(proxy.get("n"), Some(json!(2)));
        assert!(proxy.redo().unwrap());
        assert_eq!(proxy.get("n"), Some(json!(3)));
        assert!(!proxy.redo().unwrap());
    }

    #[test]
    fn new_write_after_undo_clears_redo() {
        let proxy = StateProxy::new(json!({"n": 0})).unwrap();
        proxy.set("n", json!(1)).unwrap();
        proxy.undo().unwrap();
        proxy.set("n", json!(5)).unwrap();

        assert!(!proxy.can_redo());
        assert!(proxy.undo().unwrap());
        assert_eq!(proxy.get("n"), Some(json!(0)));
    }

    #[test]
    fn history_respects_its_limit() {
        let proxy = StateProxy::builder(json!({"n": 0}))
            .history_limit(2)
            .clone_strategy(CloneStrategy::Serialized)
            .build()
            .unwrap();
        for n in 1..=5 {
            proxy.set("n", json!(n)).unwrap();
        }

        assert!(proxy.undo().unwrap());
        assert!(proxy.undo().unwrap());
        assert!(!proxy.undo().unwrap());
        assert_eq!(proxy.get("n"), Some(json!(3)));
    }

    #[test]
    fn disabled_history_records_nothing() {
        let proxy = StateProxy::builder(json!({"n": 0}))
            .history_limit(0)
            .build()
            .unwrap();
        proxy.set("n", json!(1)).unwrap();
        assert!(!proxy.undo().unwrap());
    }

    #[test]
    fn restore_notifies_changed_top_level_keys_without_recording() {
        let proxy = StateProxy::new(json!({"a": 1, "b": 1})).unwrap();
        proxy.set("a", json!(2)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for key in ["a", "b"] {
            let log = seen.clone();
            proxy
                .watch(key, move |new, old| log.lock().push((key, new.clone(), old.clone())))
                .unwrap()
                .detach();
        }

        proxy.undo().unwrap();

        assert_eq!(*seen.lock(), vec![("a", json!(1), json!(2))]);
        assert_eq!(proxy.history_depth(), (0, 1));
    }

    #[test]
    fn watcher_writes_during_restore_skip_history() {
        let proxy = StateProxy::new(json!({"a": 0, "log": 0})).unwrap();
        proxy.set("a", json!(1)).unwrap();

        let inner = proxy.clone();
        proxy
            .watch("a", move |_, _| {
                let _ = inner.set("log", json!(1));
            })
            .unwrap()
            .detach();

        proxy.undo().unwrap();
        assert_eq!(proxy.get("log"), Some(json!(1)));
        assert_eq!(proxy.history_depth(), (0, 1));
    }
}
