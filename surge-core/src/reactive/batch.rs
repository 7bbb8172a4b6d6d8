//! Batched Notification
//!
//! With batching enabled, a signal write does not call listeners. Instead the
//! signal lands in a dirty set together with the value it had when the tick
//! started. The first write of a tick asks the host for a microtask; when it
//! runs, the store visits every dirty signal once and delivers
//! `(current, value_at_tick_start)`.
//!
//! Writing `x` twice in one tick therefore produces one notification with
//! the first old value and the last new value. A signal that ends the tick
//! where it started produces none.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;

#[derive(Debug, Default)]
struct Tick {
    /// Signal name -> value at tick start, in first-write order.
    dirty: IndexMap<String, Value>,

    /// Whether a flush microtask is already queued.
    flush_queued: bool,
}

/// Dirty-set bookkeeping for one store.
///
/// The dirty set and the queued flag live under one lock so a write racing
/// a flush either lands in the set being taken or starts a new tick.
#[derive(Debug, Default)]
pub struct BatchedNotifier {
    tick: Mutex<Tick>,
}

impl BatchedNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write of `name` whose previous value was `old`.
    ///
    /// Only the first write per tick keeps its old value. Returns `true` when
    /// the caller must queue a flush (no flush is pending yet).
    pub fn record(&self, name: &str, old: &Value) -> bool {
        let mut tick = self.tick.lock();
        if !tick.dirty.contains_key(name) {
            tick.dirty.insert(name.to_string(), old.clone());
        }
        !std::mem::replace(&mut tick.flush_queued, true)
    }

    /// Take the dirty set for delivery. After this call the notifier is clean
    /// and the next write starts a new tick.
    pub fn take(&self) -> IndexMap<String, Value> {
        let mut tick = self.tick.lock();
        tick.flush_queued = false;
        std::mem::take(&mut tick.dirty)
    }

    pub fn is_pending(&self) -> bool {
        !self.tick.lock().dirty.is_empty()
    }

    /// Forget pending writes without notifying anyone.
    pub fn clear(&self) {
        self.take();
    }
}
