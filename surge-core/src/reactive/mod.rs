//! Reactive Primitives
//!
//! This module implements the signal store: named signals, derived signals,
//! listeners, and batched notification.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A signal is a named cell holding a [`serde_json::Value`]. Names are unique
//! within a store. Writing a signal notifies its listeners with
//! `(new, old)` unless the new value equals the current one.
//!
//! ## Derived Signals
//!
//! A derived signal declares its dependencies by name and a pure compute
//! function over their values. It recomputes eagerly and synchronously
//! whenever a dependency changes, so reading it right after a write always
//! sees the new value. Derived signals cannot be written.
//!
//! ## Batching
//!
//! With `batch_updates` on, listener calls are deferred to the end of the
//! tick and coalesced per signal. Derived recomputation is never deferred.
//!
//! # Notification Order
//!
//! Listeners on one signal are called in registration order. Across
//! signals, batched notifications are delivered in the order the signals
//! were first written during the tick.

mod batch;
mod runtime;
mod signal;
mod subscriber;

pub use batch::BatchedNotifier;
pub use runtime::{SignalChange, SignalStore};
pub use signal::{ComputeFn, Listener, SignalHandle, GLOBAL_SCOPE};
pub use subscriber::{SubscriberId, Subscription};
