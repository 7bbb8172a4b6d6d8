//! Surge Core
//!
//! This crate provides the reactive state core for the Surge UI framework.
//! It implements:
//!
//! - Named signals with eager derived signals and batched notification
//! - An action dispatcher serializing intents into async pipelines
//! - Transactional state proxies with undo/redo and two-way signal sync
//! - A frame-budgeted priority scheduler for renders and bulk work
//!
//! Rendering, templating and transport are left to the embedder. The core
//! only needs a [`Host`](host::Host) that can run microtasks, deliver frame
//! callbacks and tell the time.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: the signal store, listeners and batched notification
//! - `graph`: the derivation graph behind derived signals
//! - `action`: actions, pipelines and the dispatcher
//! - `state`: state proxies, history and snapshots
//! - `scheduler`: priority lanes, frame passes and chunked tasks
//! - `store`: the façade tying them to one config and one host
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use serde_json::json;
//! use surge_core::{Config, ManualHost, Store};
//!
//! let host = Arc::new(ManualHost::new());
//! let store = Store::new(Config::default(), host.clone());
//!
//! let count = store.signals().create_signal("count", json!(1))?;
//! store.signals().create_derived("doubled", &["count"], |v| {
//!     json!(v[0].as_i64().unwrap_or(0) * 2)
//! })?;
//!
//! count.set(json!(5))?;
//! assert_eq!(store.signals().get("doubled")?, json!(10));
//!
//! // Listeners run once the host drains its microtasks.
//! host.run_microtasks();
//! ```

pub mod action;
pub mod config;
pub mod error;
pub mod graph;
pub mod host;
pub mod reactive;
pub mod scheduler;
pub mod state;
pub mod store;

pub use action::{Action, ActionContext, Capability, Dispatcher, PipelineOptions};
pub use config::{Config, SchedulerConfig, StateConfig, StoreConfig};
pub use error::{BoxError, Error, HostError, Result, SignalError, StateError};
pub use host::{Host, ManualHost, TokioHost};
pub use reactive::{SignalHandle, SignalStore, Subscription};
pub use scheduler::{ChunkHandle, ChunkOptions, Priority, Scheduler};
pub use state::{CloneStrategy, StateNode, StateProxy, WriteOutcome};
pub use store::Store;
