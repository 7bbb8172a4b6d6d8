//! Transactional State Proxy
//!
//! Component-local state with computed keys, validation, middleware,
//! immutability, transactions and undo/redo.
//!
//! A [`StateProxy`] owns one state object. It is deliberately independent
//! of the signal store; [`StateProxy::bind_signal`] is the only bridge
//! between the two.
//!
//! # Example
//!
//! ```rust,ignore
//! let state = StateProxy::builder(json!({ "items": [], "filter": "" }))
//!     .computed("count", |s| json!(s["items"].as_array().map_or(0, Vec::len)))
//!     .validator("filter", |v| v.is_string().then_some(()).ok_or("filter must be text".into()))
//!     .build()?;
//!
//! state.transaction(|s| {
//!     s.set("items.0", json!("milk"))?;
//!     s.set("filter", json!("m"))
//! })?;
//! assert_eq!(state.get("count"), Some(json!(1)));
//! state.undo()?;
//! ```

mod history;
mod mount;
mod node;
mod path;
mod proxy;
mod snapshot;
mod sync;
mod transaction;

pub use history::History;
pub use mount::RenderFn;
pub use node::StateNode;
pub use path::Path;
pub use proxy::{
    ComputedFn, MiddlewareFn, StateProxy, StateProxyBuilder, ValidatorFn, WatchFn, WriteOutcome,
    RESERVED_KEYS,
};
pub use snapshot::{CloneStrategy, Snapshot};
