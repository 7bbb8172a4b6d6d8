//! Store
//!
//! The application-level handle: one signal store, one dispatcher and one
//! scheduler built from a single [`Config`] and [`Host`]. There is no global
//! instance; clone the store into whatever needs it.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::action::Dispatcher;
use crate::config::Config;
use crate::host::Host;
use crate::reactive::SignalStore;
use crate::scheduler::Scheduler;
use crate::state::{StateProxy, StateProxyBuilder};

struct StoreInner {
    config: Config,
    signals: SignalStore,
    actions: Dispatcher,
    scheduler: Scheduler,
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn new(config: Config, host: Arc<dyn Host>) -> Self {
        let signals = SignalStore::new(config.store.clone(), host.clone());
        let actions = Dispatcher::new(signals.clone());
        let scheduler = Scheduler::new(config.scheduler.clone(), host);
        debug!(batch_updates = config.store.batch_updates, "store created");
        Self {
            inner: Arc::new(StoreInner {
                config,
                signals,
                actions,
                scheduler,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn signals(&self) -> &SignalStore {
        &self.inner.signals
    }

    pub fn actions(&self) -> &Dispatcher {
        &self.inner.actions
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// A proxy builder preloaded with this store's state defaults.
    pub fn state(&self, initial: Value) -> StateProxyBuilder {
        StateProxy::builder(initial).from_config(&self.inner.config.state)
    }

    /// Clear signals, the journal, pending notifications, pipelines and
    /// queued actions. Calling it twice is the same as calling it once.
    pub fn reset(&self) {
        self.inner.actions.reset();
        self.inner.signals.reset();
        debug!("store reset");
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("signals", &self.inner.signals)
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}
