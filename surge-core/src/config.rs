//! Runtime Configuration
//!
//! Every tunable of the core lives here. All sections deserialize with
//! `#[serde(default)]`, so a config file only needs to mention the values it
//! overrides:
//!
//! ```json
//! { "store": { "batch_updates": false }, "scheduler": { "frame_budget_ms": 8 } }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scheduler::Priority;
use crate::state::CloneStrategy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub state: StateConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Parse a configuration from JSON text.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a configuration from MessagePack bytes.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, ConfigError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Signal store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Coalesce writes made in one tick into a single notification pass.
    pub batch_updates: bool,

    /// Maximum number of entries kept in the change journal.
    pub journal_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_updates: true,
            journal_limit: 100,
        }
    }
}

/// Defaults applied to every state proxy built from this config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Snapshots kept for undo. Zero disables history.
    pub history_limit: usize,

    /// Reject assignments below the root.
    pub immutable: bool,

    /// Strict mode: validation rejections become errors.
    pub debug: bool,

    pub clone_strategy: CloneStrategy,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            immutable: false,
            debug: false,
            clone_strategy: CloneStrategy::Structural,
        }
    }
}

/// Frame budget and per-lane cutoffs, all in milliseconds since frame start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub frame_budget_ms: u64,
    pub input_cutoff_ms: u64,
    pub animation_cutoff_ms: u64,
    pub network_cutoff_ms: u64,
    pub idle_cutoff_ms: u64,

    /// Delay between frame requests when running on [`TokioHost`](crate::host::TokioHost).
    pub frame_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_budget_ms: 16,
            input_cutoff_ms: 8,
            animation_cutoff_ms: 12,
            network_cutoff_ms: 14,
            idle_cutoff_ms: 16,
            frame_interval_ms: 16,
        }
    }
}

impl SchedulerConfig {
    /// Elapsed-since-frame-start cutoff for a lane, clamped to the frame budget.
    pub fn cutoff(&self, priority: Priority) -> Duration {
        let ms = match priority {
            Priority::Input => self.input_cutoff_ms,
            Priority::Animation => self.animation_cutoff_ms,
            Priority::Network => self.network_cutoff_ms,
            Priority::Idle => self.idle_cutoff_ms,
        };
        Duration::from_millis(ms.min(self.frame_budget_ms))
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}
