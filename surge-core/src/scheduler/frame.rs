//! Frame Scheduler
//!
//! Cooperative, frame-budgeted task execution over four priority lanes.
//!
//! # Processing Pass
//!
//! 1. The first `schedule` after an idle period requests a frame from the
//!    host. Further calls only append to their lane.
//! 2. When the frame arrives, lanes are visited strictly in priority order.
//!    Each lane runs tasks one by one until it is empty or the time since
//!    frame start reaches the lane's cutoff (input 8ms, animation 12ms,
//!    network 14ms, idle 16ms by default).
//! 3. Work left over keeps its FIFO position and another frame is
//!    requested; otherwise the scheduler goes idle.
//!
//! A panicking task is logged and counted; the pass continues.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, trace};

use super::lane::Priority;
use crate::config::SchedulerConfig;
use crate::host::Host;

/// A unit of scheduled work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Counters over the scheduler's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub passes: u64,
    pub tasks_run: u64,
    pub tasks_failed: u64,
    /// Passes that ended with work still queued.
    pub deferred_passes: u64,
}

#[derive(Default)]
struct SchedulerState {
    lanes: [VecDeque<Task>; 4],
    /// A frame has been requested and its pass has not finished yet.
    pass_requested: bool,
    stats: SchedulerStats,
}

impl SchedulerState {
    fn has_pending(&self) -> bool {
        self.lanes.iter().any(|lane| !lane.is_empty())
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    host: Arc<dyn Host>,
    state: Mutex<SchedulerState>,
}

/// The priority scheduler. Cloning shares the same lanes.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, host: Arc<dyn Host>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                host,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Append `task` to the lane for `priority`.
    pub fn schedule<F>(&self, task: F, priority: Priority)
    where
        F: FnOnce() + Send + 'static,
    {
        let request = {
            let mut state = self.inner.state.lock();
            state.lanes[priority.index()].push_back(Box::new(task));
            !std::mem::replace(&mut state.pass_requested, true)
        };
        trace!(lane = priority.as_str(), "scheduled task");
        if request {
            self.request_pass();
        }
    }

    /// Like [`schedule`](Self::schedule), with the lane given by name.
    /// Unknown names use [`Priority::DEFAULT`].
    pub fn schedule_named<F>(&self, task: F, priority: &str)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(task, Priority::parse_or_default(priority));
    }

    fn request_pass(&self) {
        let scheduler = Arc::downgrade(&self.inner);
        self.inner.host.request_frame(Box::new(move || {
            if let Some(inner) = scheduler.upgrade() {
                Scheduler { inner }.run_pass();
            }
        }));
    }

    /// Run one processing pass now.
    pub fn run_pass(&self) {
        let host = &self.inner.host;
        let start = host.now();
        let mut ran = 0u64;
        let mut failed = 0u64;

        for priority in Priority::ALL {
            let cutoff = self.inner.config.cutoff(priority);
            loop {
                if host.now().saturating_sub(start) >= cutoff {
                    break;
                }
                let task = self.inner.state.lock().lanes[priority.index()].pop_front();
                let Some(task) = task else { break };

                match panic::catch_unwind(AssertUnwindSafe(task)) {
                    Ok(()) => ran += 1,
                    Err(_) => {
                        failed += 1;
                        error!(lane = priority.as_str(), "scheduled task panicked");
                    }
                }
            }
        }

        let pending = {
            let mut state = self.inner.state.lock();
            state.stats.passes += 1;
            state.stats.tasks_run += ran;
            state.stats.tasks_failed += failed;
            let pending = state.has_pending();
            if pending {
                state.stats.deferred_passes += 1;
                state.pass_requested = true;
            } else {
                state.pass_requested = false;
            }
            pending
        };

        let elapsed = host.now().saturating_sub(start);
        debug!(ran, failed, pending, elapsed_us = elapsed.as_micros() as u64, "scheduler pass");

        if pending {
            self.request_pass();
        }
    }

    /// Tasks waiting in one lane.
    pub fn pending(&self, priority: Priority) -> usize {
        self.inner.state.lock().lanes[priority.index()].len()
    }

    /// No task queued in any lane.
    pub fn is_idle(&self) -> bool {
        !self.inner.state.lock().has_pending()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.state.lock().stats
    }

    /// Drop every queued task without running it.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        for lane in state.lanes.iter_mut() {
            lane.clear();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        let pending: Vec<usize> = state.lanes.iter().map(VecDeque::len).collect();
        f.debug_struct("Scheduler")
            .field("pending", &pending)
            .field("pass_requested", &state.pass_requested)
            .field("stats", &state.stats)
            .finish()
    }
}
