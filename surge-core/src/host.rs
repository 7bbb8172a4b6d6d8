//! Host Integration
//!
//! The core never touches a clock or an event loop directly. Everything that
//! needs to run "later" goes through a [`Host`]:
//!
//! - the batched notifier queues its flush as a microtask;
//! - the priority scheduler requests frames and measures elapsed time.
//!
//! [`ManualHost`] runs nothing on its own; the embedder (or a test) pumps it.
//! [`TokioHost`] maps microtasks and frames onto spawned tokio tasks. It
//! only accepts a current-thread runtime: a spawned task there cannot start
//! until the task that queued it yields, which is what a microtask needs.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::time::Instant;

use crate::error::HostError;

/// A deferred unit of work handed to the host.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Task-scheduling primitives provided by the embedding environment.
pub trait Host: Send + Sync {
    /// Run `job` after the current synchronous tick completes.
    fn queue_microtask(&self, job: Job);

    /// Run `job` at the start of the next frame.
    fn request_frame(&self, job: Job);

    /// Monotonic time since the host was created.
    fn now(&self) -> Duration;
}

/// A host that only runs work when told to.
///
/// Time is virtual: it only moves when [`advance`](ManualHost::advance) is
/// called, which makes frame budgets reproducible.
#[derive(Default)]
pub struct ManualHost {
    microtasks: Mutex<VecDeque<Job>>,
    frames: Mutex<VecDeque<Job>>,
    elapsed: Mutex<Duration>,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run queued microtasks until the queue is empty, including any queued
    /// while running. Returns the number of jobs run.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            // Never hold the lock while a job runs: jobs queue more jobs.
            let job = self.microtasks.lock().pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Run the frame callbacks that were pending when this call started.
    /// Frames requested while running land in the next frame.
    /// Returns `false` if no frame was pending.
    pub fn run_frame(&self) -> bool {
        let pending: Vec<Job> = self.frames.lock().drain(..).collect();
        if pending.is_empty() {
            return false;
        }
        for job in pending {
            job();
        }
        true
    }

    /// Run frames until none is requested, up to `max_frames`.
    /// Returns the number of frames run.
    pub fn run_frames(&self, max_frames: usize) -> usize {
        let mut frames = 0;
        while frames < max_frames && self.run_frame() {
            frames += 1;
        }
        frames
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.lock().len()
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.lock().len()
    }

    /// Move virtual time forward.
    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }
}

impl Host for ManualHost {
    fn queue_microtask(&self, job: Job) {
        self.microtasks.lock().push_back(job);
    }

    fn request_frame(&self, job: Job) {
        self.frames.lock().push_back(job);
    }

    fn now(&self) -> Duration {
        *self.elapsed.lock()
    }
}

/// A host backed by a tokio runtime.
pub struct TokioHost {
    handle: Handle,
    started: Instant,
    frame_interval: Duration,
}

impl TokioHost {
    /// Wrap a current-thread runtime. Multi-thread runtimes are refused
    /// because a flush could run on another worker mid-tick.
    pub fn new(handle: Handle, frame_interval: Duration) -> Result<Self, HostError> {
        match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Ok(Self {
                handle,
                started: Instant::now(),
                frame_interval,
            }),
            other => Err(HostError::UnsupportedRuntime(format!("{:?}", other))),
        }
    }

    /// Build a host on the runtime the caller is running in.
    pub fn current(frame_interval: Duration) -> Result<Self, HostError> {
        let handle = Handle::try_current().map_err(|_| HostError::NoRuntime)?;
        Self::new(handle, frame_interval)
    }
}

impl Host for TokioHost {
    fn queue_microtask(&self, job: Job) {
        self.handle.spawn(async move { job() });
    }

    fn request_frame(&self, job: Job) {
        let interval = self.frame_interval;
        self.handle.spawn(async move {
            tokio::time::sleep(interval).await;
            job();
        });
    }

    fn now(&self) -> Duration {
        self.started.elapsed()
    }
}
