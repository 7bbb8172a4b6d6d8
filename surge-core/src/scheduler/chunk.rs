//! Chunked bulk processing on top of the scheduler.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::frame::Scheduler;
use super::lane::Priority;

pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;
pub type CompleteFn = Box<dyn FnOnce() + Send>;

/// Options for [`Scheduler::chunk_task`].
pub struct ChunkOptions {
    chunk_size: usize,
    priority: Priority,
    on_progress: Option<ProgressFn>,
    on_complete: Option<CompleteFn>,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            priority: Priority::Idle,
            on_progress: None,
            on_complete: None,
        }
    }
}

impl ChunkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items per slice. Zero is treated as one.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Called after every slice with `(processed, total)`.
    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(f));
        self
    }

    /// Called once after the last slice.
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_complete = Some(Box::new(f));
        self
    }
}

#[derive(Default)]
struct ChunkProgress {
    processed: AtomicUsize,
    cancelled: AtomicBool,
    complete: AtomicBool,
}

/// Observes and cancels a chunked job.
///
/// Cancellation is cooperative: a slice already running finishes, no
/// further slice is scheduled, and `on_complete` never fires.
#[derive(Clone)]
pub struct ChunkHandle {
    progress: Arc<ChunkProgress>,
    total: usize,
}

impl ChunkHandle {
    pub fn cancel(&self) {
        self.progress.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.progress.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_complete(&self) -> bool {
        self.progress.complete.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> usize {
        self.progress.processed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

struct ChunkJob<T, F> {
    items: Vec<T>,
    offset: usize,
    process: F,
    options: ChunkOptions,
    progress: Arc<ChunkProgress>,
}

impl<T, F> ChunkJob<T, F>
where
    T: Send + 'static,
    F: FnMut(&[T]) + Send + 'static,
{
    fn schedule(self, scheduler: Scheduler) {
        let priority = self.options.priority;
        let next = scheduler.clone();
        scheduler.schedule(move || self.run_slice(next), priority);
    }

    fn run_slice(mut self, scheduler: Scheduler) {
        if self.progress.cancelled.load(Ordering::SeqCst) {
            debug!(processed = self.offset, total = self.items.len(), "chunk job cancelled");
            return;
        }

        let total = self.items.len();
        let end = (self.offset + self.options.chunk_size).min(total);
        if self.offset < end {
            (self.process)(&self.items[self.offset..end]);
            self.offset = end;
            self.progress.processed.store(end, Ordering::SeqCst);
            if let Some(on_progress) = &self.options.on_progress {
                on_progress(end, total);
            }
        }

        if self.offset < total {
            self.schedule(scheduler);
        } else {
            self.progress.complete.store(true, Ordering::SeqCst);
            if let Some(on_complete) = self.options.on_complete.take() {
                on_complete();
            }
        }
    }
}

impl Scheduler {
    /// Process `items` in slices of `chunk_size`, one slice per task.
    ///
    /// The next slice is scheduled when the previous one finishes, so other
    /// work in higher lanes interleaves between slices.
    pub fn chunk_task<T, F>(&self, items: Vec<T>, process: F, options: ChunkOptions) -> ChunkHandle
    where
        T: Send + 'static,
        F: FnMut(&[T]) + Send + 'static,
    {
        let progress = Arc::new(ChunkProgress::default());
        let handle = ChunkHandle {
            progress: progress.clone(),
            total: items.len(),
        };
        ChunkJob {
            items,
            offset: 0,
            process,
            options,
            progress,
        }
        .schedule(self.clone());
        handle
    }
}
