//! Priority Scheduler
//!
//! Decides when queued work (re-renders, bulk processing) actually runs.
//! Work goes into one of four FIFO lanes and is drained inside frame passes
//! requested from the [`Host`](crate::host::Host), highest lane first, each
//! lane capped by its own cutoff within the frame budget.

mod chunk;
mod frame;
mod lane;

pub use chunk::{ChunkHandle, ChunkOptions, CompleteFn, ProgressFn};
pub use frame::{Scheduler, SchedulerStats, Task};
pub use lane::{Priority, UnknownPriority};
