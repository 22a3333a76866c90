//! Compute pool abstraction.
//!
//! A `ComputePool` runs operation handlers off the dispatch workers, so a
//! slow or blocking handler on one stream cannot stall completion delivery
//! for the others. Results come back as `Computed` events on the completion
//! queue.
//!
//! # Implementors
//!
//! - `OffloadPool` (default, `duplex-module`): spawns N OS threads at
//!   creation time, bounded lock-free job queue.

use crate::event::StreamRef;
use crate::message::MathRequest;

/// One handler invocation to run on the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeJob {
    pub stream: StreamRef,
    pub request: MathRequest,
}

/// Runs handler invocations on a pool of threads.
///
/// **Contract:**
/// - `submit()` must NEVER block the caller. If the pool is full or shut
///   down, the job is handed back in `Err` so the caller can run it inline.
/// - Each accepted job posts exactly one `Computed` event for `job.stream`
///   (unless the completion queue has been shut down meanwhile).
pub trait ComputePool: Send + Sync {
    fn submit(&self, job: ComputeJob) -> Result<(), ComputeJob>;

    /// Workers currently running a handler.
    fn active_workers(&self) -> usize;

    fn total_workers(&self) -> usize;

    /// Stop the workers and wait for them to exit.
    fn shutdown(&self);
}
