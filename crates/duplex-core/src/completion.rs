//! Completion queue abstraction.
//!
//! The completion queue is the sole hand-off point between I/O completions
//! and application logic. Transports and compute pools push; dispatch
//! workers pop.
//!
//! # Implementors
//!
//! - `BlockingQueue` (default, `duplex-module`): lock-free `SegQueue` with a
//!   condvar for parking idle workers.

use crate::error::Result;
use crate::event::CompletionEvent;

/// Ordered, thread-safe conduit of completion events.
///
/// **Contract:**
/// - `push()` may be called from any thread, concurrently with `pop()`,
///   and must never block on a consumer.
/// - `push()` after `shutdown()` returns `Err(QueueShutdown)`. Callers treat
///   that as a no-op; a push racing `shutdown()` may be accepted but is not
///   guaranteed to be delivered.
/// - `pop()` blocks until an event is available or the queue is shut down.
///   After shutdown it drains already-queued events, then returns `None`.
/// - No ordering across streams. Per-stream FIFO is inherited from the
///   producer pushing in order, not re-established by the queue.
pub trait CompletionQueue: Send + Sync {
    /// Enqueue one event.
    fn push(&self, event: CompletionEvent) -> Result<()>;

    /// Dequeue the next event, blocking. `None` is the shutdown sentinel.
    fn pop(&self) -> Option<CompletionEvent>;

    /// Dequeue without blocking.
    fn try_pop(&self) -> Option<CompletionEvent>;

    /// Stop accepting pushes and wake every blocked `pop()`. Idempotent.
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;

    /// Number of queued events (approximate under concurrency).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
