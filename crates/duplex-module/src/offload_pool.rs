//! `OffloadPool` — default `ComputePool` implementation.
//!
//! Spawns N OS threads at creation. Workers dequeue jobs from a bounded
//! lock-free MPMC queue, run the operation handler, and post the result to
//! the completion queue as a `Computed` event for the job's stream.
//!
//! No dynamic scaling. Simple, predictable, safe.

use duplex_core::completion::CompletionQueue;
use duplex_core::error::{DuplexError, Result};
use duplex_core::event::{CompletionEvent, EventKind};
use duplex_core::handler::OperationHandler;
use duplex_core::offload::{ComputeJob, ComputePool};

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Shared state between submitters and workers.
struct PoolInner<H: ?Sized> {
    handler: Arc<H>,
    completions: Arc<dyn CompletionQueue>,
    jobs: ArrayQueue<ComputeJob>,
    /// Workers currently inside `handler.compute()`.
    active: AtomicUsize,
    shutdown: AtomicBool,
    total: usize,
}

pub struct OffloadPool<H: ?Sized + OperationHandler> {
    inner: Arc<PoolInner<H>>,
    threads: Vec<thread::Thread>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    next_wake: AtomicUsize,
}

impl<H: ?Sized + OperationHandler> OffloadPool<H> {
    /// Create a pool with `n` workers (clamped to 1..=64).
    ///
    /// `queue_depth`: max pending jobs before `submit` hands jobs back.
    pub fn new(
        n: usize,
        queue_depth: usize,
        handler: Arc<H>,
        completions: Arc<dyn CompletionQueue>,
    ) -> Result<Self> {
        let n = n.clamp(1, 64);
        let inner = Arc::new(PoolInner {
            handler,
            completions,
            jobs: ArrayQueue::new(queue_depth.max(1)),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            total: n,
        });

        let mut handles = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker_inner = Arc::clone(&inner);
            let spawned = thread::Builder::new()
                .name(format!("duplex-offload-{}", worker_id))
                .spawn(move || worker_loop(worker_inner, worker_id));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Unwind the workers already started.
                    inner.shutdown.store(true, Ordering::SeqCst);
                    for h in handles {
                        h.thread().unpark();
                        let _ = h.join();
                    }
                    return Err(DuplexError::Spawn(e));
                }
            }
        }

        let threads = handles.iter().map(|h| h.thread().clone()).collect();
        Ok(OffloadPool {
            inner,
            threads,
            handles: Mutex::new(handles),
            next_wake: AtomicUsize::new(0),
        })
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.inner.jobs.len()
    }
}

impl<H: ?Sized + OperationHandler> ComputePool for OffloadPool<H> {
    fn submit(&self, job: ComputeJob) -> std::result::Result<(), ComputeJob> {
        if self.inner.shutdown.load(Ordering::Relaxed) {
            return Err(job);
        }
        self.inner.jobs.push(job)?;
        let i = self.next_wake.fetch_add(1, Ordering::Relaxed) % self.threads.len();
        self.threads[i].unpark();
        Ok(())
    }

    fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    fn total_workers(&self) -> usize {
        self.inner.total
    }

    fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        for t in &self.threads {
            t.unpark();
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        for h in handles {
            let _ = h.join();
        }
        let dropped = self.queued();
        if dropped > 0 {
            debug!(dropped, "offload pool shut down with queued jobs");
        }
    }
}

impl<H: ?Sized + OperationHandler> Drop for OffloadPool<H> {
    fn drop(&mut self) {
        // Workers exit on their next poll; join only happens in shutdown().
        self.inner.shutdown.store(true, Ordering::SeqCst);
        for t in &self.threads {
            t.unpark();
        }
    }
}

/// Worker thread main loop.
fn worker_loop<H: ?Sized + OperationHandler>(inner: Arc<PoolInner<H>>, worker_id: usize) {
    trace!(worker_id, "offload worker started");
    loop {
        if inner.shutdown.load(Ordering::Relaxed) {
            break;
        }

        match inner.jobs.pop() {
            Some(job) => {
                inner.active.fetch_add(1, Ordering::Relaxed);
                let outcome = inner.handler.compute(&job.request);
                inner.active.fetch_sub(1, Ordering::Relaxed);

                let event = CompletionEvent::new(job.stream, EventKind::Computed(outcome));
                if inner.completions.push(event).is_err() {
                    // Queue shut down underneath us; nobody is listening.
                    trace!(stream = %job.stream, "dropping computed result after queue shutdown");
                }
            }
            None => {
                // Woken by submit(); the timeout covers a missed unpark.
                thread::park_timeout(Duration::from_millis(1));
            }
        }
    }
    trace!(worker_id, "offload worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::Arithmetic;
    use crate::blocking_queue::BlockingQueue;
    use duplex_core::error::DomainError;
    use duplex_core::event::StreamRef;
    use duplex_core::message::{MathRequest, MathResponse};

    fn job(index: u32, a: f64, b: f64, op: &str) -> ComputeJob {
        ComputeJob {
            stream: StreamRef::new(index, 1),
            request: MathRequest::new(a, b, op),
        }
    }

    #[test]
    fn test_results_posted_to_queue() {
        let q = Arc::new(BlockingQueue::new());
        let pool = OffloadPool::new(2, 16, Arc::new(Arithmetic), q.clone()).unwrap();
        assert_eq!(pool.total_workers(), 2);

        pool.submit(job(0, 64.0, 2.0, "/")).unwrap();
        pool.submit(job(1, 5.0, 0.0, "/")).unwrap();

        let mut got = vec![q.pop().unwrap(), q.pop().unwrap()];
        got.sort_by_key(|e| e.stream.index());
        assert_eq!(
            got[0].kind,
            EventKind::Computed(Ok(MathResponse { result: 32.0 }))
        );
        assert_eq!(
            got[1].kind,
            EventKind::Computed(Err(DomainError::DivisionByZero))
        );
        pool.shutdown();
    }

    #[test]
    fn test_full_queue_hands_job_back() {
        let q = Arc::new(BlockingQueue::new());
        let gate = Arc::new(AtomicBool::new(false));
        let g = Arc::clone(&gate);
        let slow = duplex_core::handler::HandlerFn(move |r: &MathRequest| -> std::result::Result<MathResponse, DomainError> {
            while !g.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(MathResponse { result: r.number1 })
        });
        let pool = OffloadPool::new(1, 1, Arc::new(slow), q.clone()).unwrap();

        // One job occupies the worker, one fills the queue, the next bounces.
        pool.submit(job(0, 1.0, 0.0, "+")).unwrap();
        while pool.queued() > 0 {
            thread::yield_now();
        }
        pool.submit(job(1, 2.0, 0.0, "+")).unwrap();
        let bounced = pool.submit(job(2, 3.0, 0.0, "+")).unwrap_err();
        assert_eq!(bounced.stream.index(), 2);

        gate.store(true, Ordering::Release);
        assert!(q.pop().is_some());
        assert!(q.pop().is_some());
        pool.shutdown();
    }

    #[test]
    fn test_submit_after_shutdown_rejected() {
        let q = Arc::new(BlockingQueue::new());
        let pool = OffloadPool::new(1, 4, Arc::new(Arithmetic), q).unwrap();
        pool.shutdown();
        assert!(pool.submit(job(0, 1.0, 1.0, "+")).is_err());
    }
}
