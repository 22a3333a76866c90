//! `BlockingQueue` — default `CompletionQueue` implementation.
//!
//! Events live in an unbounded lock-free `SegQueue`. Producers never take a
//! lock on the fast path; they only touch the condvar when a consumer has
//! announced itself as a sleeper. Consumers spin once through the queue,
//! then park on the condvar with a timeout as a backstop.

use duplex_core::completion::CompletionQueue;
use duplex_core::error::{DuplexError, Result};
use duplex_core::event::CompletionEvent;

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub struct BlockingQueue {
    events: SegQueue<CompletionEvent>,
    shutdown: AtomicBool,
    /// Consumers that are about to wait, or waiting, on `ready`.
    sleepers: AtomicUsize,
    lock: Mutex<()>,
    ready: Condvar,
    park_timeout: Duration,
}

impl BlockingQueue {
    pub fn new() -> Self {
        Self::with_park_timeout(Duration::from_millis(10))
    }

    /// `park_timeout` bounds how long an idle consumer sleeps before it
    /// re-checks the queue on its own.
    pub fn with_park_timeout(park_timeout: Duration) -> Self {
        Self {
            events: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            sleepers: AtomicUsize::new(0),
            lock: Mutex::new(()),
            ready: Condvar::new(),
            park_timeout,
        }
    }

    fn wake_one(&self) {
        // Pairs with the fence in `pop()`: either the consumer sees our event
        // on its re-check, or we see it in `sleepers`.
        fence(Ordering::SeqCst);
        if self.sleepers.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.ready.notify_one();
        }
    }
}

impl Default for BlockingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionQueue for BlockingQueue {
    fn push(&self, event: CompletionEvent) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(DuplexError::QueueShutdown);
        }
        self.events.push(event);
        self.wake_one();
        Ok(())
    }

    fn pop(&self) -> Option<CompletionEvent> {
        loop {
            if let Some(event) = self.events.pop() {
                return Some(event);
            }
            if self.shutdown.load(Ordering::Acquire) {
                // Drained: anything pushed before shutdown has been seen.
                return self.events.pop();
            }

            self.sleepers.fetch_add(1, Ordering::SeqCst);
            fence(Ordering::SeqCst);
            {
                let mut guard = self.lock.lock();
                if self.events.is_empty() && !self.shutdown.load(Ordering::SeqCst) {
                    self.ready.wait_for(&mut guard, self.park_timeout);
                }
            }
            self.sleepers.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn try_pop(&self) -> Option<CompletionEvent> {
        self.events.pop()
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let _guard = self.lock.lock();
        self.ready.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}
