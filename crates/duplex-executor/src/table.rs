//! Stream table: fixed slots indexed by `StreamRef::index`, each behind its
//! own lock, with generation checks so a stale `StreamRef` never resolves.

use duplex_core::error::{DuplexError, Result};
use duplex_core::event::StreamRef;
use duplex_core::phase::Phase;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::context::{Step, StreamContext};

struct Slot {
    generation: u32,
    ctx: Option<StreamContext>,
}

/// Read-only view of one live stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub stream: StreamRef,
    pub phase: Phase,
    pub served: u64,
}

pub struct StreamTable {
    slots: Box<[Mutex<Slot>]>,
    free: Mutex<Vec<u32>>,
    live: AtomicUsize,
}

impl StreamTable {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, u32::MAX as usize);
        let slots = (0..capacity)
            .map(|_| {
                Mutex::new(Slot {
                    generation: 0,
                    ctx: None,
                })
            })
            .collect();
        // Lowest index is handed out first.
        let free = (0..capacity as u32).rev().collect();
        Self {
            slots,
            free: Mutex::new(free),
            live: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Claim a slot and install a connecting context in it.
    pub fn allocate(&self) -> Result<StreamRef> {
        let index = self
            .free
            .lock()
            .pop()
            .ok_or(DuplexError::TableFull(self.slots.len()))?;
        let mut slot = self.slots[index as usize].lock();
        slot.generation = slot.generation.wrapping_add(1);
        let stream = StreamRef::new(index, slot.generation);
        slot.ctx = Some(StreamContext::connecting(stream));
        self.live.fetch_add(1, Ordering::AcqRel);
        Ok(stream)
    }

    /// Advance the live context for `stream` under its slot lock. If the
    /// step says so, the context is dropped before the lock is released and
    /// the slot goes back on the free list.
    ///
    /// `None` if `stream` does not resolve (out of range, reused, or freed).
    pub fn advance<F>(&self, stream: StreamRef, f: F) -> Option<Step>
    where
        F: FnOnce(&mut StreamContext) -> Step,
    {
        let slot = self.slots.get(stream.index())?;
        let step = {
            let mut slot = slot.lock();
            if slot.generation != stream.generation() {
                return None;
            }
            let ctx = slot.ctx.as_mut()?;
            let step = f(ctx);
            if step.release {
                slot.ctx = None;
            }
            step
        };
        if step.release {
            self.recycle(stream);
        }
        Some(step)
    }

    /// Drop the context for `stream` regardless of its phase.
    /// Returns false if it was already gone.
    pub fn free(&self, stream: StreamRef) -> bool {
        let Some(slot) = self.slots.get(stream.index()) else {
            return false;
        };
        let taken = {
            let mut slot = slot.lock();
            slot.generation == stream.generation() && slot.ctx.take().is_some()
        };
        if taken {
            self.recycle(stream);
        }
        taken
    }

    /// Refs of every live context.
    pub fn live_refs(&self) -> Vec<StreamRef> {
        self.slots
            .iter()
            .filter_map(|slot| slot.lock().ctx.as_ref().map(|c| c.stream()))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<StreamInfo> {
        self.slots
            .iter()
            .filter_map(|slot| {
                slot.lock().ctx.as_ref().map(|c| StreamInfo {
                    stream: c.stream(),
                    phase: c.phase(),
                    served: c.served(),
                })
            })
            .collect()
    }

    /// Drop every live context; returns the refs that were dropped.
    pub fn drain(&self) -> Vec<StreamRef> {
        let mut drained = Vec::new();
        for slot in self.slots.iter() {
            let taken = slot.lock().ctx.take();
            if let Some(ctx) = taken {
                drained.push(ctx.stream());
                self.recycle(ctx.stream());
            }
        }
        drained
    }

    fn recycle(&self, stream: StreamRef) {
        self.free.lock().push(stream.index() as u32);
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}
