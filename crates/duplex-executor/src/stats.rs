//! Engine counters.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EngineStats {
    pub(crate) accepted: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) released: AtomicU64,
    pub(crate) requests: AtomicU64,
    pub(crate) responses: AtomicU64,
    pub(crate) domain_errors: AtomicU64,
    pub(crate) protocol_violations: AtomicU64,
    pub(crate) discarded: AtomicU64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            accepted: get(&self.accepted),
            completed: get(&self.completed),
            released: get(&self.released),
            requests: get(&self.requests),
            responses: get(&self.responses),
            domain_errors: get(&self.domain_errors),
            protocol_violations: get(&self.protocol_violations),
            discarded: get(&self.discarded),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Streams bound to a peer
    pub accepted: u64,
    /// Streams that completed the finish handshake
    pub completed: u64,
    /// Stream contexts released (every outcome)
    pub released: u64,
    /// Requests handed to the operation handler
    pub requests: u64,
    /// Responses written
    pub responses: u64,
    pub domain_errors: u64,
    pub protocol_violations: u64,
    /// Late completions and signals dropped after cancel or release
    pub discarded: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepted={} completed={} released={} requests={} responses={} \
             domain_errors={} violations={} discarded={}",
            self.accepted,
            self.completed,
            self.released,
            self.requests,
            self.responses,
            self.domain_errors,
            self.protocol_violations,
            self.discarded,
        )
    }
}
