//! The dispatch engine.
//!
//! ```text
//! loop {
//!     event := queue.pop()           // None → shutdown, exit
//!     slot  := table[event.stream]   // O(1), generation checked
//!     lock slot
//!         step := ctx.advance(event) // machine + primitives
//!         drop ctx if drained
//!     unlock
//!     release / re-arm accept        // other slots, no lock held
//! }
//! ```
//!
//! The engine is generic over the queue, transport and handler. Swap any
//! component and the loop doesn't change.

use duplex_core::completion::CompletionQueue;
use duplex_core::error::Result;
use duplex_core::event::{CompletionEvent, EventKind, StreamRef};
use duplex_core::handler::OperationHandler;
use duplex_core::offload::ComputePool;
use duplex_core::transport::StreamTransport;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

use crate::context::{Services, Step};
use crate::stats::{bump, EngineStats, StatsSnapshot};
use crate::table::{StreamInfo, StreamTable};

pub struct Engine<Q, T, H> {
    queue: Arc<Q>,
    transport: Arc<T>,
    handler: Arc<H>,
    pool: Option<Arc<dyn ComputePool>>,
    table: StreamTable,
    stats: EngineStats,
    /// Accepts skipped because the table was full.
    accept_deficit: AtomicUsize,
}

impl<Q, T, H> Engine<Q, T, H>
where
    Q: CompletionQueue,
    T: StreamTransport,
    H: OperationHandler,
{
    pub fn new(
        queue: Arc<Q>,
        transport: Arc<T>,
        handler: Arc<H>,
        pool: Option<Arc<dyn ComputePool>>,
        max_streams: usize,
    ) -> Self {
        Self {
            queue,
            transport,
            handler,
            pool,
            table: StreamTable::new(max_streams),
            stats: EngineStats::default(),
            accept_deficit: AtomicUsize::new(0),
        }
    }

    /// Allocate a stream and ask the transport for a peer to bind to it.
    pub fn request_stream(&self) -> Result<StreamRef> {
        let stream = match self.table.allocate() {
            Ok(stream) => stream,
            Err(e) => {
                self.accept_deficit.fetch_add(1, Ordering::AcqRel);
                debug!("stream table full, accept deferred");
                return Err(e);
            }
        };
        if let Err(e) = self.transport.request_stream(stream) {
            self.table.free(stream);
            debug!(stream = %stream, error = %e, "accept not requested");
            return Err(e.into());
        }
        trace!(stream = %stream, "accept requested");
        Ok(stream)
    }

    /// Route one completion event to its stream and advance it.
    pub fn dispatch(&self, event: CompletionEvent) {
        let CompletionEvent { stream, kind } = event;
        let signal = kind.is_signal();
        let name = kind.name();

        let svc = Services {
            transport: &*self.transport,
            handler: &*self.handler,
            pool: self.pool.as_deref(),
            stats: &self.stats,
        };
        match self.table.advance(stream, |ctx| ctx.advance(kind, &svc)) {
            Some(step) => self.follow_up(stream, step),
            None if signal => {
                debug!(stream = %stream, event = name, "signal for released stream discarded");
                bump(&self.stats.discarded);
            }
            None => {
                error!(stream = %stream, event = name, "completion for unknown stream");
                bump(&self.stats.protocol_violations);
            }
        }
    }

    fn follow_up(&self, stream: StreamRef, step: Step) {
        if step.release {
            self.transport.release(stream);
            bump(&self.stats.released);
            trace!(stream = %stream, "released");
            if self.take_deficit() {
                self.rearm_accept();
            }
        }
        if step.rearm_accept {
            self.rearm_accept();
        }
    }

    /// A failed re-arm is not fatal: a full table records a deficit, and a
    /// stopped transport means the server is shutting down.
    fn rearm_accept(&self) {
        if let Err(e) = self.request_stream() {
            trace!(error = %e, "accept not re-armed");
        }
    }

    fn take_deficit(&self) -> bool {
        self.accept_deficit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1))
            .is_ok()
    }

    /// Worker body: pop and dispatch until the queue shuts down.
    pub fn dispatch_loop(&self, worker_id: usize) {
        debug!(worker_id, "dispatch worker started");
        let mut handled = 0u64;
        while let Some(event) = self.queue.pop() {
            self.dispatch(event);
            handled += 1;
        }
        debug!(worker_id, handled, "dispatch worker exiting");
    }

    /// Post `Cancelled` for `stream`.
    pub fn cancel(&self, stream: StreamRef) -> Result<()> {
        self.queue
            .push(CompletionEvent::new(stream, EventKind::Cancelled))
    }

    /// Post `Cancelled` for every live stream. Returns how many were posted.
    pub fn cancel_all(&self) -> usize {
        self.table
            .live_refs()
            .into_iter()
            .filter(|s| self.cancel(*s).is_ok())
            .count()
    }

    /// Drop every remaining context and release it on the transport.
    /// Only safe once no worker is dispatching.
    pub fn force_release(&self) -> usize {
        let drained = self.table.drain();
        for stream in &drained {
            warn!(stream = %stream, "force-releasing stream");
            self.transport.release(*stream);
            bump(&self.stats.released);
        }
        drained.len()
    }

    pub fn live_count(&self) -> usize {
        self.table.live()
    }

    pub fn live_streams(&self) -> Vec<StreamInfo> {
        self.table.snapshot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn queue(&self) -> &Arc<Q> {
        &self.queue
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}
