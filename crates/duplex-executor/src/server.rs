//! Lifecycle controller.
//!
//! Startup: validate → bind transport → offload pool → dispatch workers →
//! accept backlog. Shutdown: stop accepting → cancel live streams → bounded
//! drain → shut the queue → join workers → stop the pool → force-release
//! leftovers.

use duplex_core::completion::CompletionQueue;
use duplex_core::error::{DuplexError, Result};
use duplex_core::event::StreamRef;
use duplex_core::handler::OperationHandler;
use duplex_core::offload::ComputePool;
use duplex_core::transport::StreamTransport;
use duplex_module::offload_pool::OffloadPool;

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::stats::StatsSnapshot;
use crate::table::StreamInfo;

/// Outcome of `Server::shutdown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Live streams sent `Cancelled`
    pub cancelled: usize,
    /// Streams still present after the grace period
    pub forced: usize,
    pub elapsed: Duration,
}

pub struct Server<Q, T, H>
where
    Q: CompletionQueue + 'static,
    T: StreamTransport + 'static,
    H: OperationHandler,
{
    config: ServerConfig,
    engine: Arc<Engine<Q, T, H>>,
    pool: Option<Arc<dyn ComputePool>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    /// Set by the first shutdown; later calls return the same report.
    report: Mutex<Option<ShutdownReport>>,
}

impl<Q, T, H> Server<Q, T, H>
where
    Q: CompletionQueue + 'static,
    T: StreamTransport + 'static,
    H: OperationHandler,
{
    pub fn start(
        config: ServerConfig,
        queue: Arc<Q>,
        transport: Arc<T>,
        handler: Arc<H>,
    ) -> Result<Self> {
        config.validate()?;
        transport.bind()?;

        let pool: Option<Arc<dyn ComputePool>> = if config.offload_workers > 0 {
            let completions: Arc<dyn CompletionQueue> = queue.clone();
            let pool = OffloadPool::new(
                config.offload_workers,
                config.offload_queue_depth,
                Arc::clone(&handler),
                completions,
            )?;
            let pool: Arc<dyn ComputePool> = Arc::new(pool);
            Some(pool)
        } else {
            None
        };

        let engine = Arc::new(Engine::new(
            Arc::clone(&queue),
            Arc::clone(&transport),
            handler,
            pool.clone(),
            config.max_streams,
        ));

        let mut workers = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let engine = Arc::clone(&engine);
            let spawned = thread::Builder::new()
                .name(format!("duplex-dispatch-{}", worker_id))
                .spawn(move || engine.dispatch_loop(worker_id));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    transport.stop_accepting();
                    queue.shutdown();
                    for h in workers {
                        let _ = h.join();
                    }
                    if let Some(pool) = &pool {
                        pool.shutdown();
                    }
                    return Err(DuplexError::Spawn(e));
                }
            }
        }

        for _ in 0..config.accept_backlog {
            if let Err(e) = engine.request_stream() {
                warn!(error = %e, "initial accept request failed");
            }
        }

        info!(
            workers = config.workers,
            max_streams = config.max_streams,
            accept_backlog = config.accept_backlog,
            offload_workers = config.offload_workers,
            "server started"
        );

        Ok(Self {
            config,
            engine,
            pool,
            workers: Mutex::new(workers),
            report: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        self.engine.transport()
    }

    /// Abort one stream (it finishes with `Cancelled` if it was streaming).
    /// After shutdown this is a no-op.
    pub fn cancel(&self, stream: StreamRef) -> Result<()> {
        match self.engine.cancel(stream) {
            Err(DuplexError::QueueShutdown) => {
                debug!(stream = %stream, "cancel after shutdown ignored");
                Ok(())
            }
            other => other,
        }
    }

    /// Abort every live stream. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        self.engine.cancel_all()
    }

    pub fn live_streams(&self) -> Vec<StreamInfo> {
        self.engine.live_streams()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats()
    }

    pub fn is_shut_down(&self) -> bool {
        self.report.lock().is_some()
    }

    /// Idempotent; concurrent callers wait for the first one and get the
    /// same report.
    pub fn shutdown(&self) -> ShutdownReport {
        let mut report = self.report.lock();
        if let Some(done) = *report {
            return done;
        }
        let start = Instant::now();
        info!("server shutting down");

        // 1. No new streams; pending accepts complete with Shutdown.
        self.engine.transport().stop_accepting();

        // 2. Cancel everything that is still live.
        let cancelled = self.engine.cancel_all();
        debug!(cancelled, "cancel posted to live streams");

        // 3. Let cancelled streams finish their handshake.
        let deadline = start + self.config.shutdown_grace;
        while self.engine.live_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        // 4. Wake workers with the shutdown sentinel.
        self.engine.queue().shutdown();

        // 5. Join.
        let workers = std::mem::take(&mut *self.workers.lock());
        for h in workers {
            if h.join().is_err() {
                warn!("dispatch worker panicked");
            }
        }

        // 6. Offload threads; their late results are rejected by the queue.
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }

        // 7. Anything that did not drain in time.
        let forced = self.engine.force_release();
        if forced > 0 {
            warn!(forced, "streams force-released after grace period");
        }

        let done = ShutdownReport {
            cancelled,
            forced,
            elapsed: start.elapsed(),
        };
        info!(
            cancelled,
            forced,
            elapsed_ms = done.elapsed.as_millis() as u64,
            stats = %self.engine.stats(),
            "server stopped"
        );
        *report = Some(done);
        done
    }
}

impl<Q, T, H> Drop for Server<Q, T, H>
where
    Q: CompletionQueue + 'static,
    T: StreamTransport + 'static,
    H: OperationHandler,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
