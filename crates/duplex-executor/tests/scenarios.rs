//! End-to-end scenarios: real workers, the in-memory transport, and the
//! arithmetic handler.

use duplex_core::completion::CompletionQueue;
use duplex_core::error::DomainError;
use duplex_core::event::{CompletionEvent, EventKind, StreamRef};
use duplex_core::handler::{HandlerFn, OperationHandler};
use duplex_core::message::{MathRequest, MathResponse, Status};
use duplex_core::offload::{ComputeJob, ComputePool};
use duplex_core::phase::Phase;
use duplex_core::transport::StreamTransport;
use duplex_executor::{Engine, Server, ServerConfig};
use duplex_module::arith::Arithmetic;
use duplex_module::blocking_queue::BlockingQueue;
use duplex_module::driver::{run_load, LoadConfig};
use duplex_module::mem_transport::MemTransport;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn start<H: OperationHandler>(
    config: ServerConfig,
    handler: H,
) -> Server<BlockingQueue, MemTransport, H> {
    let q = Arc::new(BlockingQueue::with_park_timeout(config.park_timeout));
    let t = Arc::new(MemTransport::new(q.clone()));
    Server::start(config, q, t, Arc::new(handler)).unwrap()
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[test]
fn million_divisions_on_one_stream() {
    let server = start(ServerConfig::new().workers(2), Arithmetic);
    let client = server.transport().connect().unwrap();
    let config = LoadConfig::new(1_000_000, MathRequest::new(64.0, 2.0, "/")).expect(32.0);

    let report = run_load(client, &config).unwrap();
    assert_eq!(report.sent, 1_000_000);
    assert_eq!(report.received, 1_000_000);
    assert_eq!(report.mismatches, 0);
    assert_eq!(report.status, Status::Ok);
    assert!(report.is_clean());

    server.shutdown();
    let stats = server.stats();
    assert_eq!(stats.responses, 1_000_000);
    assert_eq!(stats.protocol_violations, 0);
}

#[test]
fn division_by_zero_ends_stream_with_invalid_argument() {
    let server = start(ServerConfig::new(), Arithmetic);
    let client = server.transport().connect().unwrap();
    let config = LoadConfig::new(10, MathRequest::new(5.0, 0.0, "/"));

    let report = run_load(client, &config).unwrap();
    assert_eq!(report.received, 0);
    assert_eq!(
        report.status,
        Status::InvalidArgument(DomainError::DivisionByZero)
    );
    assert_eq!(server.stats().domain_errors, 1);
}

#[test]
fn responses_before_a_domain_error_stay_delivered() {
    let server = start(ServerConfig::new(), Arithmetic);
    let (w, mut r) = server.transport().connect().unwrap().split();
    w.send(MathRequest::new(1.0, 1.0, "+")).unwrap();
    w.send(MathRequest::new(1.0, 1.0, "%")).unwrap();
    // May or may not be accepted depending on how far the server got.
    let _ = w.send(MathRequest::new(2.0, 2.0, "+"));

    assert_eq!(r.recv(), Some(MathResponse { result: 2.0 }));
    assert_eq!(r.recv(), None);
    assert_eq!(
        r.finish(),
        Status::InvalidArgument(DomainError::UnknownOperator("%".into()))
    );
}

#[test]
fn n_requests_get_n_responses_in_order() {
    const N: u64 = 2000;
    let server = start(ServerConfig::new().workers(4), Arithmetic);
    let (w, mut r) = server.transport().connect().unwrap().split();

    let reader = thread::spawn(move || {
        let mut got = Vec::new();
        while let Some(resp) = r.recv() {
            got.push(resp.result);
        }
        (got, r.finish())
    });
    for i in 0..N {
        w.send(MathRequest::new(i as f64, 1.0, "+")).unwrap();
    }
    w.writes_done();

    let (got, status) = reader.join().unwrap();
    assert_eq!(status, Status::Ok);
    assert_eq!(got.len() as u64, N);
    for (i, result) in got.into_iter().enumerate() {
        assert_eq!(result, i as f64 + 1.0);
    }
}

#[test]
fn slow_stream_does_not_block_another() {
    let gate = Arc::new(AtomicBool::new(false));
    let g = Arc::clone(&gate);
    let handler = HandlerFn(move |r: &MathRequest| -> Result<MathResponse, DomainError> {
        if r.number1 < 0.0 {
            while !g.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
        }
        Arithmetic.compute(r)
    });
    let server = start(ServerConfig::new().workers(1).offload_workers(2), handler);

    let mut slow = server.transport().connect().unwrap();
    slow.send(MathRequest::new(-1.0, 1.0, "+")).unwrap();

    // B runs to completion while A's handler is stuck.
    let fast = server.transport().connect().unwrap();
    let report = run_load(
        fast,
        &LoadConfig::new(200, MathRequest::new(6.0, 7.0, "*")).expect(42.0),
    )
    .unwrap();
    assert!(report.is_clean());
    assert!(!gate.load(Ordering::Acquire));

    gate.store(true, Ordering::Release);
    assert_eq!(slow.recv(), Some(MathResponse { result: 0.0 }));
    slow.writes_done();
    assert_eq!(slow.finish(), Status::Ok);
}

#[test]
fn shutdown_with_three_streams_mid_flight() {
    let server = start(
        ServerConfig::new()
            .workers(2)
            .shutdown_grace(Duration::from_secs(5)),
        Arithmetic,
    );

    let mut clients = Vec::new();
    for i in 0..3 {
        let mut c = server.transport().connect().unwrap();
        c.send(MathRequest::new(i as f64, 10.0, "*")).unwrap();
        assert_eq!(c.recv(), Some(MathResponse { result: i as f64 * 10.0 }));
        // The next request is never sent: the stream sits in ReadPending.
        clients.push(c);
    }
    assert!(wait_until(Duration::from_secs(5), || {
        server
            .live_streams()
            .iter()
            .filter(|s| s.phase == Phase::ReadPending)
            .count()
            == 3
    }));

    let report = server.shutdown();
    assert!(report.cancelled >= 3);
    assert_eq!(report.forced, 0);
    assert!(server.live_streams().is_empty());
    for c in clients {
        assert_eq!(c.finish(), Status::Cancelled);
    }

    // Nothing is processed once the queue has shut down.
    let frozen = server.stats();
    assert_eq!(frozen.completed, 3);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(server.stats(), frozen);
    assert_eq!(server.shutdown(), report);
}

#[test]
fn client_drop_releases_stream() {
    let server = start(ServerConfig::new().workers(2), Arithmetic);
    let mut c = server.transport().connect().unwrap();
    c.send(MathRequest::new(1.0, 2.0, "-")).unwrap();
    assert_eq!(c.recv(), Some(MathResponse { result: -1.0 }));
    drop(c);

    assert!(wait_until(Duration::from_secs(5), || {
        server.stats().released == 1
    }));
    // And the server still serves new peers.
    let mut d = server.transport().connect().unwrap();
    d.send(MathRequest::new(9.0, 3.0, "/")).unwrap();
    assert_eq!(d.recv(), Some(MathResponse { result: 3.0 }));
    d.writes_done();
    assert_eq!(d.finish(), Status::Ok);
}

#[test]
fn peer_cancel_finishes_with_cancelled() {
    let server = start(ServerConfig::new().workers(2), Arithmetic);
    let mut c = server.transport().connect().unwrap();
    c.send(MathRequest::new(2.0, 2.0, "*")).unwrap();
    assert_eq!(c.recv(), Some(MathResponse { result: 4.0 }));
    c.cancel();
    assert_eq!(c.finish(), Status::Cancelled);
    assert!(wait_until(Duration::from_secs(5), || {
        server.stats().released == 1
    }));
}

#[test]
fn peer_cancels_with_offload_and_four_workers() {
    let config = ServerConfig::new().workers(4).offload_workers(2);
    let server = start(config, Arithmetic);
    for i in 0..500 {
        let mut c = server.transport().connect().unwrap();
        c.send(MathRequest::new(i as f64, 1.0, "+")).unwrap();
        assert_eq!(c.recv(), Some(MathResponse { result: i as f64 + 1.0 }));
        c.cancel();
        assert_eq!(c.finish(), Status::Cancelled, "stream {i}");
    }
    assert!(wait_until(Duration::from_secs(10), || {
        server.stats().released == 500
    }));
    assert_eq!(server.stats().protocol_violations, 0);
    assert_eq!(server.shutdown().forced, 0);
}

#[test]
fn server_cancel_all_from_control_surface() {
    let server = start(ServerConfig::new().workers(2).accept_backlog(1), Arithmetic);
    let mut c = server.transport().connect().unwrap();
    c.send(MathRequest::new(3.0, 3.0, "+")).unwrap();
    assert_eq!(c.recv(), Some(MathResponse { result: 6.0 }));

    let cancelled: Vec<StreamRef> = server.live_streams().iter().map(|i| i.stream).collect();
    assert!(server.cancel_all() >= 1);
    assert_eq!(c.finish(), Status::Cancelled);
    assert!(wait_until(Duration::from_secs(5), || {
        server
            .live_streams()
            .iter()
            .all(|i| !cancelled.contains(&i.stream))
    }));
    // Accepting continues after a cancel.
    let mut d = server.transport().connect().unwrap();
    d.send(MathRequest::new(1.0, 1.0, "+")).unwrap();
    assert_eq!(d.recv(), Some(MathResponse { result: 2.0 }));
}

// ── Cancellation in every phase, driven one event at a time ──

/// Holds offloaded jobs until the test lets them run.
#[derive(Default)]
struct HeldPool {
    jobs: Mutex<Vec<ComputeJob>>,
}

impl ComputePool for HeldPool {
    fn submit(&self, job: ComputeJob) -> Result<(), ComputeJob> {
        self.jobs.lock().push(job);
        Ok(())
    }
    fn active_workers(&self) -> usize {
        0
    }
    fn total_workers(&self) -> usize {
        1
    }
    fn shutdown(&self) {}
}

struct Rig {
    engine: Engine<BlockingQueue, MemTransport, Arithmetic>,
    pool: Arc<HeldPool>,
}

impl Rig {
    fn new() -> Self {
        let q = Arc::new(BlockingQueue::new());
        let t = Arc::new(MemTransport::new(q.clone()));
        t.bind().unwrap();
        let pool = Arc::new(HeldPool::default());
        let shared: Arc<dyn ComputePool> = pool.clone();
        Self {
            engine: Engine::new(q, t, Arc::new(Arithmetic), Some(shared), 8),
            pool,
        }
    }

    fn phase(&self, s: StreamRef) -> Option<Phase> {
        self.engine
            .live_streams()
            .into_iter()
            .find(|i| i.stream == s)
            .map(|i| i.phase)
    }

    /// Run held jobs and post their results. False if nothing was held.
    fn run_held(&self) -> bool {
        let jobs = std::mem::take(&mut *self.pool.jobs.lock());
        let ran = !jobs.is_empty();
        for job in jobs {
            let outcome = Arithmetic.compute(&job.request);
            self.engine
                .queue()
                .push(CompletionEvent::new(job.stream, EventKind::Computed(outcome)))
                .unwrap();
        }
        ran
    }

    fn step(&self) -> bool {
        match self.engine.queue().try_pop() {
            Some(ev) => {
                self.engine.dispatch(ev);
                true
            }
            None => self.run_held(),
        }
    }

    fn pump_until(&self, s: StreamRef, phase: Phase) {
        while self.phase(s) != Some(phase) {
            assert!(self.step(), "stream never reached {phase}");
        }
    }

    fn pump(&self) {
        while self.step() {}
    }
}

/// Cancel the stream in `phase`; returns (responses seen, final status).
fn cancel_in(phase: Phase) -> (usize, Status) {
    let rig = Rig::new();
    let s = rig.engine.request_stream().unwrap();
    let client = rig.engine.transport().connect().unwrap();
    match phase {
        Phase::ReadPending => {}
        Phase::Processing | Phase::WritePending => {
            client.send(MathRequest::new(64.0, 2.0, "/")).unwrap();
        }
        Phase::Closing => client.writes_done(),
        other => panic!("not a bound phase: {other}"),
    }
    rig.pump_until(s, phase);

    let requests = rig.engine.stats().requests;
    rig.engine
        .dispatch(CompletionEvent::new(s, EventKind::Cancelled));
    rig.pump();

    // Released, and nothing new was issued after the cancel.
    assert_eq!(rig.phase(s), None, "{phase}");
    assert_eq!(rig.engine.stats().requests, requests, "{phase}");
    assert_eq!(rig.engine.stats().protocol_violations, 0, "{phase}");

    let (_w, mut r) = client.split();
    let mut seen = 0;
    while r.recv().is_some() {
        seen += 1;
    }
    (seen, r.finish())
}

#[test]
fn cancel_while_connecting() {
    let rig = Rig::new();
    let s = rig.engine.request_stream().unwrap();
    assert_eq!(rig.phase(s), Some(Phase::Connecting));
    rig.engine.cancel(s).unwrap();
    rig.pump();
    assert_eq!(rig.phase(s), None);
    // The accept was re-armed on a fresh stream; a peer lands there.
    assert_eq!(rig.engine.transport().pending_accepts(), 1);
    let mut c = rig.engine.transport().connect().unwrap();
    c.send(MathRequest::new(1.0, 2.0, "*")).unwrap();
    rig.pump();
    assert_eq!(c.recv(), Some(MathResponse { result: 2.0 }));
}

#[test]
fn cancel_while_read_pending() {
    assert_eq!(cancel_in(Phase::ReadPending), (0, Status::Cancelled));
}

#[test]
fn cancel_while_processing() {
    assert_eq!(cancel_in(Phase::Processing), (0, Status::Cancelled));
}

#[test]
fn cancel_while_write_pending() {
    // The write already handed to the transport is delivered.
    assert_eq!(cancel_in(Phase::WritePending), (1, Status::Cancelled));
}

#[test]
fn cancel_while_closing() {
    // The finish handshake was already under way.
    assert_eq!(cancel_in(Phase::Closing), (0, Status::Ok));
}

#[test]
fn late_signal_after_release_is_discarded() {
    let rig = Rig::new();
    let s = rig.engine.request_stream().unwrap();
    let client = rig.engine.transport().connect().unwrap();
    client.writes_done();
    rig.pump();
    assert_eq!(client.finish(), Status::Ok);
    assert_eq!(rig.phase(s), None);

    let before = rig.engine.stats();
    rig.engine.dispatch(CompletionEvent::new(s, EventKind::Cancelled));
    let after = rig.engine.stats();
    assert_eq!(after.discarded, before.discarded + 1);
    assert_eq!(after.protocol_violations, 0);
}
