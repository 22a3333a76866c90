//! `MemTransport` — default `StreamTransport` implementation.
//!
//! In-process duplex pipes. The server side implements the primitive
//! contract from `duplex-core::transport`; the client side (`ClientStream`)
//! sends requests, half-closes, cancels, and receives responses and the
//! final status over `crossbeam-channel`s.
//!
//! Every completion for a stream is posted while that stream's pipe lock is
//! held, so per-stream completion order is the order things happened.
//!
//! Lock order: registry, then pipe. Never the reverse.

use duplex_core::completion::CompletionQueue;
use duplex_core::error::TransportError;
use duplex_core::event::{CompletionEvent, EventKind, IoOutcome, ReadOutcome, StreamRef};
use duplex_core::message::{MathRequest, MathResponse, Status};
use duplex_core::transport::StreamTransport;

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Peer {
    Open,
    Cancelled,
    Gone,
}

struct PipeState {
    /// Set once the pipe is bound to a server-side stream.
    stream: Option<StreamRef>,
    inbox: VecDeque<MathRequest>,
    writes_done: bool,
    read_parked: bool,
    watch_armed: bool,
    /// A status has been delivered (or the pipe was torn down).
    finished: bool,
    peer: Peer,
    responses: Option<Sender<MathResponse>>,
    status: Option<Sender<Status>>,
}

impl PipeState {
    /// Close the response channel and hand `status` to the client.
    /// Returns false if the client side is no longer listening.
    fn close(&mut self, status: Status) -> bool {
        self.finished = true;
        self.watch_armed = false;
        self.read_parked = false;
        self.responses = None;
        match self.status.take() {
            Some(tx) => tx.try_send(status).is_ok(),
            None => false,
        }
    }
}

struct Pipe {
    queue: Arc<dyn CompletionQueue>,
    state: Mutex<PipeState>,
}

impl Pipe {
    fn post(&self, stream: StreamRef, kind: EventKind) -> IoOutcome {
        self.queue
            .push(CompletionEvent::new(stream, kind))
            .map_err(|_| TransportError::Shutdown)
    }

    /// Client-side post: the client has nobody to report a failure to.
    fn post_quiet(&self, stream: StreamRef, kind: EventKind) {
        let name = kind.name();
        if self.post(stream, kind).is_err() {
            trace!(stream = %stream, event = name, "completion dropped, queue shut down");
        }
    }
}

#[derive(Default)]
struct Registry {
    bound: bool,
    accepting: bool,
    /// Streams waiting for a peer, in request order.
    requested: VecDeque<StreamRef>,
    /// Peers waiting for a stream, in connect order.
    backlog: VecDeque<Arc<Pipe>>,
    streams: HashMap<StreamRef, Arc<Pipe>>,
}

pub struct MemTransport {
    queue: Arc<dyn CompletionQueue>,
    registry: Mutex<Registry>,
}

impl MemTransport {
    pub fn new(queue: Arc<dyn CompletionQueue>) -> Self {
        Self {
            queue,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Open a client stream. It is bound to the next requested server
    /// stream, or waits in the backlog until one is requested.
    pub fn connect(&self) -> Result<ClientStream, TransportError> {
        let (resp_tx, resp_rx) = unbounded();
        let (status_tx, status_rx) = bounded(1);
        let pipe = Arc::new(Pipe {
            queue: Arc::clone(&self.queue),
            state: Mutex::new(PipeState {
                stream: None,
                inbox: VecDeque::new(),
                writes_done: false,
                read_parked: false,
                watch_armed: false,
                finished: false,
                peer: Peer::Open,
                responses: Some(resp_tx),
                status: Some(status_tx),
            }),
        });

        let mut reg = self.registry.lock();
        if !reg.accepting {
            return Err(TransportError::Shutdown);
        }
        match reg.requested.pop_front() {
            Some(stream) => Self::attach(&mut reg, stream, Arc::clone(&pipe))?,
            None => reg.backlog.push_back(Arc::clone(&pipe)),
        }
        drop(reg);

        let peer = Arc::new(PeerHandle { pipe });
        Ok(ClientStream {
            writer: RequestWriter {
                peer: Arc::clone(&peer),
            },
            reader: ResponseReader {
                _peer: peer,
                responses: resp_rx,
                status: status_rx,
                final_status: None,
            },
        })
    }

    /// Server streams waiting for a peer.
    pub fn pending_accepts(&self) -> usize {
        self.registry.lock().requested.len()
    }

    /// Peers waiting for a server stream.
    pub fn backlog_len(&self) -> usize {
        self.registry.lock().backlog.len()
    }

    /// Streams bound and not yet released.
    pub fn bound_streams(&self) -> usize {
        self.registry.lock().streams.len()
    }

    fn attach(reg: &mut Registry, stream: StreamRef, pipe: Arc<Pipe>) -> IoOutcome {
        let mut st = pipe.state.lock();
        if let Err(e) = pipe.post(stream, EventKind::Connected(Ok(()))) {
            st.close(Status::Unavailable("server shutting down".into()));
            return Err(e);
        }
        st.stream = Some(stream);
        drop(st);
        reg.streams.insert(stream, pipe);
        trace!(stream = %stream, "peer attached");
        Ok(())
    }

    fn pipe(&self, stream: StreamRef) -> Result<Arc<Pipe>, TransportError> {
        self.registry
            .lock()
            .streams
            .get(&stream)
            .cloned()
            .ok_or(TransportError::UnknownStream(stream))
    }
}

impl StreamTransport for MemTransport {
    fn bind(&self) -> Result<(), TransportError> {
        let mut reg = self.registry.lock();
        if reg.bound {
            return Err(TransportError::Bind("already bound".into()));
        }
        reg.bound = true;
        reg.accepting = true;
        debug!("mem transport bound");
        Ok(())
    }

    fn request_stream(&self, stream: StreamRef) -> IoOutcome {
        let mut reg = self.registry.lock();
        if !reg.accepting {
            return Err(TransportError::Shutdown);
        }
        if reg.streams.contains_key(&stream) || reg.requested.contains(&stream) {
            return Err(TransportError::Busy);
        }
        match reg.backlog.pop_front() {
            Some(pipe) => Self::attach(&mut reg, stream, pipe),
            None => {
                reg.requested.push_back(stream);
                Ok(())
            }
        }
    }

    fn begin_read(&self, stream: StreamRef) -> IoOutcome {
        let pipe = self.pipe(stream)?;
        let mut st = pipe.state.lock();
        if st.finished {
            return Err(TransportError::Finished);
        }
        if st.read_parked {
            return Err(TransportError::Busy);
        }
        let outcome = match st.peer {
            Peer::Cancelled => ReadOutcome::Failed(TransportError::Abandoned),
            Peer::Gone => ReadOutcome::Failed(TransportError::PeerGone),
            Peer::Open => match st.inbox.pop_front() {
                Some(request) => ReadOutcome::Message(request),
                None if st.writes_done => ReadOutcome::EndOfStream,
                None => {
                    st.read_parked = true;
                    return Ok(());
                }
            },
        };
        pipe.post(stream, EventKind::ReadDone(outcome))
    }

    fn begin_write(&self, stream: StreamRef, response: MathResponse) -> IoOutcome {
        let pipe = self.pipe(stream)?;
        let st = pipe.state.lock();
        if st.finished {
            return Err(TransportError::Finished);
        }
        let outcome = match (st.peer, &st.responses) {
            (Peer::Cancelled, _) => Err(TransportError::Abandoned),
            (Peer::Gone, _) | (Peer::Open, None) => Err(TransportError::PeerGone),
            (Peer::Open, Some(tx)) => tx.send(response).map_err(|_| TransportError::PeerGone),
        };
        pipe.post(stream, EventKind::WriteDone(outcome))
    }

    fn begin_finish(&self, stream: StreamRef, status: Status) -> IoOutcome {
        let pipe = self.pipe(stream)?;
        let mut st = pipe.state.lock();
        if st.finished {
            return Err(TransportError::Finished);
        }
        if st.read_parked {
            // Nothing may complete after FinishDone.
            st.read_parked = false;
            pipe.post(stream, EventKind::ReadDone(ReadOutcome::Failed(TransportError::Abandoned)))?;
        }
        trace!(stream = %stream, status = %status, "finish");
        let outcome = if st.close(status) {
            Ok(())
        } else {
            Err(TransportError::PeerGone)
        };
        pipe.post(stream, EventKind::FinishDone(outcome))
    }

    fn notify_on_peer_or_cancel(&self, stream: StreamRef) -> IoOutcome {
        let pipe = self.pipe(stream)?;
        let mut st = pipe.state.lock();
        if st.finished {
            return Err(TransportError::Finished);
        }
        if st.watch_armed {
            return Err(TransportError::Busy);
        }
        match st.peer {
            Peer::Open => {
                st.watch_armed = true;
                Ok(())
            }
            Peer::Cancelled => pipe.post(stream, EventKind::Cancelled),
            Peer::Gone => pipe.post(stream, EventKind::PeerDone),
        }
    }

    fn abandon(&self, stream: StreamRef) {
        let mut reg = self.registry.lock();
        if let Some(pos) = reg.requested.iter().position(|s| *s == stream) {
            reg.requested.remove(pos);
            drop(reg);
            if self
                .queue
                .push(CompletionEvent::new(stream, EventKind::Connected(Err(TransportError::Abandoned))))
                .is_err()
            {
                trace!(stream = %stream, "abandoned accept dropped, queue shut down");
            }
            return;
        }
        let Some(pipe) = reg.streams.get(&stream).cloned() else {
            return;
        };
        drop(reg);

        let mut st = pipe.state.lock();
        st.watch_armed = false;
        if st.read_parked {
            st.read_parked = false;
            pipe.post_quiet(stream, EventKind::ReadDone(ReadOutcome::Failed(TransportError::Abandoned)));
        }
    }

    fn release(&self, stream: StreamRef) {
        let pipe = {
            let mut reg = self.registry.lock();
            reg.requested.retain(|s| *s != stream);
            reg.streams.remove(&stream)
        };
        if let Some(pipe) = pipe {
            let mut st = pipe.state.lock();
            if !st.finished {
                debug!(stream = %stream, "released without status");
                st.close(Status::Aborted("stream released without status".into()));
            }
        }
    }

    fn stop_accepting(&self) {
        let mut reg = self.registry.lock();
        if !reg.accepting {
            return;
        }
        reg.accepting = false;
        let requested: Vec<StreamRef> = reg.requested.drain(..).collect();
        let backlog: Vec<Arc<Pipe>> = reg.backlog.drain(..).collect();
        drop(reg);

        debug!(
            pending = requested.len(),
            backlog = backlog.len(),
            "mem transport stopped accepting"
        );
        for stream in requested {
            if self
                .queue
                .push(CompletionEvent::new(stream, EventKind::Connected(Err(TransportError::Shutdown))))
                .is_err()
            {
                trace!(stream = %stream, "failed accept dropped, queue shut down");
            }
        }
        for pipe in backlog {
            pipe.state.lock().close(Status::Unavailable("server shutting down".into()));
        }
    }
}

impl Drop for MemTransport {
    fn drop(&mut self) {
        // Unblock clients whose streams were never released.
        let reg = self.registry.get_mut();
        for pipe in reg.streams.values().chain(reg.backlog.iter()) {
            let mut st = pipe.state.lock();
            if !st.finished {
                st.close(Status::Aborted("transport dropped".into()));
            }
        }
    }
}

/// Shared by both client halves; dropping the last one means the peer is gone.
struct PeerHandle {
    pipe: Arc<Pipe>,
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        let mut st = self.pipe.state.lock();
        if st.peer == Peer::Gone {
            return;
        }
        st.peer = Peer::Gone;
        if st.finished || !st.watch_armed {
            return;
        }
        st.watch_armed = false;
        if let Some(stream) = st.stream {
            self.pipe.post_quiet(stream, EventKind::PeerDone);
        }
    }
}

/// Client end of one duplex stream.
pub struct ClientStream {
    writer: RequestWriter,
    reader: ResponseReader,
}

impl ClientStream {
    /// Separate the sending and receiving halves so they can run on
    /// different threads.
    pub fn split(self) -> (RequestWriter, ResponseReader) {
        (self.writer, self.reader)
    }

    pub fn send(&self, request: MathRequest) -> Result<(), TransportError> {
        self.writer.send(request)
    }

    pub fn writes_done(&self) {
        self.writer.writes_done()
    }

    pub fn cancel(&self) {
        self.writer.cancel()
    }

    pub fn recv(&mut self) -> Option<MathResponse> {
        self.reader.recv()
    }

    pub fn finish(self) -> Status {
        self.reader.finish()
    }
}

/// Sending half of a client stream.
pub struct RequestWriter {
    peer: Arc<PeerHandle>,
}

impl RequestWriter {
    /// Queue one request for the server. Fails once the stream is over, the
    /// client has half-closed, or the client has cancelled.
    pub fn send(&self, request: MathRequest) -> Result<(), TransportError> {
        let pipe = &self.peer.pipe;
        let mut st = pipe.state.lock();
        if st.finished || st.writes_done {
            return Err(TransportError::Finished);
        }
        if st.peer != Peer::Open {
            return Err(TransportError::Abandoned);
        }
        match st.stream {
            Some(stream) if st.read_parked => {
                st.read_parked = false;
                pipe.post_quiet(stream, EventKind::ReadDone(ReadOutcome::Message(request)));
            }
            _ => st.inbox.push_back(request),
        }
        Ok(())
    }

    /// Half-close: the server reads end-of-stream after the queued requests.
    pub fn writes_done(&self) {
        let pipe = &self.peer.pipe;
        let mut st = pipe.state.lock();
        if st.writes_done || st.finished {
            return;
        }
        st.writes_done = true;
        if let Some(stream) = st.stream {
            if st.read_parked && st.peer == Peer::Open {
                st.read_parked = false;
                pipe.post_quiet(stream, EventKind::ReadDone(ReadOutcome::EndOfStream));
            }
        }
    }

    /// Cancel the stream. The server observes `Cancelled` once its watch is
    /// armed.
    pub fn cancel(&self) {
        let pipe = &self.peer.pipe;
        let mut st = pipe.state.lock();
        if st.finished || st.peer != Peer::Open {
            return;
        }
        st.peer = Peer::Cancelled;
        if st.watch_armed {
            st.watch_armed = false;
            if let Some(stream) = st.stream {
                pipe.post_quiet(stream, EventKind::Cancelled);
            }
        }
    }
}

/// Receiving half of a client stream.
pub struct ResponseReader {
    _peer: Arc<PeerHandle>,
    responses: Receiver<MathResponse>,
    status: Receiver<Status>,
    final_status: Option<Status>,
}

fn transport_dropped() -> Status {
    Status::Aborted("transport dropped".into())
}

impl ResponseReader {
    /// Next response, blocking. `None` once the server has finished the
    /// stream and every response has been received.
    pub fn recv(&mut self) -> Option<MathResponse> {
        if let Ok(response) = self.responses.try_recv() {
            return Some(response);
        }
        if self.final_status.is_some() {
            return None;
        }

        let (response, status) = select! {
            recv(self.responses) -> msg => (msg.ok(), None),
            recv(self.status) -> st => (None, Some(st.ok())),
        };
        match (response, status) {
            (Some(response), _) => Some(response),
            (None, Some(status)) => {
                self.final_status = Some(status.unwrap_or_else(transport_dropped));
                // Responses are sent before the status; pick up a straggler.
                self.responses.try_recv().ok()
            }
            (None, None) => {
                // Response channel closed; the status is on its way.
                let status = self.status.recv().unwrap_or_else(|_| transport_dropped());
                self.final_status = Some(status);
                None
            }
        }
    }

    /// Wait for the final status. Responses not yet received are discarded.
    pub fn finish(mut self) -> Status {
        while self.recv().is_some() {}
        self.final_status.take().unwrap_or_else(transport_dropped)
    }
}
