//! Per-stream context: phase, in-flight primitives, and the code that
//! carries out the machine's actions.
//!
//! A context is only ever touched under its stream table slot lock, by
//! the worker currently advancing it.

use duplex_core::error::{DuplexError, TransportError};
use duplex_core::event::{EventKind, Primitive, StreamRef};
use duplex_core::handler::OperationHandler;
use duplex_core::message::{MathRequest, MathResponse, Status};
use duplex_core::offload::{ComputeJob, ComputePool};
use duplex_core::phase::Phase;
use duplex_core::transport::StreamTransport;

use tracing::{debug, error, trace};

use crate::machine::{transition, Action, Transition};
use crate::stats::{bump, EngineStats};

/// What a context needs to act on an event.
pub struct Services<'a, T: ?Sized, H: ?Sized> {
    pub transport: &'a T,
    pub handler: &'a H,
    pub pool: Option<&'a dyn ComputePool>,
    pub stats: &'a EngineStats,
}

/// Follow-up work for the engine once the slot lock is dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Step {
    /// An accept request was consumed; keep the backlog topped up.
    pub rearm_accept: bool,
    /// Done with nothing in flight: free the slot and release the stream.
    pub release: bool,
}

#[derive(Debug)]
pub struct StreamContext {
    stream: StreamRef,
    phase: Phase,
    /// Request currently being processed.
    request: Option<MathRequest>,
    /// Response handed to the transport, held until its `WriteDone`.
    response: Option<MathResponse>,
    /// False once the stream is cancelled or aborted; no new primitive is
    /// issued after that.
    running: bool,
    /// Issued primitives still awaiting their completion (`Primitive::bit`).
    inflight: u8,
    served: u64,
}

impl StreamContext {
    /// A context for a stream whose accept request is about to be issued.
    pub fn connecting(stream: StreamRef) -> Self {
        Self {
            stream,
            phase: Phase::Connecting,
            request: None,
            response: None,
            running: true,
            inflight: Primitive::Accept.bit(),
            served: 0,
        }
    }

    #[inline]
    pub fn stream(&self) -> StreamRef {
        self.stream
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[inline]
    pub fn is_inflight(&self, p: Primitive) -> bool {
        self.inflight & p.bit() != 0
    }

    /// Responses written on this stream.
    #[inline]
    pub fn served(&self) -> u64 {
        self.served
    }

    #[inline]
    pub fn can_release(&self) -> bool {
        self.phase.is_terminal() && self.inflight == 0
    }

    /// Feed one event through the machine. Inline compute results are fed
    /// back in the same call.
    pub fn advance<T, H>(&mut self, kind: EventKind, svc: &Services<'_, T, H>) -> Step
    where
        T: StreamTransport + ?Sized,
        H: OperationHandler + ?Sized,
    {
        let mut step = Step::default();
        let mut pending = Some(kind);
        while let Some(kind) = pending.take() {
            pending = self.apply(kind, svc, &mut step);
        }
        step.release = self.can_release();
        step
    }

    fn apply<T, H>(
        &mut self,
        kind: EventKind,
        svc: &Services<'_, T, H>,
        step: &mut Step,
    ) -> Option<EventKind>
    where
        T: StreamTransport + ?Sized,
        H: OperationHandler + ?Sized,
    {
        let name = kind.name();
        match kind.primitive() {
            Some(p) => {
                if !self.is_inflight(p) {
                    self.violation(svc, name, "completion without an in-flight primitive");
                    return None;
                }
                self.inflight &= !p.bit();
                if p == Primitive::Write {
                    let written = self.response.take();
                    if let EventKind::WriteDone(Err(e)) = &kind {
                        debug!(stream = %self.stream, response = ?written, error = %e, "write failed");
                    }
                }
                if p == Primitive::Accept {
                    step.rearm_accept = true;
                }
                // The finish handshake still completes a cancelled stream.
                if self.phase.is_terminal() || (!self.running && p != Primitive::Finish) {
                    trace!(stream = %self.stream, event = name, phase = %self.phase, "abandoned completion discarded");
                    bump(&svc.stats.discarded);
                    return None;
                }
            }
            None if self.phase.is_terminal() => {
                debug!(stream = %self.stream, event = name, "signal after done discarded");
                bump(&svc.stats.discarded);
                return None;
            }
            None => {}
        }

        if let EventKind::WriteDone(Ok(())) = &kind {
            self.served += 1;
            bump(&svc.stats.responses);
        }

        let from = self.phase;
        let Transition { next, action } = transition(from, kind);
        trace!(stream = %self.stream, event = name, from = %from, to = %next, "transition");
        self.phase = next;
        self.perform(action, name, svc)
    }

    fn perform<T, H>(
        &mut self,
        action: Action,
        event: &'static str,
        svc: &Services<'_, T, H>,
    ) -> Option<EventKind>
    where
        T: StreamTransport + ?Sized,
        H: OperationHandler + ?Sized,
    {
        match action {
            Action::Start => {
                bump(&svc.stats.accepted);
                if let Err(e) = svc.transport.notify_on_peer_or_cancel(self.stream) {
                    debug!(stream = %self.stream, error = %e, "peer watch not armed");
                }
                self.issue_read(svc, event);
            }
            Action::IssueRead => self.issue_read(svc, event),
            Action::Compute(request) => return self.compute(request, event, svc),
            Action::IssueWrite(response) => {
                self.request = None;
                if !self.claim(Primitive::Write, event, svc) {
                    return None;
                }
                match svc.transport.begin_write(self.stream, response) {
                    Ok(()) => {
                        self.inflight |= Primitive::Write.bit();
                        self.response = Some(response);
                    }
                    Err(e) => self.fail(svc, e),
                }
            }
            Action::Finish(status) => {
                if let Status::InvalidArgument(e) = &status {
                    bump(&svc.stats.domain_errors);
                    debug!(stream = %self.stream, request = ?self.request, error = %e, "domain error, closing stream");
                }
                self.request = None;
                self.issue_finish(status, event, svc);
            }
            Action::CancelAndFinish => {
                debug!(stream = %self.stream, "cancelled");
                self.running = false;
                self.request = None;
                svc.transport.abandon(self.stream);
                self.issue_finish(Status::Cancelled, event, svc);
            }
            Action::Abandon => {
                debug!(stream = %self.stream, event, "stream abandoned");
                self.running = false;
                self.request = None;
                svc.transport.abandon(self.stream);
            }
            Action::Complete => {
                bump(&svc.stats.completed);
                debug!(stream = %self.stream, served = self.served, "stream complete");
            }
            Action::Ignore => {}
            Action::Discard => bump(&svc.stats.discarded),
            Action::Violation(reason) => self.violation(svc, event, reason),
        }
        None
    }

    fn compute<T, H>(
        &mut self,
        request: MathRequest,
        event: &'static str,
        svc: &Services<'_, T, H>,
    ) -> Option<EventKind>
    where
        T: StreamTransport + ?Sized,
        H: OperationHandler + ?Sized,
    {
        if !self.claim(Primitive::Compute, event, svc) {
            return None;
        }
        bump(&svc.stats.requests);
        self.inflight |= Primitive::Compute.bit();

        let request = match svc.pool {
            Some(pool) => {
                let job = ComputeJob {
                    stream: self.stream,
                    request: request.clone(),
                };
                match pool.submit(job) {
                    Ok(()) => {
                        self.request = Some(request);
                        return None;
                    }
                    Err(job) => {
                        trace!(stream = %self.stream, "offload pool full, computing inline");
                        job.request
                    }
                }
            }
            None => request,
        };

        let outcome = svc.handler.compute(&request);
        self.request = Some(request);
        Some(EventKind::Computed(outcome))
    }

    /// False (and the stream aborted) if `p` is already outstanding.
    fn claim<T, H>(&mut self, p: Primitive, event: &'static str, svc: &Services<'_, T, H>) -> bool
    where
        T: StreamTransport + ?Sized,
        H: OperationHandler + ?Sized,
    {
        if self.is_inflight(p) {
            self.violation(svc, event, "primitive already in flight");
            return false;
        }
        true
    }

    fn issue_read<T, H>(&mut self, svc: &Services<'_, T, H>, event: &'static str)
    where
        T: StreamTransport + ?Sized,
        H: OperationHandler + ?Sized,
    {
        if !self.claim(Primitive::Read, event, svc) {
            return;
        }
        match svc.transport.begin_read(self.stream) {
            Ok(()) => self.inflight |= Primitive::Read.bit(),
            Err(e) => self.fail(svc, e),
        }
    }

    fn issue_finish<T, H>(&mut self, status: Status, event: &'static str, svc: &Services<'_, T, H>)
    where
        T: StreamTransport + ?Sized,
        H: OperationHandler + ?Sized,
    {
        if !self.claim(Primitive::Finish, event, svc) {
            return;
        }
        match svc.transport.begin_finish(self.stream, status) {
            Ok(()) => self.inflight |= Primitive::Finish.bit(),
            Err(e) => {
                // No FinishDone is coming; the stream ends here.
                debug!(stream = %self.stream, error = %e, "finish not started");
                self.running = false;
                self.phase = Phase::Done;
            }
        }
    }

    /// A primitive was refused: nothing was posted for it.
    fn fail<T, H>(&mut self, svc: &Services<'_, T, H>, e: TransportError)
    where
        T: StreamTransport + ?Sized,
        H: OperationHandler + ?Sized,
    {
        debug!(stream = %self.stream, phase = %self.phase, error = %e, "primitive refused, aborting stream");
        self.running = false;
        self.phase = Phase::Done;
        svc.transport.abandon(self.stream);
    }

    fn violation<T, H>(&mut self, svc: &Services<'_, T, H>, event: &'static str, reason: &'static str)
    where
        T: StreamTransport + ?Sized,
        H: OperationHandler + ?Sized,
    {
        let err = DuplexError::ProtocolViolation {
            stream: self.stream,
            reason,
        };
        error!(
            phase = %self.phase,
            event,
            inflight = self.inflight,
            error = %err,
            "protocol violation"
        );
        bump(&svc.stats.protocol_violations);
        self.running = false;
        self.phase = Phase::Done;
        svc.transport.abandon(self.stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_core::error::DomainError;
    use duplex_core::event::{IoOutcome, ReadOutcome};
    use duplex_module::arith::Arithmetic;
    use parking_lot::Mutex;

    /// Records every primitive call instead of performing it.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        refuse_reads: bool,
    }

    impl Recorder {
        fn log(&self, call: String) -> IoOutcome {
            self.calls.lock().push(call);
            Ok(())
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.calls.lock())
        }
    }

    impl StreamTransport for Recorder {
        fn bind(&self) -> Result<(), TransportError> {
            Ok(())
        }
        fn request_stream(&self, _: StreamRef) -> IoOutcome {
            self.log("accept".into())
        }
        fn begin_read(&self, _: StreamRef) -> IoOutcome {
            if self.refuse_reads {
                return Err(TransportError::Busy);
            }
            self.log("read".into())
        }
        fn begin_write(&self, _: StreamRef, r: MathResponse) -> IoOutcome {
            self.log(format!("write {}", r.result))
        }
        fn begin_finish(&self, _: StreamRef, s: Status) -> IoOutcome {
            self.log(format!("finish {}", s))
        }
        fn notify_on_peer_or_cancel(&self, _: StreamRef) -> IoOutcome {
            self.log("watch".into())
        }
        fn abandon(&self, _: StreamRef) {
            self.calls.lock().push("abandon".into());
        }
        fn release(&self, _: StreamRef) {}
        fn stop_accepting(&self) {}
    }

    fn svc<'a>(t: &'a Recorder, stats: &'a EngineStats) -> Services<'a, Recorder, Arithmetic> {
        Services {
            transport: t,
            handler: &Arithmetic,
            pool: None,
            stats,
        }
    }

    fn msg(a: f64, b: f64, op: &str) -> EventKind {
        EventKind::ReadDone(ReadOutcome::Message(MathRequest::new(a, b, op)))
    }

    fn bound(t: &Recorder, stats: &EngineStats) -> StreamContext {
        let mut ctx = StreamContext::connecting(StreamRef::new(0, 1));
        let step = ctx.advance(EventKind::Connected(Ok(())), &svc(t, stats));
        assert!(step.rearm_accept);
        assert_eq!(t.take(), vec!["watch", "read"]);
        ctx
    }

    #[test]
    fn test_inline_request_cycle() {
        let t = Recorder::default();
        let stats = EngineStats::default();
        let mut ctx = bound(&t, &stats);
        assert_eq!(ctx.phase(), Phase::ReadPending);

        ctx.advance(msg(64.0, 2.0, "/"), &svc(&t, &stats));
        assert_eq!(ctx.phase(), Phase::WritePending);
        assert_eq!(t.take(), vec!["write 32"]);

        ctx.advance(EventKind::WriteDone(Ok(())), &svc(&t, &stats));
        assert_eq!(ctx.phase(), Phase::ReadPending);
        assert_eq!(ctx.served(), 1);
        assert_eq!(t.take(), vec!["read"]);

        ctx.advance(EventKind::ReadDone(ReadOutcome::EndOfStream), &svc(&t, &stats));
        assert_eq!(t.take(), vec!["finish OK"]);
        let step = ctx.advance(EventKind::FinishDone(Ok(())), &svc(&t, &stats));
        assert!(step.release);
        assert_eq!(ctx.phase(), Phase::Done);

        let s = stats.snapshot();
        assert_eq!((s.accepted, s.requests, s.responses, s.completed), (1, 1, 1, 1));
    }

    #[test]
    fn test_domain_error_finishes_with_invalid_argument() {
        let t = Recorder::default();
        let stats = EngineStats::default();
        let mut ctx = bound(&t, &stats);
        ctx.advance(msg(5.0, 0.0, "/"), &svc(&t, &stats));
        assert_eq!(ctx.phase(), Phase::Closing);
        assert_eq!(
            t.take(),
            vec![format!("finish {}", Status::InvalidArgument(DomainError::DivisionByZero))]
        );
        assert_eq!(stats.snapshot().domain_errors, 1);
    }

    #[test]
    fn test_cancel_while_reading_waits_for_drain() {
        let t = Recorder::default();
        let stats = EngineStats::default();
        let mut ctx = bound(&t, &stats);

        let step = ctx.advance(EventKind::Cancelled, &svc(&t, &stats));
        assert!(!step.release);
        assert_eq!(ctx.phase(), Phase::Closing);
        assert!(!ctx.is_running());
        assert_eq!(t.take(), vec!["abandon", "finish CANCELLED"]);

        // The abandoned read completes; it is discarded, not processed.
        let step = ctx.advance(msg(1.0, 1.0, "+"), &svc(&t, &stats));
        assert!(!step.release);
        assert!(t.take().is_empty());

        let step = ctx.advance(EventKind::FinishDone(Ok(())), &svc(&t, &stats));
        assert!(step.release);
        assert_eq!(stats.snapshot().discarded, 1);
    }

    #[test]
    fn test_peer_done_abandons_and_drains() {
        let t = Recorder::default();
        let stats = EngineStats::default();
        let mut ctx = bound(&t, &stats);
        let step = ctx.advance(EventKind::PeerDone, &svc(&t, &stats));
        assert_eq!(ctx.phase(), Phase::Done);
        assert!(!step.release);
        let step = ctx.advance(
            EventKind::ReadDone(ReadOutcome::Failed(TransportError::Abandoned)),
            &svc(&t, &stats),
        );
        assert!(step.release);
        assert_eq!(t.take(), vec!["abandon"]);

        // Late signal after done.
        ctx.advance(EventKind::Cancelled, &svc(&t, &stats));
        assert_eq!(stats.snapshot().protocol_violations, 0);
    }

    #[test]
    fn test_unexpected_completion_is_violation() {
        let t = Recorder::default();
        let stats = EngineStats::default();
        let mut ctx = bound(&t, &stats);
        let step = ctx.advance(EventKind::WriteDone(Ok(())), &svc(&t, &stats));
        assert_eq!(ctx.phase(), Phase::Done);
        assert_eq!(stats.snapshot().protocol_violations, 1);
        // The read is still outstanding.
        assert!(!step.release);
        assert!(ctx.is_inflight(Primitive::Read));
    }

    #[test]
    fn test_second_read_is_violation() {
        let t = Recorder::default();
        let stats = EngineStats::default();
        let mut ctx = bound(&t, &stats);
        assert!(ctx.is_inflight(Primitive::Read));

        ctx.perform(Action::IssueRead, "ReadDone", &svc(&t, &stats));
        assert_eq!(stats.snapshot().protocol_violations, 1);
        assert_eq!(ctx.phase(), Phase::Done);
        assert!(!ctx.is_running());
        // No second begin_read reached the transport.
        assert_eq!(t.take(), vec!["abandon"]);
    }

    #[test]
    fn test_second_write_is_violation() {
        let t = Recorder::default();
        let stats = EngineStats::default();
        let mut ctx = bound(&t, &stats);
        ctx.advance(msg(2.0, 3.0, "*"), &svc(&t, &stats));
        assert_eq!(t.take(), vec!["write 6"]);

        let again = Action::IssueWrite(MathResponse { result: 6.0 });
        ctx.perform(again, "Computed", &svc(&t, &stats));
        assert_eq!(stats.snapshot().protocol_violations, 1);
        assert_eq!(t.take(), vec!["abandon"]);
    }

    #[test]
    fn test_response_held_until_write_done() {
        let t = Recorder::default();
        let stats = EngineStats::default();
        let mut ctx = bound(&t, &stats);
        ctx.advance(msg(64.0, 2.0, "/"), &svc(&t, &stats));
        assert_eq!(ctx.response.map(|r| r.result), Some(32.0));
        assert!(ctx.request.is_none());

        ctx.advance(EventKind::WriteDone(Ok(())), &svc(&t, &stats));
        assert!(ctx.response.is_none());
    }

    #[test]
    fn test_refused_primitive_ends_stream() {
        let t = Recorder {
            refuse_reads: true,
            ..Default::default()
        };
        let stats = EngineStats::default();
        let mut ctx = StreamContext::connecting(StreamRef::new(2, 1));
        let step = ctx.advance(EventKind::Connected(Ok(())), &svc(&t, &stats));
        assert!(step.release);
        assert_eq!(ctx.phase(), Phase::Done);
        assert_eq!(t.take(), vec!["watch", "abandon"]);
    }
}
