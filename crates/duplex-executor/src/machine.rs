//! Stream state machine transition table.
//!
//! `transition` is a pure function of the current phase and the incoming
//! event. It decides the next phase and what the context must do; the
//! context carries out the action against the transport and handler.

use duplex_core::event::{EventKind, ReadOutcome};
use duplex_core::message::{MathRequest, MathResponse, Status};
use duplex_core::phase::Phase;

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Stream bound: arm the peer watch and issue the first read.
    Start,
    IssueRead,
    /// Run the operation handler on the request.
    Compute(MathRequest),
    IssueWrite(MathResponse),
    /// Begin the finish handshake with this status.
    Finish(Status),
    /// Abandon the outstanding primitive and finish with `Cancelled`.
    CancelAndFinish,
    /// Stop issuing primitives and abandon whatever is outstanding.
    Abandon,
    /// The finish handshake completed.
    Complete,
    /// Nothing to do; the phase is unchanged.
    Ignore,
    /// Event for a finished stream; dropped.
    Discard,
    /// The event cannot happen in this phase.
    Violation(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: Phase,
    pub action: Action,
}

pub fn transition(phase: Phase, kind: EventKind) -> Transition {
    use Phase::*;

    let (next, action) = match (phase, kind) {
        (Done, _) => (Done, Action::Discard),

        (Connecting, EventKind::Connected(Ok(()))) => (ReadPending, Action::Start),
        (Connecting, EventKind::Connected(Err(_))) => (Done, Action::Abandon),

        (ReadPending, EventKind::ReadDone(ReadOutcome::Message(request))) => {
            (Processing, Action::Compute(request))
        }
        (ReadPending, EventKind::ReadDone(ReadOutcome::EndOfStream)) => {
            (Closing, Action::Finish(Status::Ok))
        }
        (ReadPending, EventKind::ReadDone(ReadOutcome::Failed(_))) => (Done, Action::Abandon),

        (Processing, EventKind::Computed(Ok(response))) => {
            (WritePending, Action::IssueWrite(response))
        }
        (Processing, EventKind::Computed(Err(e))) => {
            (Closing, Action::Finish(Status::InvalidArgument(e)))
        }

        (WritePending, EventKind::WriteDone(Ok(()))) => (ReadPending, Action::IssueRead),
        (WritePending, EventKind::WriteDone(Err(_))) => (Done, Action::Abandon),

        (Closing, EventKind::FinishDone(_)) => (Done, Action::Complete),
        (Closing, EventKind::PeerDone) => (Closing, Action::Ignore),
        (Closing, EventKind::Cancelled) => (Done, Action::Abandon),

        (Connecting, EventKind::Cancelled) => (Done, Action::Abandon),
        (ReadPending | Processing | WritePending, EventKind::Cancelled) => {
            (Closing, Action::CancelAndFinish)
        }
        (Connecting | ReadPending | Processing | WritePending, EventKind::PeerDone) => {
            (Done, Action::Abandon)
        }

        (_, _) => (Done, Action::Violation("event not expected in this phase")),
    };
    Transition { next, action }
}
