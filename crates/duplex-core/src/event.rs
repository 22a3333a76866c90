//! Completion event types.
//!
//! These are the *lingua franca* between the transport, the completion
//! queue and the dispatch engine. Every event names its owning stream with
//! a typed `StreamRef` instead of an opaque tag, so routing a completion
//! back to its state machine never reinterprets raw integers.

use core::fmt;

use crate::error::{DomainError, TransportError};
use crate::message::{MathRequest, MathResponse};

/// Identity of one duplex stream.
///
/// `index` is the stream's slot in the dispatcher's stream table (O(1)
/// resolve). `generation` is bumped every time the slot is reused, so an
/// event that outlives its stream never resolves to the next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamRef {
    index: u32,
    generation: u32,
}

impl StreamRef {
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for StreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}.{}", self.index, self.generation)
    }
}

/// Outcome of a primitive that carries no payload.
pub type IoOutcome = Result<(), TransportError>;

/// Outcome of an asynchronous read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// The peer sent a request.
    Message(MathRequest),
    /// The peer finished sending (half-close).
    EndOfStream,
    /// The read could not complete.
    Failed(TransportError),
}

/// The asynchronous primitives a stream can have in flight.
///
/// Each successfully issued primitive produces exactly one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Primitive {
    Accept = 0,
    Read = 1,
    Write = 2,
    Finish = 3,
    Compute = 4,
}

impl Primitive {
    pub const ALL: [Primitive; 5] = [
        Primitive::Accept,
        Primitive::Read,
        Primitive::Write,
        Primitive::Finish,
        Primitive::Compute,
    ];

    #[inline]
    pub const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A requested stream was bound to a connecting peer (or the request failed).
    Connected(IoOutcome),
    /// A `begin_read` completed.
    ReadDone(ReadOutcome),
    /// A `begin_write` completed.
    WriteDone(IoOutcome),
    /// A `begin_finish` completed. No further completions follow for the stream.
    FinishDone(IoOutcome),
    /// The operation handler produced a result for the in-flight request.
    Computed(Result<MathResponse, DomainError>),
    /// The peer went away before the server finished the stream.
    PeerDone,
    /// The stream was cancelled, by the peer or by the server.
    Cancelled,
}

impl EventKind {
    /// The primitive this event completes, or `None` for signals.
    pub fn primitive(&self) -> Option<Primitive> {
        match self {
            EventKind::Connected(_) => Some(Primitive::Accept),
            EventKind::ReadDone(_) => Some(Primitive::Read),
            EventKind::WriteDone(_) => Some(Primitive::Write),
            EventKind::FinishDone(_) => Some(Primitive::Finish),
            EventKind::Computed(_) => Some(Primitive::Compute),
            EventKind::PeerDone | EventKind::Cancelled => None,
        }
    }

    /// Signals are not answers to an issued primitive; they may race with
    /// teardown and are dropped quietly once a stream is gone.
    #[inline]
    pub fn is_signal(&self) -> bool {
        self.primitive().is_none()
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connected(_) => "connected",
            EventKind::ReadDone(_) => "read-done",
            EventKind::WriteDone(_) => "write-done",
            EventKind::FinishDone(_) => "finish-done",
            EventKind::Computed(_) => "computed",
            EventKind::PeerDone => "peer-done",
            EventKind::Cancelled => "cancelled",
        }
    }
}

/// A completion notification routed to one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    pub stream: StreamRef,
    pub kind: EventKind,
}

impl CompletionEvent {
    #[inline]
    pub fn new(stream: StreamRef, kind: EventKind) -> Self {
        Self { stream, kind }
    }
}
