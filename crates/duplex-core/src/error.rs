//! duplex error types.

use thiserror::Error;

use crate::event::StreamRef;

/// A business-rule failure raised by the operation handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// `/` with a zero divisor.
    #[error("division by zero")]
    DivisionByZero,
    /// Operator symbol outside `{+, -, *, /}`.
    #[error("unknown operator {0:?}")]
    UnknownOperator(String),
    /// An operand or the result is NaN or infinite.
    #[error("result is not a finite number")]
    NonFiniteResult,
}

/// Failure of a transport primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport does not know this stream (never bound or already released).
    #[error("unknown stream {0}")]
    UnknownStream(StreamRef),
    /// The primitive was abandoned because the stream was cancelled or aborted.
    #[error("operation abandoned")]
    Abandoned,
    /// The peer disconnected.
    #[error("peer gone")]
    PeerGone,
    /// The stream has already been finished.
    #[error("stream already finished")]
    Finished,
    /// A primitive of the same kind is already outstanding on this stream.
    #[error("primitive already outstanding")]
    Busy,
    /// The transport is not accepting new streams.
    #[error("transport shut down")]
    Shutdown,
    /// `bind()` failed or was called twice.
    #[error("bind failed: {0}")]
    Bind(String),
}

#[derive(Debug, Error)]
pub enum DuplexError {
    /// The completion queue has been shut down; the push was rejected.
    #[error("completion queue shut down")]
    QueueShutdown,
    /// The stream table has no free slot.
    #[error("stream table full ({0} slots)")]
    TableFull(usize),
    /// A state-machine invariant was broken for one stream.
    #[error("protocol violation on {stream}: {reason}")]
    ProtocolViolation {
        stream: StreamRef,
        reason: &'static str,
    },
    /// Invalid configuration.
    #[error("invalid config: {0}")]
    Config(&'static str),
    /// A worker thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, DuplexError>;
