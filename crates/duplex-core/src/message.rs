//! Request/response values and the final stream status.

use core::fmt;

use crate::error::DomainError;

/// One arithmetic request: `number1 <operation> number2`.
#[derive(Debug, Clone, PartialEq)]
pub struct MathRequest {
    pub number1: f64,
    pub number2: f64,
    /// Operator symbol as sent on the wire (`+`, `-`, `*`, `/`).
    pub operation: String,
}

impl MathRequest {
    pub fn new(number1: f64, number2: f64, operation: impl Into<String>) -> Self {
        Self {
            number1,
            number2,
            operation: operation.into(),
        }
    }
}

/// The result for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MathResponse {
    pub result: f64,
}

/// Final status of a stream, delivered to the peer by `begin_finish`.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// Peer finished sending and every request was answered.
    Ok,
    /// The server aborted the stream (the "quit" path) or the peer cancelled.
    Cancelled,
    /// A request failed a domain rule; the stream ends here.
    InvalidArgument(DomainError),
    /// The server stopped accepting before the stream was bound.
    Unavailable(String),
    /// The stream was torn down without a finish handshake.
    Aborted(String),
}

impl Status {
    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Cancelled => write!(f, "CANCELLED"),
            Status::InvalidArgument(e) => write!(f, "INVALID_ARGUMENT: {}", e),
            Status::Unavailable(why) => write!(f, "UNAVAILABLE: {}", why),
            Status::Aborted(why) => write!(f, "ABORTED: {}", why),
        }
    }
}
