//! Stream transport abstraction.
//!
//! A `StreamTransport` owns the connection layer (accepting peers, framing,
//! flow control) and exposes per-stream non-blocking primitives. Each
//! primitive, once begun, posts its completion to the completion queue the
//! transport was built with.
//!
//! # Implementors
//!
//! - `MemTransport` (default, `duplex-module`): in-process duplex pipes with
//!   a client-side handle. Used by the demo binary and the test suites.

use crate::error::TransportError;
use crate::event::{IoOutcome, StreamRef};
use crate::message::{MathResponse, Status};

/// Per-stream asynchronous primitives.
///
/// **Contract:**
/// - No method blocks.
/// - `Ok(())` from a `begin_*`/`request_stream` call means exactly one
///   completion event will be posted for it. `Err` means nothing was begun
///   and nothing will be posted.
/// - Completions for one stream are posted in the order they happen.
/// - After `FinishDone` no further completion is posted for that stream.
/// - The caller never has two reads, or two writes, outstanding on one
///   stream. The transport may reject a second one with `Busy`.
pub trait StreamTransport: Send + Sync {
    /// Bring the transport up. Called once, before any stream is requested.
    fn bind(&self) -> Result<(), TransportError>;

    /// Ask for the next connecting peer to be bound to `stream`.
    /// Posts `Connected`.
    fn request_stream(&self, stream: StreamRef) -> IoOutcome;

    /// Posts `ReadDone` with a message, end-of-stream, or a failure.
    fn begin_read(&self, stream: StreamRef) -> IoOutcome;

    /// Posts `WriteDone`.
    fn begin_write(&self, stream: StreamRef, response: MathResponse) -> IoOutcome;

    /// Deliver the final status to the peer. Posts `FinishDone`.
    fn begin_finish(&self, stream: StreamRef, status: Status) -> IoOutcome;

    /// Arm a one-shot watch that posts `PeerDone` if the peer goes away, or
    /// `Cancelled` if the peer cancels, before the stream is finished.
    /// The watch is disarmed silently by finish, abandon and release.
    fn notify_on_peer_or_cancel(&self, stream: StreamRef) -> IoOutcome;

    /// The server gives up on `stream`. Any parked accept or read completes
    /// promptly with a failure. Must be tolerated in every state.
    fn abandon(&self, stream: StreamRef);

    /// The server has released `stream`; forget it. A peer that never
    /// received a status observes `Status::Aborted`.
    fn release(&self, stream: StreamRef);

    /// Refuse new peers and fail every pending `request_stream` with
    /// `Connected(Err(Shutdown))`. Idempotent.
    fn stop_accepting(&self);
}
