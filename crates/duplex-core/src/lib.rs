//! # duplex-core — Trait definitions for duplex
//!
//! This crate defines the seams of the duplex streaming engine. Each trait
//! models one collaborator the dispatch engine talks to; the engine itself
//! (in `duplex-executor`) depends only on these traits, never on concrete
//! types. Default implementations live in `duplex-module`.
//!
//! Events flow one way: transports, the offload pool and control callers
//! post `CompletionEvent`s into a `CompletionQueue`; dispatch workers pop
//! them and call back into the transport to issue the next primitive.
//! Nothing here blocks a dispatcher except `CompletionQueue::pop`.
//!
//! ## Modules
//!
//! - `event` - `StreamRef`, `CompletionEvent` and its tagged `EventKind`
//! - `message` - request/response values and the final stream `Status`
//! - `phase` - per-stream phase enum
//! - `completion` - the `CompletionQueue` hand-off contract
//! - `transport` - the `StreamTransport` primitives (read/write/finish/watch)
//! - `handler` - the `OperationHandler` domain callback
//! - `offload` - the `ComputePool` for handlers that must not run on a dispatcher
//! - `error` - error types
//! - `env` - environment variable utilities

pub mod event;
pub mod message;
pub mod phase;
pub mod completion;
pub mod transport;
pub mod handler;
pub mod offload;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use event::{CompletionEvent, EventKind, IoOutcome, Primitive, ReadOutcome, StreamRef};
pub use message::{MathRequest, MathResponse, Status};
pub use phase::Phase;
pub use completion::CompletionQueue;
pub use transport::StreamTransport;
pub use handler::{HandlerFn, OperationHandler};
pub use offload::{ComputeJob, ComputePool};
pub use error::{DomainError, DuplexError, Result, TransportError};
pub use env::{env_get, env_get_bool, env_get_ms, env_get_opt, env_get_str};
