//! # duplex-module — Default (safe) implementations
//!
//! This crate provides the default implementation for every duplex trait.
//! Each impl prioritizes correctness and simplicity over performance.
//!
//! ## Default stack
//!
//! | Trait            | Default Impl    | Notes                                  |
//! |------------------|-----------------|----------------------------------------|
//! | CompletionQueue  | BlockingQueue   | SegQueue + condvar parking             |
//! | StreamTransport  | MemTransport    | in-process pipes, client handles       |
//! | OperationHandler | Arithmetic      | `+ - * /` over `f64`                   |
//! | ComputePool      | OffloadPool     | fixed OS threads, bounded ArrayQueue   |
//!
//! `driver` is the reference load client that runs against a `MemTransport`
//! client stream.

pub mod blocking_queue;
pub mod arith;
pub mod offload_pool;
pub mod mem_transport;
pub mod driver;

pub use arith::{Arithmetic, Operator};
pub use blocking_queue::BlockingQueue;
pub use driver::{run_load, LoadConfig, LoadReport};
pub use mem_transport::{ClientStream, MemTransport, RequestWriter, ResponseReader};
pub use offload_pool::OffloadPool;
