//! Compile-time defaults for `ServerConfig`.

/// Dispatch workers sharing the completion queue.
pub const WORKERS: usize = 1;

/// Stream table slots (concurrent streams, including ones still connecting).
pub const MAX_STREAMS: usize = 1024;

/// Accept requests kept outstanding on the transport.
pub const ACCEPT_BACKLOG: usize = 4;

/// Offload threads for the operation handler. 0 computes inline.
pub const OFFLOAD_WORKERS: usize = 0;

pub const OFFLOAD_QUEUE_DEPTH: usize = 256;

/// How long shutdown waits for cancelled streams to drain.
pub const SHUTDOWN_GRACE_MS: u64 = 2000;

/// Idle dispatch worker park timeout.
pub const PARK_TIMEOUT_MS: u64 = 10;

/// Upper bound for `workers` and `offload_workers`.
pub const MAX_THREADS: usize = 64;
