//! # duplex-executor — The dispatch engine
//!
//! A fixed pool of dispatch workers pops completion events from one shared
//! queue and advances a per-stream state machine:
//!
//! ```text
//!   transport ──┐                     ┌── worker 0 ─┐
//!   offload   ──┼──► CompletionQueue ─┼── worker 1 ─┼──► StreamTable[slot]
//!   control   ──┘                     └── worker N ─┘       │ lock
//!                                                           ▼
//!                                           StreamContext::advance
//!                                             machine::transition
//!                                             issue next primitive
//! ```
//!
//! The number of workers is independent of the number of streams. A stream
//! never has more than one read or one write outstanding, and its context
//! is only released once it is `Done` with no primitive in flight.
//!
//! ## Modules
//!
//! - `config` - `ServerConfig` with env overrides
//! - `machine` - pure transition table
//! - `context` - per-stream context and action execution
//! - `table` - slot table with generation-checked resolve
//! - `engine` - dispatch and the worker loop
//! - `server` - startup and shutdown ordering
//! - `stats` - counters

pub mod config;
pub mod machine;
pub mod context;
pub mod table;
pub mod stats;
pub mod engine;
pub mod server;

pub use config::ServerConfig;
pub use context::{Step, StreamContext};
pub use engine::Engine;
pub use machine::{transition, Action, Transition};
pub use server::{Server, ShutdownReport};
pub use stats::StatsSnapshot;
pub use table::{StreamInfo, StreamTable};
