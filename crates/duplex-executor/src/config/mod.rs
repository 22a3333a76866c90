//! Server configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder setters (command-line flags in the binary)
//! 2. Environment variables
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use duplex_executor::config::ServerConfig;
//!
//! let config = ServerConfig::from_env()
//!     .workers(4)
//!     .offload_workers(2);
//! config.validate()?;
//! ```

pub mod defaults;

use duplex_core::env::{env_get, env_get_ms};
use duplex_core::error::{DuplexError, Result};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Dispatch worker threads
    pub workers: usize,
    /// Stream table capacity
    pub max_streams: usize,
    /// Outstanding accept requests
    pub accept_backlog: usize,
    /// Handler offload threads (0 = compute on the dispatch worker)
    pub offload_workers: usize,
    /// Offload job queue capacity
    pub offload_queue_depth: usize,
    /// Grace period for live streams to drain during shutdown
    pub shutdown_grace: Duration,
    /// Idle worker park timeout on the completion queue
    pub park_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServerConfig {
    /// Compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `DUPLEX_WORKERS` - Dispatch worker threads
    /// - `DUPLEX_MAX_STREAMS` - Stream table capacity
    /// - `DUPLEX_ACCEPT_BACKLOG` - Outstanding accept requests
    /// - `DUPLEX_OFFLOAD_WORKERS` - Handler offload threads
    /// - `DUPLEX_OFFLOAD_QUEUE_DEPTH` - Offload queue capacity
    /// - `DUPLEX_SHUTDOWN_GRACE_MS` - Shutdown grace in milliseconds
    /// - `DUPLEX_PARK_TIMEOUT_MS` - Worker park timeout in milliseconds
    pub fn from_env() -> Self {
        Self {
            workers: env_get("DUPLEX_WORKERS", defaults::WORKERS),
            max_streams: env_get("DUPLEX_MAX_STREAMS", defaults::MAX_STREAMS),
            accept_backlog: env_get("DUPLEX_ACCEPT_BACKLOG", defaults::ACCEPT_BACKLOG),
            offload_workers: env_get("DUPLEX_OFFLOAD_WORKERS", defaults::OFFLOAD_WORKERS),
            offload_queue_depth: env_get(
                "DUPLEX_OFFLOAD_QUEUE_DEPTH",
                defaults::OFFLOAD_QUEUE_DEPTH,
            ),
            shutdown_grace: env_get_ms("DUPLEX_SHUTDOWN_GRACE_MS", defaults::SHUTDOWN_GRACE_MS),
            park_timeout: env_get_ms("DUPLEX_PARK_TIMEOUT_MS", defaults::PARK_TIMEOUT_MS),
        }
    }

    /// Library defaults only, no environment lookup.
    pub fn new() -> Self {
        Self {
            workers: defaults::WORKERS,
            max_streams: defaults::MAX_STREAMS,
            accept_backlog: defaults::ACCEPT_BACKLOG,
            offload_workers: defaults::OFFLOAD_WORKERS,
            offload_queue_depth: defaults::OFFLOAD_QUEUE_DEPTH,
            shutdown_grace: Duration::from_millis(defaults::SHUTDOWN_GRACE_MS),
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
        }
    }

    // Builder methods

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn max_streams(mut self, n: usize) -> Self {
        self.max_streams = n;
        self
    }

    pub fn accept_backlog(mut self, n: usize) -> Self {
        self.accept_backlog = n;
        self
    }

    pub fn offload_workers(mut self, n: usize) -> Self {
        self.offload_workers = n;
        self
    }

    pub fn offload_queue_depth(mut self, n: usize) -> Self {
        self.offload_queue_depth = n;
        self
    }

    pub fn shutdown_grace(mut self, d: Duration) -> Self {
        self.shutdown_grace = d;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(DuplexError::Config("workers must be > 0"));
        }
        if self.workers > defaults::MAX_THREADS {
            return Err(DuplexError::Config("workers must be <= 64"));
        }
        if self.offload_workers > defaults::MAX_THREADS {
            return Err(DuplexError::Config("offload_workers must be <= 64"));
        }
        if self.max_streams == 0 || self.max_streams > u32::MAX as usize {
            return Err(DuplexError::Config("max_streams must be in 1..=u32::MAX"));
        }
        if self.accept_backlog == 0 {
            return Err(DuplexError::Config("accept_backlog must be > 0"));
        }
        if self.accept_backlog > self.max_streams {
            return Err(DuplexError::Config("accept_backlog must be <= max_streams"));
        }
        if self.offload_workers > 0 && self.offload_queue_depth == 0 {
            return Err(DuplexError::Config("offload_queue_depth must be > 0"));
        }
        if self.park_timeout.is_zero() {
            return Err(DuplexError::Config("park_timeout must be > 0"));
        }
        Ok(())
    }
}
