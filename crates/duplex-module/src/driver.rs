//! Load-generating client driver.
//!
//! Sends `message_count` copies of one request on the calling thread while a
//! reader thread checks each response against the expected value, then
//! waits for the final status.

use duplex_core::error::{DuplexError, Result};
use duplex_core::message::{MathRequest, Status};

use crate::mem_transport::ClientStream;

use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub message_count: u64,
    pub request: MathRequest,
    /// When set, every response must equal this value.
    pub expected: Option<f64>,
}

impl LoadConfig {
    pub fn new(message_count: u64, request: MathRequest) -> Self {
        Self {
            message_count,
            request,
            expected: None,
        }
    }

    pub fn expect(mut self, value: f64) -> Self {
        self.expected = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub sent: u64,
    pub received: u64,
    pub mismatches: u64,
    pub status: Status,
    pub elapsed: Duration,
}

impl LoadReport {
    /// Every request answered with the expected value and the stream ended OK.
    pub fn is_clean(&self) -> bool {
        self.status.is_ok() && self.mismatches == 0 && self.received == self.sent
    }
}

struct Tally {
    received: u64,
    mismatches: u64,
    status: Status,
}

pub fn run_load(stream: ClientStream, config: &LoadConfig) -> Result<LoadReport> {
    let start = Instant::now();
    let (writer, mut reader) = stream.split();
    let expected = config.expected;

    let handle = thread::Builder::new()
        .name("duplex-load-reader".into())
        .spawn(move || {
            let mut received = 0u64;
            let mut mismatches = 0u64;
            while let Some(response) = reader.recv() {
                received += 1;
                if let Some(want) = expected {
                    if response.result != want {
                        mismatches += 1;
                        if mismatches == 1 {
                            warn!(got = response.result, want, "unexpected response");
                        }
                    }
                }
            }
            Tally {
                received,
                mismatches,
                status: reader.finish(),
            }
        })
        .map_err(DuplexError::Spawn)?;

    let mut sent = 0u64;
    for _ in 0..config.message_count {
        if let Err(e) = writer.send(config.request.clone()) {
            // The server ended the stream early; the status says why.
            debug!(sent, error = %e, "send stopped");
            break;
        }
        sent += 1;
    }
    writer.writes_done();

    let tally = handle.join().unwrap_or_else(|_| Tally {
        received: 0,
        mismatches: 0,
        status: Status::Aborted("reader thread panicked".into()),
    });
    drop(writer);

    let report = LoadReport {
        sent,
        received: tally.received,
        mismatches: tally.mismatches,
        status: tally.status,
        elapsed: start.elapsed(),
    };
    info!(
        sent = report.sent,
        received = report.received,
        mismatches = report.mismatches,
        status = %report.status,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "load finished"
    );
    Ok(report)
}
