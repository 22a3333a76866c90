//! Stream phase type

use core::fmt;

/// Phase of one duplex stream's state machine.
///
/// ```text
/// Connecting → ReadPending → Processing → WritePending ─┐
///                  ▲                                    │
///                  └────────────────────────────────────┘
///              ReadPending ──(end of stream / error)──→ Closing → Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Accept requested, waiting for a peer
    Connecting = 0,

    /// A read is outstanding
    ReadPending = 1,

    /// A request is being handed to the operation handler
    Processing = 2,

    /// A response write is outstanding
    WritePending = 3,

    /// Finish handshake outstanding
    Closing = 4,

    /// Terminal
    Done = 5,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Connecting,
        Phase::ReadPending,
        Phase::Processing,
        Phase::WritePending,
        Phase::Closing,
        Phase::Done,
    ];

    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Connecting => write!(f, "CONNECTING"),
            Phase::ReadPending => write!(f, "READ_PENDING"),
            Phase::Processing => write!(f, "PROCESSING"),
            Phase::WritePending => write!(f, "WRITE_PENDING"),
            Phase::Closing => write!(f, "CLOSING"),
            Phase::Done => write!(f, "DONE"),
        }
    }
}
