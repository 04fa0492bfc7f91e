//! Error taxonomy for the event transport.
//!
//! Each class maps to one failure domain: schema definition, segment
//! creation, attach handshake, per-event transactions, startup orchestration
//! and the monitor-side reader. Transient fullness is not represented here;
//! `start_transaction` reports it as `Ok(None)`.

use std::io;
use std::time::Duration;

/// Invalid event declarations. Fatal at startup, before any segment exists.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("event '{event}': unknown field code '{code}' in signature")]
    UnknownFieldCode { event: String, code: char },

    #[error("event '{event}': {count} arguments exceed the maximum of {max}")]
    TooManyArguments { event: String, count: usize, max: usize },

    #[error("{count} event kinds exceed the maximum of {max}")]
    TooManyEvents { count: usize, max: usize },

    #[error("event name '{name}' is empty or longer than {max} bytes")]
    InvalidName { name: String, max: usize },

    #[error("event '{name}' is declared twice")]
    DuplicateEvent { name: String },
}

/// Creating a shared region failed. Fatal for that segment only.
#[derive(Debug, thiserror::Error)]
pub enum SegmentCreateError {
    #[error("shared memory segment '{name}' already exists")]
    NameCollision { name: String },

    #[error("invalid segment name '{name}'")]
    InvalidName { name: String },

    #[error("segment capacity {capacity} is below the minimum of {min} bytes")]
    CapacityTooSmall { capacity: usize, min: usize },

    #[error("shared memory quota exhausted while creating '{name}'")]
    ResourceExhausted {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("parent segment '{parent}' is destroyed")]
    ParentDestroyed { parent: String },

    #[error("parent segment '{parent}' has no free child slots ({max} in use)")]
    TooManyChildren { parent: String, max: usize },

    #[error("I/O error creating segment '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// The attach handshake did not complete. Recoverable: retry or give up.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("no monitor attached within {0:?}")]
    TimedOut(Duration),

    #[error("waiting for the monitor was interrupted")]
    Interrupted,
}

/// Failures observed while producing into a segment.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    /// The segment was destroyed or the monitor detached.
    #[error("monitor is gone; segment no longer accepts events")]
    MonitorGone,

    #[error("event kind '{name}' was declined by the monitor")]
    KindDeclined { name: String },

    #[error("record of {len} bytes cannot fit a segment of {capacity} bytes")]
    RecordTooLarge { len: usize, capacity: usize },

    #[error("push does not match the declared signature: {reason}")]
    SignatureMismatch { reason: &'static str },

    #[error("a write transaction is already open on this segment")]
    TransactionInProgress,

    #[error("gave up after {0} busy-wait retries")]
    RetryLimit(u64),

    #[error("no event declared at index {0}")]
    UnknownEvent(usize),
}

/// Failure of the coordinated startup sequence. All partially created
/// resources are released before this is returned.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("failed to create top-level segment: {0}")]
    CreateFailed(#[from] SegmentCreateError),

    #[error("schema negotiation failed: {reason}")]
    NegotiationFailed { reason: String },

    #[error("monitor attach failed: {0}")]
    AttachFailed(#[from] AttachError),
}

/// Monitor-side failures when opening or decoding a segment.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("failed to open segment '{name}': {source}")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("segment '{name}' is not an event segment (bad magic)")]
    BadMagic { name: String },

    #[error("segment layout version {found} is not supported (expected {expected})")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("corrupt record at position {position}: {reason}")]
    Corrupt { position: u64, reason: String },

    #[error("negotiation returned {got} kinds for {expected} declared events")]
    KindCount { expected: usize, got: usize },

    #[error("no live child segment for unit {0}")]
    UnknownChild(u64),
}
