//! Error types for the Canopy container family
//!
//! Every container and transaction operation returns a [`Result`]. We use
//! `thiserror` for the `Display` and `Error` trait implementations.
//!
//! ## Error classification
//!
//! - **Temporal failures** (`Consistency`, `WouldBlock`): the operation may
//!   succeed if retried against fresh state. `Consistency` is the only
//!   semantic conflict the engine produces; it means a watched entry changed
//!   between `watch` and `stage`.
//! - **Structural failures** (`NotPermitted`, `InvalidArgument`,
//!   `NotSupported`): the call itself was wrong and retrying without changes
//!   cannot help.
//! - **Resource failures** (`OutOfMemoryHeap`, `OutOfMemoryArena`,
//!   `OutOfMemoryDisk`, `SequenceNumberOverflow`): a counter or allocation
//!   budget was exhausted.
//!
//! The connection-family kinds are reserved for networked wrappers and are
//! never produced by the in-process containers.

use thiserror::Error;

/// Result alias used across all Canopy crates.
pub type Result<T> = std::result::Result<T, Error>;

/// The unified error type for all Canopy container operations.
///
/// The kind set is wire-stable: [`Error::as_str`] returns a frozen string
/// code for each kind and [`Error::parse`] round-trips it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum Error {
    /// A watched entry changed before the transaction staged.
    ///
    /// This is the optimistic-concurrency conflict: the caller should reset
    /// the transaction and retry against the current state.
    #[error("consistency violation: a watched entry changed before staging")]
    Consistency,

    /// The transaction can no longer be completed or rolled back.
    #[error("transaction is not recoverable")]
    TransactionNotRecoverable,

    /// The generation counter reached its maximum value.
    #[error("sequence number overflow")]
    SequenceNumberOverflow,

    /// Heap allocation budget exhausted.
    #[error("out of memory (heap)")]
    OutOfMemoryHeap,

    /// Arena allocation budget exhausted.
    #[error("out of memory (arena)")]
    OutOfMemoryArena,

    /// Disk allocation budget exhausted.
    #[error("out of memory (disk)")]
    OutOfMemoryDisk,

    /// An argument was outside the operation's domain.
    #[error("invalid argument")]
    InvalidArgument,

    /// The operation is already running.
    #[error("operation in progress")]
    InProgress,

    /// The operation is not valid in the current state.
    ///
    /// Returned for transaction state-machine violations, e.g. `commit`
    /// without a prior successful `stage`.
    #[error("operation not permitted")]
    NotPermitted,

    /// The operation is not supported by this container variant.
    #[error("operation not supported")]
    NotSupported,

    /// A lock could not be acquired within the configured bound.
    #[error("operation would block")]
    WouldBlock,

    /// The operation was canceled.
    #[error("operation canceled")]
    Canceled,

    /// Reserved for networked wrappers: the peer closed the connection.
    #[error("connection broken")]
    ConnectionBroken,

    /// Reserved for networked wrappers: the connection was aborted.
    #[error("connection aborted")]
    ConnectionAborted,

    /// Reserved for networked wrappers: a connection attempt is in flight.
    #[error("connection already in progress")]
    ConnectionInProgress,

    /// Reserved for networked wrappers: the peer refused the connection.
    #[error("connection refused")]
    ConnectionRefused,

    /// Reserved for networked wrappers: the connection was reset.
    #[error("connection reset")]
    ConnectionReset,

    /// A failure that does not fit any other kind.
    #[error("unknown error")]
    Unknown,
}

impl Error {
    /// The canonical string code for this kind.
    ///
    /// These codes are frozen; they will not change without a major version
    /// bump.
    pub fn as_str(&self) -> &'static str {
        match self {
            Error::Consistency => "Consistency",
            Error::TransactionNotRecoverable => "TransactionNotRecoverable",
            Error::SequenceNumberOverflow => "SequenceNumberOverflow",
            Error::OutOfMemoryHeap => "OutOfMemoryHeap",
            Error::OutOfMemoryArena => "OutOfMemoryArena",
            Error::OutOfMemoryDisk => "OutOfMemoryDisk",
            Error::InvalidArgument => "InvalidArgument",
            Error::InProgress => "InProgress",
            Error::NotPermitted => "NotPermitted",
            Error::NotSupported => "NotSupported",
            Error::WouldBlock => "WouldBlock",
            Error::Canceled => "Canceled",
            Error::ConnectionBroken => "ConnectionBroken",
            Error::ConnectionAborted => "ConnectionAborted",
            Error::ConnectionInProgress => "ConnectionInProgress",
            Error::ConnectionRefused => "ConnectionRefused",
            Error::ConnectionReset => "ConnectionReset",
            Error::Unknown => "Unknown",
        }
    }

    /// Parse an error kind from its canonical string code.
    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "Consistency" => Error::Consistency,
            "TransactionNotRecoverable" => Error::TransactionNotRecoverable,
            "SequenceNumberOverflow" => Error::SequenceNumberOverflow,
            "OutOfMemoryHeap" => Error::OutOfMemoryHeap,
            "OutOfMemoryArena" => Error::OutOfMemoryArena,
            "OutOfMemoryDisk" => Error::OutOfMemoryDisk,
            "InvalidArgument" => Error::InvalidArgument,
            "InProgress" => Error::InProgress,
            "NotPermitted" => Error::NotPermitted,
            "NotSupported" => Error::NotSupported,
            "WouldBlock" => Error::WouldBlock,
            "Canceled" => Error::Canceled,
            "ConnectionBroken" => Error::ConnectionBroken,
            "ConnectionAborted" => Error::ConnectionAborted,
            "ConnectionInProgress" => Error::ConnectionInProgress,
            "ConnectionRefused" => Error::ConnectionRefused,
            "ConnectionReset" => Error::ConnectionReset,
            "Unknown" => Error::Unknown,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether retrying the operation against fresh state can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Consistency | Error::WouldBlock)
    }

    /// Whether this kind signals resource exhaustion.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Error::OutOfMemoryHeap
                | Error::OutOfMemoryArena
                | Error::OutOfMemoryDisk
                | Error::SequenceNumberOverflow
        )
    }
}
