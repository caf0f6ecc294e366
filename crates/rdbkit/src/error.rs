use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors produced while reading, writing, or verifying a snapshot.
///
/// Every error is fatal to the current session; nothing is recovered
/// internally. Callers that received partial data through handler callbacks
/// before the failure are responsible for reconciling it.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The byte source ended inside a record.
    #[error("unexpected end of snapshot input")]
    UnexpectedEof,

    /// An invalid tag, length, sentinel, or stream reference.
    #[error("malformed snapshot: {0}")]
    Malformed(&'static str),

    #[error("unknown record type {0}")]
    UnknownRecordType(u8),

    /// A feature this library deliberately does not restore.
    #[error("unsupported snapshot feature: {0}")]
    Unsupported(&'static str),

    #[error("cannot handle RDB format version {0}")]
    UnsupportedVersion(u16),

    #[error("unsupported module {0}")]
    UnsupportedModule(String),

    #[error("bad CRC at the end of the snapshot: stored {stored:#018x}, computed {computed:#018x}")]
    BadCrc { stored: u64, computed: u64 },

    /// A verifier or reader bound was crossed.
    #[error("{limit} is exceeded: {current} > {max}")]
    LimitExceeded {
        limit: &'static str,
        current: u64,
        max: u64,
    },

    /// A handler callback aborted the session.
    #[error("handler aborted: {0}")]
    Handler(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
