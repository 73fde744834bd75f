//! Error types for session persistence

/// Errors from reading or writing the persisted session record.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("session record error: {0}")]
    Record(String),

    /// The session was cleared while a refresh was in flight.
    #[error("session ended before the refresh could be applied")]
    SessionEnded,
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
