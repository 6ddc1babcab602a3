// ironbase-core/src/error.rs
// Single typed error enum covering the taxonomy: Validation, NotFound, Conflict,
// Io, Corruption, Config.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Dimension mismatch, unknown collection, malformed filter operator, etc.
    /// Surfaced directly to the caller; no state change has occurred.
    #[error("validation error: {0}")]
    Validation(String),

    /// doc_id does not exist. Most call sites prefer returning `Option`/`bool`
    /// directly, but this variant exists for call sites that must propagate
    /// through `?` (e.g. deep in a pipeline stage).
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller supplied a doc_id that already exists on insert.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Failed read/write to WAL, SSTable, or vector snapshot.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// SSTable/WAL/HNSW snapshot failed to decode.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Invalid parameters at startup. Fatal.
    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// True for errors that a background worker (flush/compaction) should log
    /// and retry rather than propagate.
    pub fn is_retryable_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Corruption(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Encoding(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_io_classification() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(io.is_retryable_io());
        let validation = Error::validation("bad field");
        assert!(!validation.is_retryable_io());
    }

    #[test]
    fn display_messages_are_readable() {
        assert_eq!(
            Error::validation("dimension mismatch").to_string(),
            "validation error: dimension mismatch"
        );
        assert_eq!(
            Error::not_found("doc abc123").to_string(),
            "not found: doc abc123"
        );
    }
}
