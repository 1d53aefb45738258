//! Error types for FileChunk
//!
//! This module defines the common error type used throughout the chunk store.
//! The type is `Clone` so that a single allocation failure can be handed to
//! every task waiting on a store's readiness.

use crate::types::StoreIdError;
use std::sync::Arc;
use thiserror::Error;

/// Common result type for FileChunk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for FileChunk
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Construction errors
    #[error("invalid store options: {0}")]
    Validation(String),

    #[error("invalid store identifier: {0}")]
    InvalidIdentifier(#[from] StoreIdError),

    // Request errors
    #[error("invalid chunk: {index}")]
    InvalidChunk { index: u64 },

    #[error("chunk {index} length must be {expected}, got {actual}")]
    LengthMismatch {
        index: u64,
        expected: u64,
        actual: u64,
    },

    #[error("invalid offset and/or length: offset {offset}, length {length}, chunk length {chunk_length}")]
    InvalidRange {
        offset: u64,
        length: u64,
        chunk_length: u64,
    },

    #[error("store is closed")]
    Closed,

    // Backend errors
    #[error("backend I/O error: {0}")]
    Backend(Arc<std::io::Error>),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("capacity quota exceeded: requested {requested} bytes, remaining {remaining} bytes")]
    QuotaExceeded { requested: u64, remaining: u64 },

    #[error("short {op} on {file}: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        op: &'static str,
        file: String,
        expected: u64,
        actual: u64,
    },

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Backend(Arc::new(err))
    }
}

impl Error {
    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a retryable error
    ///
    /// The store itself never retries; callers may.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            Self::QuotaExceeded { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::FileNotFound(_) | Self::InvalidChunk { .. } => true,
            Self::Backend(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Check if the request was rejected before any backend I/O was issued
    #[must_use]
    pub fn is_before_io(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InvalidIdentifier(_)
                | Self::InvalidChunk { .. }
                | Self::LengthMismatch { .. }
                | Self::InvalidRange { .. }
                | Self::Closed
        )
    }

    /// Check if this is the closed-store error
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let err: Error = std::io::Error::from(std::io::ErrorKind::Interrupted).into();
        assert!(err.is_retryable());
        assert!(Error::QuotaExceeded {
            requested: 10,
            remaining: 0
        }
        .is_retryable());
        assert!(!Error::Closed.is_retryable());
    }

    #[test]
    fn test_error_not_found() {
        assert!(Error::FileNotFound("abc_0".into()).is_not_found());
        assert!(Error::InvalidChunk { index: 3 }.is_not_found());
        let err: Error = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(err.is_not_found());
        assert!(!Error::Closed.is_not_found());
    }

    #[test]
    fn test_error_before_io() {
        assert!(Error::InvalidChunk { index: 0 }.is_before_io());
        assert!(Error::LengthMismatch {
            index: 0,
            expected: 10,
            actual: 4
        }
        .is_before_io());
        assert!(!Error::internal("boom").is_before_io());
    }

    #[test]
    fn test_error_clone_shares_source() {
        let err: Error = std::io::Error::other("disk gone").into();
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
        assert_eq!(copy.to_string(), "backend I/O error: disk gone");
    }
}
