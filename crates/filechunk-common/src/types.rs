//! Core type definitions for FileChunk
//!
//! This module defines the store identifier, the file descriptors a store is
//! built from, and the request types of the chunk API.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum identifier length in bytes
pub const MAX_STORE_ID_LEN: usize = 128;

/// Identifier of a chunk store
///
/// Used both as the registry key and as the prefix of the store's backend
/// file names (`{identifier}_{file index}`). In swarm clients this is the
/// hex info-hash of the transfer.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct StoreId(String);

impl StoreId {
    /// Create a new store identifier
    pub fn new(id: impl Into<String>) -> Result<Self, StoreIdError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Generate a random identifier
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Get the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Backend file name for the file declared at `file_index`
    #[must_use]
    pub fn file_name(&self, file_index: usize) -> String {
        format!("{}_{}", self.0, file_index)
    }

    fn validate(id: &str) -> Result<(), StoreIdError> {
        if id.is_empty() {
            return Err(StoreIdError::Empty);
        }
        if id.len() > MAX_STORE_ID_LEN {
            return Err(StoreIdError::TooLong);
        }
        // Backend names are flat, keep them portable
        for c in id.chars() {
            if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
                return Err(StoreIdError::InvalidChar(c));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreId({:?})", self.0)
    }
}

impl TryFrom<&str> for StoreId {
    type Error = StoreIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Errors that can occur when creating a store identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreIdError {
    #[error("store identifier cannot be empty")]
    Empty,
    #[error("store identifier must be at most 128 bytes")]
    TooLong,
    #[error("store identifier contains invalid character: {0:?}")]
    InvalidChar(char),
}

/// One backing file of a multi-file item
///
/// `offset` is the file's position in the logical concatenation of all
/// files. When absent it is assigned by prefix sum in declaration order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    /// Logical path, unique within a store
    pub path: String,
    /// File length in bytes
    pub length: u64,
    /// Offset in the logical item
    #[serde(default)]
    pub offset: Option<u64>,
}

impl FileSpec {
    /// Create a file descriptor with a derived offset
    pub fn new(path: impl Into<String>, length: u64) -> Self {
        Self {
            path: path.into(),
            length,
            offset: None,
        }
    }

    /// Set an explicit offset
    #[must_use]
    pub const fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Options for constructing a chunk store
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Registry key and backend naming prefix
    pub identifier: StoreId,
    /// Backing files in declaration order
    pub files: Vec<FileSpec>,
    /// Expected total length; construction fails if the files disagree
    pub length: Option<u64>,
}

impl StoreOptions {
    /// Create store options without a declared total length
    pub const fn new(identifier: StoreId, files: Vec<FileSpec>) -> Self {
        Self {
            identifier,
            files,
            length: None,
        }
    }

    /// Declare the expected total length
    #[must_use]
    pub const fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }
}

/// Byte window of a `get` request, relative to the start of the chunk
///
/// An absent offset means 0, an absent length means "to the end of the
/// chunk".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRange {
    pub offset: Option<u64>,
    pub length: Option<u64>,
}

impl GetRange {
    /// The whole chunk
    #[must_use]
    pub const fn full() -> Self {
        Self {
            offset: None,
            length: None,
        }
    }

    /// `length` bytes starting at `offset`
    #[must_use]
    pub const fn new(offset: u64, length: u64) -> Self {
        Self {
            offset: Some(offset),
            length: Some(length),
        }
    }

    /// Everything from `offset` to the end of the chunk
    #[must_use]
    pub const fn from_offset(offset: u64) -> Self {
        Self {
            offset: Some(offset),
            length: None,
        }
    }

    /// The first `length` bytes of the chunk
    #[must_use]
    pub const fn prefix(length: u64) -> Self {
        Self {
            offset: None,
            length: Some(length),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_id_validation() {
        assert!(StoreId::new("d2474e86c95b19b8bcfdb92bc12c9d44667cfa36").is_ok());
        assert!(StoreId::new("store-1.v2_a").is_ok());
        assert_eq!(StoreId::new(""), Err(StoreIdError::Empty));
        assert_eq!(StoreId::new("a/b"), Err(StoreIdError::InvalidChar('/')));
        assert_eq!(
            StoreId::new("x".repeat(MAX_STORE_ID_LEN + 1)),
            Err(StoreIdError::TooLong)
        );
    }

    #[test]
    fn test_store_id_file_name() {
        let id = StoreId::new("1234").unwrap();
        assert_eq!(id.file_name(0), "1234_0");
        assert_eq!(id.file_name(12), "1234_12");
        assert_eq!(id.to_string(), "1234");
    }

    #[test]
    fn test_random_store_ids_differ() {
        let a = StoreId::random();
        let b = StoreId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_file_spec_json_offset_optional() {
        let spec: FileSpec = serde_json::from_str(r#"{"path":"a/b.txt","length":7}"#).unwrap();
        assert_eq!(spec, FileSpec::new("a/b.txt", 7));
        let spec: FileSpec =
            serde_json::from_str(r#"{"path":"c","length":2,"offset":1}"#).unwrap();
        assert_eq!(spec.offset, Some(1));
    }
}
