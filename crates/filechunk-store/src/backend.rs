//! Storage backend abstraction
//!
//! The chunk store only needs whole-file random access against named files
//! plus a capacity budget. Backends implement these two traits; handles are
//! not assumed to be safe for concurrent use, which is why every handle is
//! owned by exactly one file queue for the duration of one operation.

use async_trait::async_trait;
use filechunk_common::Result;

/// An open backend file
///
/// Obtained from [`StorageBackend::open`] and always closed by the caller,
/// on success and failure alike.
#[async_trait]
pub trait FileHandle: Send {
    /// Read into `buf` starting at `offset`; returns the number of bytes read
    ///
    /// Reading past the end of the file returns fewer bytes.
    async fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Write `buf` at `offset`; returns the number of bytes written
    async fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Grow or shrink the file to `length` bytes
    async fn set_length(&mut self, length: u64) -> Result<()>;

    /// Current file length
    async fn length(&mut self) -> Result<u64>;

    /// Flush buffered writes
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the handle
    async fn close(&mut self) -> Result<()>;
}

/// Named-file storage with a capacity quota
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Open the named file, creating it empty if it does not exist
    async fn open(&self, name: &str) -> Result<Box<dyn FileHandle>>;

    /// Remove the named file
    async fn delete(&self, name: &str) -> Result<()>;

    /// Names of all existing files
    async fn list(&self) -> Result<Vec<String>>;

    /// Rename a file atomically
    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Request `amount` more bytes of capacity; returns the remaining capacity
    async fn request_capacity(&self, amount: u64) -> Result<u64>;

    /// Give back `amount` bytes of unused capacity; returns the remaining capacity
    async fn release_capacity(&self, amount: u64) -> Result<u64>;

    /// Capacity granted but not yet used by file data
    async fn remaining_capacity(&self) -> Result<u64>;
}
