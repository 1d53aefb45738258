//! In-memory storage backend
//!
//! A reference implementation of [`StorageBackend`] holding every file as a
//! byte vector. It follows the quota model the store is written against:
//!
//! - capacity is granted with `request_capacity` up to an optional quota
//! - file data (growth through `set_length` or `write`) consumes granted capacity
//! - only unused capacity can be released
//!
//! Operation counters and one-shot fault injection make it the test double
//! for the store; the bench tool runs on it as well.

use crate::backend::{FileHandle, StorageBackend};
use async_trait::async_trait;
use filechunk_common::{Error, Result, StoreConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Backend operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    Open,
    Read,
    Write,
    SetLength,
    Delete,
    RequestCapacity,
    ReleaseCapacity,
}

#[derive(Debug, Clone)]
struct Fault {
    op: FaultOp,
    file: Option<String>,
}

/// Backend operation counters
#[derive(Debug, Default)]
pub struct BackendStats {
    pub opens: AtomicU64,
    pub closes: AtomicU64,
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    pub set_lengths: AtomicU64,
    pub deletes: AtomicU64,
    pub capacity_requests: AtomicU64,
    pub capacity_releases: AtomicU64,
    pub open_handles: AtomicU64,
    pub max_open_handles: AtomicU64,
    pub overlapping_opens: AtomicU64,
}

/// Point-in-time copy of [`BackendStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStatsSnapshot {
    pub opens: u64,
    pub closes: u64,
    pub reads: u64,
    pub writes: u64,
    pub set_lengths: u64,
    pub deletes: u64,
    pub capacity_requests: u64,
    pub capacity_releases: u64,
    pub max_open_handles: u64,
    pub overlapping_opens: u64,
}

impl BackendStatsSnapshot {
    /// File-level operations (open, read, write, set-length, delete)
    pub const fn io_ops(&self) -> u64 {
        self.opens + self.reads + self.writes + self.set_lengths + self.deletes
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<String, Vec<u8>>,
    open: HashMap<String, usize>,
    granted: u64,
    faults: Vec<Fault>,
}

impl MemoryState {
    fn used(&self) -> u64 {
        self.files.values().map(|data| data.len() as u64).sum()
    }

    fn remaining(&self) -> u64 {
        self.granted.saturating_sub(self.used())
    }

    fn take_fault(&mut self, op: FaultOp, file: Option<&str>) -> Result<()> {
        let hit = self
            .faults
            .iter()
            .position(|f| f.op == op && (f.file.is_none() || f.file.as_deref() == file));
        if let Some(pos) = hit {
            self.faults.remove(pos);
            return Err(std::io::Error::other(format!("injected {op:?} fault")).into());
        }
        Ok(())
    }

    fn file_mut(&mut self, name: &str) -> Result<&mut Vec<u8>> {
        self.files
            .get_mut(name)
            .ok_or_else(|| Error::FileNotFound(name.to_string()))
    }

    fn resize(&mut self, name: &str, length: u64) -> Result<()> {
        let current = self
            .files
            .get(name)
            .ok_or_else(|| Error::FileNotFound(name.to_string()))?
            .len() as u64;
        if length > current {
            let requested = length - current;
            let remaining = self.remaining();
            if requested > remaining {
                return Err(Error::QuotaExceeded {
                    requested,
                    remaining,
                });
            }
        }
        let length = usize::try_from(length)
            .map_err(|_| Error::internal(format!("length {length} does not fit in memory")))?;
        self.file_mut(name)?.resize(length, 0);
        Ok(())
    }
}

struct Shared {
    state: Mutex<MemoryState>,
    stats: BackendStats,
    quota: Option<u64>,
}

/// In-memory named-file backend
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    /// Create a backend without a capacity quota
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a backend that grants at most `quota` bytes of capacity
    pub fn with_quota(quota: u64) -> Self {
        Self::build(Some(quota))
    }

    /// Create a backend from the store configuration
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::build(config.memory_quota)
    }

    fn build(quota: Option<u64>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MemoryState::default()),
                stats: BackendStats::default(),
                quota,
            }),
        }
    }

    /// Contents of a file, if it exists
    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.shared.state.lock().files.get(name).cloned()
    }

    /// Sorted names of all files
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.state.lock().files.keys().cloned().collect();
        names.sort();
        names
    }

    /// Capacity currently granted
    pub fn granted(&self) -> u64 {
        self.shared.state.lock().granted
    }

    /// Bytes held by file data
    pub fn used(&self) -> u64 {
        self.shared.state.lock().used()
    }

    /// Handles currently open
    pub fn open_handles(&self) -> u64 {
        self.shared.stats.open_handles.load(Ordering::SeqCst)
    }

    /// Make the next matching operation fail
    ///
    /// With `file` set, only operations on that file match.
    pub fn inject_fault(&self, op: FaultOp, file: Option<&str>) {
        self.shared.state.lock().faults.push(Fault {
            op,
            file: file.map(str::to_string),
        });
    }

    /// Snapshot of the operation counters
    pub fn stats(&self) -> BackendStatsSnapshot {
        let s = &self.shared.stats;
        BackendStatsSnapshot {
            opens: s.opens.load(Ordering::SeqCst),
            closes: s.closes.load(Ordering::SeqCst),
            reads: s.reads.load(Ordering::SeqCst),
            writes: s.writes.load(Ordering::SeqCst),
            set_lengths: s.set_lengths.load(Ordering::SeqCst),
            deletes: s.deletes.load(Ordering::SeqCst),
            capacity_requests: s.capacity_requests.load(Ordering::SeqCst),
            capacity_releases: s.capacity_releases.load(Ordering::SeqCst),
            max_open_handles: s.max_open_handles.load(Ordering::SeqCst),
            overlapping_opens: s.overlapping_opens.load(Ordering::SeqCst),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn open(&self, name: &str) -> Result<Box<dyn FileHandle>> {
        tokio::task::yield_now().await;
        let mut state = self.shared.state.lock();
        state.take_fault(FaultOp::Open, Some(name))?;
        state.files.entry(name.to_string()).or_default();

        let holders = state.open.entry(name.to_string()).or_insert(0);
        *holders += 1;
        if *holders > 1 {
            self.shared
                .stats
                .overlapping_opens
                .fetch_add(1, Ordering::SeqCst);
        }
        drop(state);

        let stats = &self.shared.stats;
        stats.opens.fetch_add(1, Ordering::SeqCst);
        let open = stats.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_open_handles.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(MemoryFile {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.shared.state.lock();
        state.take_fault(FaultOp::Delete, Some(name))?;
        state
            .files
            .remove(name)
            .ok_or_else(|| Error::FileNotFound(name.to_string()))?;
        self.shared.stats.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.file_names())
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut state = self.shared.state.lock();
        let data = state
            .files
            .remove(old_name)
            .ok_or_else(|| Error::FileNotFound(old_name.to_string()))?;
        state.files.insert(new_name.to_string(), data);
        Ok(())
    }

    async fn request_capacity(&self, amount: u64) -> Result<u64> {
        tokio::task::yield_now().await;
        let mut state = self.shared.state.lock();
        state.take_fault(FaultOp::RequestCapacity, None)?;
        if let Some(quota) = self.shared.quota {
            let available = quota.saturating_sub(state.granted);
            if amount > available {
                return Err(Error::QuotaExceeded {
                    requested: amount,
                    remaining: available,
                });
            }
        }
        state.granted += amount;
        self.shared
            .stats
            .capacity_requests
            .fetch_add(1, Ordering::SeqCst);
        Ok(state.remaining())
    }

    async fn release_capacity(&self, amount: u64) -> Result<u64> {
        tokio::task::yield_now().await;
        let mut state = self.shared.state.lock();
        state.take_fault(FaultOp::ReleaseCapacity, None)?;
        let remaining = state.remaining();
        if amount > remaining {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot release {amount} bytes, only {remaining} unused"),
            )
            .into());
        }
        state.granted -= amount;
        self.shared
            .stats
            .capacity_releases
            .fetch_add(1, Ordering::SeqCst);
        Ok(state.remaining())
    }

    async fn remaining_capacity(&self) -> Result<u64> {
        Ok(self.shared.state.lock().remaining())
    }
}

struct MemoryFile {
    name: String,
    shared: Arc<Shared>,
    closed: bool,
}

impl MemoryFile {
    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.shared.state.lock();
        if let Some(holders) = state.open.get_mut(&self.name) {
            *holders = holders.saturating_sub(1);
        }
        drop(state);
        self.shared.stats.open_handles.fetch_sub(1, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::internal(format!("handle for {} is closed", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl FileHandle for MemoryFile {
    async fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.ensure_open()?;
        tokio::task::yield_now().await;
        let mut state = self.shared.state.lock();
        state.take_fault(FaultOp::Read, Some(&self.name))?;
        let data = state.file_mut(&self.name)?;

        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        let end = start.saturating_add(buf.len()).min(data.len());
        let n = end - start;
        buf[..n].copy_from_slice(&data[start..end]);

        self.shared.stats.reads.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.ensure_open()?;
        tokio::task::yield_now().await;
        let mut state = self.shared.state.lock();
        state.take_fault(FaultOp::Write, Some(&self.name))?;

        let end = offset + buf.len() as u64;
        let current = state.file_mut(&self.name)?.len() as u64;
        if end > current {
            state.resize(&self.name, end)?;
        }
        let start = usize::try_from(offset)
            .map_err(|_| Error::internal(format!("offset {offset} does not fit in memory")))?;
        state.file_mut(&self.name)?[start..start + buf.len()].copy_from_slice(buf);

        self.shared.stats.writes.fetch_add(1, Ordering::SeqCst);
        Ok(buf.len())
    }

    async fn set_length(&mut self, length: u64) -> Result<()> {
        self.ensure_open()?;
        tokio::task::yield_now().await;
        let mut state = self.shared.state.lock();
        state.take_fault(FaultOp::SetLength, Some(&self.name))?;
        state.resize(&self.name, length)?;
        self.shared.stats.set_lengths.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn length(&mut self) -> Result<u64> {
        self.ensure_open()?;
        let mut state = self.shared.state.lock();
        Ok(state.file_mut(&self.name)?.len() as u64)
    }

    async fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.release();
        self.shared.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MemoryFile {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_empty_file() {
        let backend = MemoryBackend::new();
        let mut file = backend.open("a_0").await.unwrap();
        assert_eq!(file.length().await.unwrap(), 0);
        file.close().await.unwrap();
        assert_eq!(backend.file_names(), vec!["a_0".to_string()]);
        assert_eq!(backend.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_set_length_consumes_capacity() {
        let backend = MemoryBackend::with_quota(16);
        assert_eq!(backend.request_capacity(10).await.unwrap(), 10);

        let mut file = backend.open("a_0").await.unwrap();
        file.set_length(8).await.unwrap();
        assert_eq!(backend.remaining_capacity().await.unwrap(), 2);

        let err = file.set_length(11).await.unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { requested: 3, remaining: 2 }));
        file.close().await.unwrap();

        // Only unused capacity can be released
        assert!(backend.release_capacity(3).await.is_err());
        assert_eq!(backend.release_capacity(2).await.unwrap(), 0);
        assert_eq!(backend.granted(), 8);
    }

    #[tokio::test]
    async fn test_quota_limits_requests() {
        let backend = MemoryBackend::with_quota(15);
        backend.request_capacity(10).await.unwrap();
        let err = backend.request_capacity(10).await.unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { requested: 10, remaining: 5 }));
        assert_eq!(backend.granted(), 10);
    }

    #[tokio::test]
    async fn test_read_write_at_offsets() {
        let backend = MemoryBackend::new();
        backend.request_capacity(8).await.unwrap();
        let mut file = backend.open("f").await.unwrap();
        file.set_length(8).await.unwrap();
        assert_eq!(file.write(b"abc", 4).await.unwrap(), 3);

        let mut buf = [0u8; 6];
        assert_eq!(file.read(&mut buf, 2).await.unwrap(), 6);
        assert_eq!(&buf, b"\0\0abc\0");

        // Past the end
        let mut tail = [0u8; 4];
        assert_eq!(file.read(&mut tail, 6).await.unwrap(), 2);
        file.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_fault_fires_once() {
        let backend = MemoryBackend::new();
        backend.inject_fault(FaultOp::Open, Some("x"));
        assert!(backend.open("y").await.is_ok());
        assert!(backend.open("x").await.is_err());
        assert!(backend.open("x").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_and_rename() {
        let backend = MemoryBackend::new();
        backend.open("old").await.unwrap().close().await.unwrap();
        backend.rename("old", "new").await.unwrap();
        assert_eq!(backend.list().await.unwrap(), vec!["new".to_string()]);
        backend.delete("new").await.unwrap();
        assert!(backend.list().await.unwrap().is_empty());
        assert!(backend.delete("new").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_dropped_handle_is_released() {
        let backend = MemoryBackend::new();
        {
            let _file = backend.open("a").await.unwrap();
            let _other = backend.open("a").await.unwrap();
            assert_eq!(backend.open_handles(), 2);
        }
        assert_eq!(backend.open_handles(), 0);
        assert_eq!(backend.stats().overlapping_opens, 1);
        assert_eq!(backend.stats().max_open_handles, 2);
    }
}
