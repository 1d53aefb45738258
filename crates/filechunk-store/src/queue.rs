//! Serialized per-file access under a global I/O limit
//!
//! Every backing file of a store gets a [`FileAccessQueue`]. Operations on one
//! file run strictly one at a time in submission order; each of them opens the
//! file, does its work and closes the handle again. Across all files of all
//! stores sharing an [`IoLimiter`], at most `width` operations are in flight.
//!
//! ```text
//! put(3)  ──► queue "abc_0" ──┐
//! get(3)  ──► queue "abc_0" ──┤      ┌───────────────┐
//! put(4)  ──► queue "abc_1" ──┼────► │ IoLimiter (5) │ ──► backend
//! put(0)  ──► queue "xyz_0" ──┘      └───────────────┘
//! ```

use crate::backend::{FileHandle, StorageBackend};
use bytes::Bytes;
use filechunk_common::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Global bound on concurrent backend operations
#[derive(Debug, Clone)]
pub struct IoLimiter {
    permits: Arc<Semaphore>,
    width: usize,
}

impl IoLimiter {
    /// Create a limiter admitting `width` operations at once (at least one)
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            permits: Arc::new(Semaphore::new(width)),
            width,
        }
    }

    /// Maximum number of operations in flight
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Operations currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.width - self.permits.available_permits()
    }

    /// Wait for a free slot; the slot is returned when the permit drops
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("I/O limiter closed"))
    }
}

#[derive(Debug)]
enum FileOp {
    Read { offset: u64, length: u64 },
    Write { offset: u64, data: Bytes },
    SetLength(u64),
}

impl FileOp {
    const fn name(&self) -> &'static str {
        match self {
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::SetLength(_) => "set_length",
        }
    }
}

enum OpOutput {
    Data(Bytes),
    Done,
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// FIFO operation queue for one backend file
pub struct FileAccessQueue {
    name: String,
    backend: Arc<dyn StorageBackend>,
    limiter: IoLimiter,
    /// One operation at a time; tokio's mutex grants the lock in FIFO order
    turn: Mutex<()>,
    pending: AtomicUsize,
}

impl FileAccessQueue {
    pub fn new(name: impl Into<String>, backend: Arc<dyn StorageBackend>, limiter: IoLimiter) -> Self {
        Self {
            name: name.into(),
            backend,
            limiter,
            turn: Mutex::new(()),
            pending: AtomicUsize::new(0),
        }
    }

    /// Backend name of the file
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operations submitted and not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Write `data` at `offset`
    pub async fn write_at(&self, offset: u64, data: Bytes) -> Result<()> {
        self.run(FileOp::Write { offset, data }).await.map(|_| ())
    }

    /// Read exactly `length` bytes at `offset`
    pub async fn read_at(&self, offset: u64, length: u64) -> Result<Bytes> {
        match self.run(FileOp::Read { offset, length }).await? {
            OpOutput::Data(data) => Ok(data),
            OpOutput::Done => Ok(Bytes::new()),
        }
    }

    /// Resize the file to `length` bytes
    pub async fn set_length(&self, length: u64) -> Result<()> {
        self.run(FileOp::SetLength(length)).await.map(|_| ())
    }

    /// Wait until every operation submitted so far has finished
    pub async fn drain(&self) {
        let _turn = self.turn.lock().await;
    }

    async fn run(&self, op: FileOp) -> Result<OpOutput> {
        let _pending = PendingGuard::enter(&self.pending);
        let _turn = self.turn.lock().await;
        let _slot = self.limiter.acquire().await?;

        let op_name = op.name();
        debug!("{} on {}", op_name, self.name);

        let mut handle = self.backend.open(&self.name).await?;
        let result = Self::execute(&self.name, handle.as_mut(), op).await;
        let closed = handle.close().await;

        match (result, closed) {
            (Ok(output), Ok(())) => Ok(output),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!("Failed to close {} after failed {}: {}", self.name, op_name, close_err);
                Err(e)
            }
        }
    }

    async fn execute(name: &str, handle: &mut dyn FileHandle, op: FileOp) -> Result<OpOutput> {
        match op {
            FileOp::Read { offset, length } => {
                let len = usize::try_from(length)
                    .map_err(|_| Error::internal(format!("read of {length} bytes too large")))?;
                let mut buf = vec![0u8; len];
                let mut filled = 0;
                while filled < len {
                    let n = handle.read(&mut buf[filled..], offset + filled as u64).await?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                if filled < len {
                    return Err(Error::ShortTransfer {
                        op: "read",
                        file: name.to_string(),
                        expected: length,
                        actual: filled as u64,
                    });
                }
                Ok(OpOutput::Data(Bytes::from(buf)))
            }
            FileOp::Write { offset, data } => {
                let mut written = 0;
                while written < data.len() {
                    let n = handle.write(&data[written..], offset + written as u64).await?;
                    if n == 0 {
                        break;
                    }
                    written += n;
                }
                if written < data.len() {
                    return Err(Error::ShortTransfer {
                        op: "write",
                        file: name.to_string(),
                        expected: data.len() as u64,
                        actual: written as u64,
                    });
                }
                handle.flush().await?;
                Ok(OpOutput::Done)
            }
            FileOp::SetLength(length) => {
                handle.set_length(length).await?;
                Ok(OpOutput::Done)
            }
        }
    }
}

impl std::fmt::Debug for FileAccessQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAccessQueue")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FaultOp, MemoryBackend};
    use futures::future::join_all;

    fn queue(backend: &MemoryBackend, name: &str, limiter: &IoLimiter) -> FileAccessQueue {
        FileAccessQueue::new(name, Arc::new(backend.clone()), limiter.clone())
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let backend = MemoryBackend::new();
        backend.request_capacity(16).await.unwrap();
        let q = queue(&backend, "f_0", &IoLimiter::new(5));

        q.set_length(8).await.unwrap();
        q.write_at(2, Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(q.read_at(2, 5).await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(q.read_at(0, 8).await.unwrap().as_ref(), b"\0\0hello\0");
        assert_eq!(backend.open_handles(), 0);
        assert_eq!(q.pending(), 0);
    }

    #[tokio::test]
    async fn test_operations_apply_in_submission_order() {
        let backend = MemoryBackend::new();
        backend.request_capacity(4).await.unwrap();
        let q = queue(&backend, "f_0", &IoLimiter::new(5));
        q.set_length(4).await.unwrap();

        let writes = ["aaaa", "bbbb", "cccc", "dddd"]
            .into_iter()
            .map(|s| q.write_at(0, Bytes::from_static(s.as_bytes())));
        for result in join_all(writes).await {
            result.unwrap();
        }
        assert_eq!(backend.file("f_0").unwrap(), b"dddd");
        assert_eq!(backend.stats().overlapping_opens, 0);
    }

    #[tokio::test]
    async fn test_read_after_write_sees_write() {
        let backend = MemoryBackend::new();
        backend.request_capacity(3).await.unwrap();
        let q = queue(&backend, "f_0", &IoLimiter::new(5));
        q.set_length(3).await.unwrap();

        let (written, read) = tokio::join!(
            q.write_at(0, Bytes::from_static(b"xyz")),
            q.read_at(0, 3)
        );
        written.unwrap();
        assert_eq!(read.unwrap().as_ref(), b"xyz");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_limiter_bounds_open_handles() {
        let backend = MemoryBackend::new();
        backend.request_capacity(1024).await.unwrap();
        let limiter = IoLimiter::new(2);
        let queues: Vec<_> = (0..16)
            .map(|i| Arc::new(queue(&backend, &format!("f_{i}"), &limiter)))
            .collect();

        let tasks = queues.iter().map(|q| {
            let q = Arc::clone(q);
            tokio::spawn(async move {
                q.set_length(64).await?;
                for i in 0..8u64 {
                    q.write_at(i * 8, Bytes::from(vec![i as u8; 8])).await?;
                }
                q.read_at(0, 64).await
            })
        });
        for result in join_all(tasks).await {
            assert_eq!(result.unwrap().unwrap().len(), 64);
        }

        let stats = backend.stats();
        assert!(stats.max_open_handles <= 2);
        assert_eq!(stats.overlapping_opens, 0);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_short_read_is_error() {
        let backend = MemoryBackend::new();
        backend.request_capacity(4).await.unwrap();
        let q = queue(&backend, "f_0", &IoLimiter::new(1));
        q.set_length(4).await.unwrap();

        let err = q.read_at(2, 4).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ShortTransfer { op: "read", expected: 4, actual: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_failed_operation_closes_handle() {
        let backend = MemoryBackend::new();
        backend.request_capacity(4).await.unwrap();
        let q = queue(&backend, "f_0", &IoLimiter::new(1));
        q.set_length(4).await.unwrap();

        backend.inject_fault(FaultOp::Write, Some("f_0"));
        assert!(q.write_at(0, Bytes::from_static(b"ab")).await.is_err());
        assert_eq!(backend.open_handles(), 0);

        // The queue keeps working after a failure
        q.write_at(0, Bytes::from_static(b"ab")).await.unwrap();
        assert_eq!(backend.file("f_0").unwrap(), b"ab\0\0");
    }

    #[tokio::test]
    async fn test_drain_waits_for_submitted_work() {
        let backend = MemoryBackend::new();
        backend.request_capacity(8).await.unwrap();
        let q = Arc::new(queue(&backend, "f_0", &IoLimiter::new(1)));

        let writer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.set_length(8).await })
        };
        tokio::task::yield_now().await;
        q.drain().await;
        writer.await.unwrap().unwrap();
        assert_eq!(q.pending(), 0);
    }
}
