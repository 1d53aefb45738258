//! Chunk store
//!
//! A [`ChunkStore`] presents a multi-file item as a sequence of fixed-size
//! chunks. Construction validates the file layout and builds the chunk map
//! synchronously, then reserves capacity and preallocates every backing file
//! in the background.
//!
//! ```text
//!              allocation ok            close()             destroy()
//! Allocating ─────────────────► Ready ──────────► Closed ──────────► Destroyed
//!      │                                            ▲
//!      │ allocation failed                          │ close()
//!      └──────────────────────► Failed ─────────────┘
//! ```
//!
//! Puts and gets wait for allocation, then fan out one operation per touched
//! file through that file's [`FileAccessQueue`].

use crate::backend::StorageBackend;
use crate::chunk::{ChunkIndex, ChunkMap, ChunkMapper, ChunkRange, FileExtent};
use crate::context::StoreContext;
use crate::ledger::CapacityLedger;
use crate::queue::{FileAccessQueue, IoLimiter};
use crate::registry::StoreRegistry;
use crate::stats::{StoreStats, StoreStatsSnapshot};
use bytes::{Bytes, BytesMut};
use filechunk_common::{Error, GetRange, Result, StoreId, StoreOptions};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::{RwLock, RwLockReadGuard, watch};
use tracing::{debug, info, warn};

/// Lifecycle state of a store
///
/// States only move forward, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StoreState {
    /// Reserving capacity and preallocating files
    Allocating,
    /// Accepting puts and gets
    Ready,
    /// Allocation failed; the store only accepts close and destroy
    Failed,
    /// No longer admitting puts and gets
    Closed,
    /// Files deleted and capacity released
    Destroyed,
}

#[derive(Debug, Clone)]
enum Allocation {
    Pending,
    Ready,
    Failed(Error),
}

/// What the capacity ledger holds for this store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reservation {
    None,
    /// Counted, backend has not granted it
    Counted,
    /// Counted and granted by the backend
    Granted,
}

/// One backing file of a store
#[derive(Debug)]
pub struct StoreFile {
    path: String,
    offset: u64,
    length: u64,
    queue: FileAccessQueue,
}

impl StoreFile {
    /// Logical path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Offset in the logical item
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Backend file name
    pub fn name(&self) -> &str {
        self.queue.name()
    }
}

struct StoreInner {
    id: StoreId,
    chunk_length: u64,
    total_length: u64,
    chunk_count: u64,
    last_chunk_length: u64,
    files: Vec<StoreFile>,
    map: ChunkMap,

    backend: Arc<dyn StorageBackend>,
    limiter: IoLimiter,
    ledger: Arc<CapacityLedger>,
    registry: Weak<StoreRegistry>,
    runtime: Handle,

    allocation: watch::Sender<Allocation>,
    reservation: Mutex<Reservation>,
    state: Mutex<StoreState>,
    closed: AtomicBool,
    /// Held shared by puts and gets, exclusively by close
    gate: RwLock<()>,
    /// Serializes destroy
    teardown: tokio::sync::Mutex<()>,
    stats: StoreStats,
}

/// Chunk store over a set of backend files
///
/// Cloning is cheap; clones share the same store.
#[derive(Clone)]
pub struct ChunkStore {
    inner: Arc<StoreInner>,
}

impl ChunkStore {
    /// Create a store and start allocating it
    ///
    /// Returns as soon as the layout is validated and the store registered;
    /// use [`ready`](Self::ready) to wait for allocation. Must be called from
    /// within a tokio runtime.
    pub fn new(context: &StoreContext, chunk_length: u64, options: StoreOptions) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            Error::Configuration("chunk stores must be created inside a tokio runtime".to_string())
        })?;
        let (extents, total_length) = resolve_layout(chunk_length, &options)?;

        let mapper = ChunkMapper::new(chunk_length);
        let map = mapper.build_map(&extents);
        let id = options.identifier;

        let files = options
            .files
            .into_iter()
            .zip(&extents)
            .enumerate()
            .map(|(index, (spec, extent))| StoreFile {
                path: spec.path,
                offset: extent.offset,
                length: extent.length,
                queue: FileAccessQueue::new(
                    id.file_name(index),
                    Arc::clone(context.backend()),
                    context.limiter().clone(),
                ),
            })
            .collect();

        let (allocation, _) = watch::channel(Allocation::Pending);
        let store = Self {
            inner: Arc::new(StoreInner {
                id,
                chunk_length,
                total_length,
                chunk_count: mapper.chunk_count(total_length),
                last_chunk_length: mapper.last_chunk_length(total_length),
                files,
                map,
                backend: Arc::clone(context.backend()),
                limiter: context.limiter().clone(),
                ledger: Arc::clone(context.ledger()),
                registry: Arc::downgrade(context.registry()),
                runtime,
                allocation,
                reservation: Mutex::new(Reservation::None),
                state: Mutex::new(StoreState::Allocating),
                closed: AtomicBool::new(false),
                gate: RwLock::new(()),
                teardown: tokio::sync::Mutex::new(()),
                stats: StoreStats::new(),
            }),
        };

        if context.registry().register(store.clone()).is_some() {
            debug!("Store {} replaced an earlier registration", store.inner.id);
        }
        store.inner.runtime.spawn(store.clone().allocate());

        info!(
            "Created store {}: {} bytes in {} files, {} chunks of {} bytes",
            store.inner.id,
            total_length,
            store.inner.files.len(),
            store.inner.chunk_count,
            chunk_length
        );
        Ok(store)
    }

    pub fn identifier(&self) -> &StoreId {
        &self.inner.id
    }

    /// Total length of the item in bytes
    pub fn length(&self) -> u64 {
        self.inner.total_length
    }

    pub fn chunk_length(&self) -> u64 {
        self.inner.chunk_length
    }

    /// Number of chunks
    pub fn chunk_count(&self) -> u64 {
        self.inner.chunk_count
    }

    /// Length of the final chunk
    pub fn last_chunk_length(&self) -> u64 {
        self.inner.last_chunk_length
    }

    /// Backing files in declaration order
    pub fn files(&self) -> &[StoreFile] {
        &self.inner.files
    }

    pub fn map(&self) -> &ChunkMap {
        &self.inner.map
    }

    pub fn state(&self) -> StoreState {
        *self.inner.state.lock()
    }

    /// Check if close has been requested
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> StoreStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Check if two handles refer to the same store
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Runtime the store was created on
    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Expected length of the chunk at `index`
    pub fn chunk_len(&self, index: ChunkIndex) -> u64 {
        if index.checked_add(1) == Some(self.inner.chunk_count) {
            self.inner.last_chunk_length
        } else {
            self.inner.chunk_length
        }
    }

    /// Wait until the store is allocated
    ///
    /// Fails with the allocation error if allocation failed, and with
    /// [`Error::Closed`] once the store has been closed.
    pub async fn ready(&self) -> Result<()> {
        self.allocation().await?;
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Write a whole chunk
    pub async fn put(&self, index: ChunkIndex, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        let len = data.len() as u64;
        let start = Instant::now();

        let result = self.write_chunk(index, data).await;
        match &result {
            Ok(()) => self
                .inner
                .stats
                .record_put(len, elapsed_us(start)),
            Err(e) => {
                self.inner.stats.record_put_error();
                debug!("put({}) on {} failed: {}", index, self.inner.id, e);
            }
        }
        result
    }

    /// Read a chunk, or a window of it
    pub async fn get(&self, index: ChunkIndex, range: GetRange) -> Result<Bytes> {
        let start = Instant::now();

        let result = self.read_chunk(index, range).await;
        match &result {
            Ok(data) => self
                .inner
                .stats
                .record_get(data.len() as u64, elapsed_us(start)),
            Err(e) => {
                self.inner.stats.record_get_error();
                debug!("get({}) on {} failed: {}", index, self.inner.id, e);
            }
        }
        result
    }

    /// Stop admitting puts and gets and wait for in-flight work
    ///
    /// Idempotent. Waits for allocation to finish first, whatever its outcome.
    pub async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Err(e) = self.allocation().await {
            debug!("Closing store {} after failed allocation: {}", self.inner.id, e);
        }

        let _gate = self.inner.gate.write().await;
        for file in &self.inner.files {
            file.queue.drain().await;
        }

        if self.advance(StoreState::Closed) {
            info!("Closed store {}", self.inner.id);
        }
        Ok(())
    }

    /// Close the store, delete its files and release its capacity
    ///
    /// Idempotent, and succeeds for stores whose allocation failed. If the
    /// backend refuses the capacity release the store is still destroyed and
    /// the error returned.
    pub async fn destroy(&self) -> Result<()> {
        let _teardown = self.inner.teardown.lock().await;
        if self.state() == StoreState::Destroyed {
            return Ok(());
        }
        self.close().await?;

        let names: HashSet<&str> = self.inner.files.iter().map(StoreFile::name).collect();
        let existing = self.inner.backend.list().await?;
        let deletes = existing
            .iter()
            .filter(|name| names.contains(name.as_str()))
            .map(|name| async move {
                let _slot = self.inner.limiter.acquire().await?;
                debug!("delete {}", name);
                self.inner.backend.delete(name).await
            });
        join_all(deletes)
            .await
            .into_iter()
            .collect::<Result<Vec<()>>>()?;

        let reservation = std::mem::replace(&mut *self.inner.reservation.lock(), Reservation::None);
        let released = match reservation {
            Reservation::Granted => self
                .inner
                .ledger
                .release(self.inner.total_length)
                .await
                .map(|_| ()),
            Reservation::Counted => {
                self.inner.ledger.forget(self.inner.total_length);
                Ok(())
            }
            Reservation::None => Ok(()),
        };
        if let Err(e) = &released {
            warn!("Failed to release capacity of store {}: {}", self.inner.id, e);
        }

        self.deregister();
        self.advance(StoreState::Destroyed);
        info!("Destroyed store {}", self.inner.id);
        released
    }

    async fn write_chunk(&self, index: ChunkIndex, data: Bytes) -> Result<()> {
        let ranges = self
            .inner
            .map
            .get(index)
            .ok_or(Error::InvalidChunk { index })?;
        self.ready().await?;

        let expected = self.chunk_len(index);
        if data.len() as u64 != expected {
            return Err(Error::LengthMismatch {
                index,
                expected,
                actual: data.len() as u64,
            });
        }

        let _gate = self.admit().await?;
        let isolate = ranges.len() > 1;
        let writes = ranges.iter().map(|range| {
            let slice = data.slice(range.from as usize..range.to as usize);
            let payload = if isolate {
                Bytes::copy_from_slice(&slice)
            } else {
                slice
            };
            self.inner.files[range.file]
                .queue
                .write_at(range.file_offset, payload)
        });

        join_all(writes).await.into_iter().collect()
    }

    async fn read_chunk(&self, index: ChunkIndex, range: GetRange) -> Result<Bytes> {
        let ranges = self
            .inner
            .map
            .get(index)
            .ok_or(Error::InvalidChunk { index })?;
        self.ready().await?;

        let chunk_len = self.chunk_len(index);
        let offset = range.offset.unwrap_or(0);
        let length = range.length.unwrap_or_else(|| chunk_len.saturating_sub(offset));
        let invalid = Error::InvalidRange {
            offset,
            length,
            chunk_length: chunk_len,
        };
        let end = match offset.checked_add(length) {
            Some(end) if end <= chunk_len => end,
            _ => return Err(invalid),
        };
        if length == 0 {
            return Ok(Bytes::new());
        }

        let mut targets: Vec<ChunkRange> = ranges
            .iter()
            .filter_map(|r| r.clip(offset, end))
            .collect();
        if targets.is_empty() {
            return Err(Error::internal(format!(
                "chunk {index} of store {} has no file range in [{offset}, {end})",
                self.inner.id
            )));
        }
        targets.sort_by_key(|r| r.from);

        let _gate = self.admit().await?;
        let reads = targets.iter().map(|r| {
            self.inner.files[r.file]
                .queue
                .read_at(r.file_offset, r.len())
        });
        let mut parts = join_all(reads)
            .await
            .into_iter()
            .collect::<Result<Vec<Bytes>>>()?;

        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }
        let mut out = BytesMut::with_capacity(length as usize);
        for part in &parts {
            out.extend_from_slice(part);
        }
        Ok(out.freeze())
    }

    /// Enter the I/O section, unless the store is closing
    async fn admit(&self) -> Result<RwLockReadGuard<'_, ()>> {
        let gate = self.inner.gate.read().await;
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(gate)
    }

    async fn allocation(&self) -> Result<()> {
        let mut rx = self.inner.allocation.subscribe();
        let outcome = rx
            .wait_for(|a| !matches!(a, Allocation::Pending))
            .await
            .map_err(|_| Error::internal("allocation signal dropped"))?;
        match &*outcome {
            Allocation::Failed(e) => Err(e.clone()),
            _ => Ok(()),
        }
    }

    async fn allocate(self) {
        match self.preallocate().await {
            Ok(()) => {
                self.advance(StoreState::Ready);
                debug!("Store {} ready", self.inner.id);
                self.inner.allocation.send_replace(Allocation::Ready);
            }
            Err(e) => {
                warn!("Allocation of store {} failed: {}", self.inner.id, e);
                self.advance(StoreState::Failed);
                self.deregister();
                self.inner.allocation.send_replace(Allocation::Failed(e));
            }
        }
    }

    async fn preallocate(&self) -> Result<()> {
        *self.inner.reservation.lock() = Reservation::Counted;
        self.inner.ledger.reserve(self.inner.total_length).await?;
        *self.inner.reservation.lock() = Reservation::Granted;

        let resizes = self
            .inner
            .files
            .iter()
            .map(|file| file.queue.set_length(file.length));
        join_all(resizes)
            .await
            .into_iter()
            .collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    fn advance(&self, next: StoreState) -> bool {
        let mut state = self.inner.state.lock();
        if next > *state {
            *state = next;
            true
        } else {
            false
        }
    }

    fn deregister(&self) {
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.deregister(self);
        }
    }
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("id", &self.inner.id)
            .field("length", &self.inner.total_length)
            .field("chunk_length", &self.inner.chunk_length)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn elapsed_us(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}

/// Resolve file offsets and check that the files tile the item
///
/// Returns the extents in declaration order and the total length.
fn resolve_layout(chunk_length: u64, options: &StoreOptions) -> Result<(Vec<FileExtent>, u64)> {
    if chunk_length == 0 {
        return Err(Error::validation("chunk length must be positive"));
    }
    if options.files.is_empty() {
        return Err(Error::validation("file list cannot be empty"));
    }

    let mut paths = HashSet::with_capacity(options.files.len());
    let mut extents = Vec::with_capacity(options.files.len());
    let mut next = 0u64;
    for file in &options.files {
        if file.path.is_empty() {
            return Err(Error::validation("file path cannot be empty"));
        }
        if !paths.insert(file.path.as_str()) {
            return Err(Error::validation(format!("duplicate file path: {}", file.path)));
        }
        let offset = file.offset.unwrap_or(next);
        next = offset.checked_add(file.length).ok_or_else(|| {
            Error::validation(format!("file {} ends past the addressable range", file.path))
        })?;
        extents.push(FileExtent::new(offset, file.length));
    }

    let mut order: Vec<usize> = (0..extents.len())
        .filter(|&i| extents[i].length > 0)
        .collect();
    order.sort_by_key(|&i| extents[i].offset);

    let mut total = 0u64;
    for i in order {
        if extents[i].offset != total {
            return Err(Error::validation(format!(
                "file {} at offset {} does not continue the item at {}",
                options.files[i].path, extents[i].offset, total
            )));
        }
        total = extents[i].end();
    }

    if let Some((i, _)) = extents
        .iter()
        .enumerate()
        .find(|(_, e)| e.length == 0 && e.offset > total)
    {
        return Err(Error::validation(format!(
            "file {} at offset {} lies past the end of the item",
            options.files[i].path, extents[i].offset
        )));
    }

    match options.length {
        Some(expected) if expected != total => Err(Error::validation(format!(
            "files add up to {total} bytes, expected {expected}"
        ))),
        _ => Ok((extents, total)),
    }
}
