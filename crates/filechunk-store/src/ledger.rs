//! Capacity accounting shared by all stores of a context
//!
//! The ledger keeps the running total of bytes reserved by live stores and
//! forwards every reservation and release to the backend. Capacity calls are
//! serialized: one at a time, in submission order.

use crate::backend::StorageBackend;
use filechunk_common::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Shared capacity counter
pub struct CapacityLedger {
    backend: Arc<dyn StorageBackend>,
    /// Serializes backend capacity calls
    queue: Mutex<()>,
    size: AtomicU64,
}

impl CapacityLedger {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            queue: Mutex::new(()),
            size: AtomicU64::new(0),
        }
    }

    /// Count `amount` bytes and ask the backend for them
    ///
    /// The counter is bumped before the backend answers. If the backend
    /// refuses, the bytes stay counted until [`forget`](Self::forget) is
    /// called for them.
    pub async fn reserve(&self, amount: u64) -> Result<u64> {
        let _turn = self.queue.lock().await;
        let total = self.size.fetch_add(amount, Ordering::SeqCst) + amount;
        debug!("Reserving {} bytes (total {})", amount, total);
        self.backend.request_capacity(amount).await
    }

    /// Uncount `amount` bytes and hand them back to the backend
    pub async fn release(&self, amount: u64) -> Result<u64> {
        let _turn = self.queue.lock().await;
        self.uncount(amount);
        debug!("Releasing {} bytes (total {})", amount, self.size());
        self.backend.release_capacity(amount).await
    }

    /// Uncount bytes the backend never granted
    pub fn forget(&self, amount: u64) {
        self.uncount(amount);
    }

    /// Bytes currently counted across all stores
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    /// Capacity the backend has granted but not yet seen used
    pub async fn remaining(&self) -> Result<u64> {
        self.backend.remaining_capacity().await
    }

    fn uncount(&self, amount: u64) {
        let _ = self
            .size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |size| {
                Some(size.saturating_sub(amount))
            });
    }
}

impl std::fmt::Debug for CapacityLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapacityLedger")
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}
