//! Process-wide state shared by chunk stores
//!
//! A [`StoreContext`] bundles the backend with the I/O limiter, the capacity
//! ledger and the store registry. Every store created from the same context
//! shares all four; separate contexts are fully isolated, which is what
//! tests rely on.

use crate::backend::StorageBackend;
use crate::ledger::CapacityLedger;
use crate::queue::IoLimiter;
use crate::registry::StoreRegistry;
use crate::store::ChunkStore;
use filechunk_common::{Result, StoreConfig, StoreId, StoreOptions};
use std::sync::Arc;

/// Shared backend, limiter, ledger and registry
#[derive(Clone)]
pub struct StoreContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    backend: Arc<dyn StorageBackend>,
    limiter: IoLimiter,
    ledger: Arc<CapacityLedger>,
    registry: Arc<StoreRegistry>,
    config: StoreConfig,
}

impl StoreContext {
    /// Create a context with an explicit configuration
    pub fn new(backend: Arc<dyn StorageBackend>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(backend, config))
    }

    /// Create a context with the default configuration
    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self::build(backend, StoreConfig::default())
    }

    fn build(backend: Arc<dyn StorageBackend>, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                limiter: IoLimiter::new(config.io_concurrency),
                ledger: Arc::new(CapacityLedger::new(Arc::clone(&backend))),
                registry: Arc::new(StoreRegistry::new()),
                backend,
                config,
            }),
        }
    }

    /// Create a store attached to this context
    pub fn create_store(&self, chunk_length: u64, options: StoreOptions) -> Result<ChunkStore> {
        ChunkStore::new(self, chunk_length, options)
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.inner.backend
    }

    pub fn limiter(&self) -> &IoLimiter {
        &self.inner.limiter
    }

    pub fn ledger(&self) -> &Arc<CapacityLedger> {
        &self.inner.ledger
    }

    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Bytes reserved by stores that are not yet destroyed
    pub fn size(&self) -> u64 {
        self.inner.ledger.size()
    }

    /// Capacity the backend has granted but not yet seen used
    pub async fn remaining_capacity(&self) -> Result<u64> {
        self.inner.ledger.remaining().await
    }

    /// Live store registered under `id`
    pub fn get(&self, id: &StoreId) -> Option<ChunkStore> {
        self.inner.registry.get(id)
    }
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("config", &self.inner.config)
            .field("size", &self.size())
            .field("stores", &self.inner.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use filechunk_common::{Error, FileSpec};

    #[test]
    fn test_rejects_zero_io_concurrency() {
        let config = StoreConfig {
            io_concurrency: 0,
            ..StoreConfig::default()
        };
        let err = StoreContext::new(Arc::new(MemoryBackend::new()), config).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_new_context_is_empty() {
        let ctx = StoreContext::with_backend(Arc::new(MemoryBackend::new()));
        assert_eq!(ctx.size(), 0);
        assert!(ctx.registry().is_empty());
        assert_eq!(ctx.limiter().width(), 5);
    }

    #[tokio::test]
    async fn test_contexts_are_isolated() {
        let a = StoreContext::with_backend(Arc::new(MemoryBackend::new()));
        let b = StoreContext::with_backend(Arc::new(MemoryBackend::new()));
        let id = StoreId::new("shared").unwrap();

        let store = a
            .create_store(4, StoreOptions::new(id.clone(), vec![FileSpec::new("f", 8)]))
            .unwrap();
        store.ready().await.unwrap();

        assert_eq!(a.size(), 8);
        assert_eq!(b.size(), 0);
        assert!(a.get(&id).is_some());
        assert!(b.get(&id).is_none());
        assert_eq!(a.remaining_capacity().await.unwrap(), 0);

        store.destroy().await.unwrap();
        assert_eq!(a.size(), 0);
    }
}
