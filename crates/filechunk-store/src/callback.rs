//! Completion-callback adapter
//!
//! Thin wrappers for callers that want a callback instead of a future. Each
//! call runs the corresponding async operation on the store's runtime and
//! invokes the callback exactly once with its result.

use crate::chunk::ChunkIndex;
use crate::store::ChunkStore;
use bytes::Bytes;
use filechunk_common::{GetRange, Result};
use tokio::task::JoinHandle;

impl ChunkStore {
    /// [`put`](Self::put) with a completion callback
    pub fn put_with<F>(&self, index: ChunkIndex, data: impl Into<Bytes>, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let store = self.clone();
        let data = data.into();
        self.runtime()
            .spawn(async move { callback(store.put(index, data).await) })
    }

    /// [`get`](Self::get) with a completion callback
    pub fn get_with<F>(&self, index: ChunkIndex, range: GetRange, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<Bytes>) + Send + 'static,
    {
        let store = self.clone();
        self.runtime()
            .spawn(async move { callback(store.get(index, range).await) })
    }

    /// [`close`](Self::close) with a completion callback
    pub fn close_with<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let store = self.clone();
        self.runtime()
            .spawn(async move { callback(store.close().await) })
    }

    /// [`destroy`](Self::destroy) with a completion callback
    pub fn destroy_with<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let store = self.clone();
        self.runtime()
            .spawn(async move { callback(store.destroy().await) })
    }
}

#[cfg(test)]
mod tests {
    use crate::context::StoreContext;
    use crate::memory::MemoryBackend;
    use crate::store::ChunkStore;
    use filechunk_common::{Error, FileSpec, GetRange, StoreId, StoreOptions};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    fn store(ctx: &StoreContext) -> ChunkStore {
        let options = StoreOptions::new(
            StoreId::new("cb").unwrap(),
            vec![FileSpec::new("a", 1), FileSpec::new("b", 2), FileSpec::new("c", 7)],
        );
        ChunkStore::new(ctx, 5, options).unwrap()
    }

    #[tokio::test]
    async fn test_callbacks_receive_results() {
        let ctx = StoreContext::with_backend(Arc::new(MemoryBackend::new()));
        let store = store(&ctx);

        let (tx, rx) = oneshot::channel();
        store
            .put_with(0, &b"01234"[..], move |result| {
                let _ = tx.send(result);
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        let (tx, rx) = oneshot::channel();
        store.get_with(0, GetRange::new(2, 3), move |result| {
            let _ = tx.send(result);
        });
        assert_eq!(rx.await.unwrap().unwrap().as_ref(), b"234");

        let (tx, rx) = oneshot::channel();
        store.get_with(7, GetRange::full(), move |result| {
            let _ = tx.send(result);
        });
        assert!(matches!(rx.await.unwrap(), Err(Error::InvalidChunk { index: 7 })));
    }

    #[tokio::test]
    async fn test_close_and_destroy_callbacks() {
        let ctx = StoreContext::with_backend(Arc::new(MemoryBackend::new()));
        let store = store(&ctx);

        let (tx, rx) = oneshot::channel();
        store.close_with(move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap().unwrap();

        let (tx, rx) = oneshot::channel();
        store.destroy_with(move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap().unwrap();
        assert_eq!(ctx.size(), 0);
        assert!(ctx.registry().is_empty());
    }
}
