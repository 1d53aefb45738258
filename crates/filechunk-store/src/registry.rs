//! Identifier → live store registry

use crate::store::ChunkStore;
use dashmap::DashMap;
use filechunk_common::StoreId;

/// Registry of live stores keyed by identifier
///
/// A later registration under the same identifier replaces the earlier one.
/// Removal only succeeds for the instance that is currently registered, so a
/// replaced store tearing itself down never evicts its successor.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    stores: DashMap<StoreId, ChunkStore>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store, returning the instance it replaced
    pub fn register(&self, store: ChunkStore) -> Option<ChunkStore> {
        self.stores.insert(store.identifier().clone(), store)
    }

    /// Remove `store` if it is still the registered instance
    pub fn deregister(&self, store: &ChunkStore) -> bool {
        self.stores
            .remove_if(store.identifier(), |_, current| current.same_instance(store))
            .is_some()
    }

    /// Look up the live store for an identifier
    pub fn get(&self, id: &StoreId) -> Option<ChunkStore> {
        self.stores.get(id).map(|entry| entry.value().clone())
    }

    /// Check if an identifier has a live store
    pub fn contains(&self, id: &StoreId) -> bool {
        self.stores.contains_key(id)
    }

    /// Number of registered stores
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Sorted identifiers of all registered stores
    pub fn identifiers(&self) -> Vec<StoreId> {
        let mut ids: Vec<StoreId> = self.stores.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}
