//! FileChunk Store
//!
//! This crate stores fixed-size chunks of a multi-file item on a backend that
//! only offers whole-file random access and a capacity quota. Chunks may span
//! several files and the final chunk may be shorter than the rest.
//!
//! # Features
//!
//! - **Chunk mapping**: chunk index → file byte ranges, built once per store
//! - **Per-file ordering**: operations on one file run in submission order
//! - **Bounded I/O**: one limiter caps backend operations across all stores
//! - **Capacity accounting**: reservations tracked against the backend quota
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │               StoreContext               │
//! │  StoreRegistry   CapacityLedger          │
//! │  IoLimiter       StorageBackend          │
//! └───────┬───────────────────────┬──────────┘
//!         │                       │
//! ┌───────▼────────┐     ┌────────▼───────┐
//! │   ChunkStore   │ ... │   ChunkStore   │
//! │  - ChunkMap    │     │  - ChunkMap    │
//! │  - file queues │     │  - file queues │
//! └───────┬────────┘     └────────┬───────┘
//!         │                       │
//! ┌───────▼───────────────────────▼──────────┐
//! │        StorageBackend (named files)      │
//! └──────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod callback;
pub mod chunk;
pub mod context;
pub mod ledger;
pub mod memory;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod store;

pub use backend::{FileHandle, StorageBackend};
pub use chunk::{ChunkIndex, ChunkMap, ChunkMapper, ChunkRange, FileExtent};
pub use context::StoreContext;
pub use ledger::CapacityLedger;
pub use memory::{BackendStatsSnapshot, FaultOp, MemoryBackend};
pub use queue::{FileAccessQueue, IoLimiter};
pub use registry::StoreRegistry;
pub use stats::{StoreStats, StoreStatsSnapshot};
pub use store::{ChunkStore, StoreFile, StoreState};

pub use filechunk_common::{Error, FileSpec, GetRange, Result, StoreConfig, StoreId, StoreOptions};
