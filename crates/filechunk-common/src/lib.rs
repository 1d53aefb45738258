//! FileChunk Common - Shared types and utilities
//!
//! This crate provides the error definitions, configuration and core
//! identifier/descriptor types used by the chunk store and its tools.

pub mod config;
pub mod error;
pub mod types;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use types::*;
