//! Distributed file storage engine.
//!
//! Files are split into fixed-size chunks, each chunk is replicated across
//! storage nodes, and files are rebuilt on demand with chunk- and file-level
//! checksum verification.

pub mod blob;
pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod integrity;
pub mod metadata;
pub mod metrics;

pub use config::EngineConfig;
pub use coordinator::{CoordinatorError, CoordinatorResult, StorageEngine};
