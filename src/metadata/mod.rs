pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

pub use error::{MetadataError, MetadataResult};
pub use memory::InMemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;
pub use store::MetadataStore;
pub use types::{
    ChunkLocation, FileChunk, FileRecord, LocationStatus, NodeStatus, PurgeSummary, StorageNode,
};
