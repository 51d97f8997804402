use async_trait::async_trait;
use uuid::Uuid;

use crate::integrity::Checksum;
use crate::metadata::error::MetadataResult;
use crate::metadata::types::{
    ChunkLocation, FileChunk, FileRecord, LocationStatus, NodeStatus, PurgeSummary, StorageNode,
};

/// Persistence for nodes, files, chunks and replica locations.
///
/// Implementations must enforce uniqueness of `(file_id, sequence)` and
/// `(chunk_id, node_id)`, at most one primary location per chunk, and must
/// make `reserve_space` and `purge_file` atomic.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert_node(&self, node: &StorageNode) -> MetadataResult<()>;

    async fn get_node(&self, node_id: Uuid) -> MetadataResult<StorageNode>;

    /// All nodes ordered by id
    async fn list_nodes(&self) -> MetadataResult<Vec<StorageNode>>;

    async fn set_node_status(&self, node_id: Uuid, status: NodeStatus) -> MetadataResult<()>;

    /// Store externally measured usage. Usage above capacity is clamped.
    async fn record_heartbeat(
        &self,
        node_id: Uuid,
        used_space: u64,
        at: i64,
    ) -> MetadataResult<()>;

    /// Add `bytes` to the node's usage if it still fits within capacity.
    /// Returns `false` when the reservation would overcommit the node.
    async fn reserve_space(&self, node_id: Uuid, bytes: u64) -> MetadataResult<bool>;

    /// Subtract `bytes` from the node's usage, never going below zero.
    async fn release_space(&self, node_id: Uuid, bytes: u64) -> MetadataResult<()>;

    async fn insert_file(&self, file: &FileRecord) -> MetadataResult<()>;

    /// Fetch a file, including soft-deleted ones
    async fn get_file(&self, file_id: Uuid) -> MetadataResult<FileRecord>;

    /// Non-deleted files of `owner`, newest first
    async fn list_files(&self, owner: &str) -> MetadataResult<Vec<FileRecord>>;

    async fn finalize_file(
        &self,
        file_id: Uuid,
        size: u64,
        checksum: &Checksum,
    ) -> MetadataResult<()>;

    async fn insert_chunk(&self, chunk: &FileChunk) -> MetadataResult<()>;

    /// Chunks of a file in ascending sequence order
    async fn list_chunks(&self, file_id: Uuid) -> MetadataResult<Vec<FileChunk>>;

    async fn insert_location(&self, location: &ChunkLocation) -> MetadataResult<()>;

    /// Locations of a chunk ordered by node id
    async fn list_locations(&self, chunk_id: Uuid) -> MetadataResult<Vec<ChunkLocation>>;

    async fn set_location_status(
        &self,
        chunk_id: Uuid,
        node_id: Uuid,
        status: LocationStatus,
        verified_at: i64,
    ) -> MetadataResult<()>;

    /// Remove all chunk and location records of a file and mark it deleted,
    /// as one atomic step.
    async fn purge_file(&self, file_id: Uuid) -> MetadataResult<PurgeSummary>;
}
