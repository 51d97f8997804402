use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, FuturesUnordered, Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::chunk::{ChunkData, ChunkResult, ChunkSplitter};
use crate::config::EngineConfig;
use crate::coordinator::deletion::DeletionCoordinator;
use crate::coordinator::error::{CoordinatorError, CoordinatorResult};
use crate::coordinator::placement::PlacementCoordinator;
use crate::coordinator::retrieval::RetrievalCoordinator;
use crate::coordinator::types::{AuditReport, ChunkPlacement, DeletionReport, UploadOutcome};
use crate::integrity::IntegrityVerifier;
use crate::metadata::types::now_millis;
use crate::metadata::{FileChunk, FileRecord, MetadataError, MetadataStore, NodeStatus, StorageNode};
use crate::metrics::{Operation, OperationMetrics};

/// Entry point for uploads, downloads, deletions and node administration.
///
/// Retrieval and deletion of the same file are mutually exclusive: each
/// file has a reader/writer lock, downloads and audits hold it shared and
/// deletion holds it exclusively.
#[derive(Clone)]
pub struct StorageEngine {
    config: Arc<EngineConfig>,
    metadata: Arc<dyn MetadataStore>,
    splitter: ChunkSplitter,
    verifier: IntegrityVerifier,
    placement: PlacementCoordinator,
    retrieval: RetrievalCoordinator,
    deletion: DeletionCoordinator,
    file_locks: Arc<DashMap<Uuid, Arc<RwLock<()>>>>,
}

impl StorageEngine {
    pub fn new(
        config: EngineConfig,
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> CoordinatorResult<Self> {
        config.validate()?;

        let verifier = IntegrityVerifier::new(config.checksum_type);
        let placement = PlacementCoordinator::new(
            metadata.clone(),
            blobs.clone(),
            config.min_replicas,
            config.io_timeout,
        );
        let retrieval = RetrievalCoordinator::new(
            metadata.clone(),
            blobs.clone(),
            verifier,
            config.io_timeout,
            config.download_concurrency,
            config.retry_on_corruption,
        );
        let deletion = DeletionCoordinator::new(
            metadata.clone(),
            blobs,
            config.io_timeout,
            config.upload_concurrency,
        );

        Ok(Self {
            splitter: ChunkSplitter::new(config.max_chunk_size)?,
            config: Arc::new(config),
            metadata,
            verifier,
            placement,
            retrieval,
            deletion,
            file_locks: Arc::new(DashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    // ============== Node administration ==============

    pub async fn register_node(
        &self,
        address: impl Into<String>,
        capacity: u64,
    ) -> CoordinatorResult<StorageNode> {
        let node = StorageNode::new(address, capacity);
        self.metadata.insert_node(&node).await?;
        info!(
            "Registered storage node {} at {} ({} bytes)",
            node.id, node.address, node.capacity
        );
        Ok(node)
    }

    pub async fn list_nodes(&self) -> CoordinatorResult<Vec<StorageNode>> {
        Ok(self.metadata.list_nodes().await?)
    }

    pub async fn get_node(&self, node_id: Uuid) -> CoordinatorResult<StorageNode> {
        self.metadata
            .get_node(node_id)
            .await
            .map_err(|e| node_error(node_id, e))
    }

    pub async fn set_node_status(
        &self,
        node_id: Uuid,
        status: NodeStatus,
    ) -> CoordinatorResult<StorageNode> {
        self.metadata
            .set_node_status(node_id, status)
            .await
            .map_err(|e| node_error(node_id, e))?;
        info!("Node {} is now {}", node_id, status);
        self.get_node(node_id).await
    }

    /// Flip ACTIVE and MAINTENANCE. INACTIVE nodes are left as they are.
    pub async fn toggle_maintenance(&self, node_id: Uuid) -> CoordinatorResult<StorageNode> {
        let node = self.get_node(node_id).await?;
        let next = match node.status {
            NodeStatus::Active => NodeStatus::Maintenance,
            NodeStatus::Maintenance => NodeStatus::Active,
            NodeStatus::Inactive => return Ok(node),
        };
        self.set_node_status(node_id, next).await
    }

    /// Store usage reported by the external health monitor
    pub async fn record_heartbeat(
        &self,
        node_id: Uuid,
        used_space: u64,
    ) -> CoordinatorResult<StorageNode> {
        self.metadata
            .record_heartbeat(node_id, used_space, now_millis())
            .await
            .map_err(|e| node_error(node_id, e))?;
        self.get_node(node_id).await
    }

    // ============== Files ==============

    /// Non-deleted files of `owner`, newest first
    pub async fn list_files(&self, owner: &str) -> CoordinatorResult<Vec<FileRecord>> {
        Ok(self.metadata.list_files(owner).await?)
    }

    pub async fn get_file(&self, file_id: Uuid, owner: &str) -> CoordinatorResult<FileRecord> {
        let file = self.owned_file(file_id, owner).await?;
        if file.is_deleted {
            return Err(CoordinatorError::FileDeleted(file_id));
        }
        Ok(file)
    }

    /// Upload an in-memory buffer
    pub async fn upload(
        &self,
        owner: &str,
        name: &str,
        data: Bytes,
    ) -> CoordinatorResult<UploadOutcome> {
        let chunks = self.splitter.split(data)?;
        self.upload_chunks(owner, name, stream::iter(chunks.into_iter().map(Ok)))
            .await
    }

    /// Upload from a reader, holding only the chunks in flight in memory
    pub async fn upload_reader<R>(
        &self,
        owner: &str,
        name: &str,
        reader: R,
    ) -> CoordinatorResult<UploadOutcome>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.upload_chunks(owner, name, self.splitter.stream(reader))
            .await
    }

    pub async fn download(&self, file_id: Uuid, owner: &str) -> CoordinatorResult<Bytes> {
        let mut metrics = OperationMetrics::start(Operation::Download);
        match self.download_inner(file_id, owner).await {
            Ok(data) => {
                metrics.add_bytes(data.len() as u64);
                info!("Downloaded file {} ({} bytes)", file_id, data.len());
                metrics.complete();
                Ok(data)
            }
            Err(e) => {
                warn!("Download of file {} failed: {}", file_id, e);
                metrics.fail(e.kind());
                Err(e)
            }
        }
    }

    /// Delete a file. Blob removal failures are reported in the result,
    /// never as an error.
    pub async fn delete_file(&self, file_id: Uuid, owner: &str) -> CoordinatorResult<DeletionReport> {
        let metrics = OperationMetrics::start(Operation::Delete);
        match self.delete_inner(file_id, owner).await {
            Ok(report) => {
                if report.is_clean() {
                    info!(
                        "Deleted file {}: {} chunks, {} replicas",
                        file_id, report.chunks_removed, report.replicas_removed
                    );
                } else {
                    warn!(
                        "Deleted file {} with {} blob removals failed",
                        file_id, report.failed_removals
                    );
                }
                metrics.complete();
                Ok(report)
            }
            Err(e) => {
                metrics.fail(e.kind());
                Err(e)
            }
        }
    }

    /// Verify every replica of a file and record their status
    pub async fn audit_file(&self, file_id: Uuid, owner: &str) -> CoordinatorResult<AuditReport> {
        self.owned_file(file_id, owner).await?;

        let lock = self.file_lock(file_id);
        let result: CoordinatorResult<AuditReport> = async {
            let _guard = lock.read().await;
            let file = self.metadata.get_file(file_id).await?;
            self.retrieval.audit(&file).await
        }
        .await;
        self.release_lock(file_id, lock);
        result
    }

    // ============== Internals ==============

    async fn upload_chunks<S>(
        &self,
        owner: &str,
        name: &str,
        chunks: S,
    ) -> CoordinatorResult<UploadOutcome>
    where
        S: Stream<Item = ChunkResult<ChunkData>> + Send,
    {
        let mut metrics = OperationMetrics::start(Operation::Upload);

        let file = FileRecord::new(owner, name);
        if let Err(e) = self.metadata.insert_file(&file).await {
            metrics.fail("metadata");
            return Err(e.into());
        }

        match self.store_file(&file, chunks).await {
            Ok(outcome) => {
                metrics.add_bytes(outcome.file.size);
                if outcome.is_degraded() {
                    warn!(
                        "Uploaded file {} with {} of {} chunks under-replicated",
                        file.id,
                        outcome.degraded_chunks().count(),
                        outcome.chunk_count()
                    );
                }
                info!(
                    "Uploaded file {} '{}' ({} bytes, {} chunks)",
                    file.id,
                    file.name,
                    outcome.file.size,
                    outcome.chunk_count()
                );
                metrics.complete();
                Ok(outcome)
            }
            Err(e) => {
                warn!("Upload of file {} failed: {}", file.id, e);
                self.abandon_upload(&file).await;
                metrics.fail(e.kind());
                Err(e)
            }
        }
    }

    /// Store all chunks, then finalize the file with its size and checksum.
    ///
    /// The whole-file digest is fed in sequence order as chunks leave the
    /// splitter, and at most `upload_concurrency` chunks are placed at once.
    /// After the first failure no further chunks are read, and chunks
    /// already in flight run to completion so their replicas are recorded
    /// for cleanup.
    async fn store_file<S>(&self, file: &FileRecord, chunks: S) -> CoordinatorResult<UploadOutcome>
    where
        S: Stream<Item = ChunkResult<ChunkData>> + Send,
    {
        let mut chunks = std::pin::pin!(chunks.fuse());
        let mut in_flight = FuturesUnordered::new();
        let mut hasher = self.verifier.hasher();
        let mut placements = Vec::new();
        let mut failure: Option<CoordinatorError> = None;
        let mut exhausted = false;

        loop {
            while failure.is_none()
                && !exhausted
                && in_flight.len() < self.config.upload_concurrency
            {
                match chunks.next().await {
                    Some(Ok(chunk)) => {
                        hasher.update(&chunk.data);
                        in_flight.push(self.store_chunk(file.id, chunk));
                    }
                    Some(Err(e)) => failure = Some(e.into()),
                    None => exhausted = true,
                }
            }

            match in_flight.next().await {
                Some(Ok(placement)) => placements.push(placement),
                Some(Err(e)) => {
                    failure.get_or_insert(e);
                }
                None => break,
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        placements.sort_by_key(|p| p.sequence);

        let size = hasher.bytes_hashed();
        let checksum = hasher.finalize();
        self.metadata.finalize_file(file.id, size, &checksum).await?;

        Ok(UploadOutcome {
            file: self.metadata.get_file(file.id).await?,
            placements,
        })
    }

    async fn store_chunk(&self, file_id: Uuid, chunk: ChunkData) -> CoordinatorResult<ChunkPlacement> {
        let checksum = self.verifier.calculate_checksum(&chunk.data);
        let record = FileChunk::new(file_id, chunk.sequence, chunk.len() as u64, checksum);
        self.metadata.insert_chunk(&record).await?;

        self.placement
            .place(&record, chunk.data, self.config.replication_factor)
            .await
    }

    /// Best-effort removal of whatever a failed upload left behind. The
    /// record ends up soft-deleted so no `pending` file stays visible.
    async fn abandon_upload(&self, file: &FileRecord) {
        match self.deletion.delete(file).await {
            Ok(report) => warn!(
                "Cleaned up failed upload {}: {} chunks, {} replicas removed, {} removals failed",
                file.id, report.chunks_removed, report.replicas_removed, report.failed_removals
            ),
            Err(e) => warn!("Cleanup of failed upload {} failed: {}", file.id, e),
        }
    }

    async fn download_inner(&self, file_id: Uuid, owner: &str) -> CoordinatorResult<Bytes> {
        let file = self.owned_file(file_id, owner).await?;
        if file.is_deleted {
            return Err(CoordinatorError::FileDeleted(file_id));
        }

        let lock = self.file_lock(file_id);
        let result: CoordinatorResult<Bytes> = async {
            let _guard = lock.read().await;
            // Deletion may have completed while waiting for the lock
            let file = self.metadata.get_file(file_id).await?;
            self.retrieval.retrieve(&file).await
        }
        .await;
        self.release_lock(file_id, lock);
        result
    }

    async fn delete_inner(&self, file_id: Uuid, owner: &str) -> CoordinatorResult<DeletionReport> {
        let file = self.owned_file(file_id, owner).await?;
        if file.is_deleted {
            return Err(CoordinatorError::FileDeleted(file_id));
        }

        let lock = self.file_lock(file_id);
        let result: CoordinatorResult<DeletionReport> = async {
            let _guard = lock.write().await;
            let file = self.metadata.get_file(file_id).await?;
            if file.is_deleted {
                return Err(CoordinatorError::FileDeleted(file_id));
            }
            self.deletion.delete(&file).await
        }
        .await;
        self.release_lock(file_id, lock);
        result
    }

    /// Fetch a file, hiding files of other owners as not found
    async fn owned_file(&self, file_id: Uuid, owner: &str) -> CoordinatorResult<FileRecord> {
        match self.metadata.get_file(file_id).await {
            Ok(file) if file.owner == owner => Ok(file),
            Ok(_) | Err(MetadataError::NotFound(_)) => Err(CoordinatorError::FileNotFound(file_id)),
            Err(e) => Err(e.into()),
        }
    }

    fn file_lock(&self, file_id: Uuid) -> Arc<RwLock<()>> {
        Arc::clone(&self.file_locks.entry(file_id).or_default())
    }

    /// Drop the lock entry once no other task holds it
    fn release_lock(&self, file_id: Uuid, lock: Arc<RwLock<()>>) {
        drop(lock);
        self.file_locks
            .remove_if(&file_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn node_error(node_id: Uuid, err: MetadataError) -> CoordinatorError {
    match err {
        MetadataError::NotFound(_) => CoordinatorError::NodeNotFound(node_id),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::metadata::InMemoryMetadataStore;

    fn engine(config: EngineConfig) -> (StorageEngine, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::new());
        let engine = StorageEngine::new(
            config,
            Arc::new(InMemoryMetadataStore::new()),
            blobs.clone(),
        )
        .unwrap();
        (engine, blobs)
    }

    fn small_chunks() -> EngineConfig {
        EngineConfig::builder()
            .max_chunk_size(16)
            .replication_factor(2)
            .upload_concurrency(3)
            .download_concurrency(2)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_download_roundtrip() {
        let (engine, blobs) = engine(small_chunks());
        for i in 0..3 {
            engine.register_node(format!("node-{i}"), 10_000).await.unwrap();
        }

        let data: Vec<u8> = (0..100u8).collect();
        let outcome = engine
            .upload("alice", "numbers.bin", Bytes::from(data.clone()))
            .await
            .unwrap();

        assert_eq!(outcome.chunk_count(), 7);
        assert!(!outcome.is_degraded());
        assert_eq!(outcome.file.size, 100);
        assert_eq!(
            outcome.file.checksum,
            IntegrityVerifier::default().calculate_checksum(&data)
        );
        assert_eq!(blobs.len(), 14);

        let sequences: Vec<u32> = outcome.placements.iter().map(|p| p.sequence).collect();
        assert_eq!(sequences, (0..7).collect::<Vec<_>>());

        let downloaded = engine.download(outcome.file.id, "alice").await.unwrap();
        assert_eq!(&downloaded[..], &data[..]);
    }

    #[tokio::test]
    async fn test_upload_reader_matches_upload() {
        let (engine, _) = engine(small_chunks());
        engine.register_node("n", 10_000).await.unwrap();

        let data: Vec<u8> = (0..50u8).rev().collect();
        let streamed = engine
            .upload_reader("alice", "s.bin", std::io::Cursor::new(data.clone()))
            .await
            .unwrap();
        let buffered = engine
            .upload("alice", "b.bin", Bytes::from(data))
            .await
            .unwrap();

        assert_eq!(streamed.file.checksum, buffered.file.checksum);
        assert_eq!(streamed.file.size, 50);
        assert_eq!(streamed.chunk_count(), 4);
    }

    #[tokio::test]
    async fn test_empty_file() {
        let (engine, blobs) = engine(small_chunks());
        engine.register_node("n", 100).await.unwrap();

        let outcome = engine.upload("alice", "empty", Bytes::new()).await.unwrap();
        assert_eq!(outcome.chunk_count(), 0);
        assert!(outcome.file.is_finalized());
        assert!(blobs.is_empty());

        let data = engine.download(outcome.file.id, "alice").await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_is_cleaned_up() {
        let (engine, blobs) = engine(small_chunks());
        // Fits the first chunks only
        let node = engine.register_node("small", 40).await.unwrap();

        let result = engine
            .upload("alice", "big.bin", Bytes::from(vec![1u8; 100]))
            .await;
        assert!(matches!(
            result,
            Err(CoordinatorError::ReplicationFailed { .. })
        ));

        assert!(engine.list_files("alice").await.unwrap().is_empty());
        assert!(blobs.is_empty());
        assert_eq!(engine.get_node(node.id).await.unwrap().used_space, 0);
    }

    #[tokio::test]
    async fn test_no_nodes_is_capacity_exhaustion() {
        let (engine, _) = engine(small_chunks());
        let result = engine.upload("alice", "f", Bytes::from_static(b"data")).await;
        assert!(matches!(
            result,
            Err(CoordinatorError::CapacityExhausted { sequence: 0, .. })
        ));
        assert!(engine.list_files("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_owner_scoping() {
        let (engine, _) = engine(small_chunks());
        engine.register_node("n", 1000).await.unwrap();
        let outcome = engine
            .upload("alice", "private", Bytes::from_static(b"secret"))
            .await
            .unwrap();
        let id = outcome.file.id;

        assert!(matches!(
            engine.download(id, "mallory").await,
            Err(CoordinatorError::FileNotFound(_))
        ));
        assert!(matches!(
            engine.delete_file(id, "mallory").await,
            Err(CoordinatorError::FileNotFound(_))
        ));
        assert!(matches!(
            engine.get_file(Uuid::new_v4(), "alice").await,
            Err(CoordinatorError::FileNotFound(_))
        ));
        assert!(engine.list_files("mallory").await.unwrap().is_empty());
        assert_eq!(engine.get_file(id, "alice").await.unwrap().name, "private");
    }

    #[tokio::test]
    async fn test_delete_then_download() {
        let (engine, blobs) = engine(small_chunks());
        engine.register_node("a", 1000).await.unwrap();
        engine.register_node("b", 1000).await.unwrap();

        let outcome = engine
            .upload("alice", "f", Bytes::from(vec![9u8; 40]))
            .await
            .unwrap();
        let id = outcome.file.id;

        let report = engine.delete_file(id, "alice").await.unwrap();
        assert_eq!(report.chunks_removed, 3);
        assert_eq!(report.replicas_removed, 6);
        assert!(blobs.is_empty());

        assert!(matches!(
            engine.download(id, "alice").await,
            Err(CoordinatorError::FileDeleted(_))
        ));
        assert!(matches!(
            engine.delete_file(id, "alice").await,
            Err(CoordinatorError::FileDeleted(_))
        ));
        for node in engine.list_nodes().await.unwrap() {
            assert_eq!(node.used_space, 0);
        }
        assert!(engine.file_locks.is_empty());
    }

    #[tokio::test]
    async fn test_maintenance_toggle() {
        let (engine, _) = engine(small_chunks());
        let node = engine.register_node("n", 1000).await.unwrap();

        let toggled = engine.toggle_maintenance(node.id).await.unwrap();
        assert_eq!(toggled.status, NodeStatus::Maintenance);
        let toggled = engine.toggle_maintenance(node.id).await.unwrap();
        assert_eq!(toggled.status, NodeStatus::Active);

        engine
            .set_node_status(node.id, NodeStatus::Inactive)
            .await
            .unwrap();
        let unchanged = engine.toggle_maintenance(node.id).await.unwrap();
        assert_eq!(unchanged.status, NodeStatus::Inactive);

        assert!(matches!(
            engine.toggle_maintenance(Uuid::new_v4()).await,
            Err(CoordinatorError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_updates_usage() {
        let (engine, _) = engine(small_chunks());
        let node = engine.register_node("n", 1000).await.unwrap();

        let updated = engine.record_heartbeat(node.id, 250).await.unwrap();
        assert_eq!(updated.used_space, 250);
        assert!(updated.last_heartbeat.is_some());
        assert_eq!(updated.available_space(), 750);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.replication_factor = 0;
        let result = StorageEngine::new(
            config,
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(MemoryBlobStore::new()),
        );
        assert!(matches!(result, Err(CoordinatorError::Config(_))));
    }
}
