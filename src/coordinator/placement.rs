use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::blob::{BlobError, BlobKey, BlobStore};
use crate::coordinator::error::{CoordinatorError, CoordinatorResult};
use crate::coordinator::selector::NodeSelector;
use crate::coordinator::types::{ChunkPlacement, ReplicationHealth};
use crate::metadata::{ChunkLocation, FileChunk, MetadataError, MetadataStore, StorageNode};
use crate::metrics::recorder;

#[derive(Error, Debug)]
enum ReplicaWriteError {
    #[error("node has no room for {0} bytes")]
    NoSpace(u64),

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl ReplicaWriteError {
    fn label(&self) -> &'static str {
        match self {
            ReplicaWriteError::NoSpace(_) => "no_space",
            ReplicaWriteError::Timeout(_) => "timeout",
            ReplicaWriteError::Blob(_) => "blob",
            ReplicaWriteError::Metadata(_) => "metadata",
        }
    }
}

/// Writes a chunk's replicas and records where they landed.
#[derive(Clone)]
pub struct PlacementCoordinator {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    selector: NodeSelector,
    min_replicas: usize,
    io_timeout: Duration,
}

impl PlacementCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        min_replicas: usize,
        io_timeout: Duration,
    ) -> Self {
        Self {
            selector: NodeSelector::new(metadata.clone()),
            metadata,
            blobs,
            min_replicas,
            io_timeout,
        }
    }

    /// Place `data` for an already recorded `chunk` on up to
    /// `replication_factor` nodes.
    ///
    /// Replica writes run in parallel. The first node in rank order whose
    /// write succeeded becomes primary. Written replicas are kept and
    /// recorded even when the chunk ends up below `min_replicas`.
    pub async fn place(
        &self,
        chunk: &FileChunk,
        data: Bytes,
        replication_factor: usize,
    ) -> CoordinatorResult<ChunkPlacement> {
        let nodes = self.selector.select(chunk.size, replication_factor).await?;
        if nodes.is_empty() {
            return Err(CoordinatorError::CapacityExhausted {
                chunk_id: chunk.id,
                sequence: chunk.sequence,
                required: chunk.size,
            });
        }

        let writes = nodes
            .iter()
            .map(|node| self.write_replica(chunk, node, data.clone()));
        let results = join_all(writes).await;

        let mut replicas = Vec::with_capacity(nodes.len());
        let mut failed_nodes = Vec::new();
        for (node, result) in nodes.iter().zip(results) {
            match result {
                Ok(()) => replicas.push(node.id),
                Err(e) => {
                    warn!(
                        "Replica write of chunk {} (seq {}) to node {} failed: {}",
                        chunk.id, chunk.sequence, node.id, e
                    );
                    recorder::record_replica_write_failed(&node.id.to_string(), e.label());
                    failed_nodes.push(node.id);
                }
            }
        }

        for (rank, node_id) in replicas.iter().enumerate() {
            let location = ChunkLocation::new(chunk.id, *node_id, rank == 0);
            if let Err(e) = self.metadata.insert_location(&location).await {
                // Replicas without a location are invisible to deletion
                warn!(
                    "Recording replica of chunk {} (seq {}) on node {} failed: {}",
                    chunk.id, chunk.sequence, node_id, e
                );
                self.discard_unrecorded(chunk, &replicas[rank..]).await;
                return Err(e.into());
            }
        }

        let attempted = nodes.len();
        let succeeded = replicas.len();
        let required = self.min_replicas.min(replication_factor);
        if succeeded == 0 || succeeded < required {
            return Err(CoordinatorError::ReplicationFailed {
                chunk_id: chunk.id,
                sequence: chunk.sequence,
                attempted,
                succeeded,
                required: required.max(1),
            });
        }

        let health = ReplicationHealth::new(succeeded, replication_factor);
        if health.is_degraded() {
            warn!(
                "Chunk {} (seq {}) under-replicated: {} of {} replicas",
                chunk.id, chunk.sequence, succeeded, replication_factor
            );
            recorder::record_under_replicated(succeeded, replication_factor);
        } else {
            debug!(
                "Chunk {} (seq {}) placed on {} nodes",
                chunk.id, chunk.sequence, succeeded
            );
        }

        Ok(ChunkPlacement {
            chunk_id: chunk.id,
            sequence: chunk.sequence,
            replicas,
            failed_nodes,
            health,
        })
    }

    /// Reserve space on the node, then write the blob within the deadline.
    /// The reservation is released again if the write does not succeed.
    async fn write_replica(
        &self,
        chunk: &FileChunk,
        node: &StorageNode,
        data: Bytes,
    ) -> Result<(), ReplicaWriteError> {
        if !self.metadata.reserve_space(node.id, chunk.size).await? {
            return Err(ReplicaWriteError::NoSpace(chunk.size));
        }

        let key = BlobKey::new(chunk.id, node.id);
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.io_timeout, self.blobs.put(&key, data)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ReplicaWriteError::from(e)),
            Err(_) => Err(ReplicaWriteError::Timeout(self.io_timeout)),
        };

        match outcome {
            Ok(()) => {
                recorder::record_replica_write_duration(started.elapsed());
                Ok(())
            }
            Err(e) => {
                self.release_reservation(node.id, chunk.size).await;
                Err(e)
            }
        }
    }

    /// Undo written replicas that never got a location record
    async fn discard_unrecorded(&self, chunk: &FileChunk, node_ids: &[Uuid]) {
        let removals = node_ids.iter().map(|node_id| async move {
            let key = BlobKey::new(chunk.id, *node_id);
            match tokio::time::timeout(self.io_timeout, self.blobs.delete(&key)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Failed to remove unrecorded blob {}: {}", key, e);
                    recorder::record_cleanup_failure();
                }
                Err(_) => {
                    warn!("Removing unrecorded blob {} timed out", key);
                    recorder::record_cleanup_failure();
                }
            }
            self.release_reservation(*node_id, chunk.size).await;
        });
        join_all(removals).await;
    }

    async fn release_reservation(&self, node_id: Uuid, bytes: u64) {
        if let Err(e) = self.metadata.release_space(node_id, bytes).await {
            warn!("Failed to release {} bytes on node {}: {}", bytes, node_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::integrity::IntegrityVerifier;
    use crate::metadata::{FileRecord, InMemoryMetadataStore, NodeStatus};

    struct Fixture {
        metadata: Arc<InMemoryMetadataStore>,
        blobs: Arc<MemoryBlobStore>,
        file: FileRecord,
    }

    async fn fixture(nodes: &[(u128, u64, u64)]) -> Fixture {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        for &(id, capacity, used) in nodes {
            let mut node = StorageNode::new(format!("node-{id}"), capacity);
            node.id = Uuid::from_u128(id);
            node.used_space = used;
            metadata.insert_node(&node).await.unwrap();
        }
        let file = FileRecord::new("alice", "f.bin");
        metadata.insert_file(&file).await.unwrap();

        Fixture {
            metadata,
            blobs: Arc::new(MemoryBlobStore::new()),
            file,
        }
    }

    impl Fixture {
        fn coordinator(&self, min_replicas: usize) -> PlacementCoordinator {
            PlacementCoordinator::new(
                self.metadata.clone(),
                self.blobs.clone(),
                min_replicas,
                Duration::from_secs(5),
            )
        }

        async fn chunk(&self, sequence: u32, data: &[u8]) -> FileChunk {
            let checksum = IntegrityVerifier::default().calculate_checksum(data);
            let chunk = FileChunk::new(self.file.id, sequence, data.len() as u64, checksum);
            self.metadata.insert_chunk(&chunk).await.unwrap();
            chunk
        }
    }

    #[tokio::test]
    async fn test_places_on_top_ranked_nodes() {
        // available: node 1 = 500, node 2 = 300, node 3 = 100
        let fx = fixture(&[(1, 1000, 500), (2, 1000, 700), (3, 1000, 900)]).await;
        let data = vec![7u8; 200];
        let chunk = fx.chunk(0, &data).await;

        let placement = fx
            .coordinator(1)
            .place(&chunk, Bytes::from(data), 2)
            .await
            .unwrap();

        assert_eq!(
            placement.replicas,
            vec![Uuid::from_u128(1), Uuid::from_u128(2)]
        );
        assert_eq!(placement.primary(), Some(Uuid::from_u128(1)));
        assert_eq!(placement.health, ReplicationHealth::Full);

        let locations = fx.metadata.list_locations(chunk.id).await.unwrap();
        let primaries: Vec<Uuid> = locations
            .iter()
            .filter(|l| l.is_primary)
            .map(|l| l.node_id)
            .collect();
        assert_eq!(primaries, vec![Uuid::from_u128(1)]);

        // Space is accounted on both replica nodes
        let n1 = fx.metadata.get_node(Uuid::from_u128(1)).await.unwrap();
        let n3 = fx.metadata.get_node(Uuid::from_u128(3)).await.unwrap();
        assert_eq!(n1.used_space, 700);
        assert_eq!(n3.used_space, 900);
        assert_eq!(fx.blobs.len(), 2);
    }

    #[tokio::test]
    async fn test_no_eligible_nodes_is_capacity_exhaustion() {
        let fx = fixture(&[(1, 10, 0)]).await;
        let chunk = fx.chunk(0, &[1u8; 64]).await;

        let result = fx
            .coordinator(1)
            .place(&chunk, Bytes::from(vec![1u8; 64]), 3)
            .await;
        assert!(matches!(
            result,
            Err(CoordinatorError::CapacityExhausted { sequence: 0, required: 64, .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_reservation_degrades_and_moves_primary() {
        // node 1 is in maintenance; node 3 is eligible by capacity but has
        // only 5 bytes free, so its reservation fails.
        let fx = fixture(&[(1, 1000, 0), (2, 1000, 100), (3, 100, 95)]).await;
        fx.metadata
            .set_node_status(Uuid::from_u128(1), NodeStatus::Maintenance)
            .await
            .unwrap();
        let data = vec![0u8; 50];
        let chunk = fx.chunk(0, &data).await;

        let placement = fx
            .coordinator(1)
            .place(&chunk, Bytes::from(data), 3)
            .await
            .unwrap();

        assert_eq!(placement.replicas, vec![Uuid::from_u128(2)]);
        assert_eq!(placement.failed_nodes, vec![Uuid::from_u128(3)]);
        assert_eq!(
            placement.health,
            ReplicationHealth::Degraded {
                succeeded: 1,
                requested: 3
            }
        );

        let node3 = fx.metadata.get_node(Uuid::from_u128(3)).await.unwrap();
        assert_eq!(node3.used_space, 95);
    }

    #[tokio::test]
    async fn test_quorum_not_met() {
        let fx = fixture(&[(1, 100, 0), (2, 100, 90)]).await;
        let data = vec![0u8; 50];
        let chunk = fx.chunk(0, &data).await;

        let result = fx.coordinator(2).place(&chunk, Bytes::from(data), 2).await;
        assert!(matches!(
            result,
            Err(CoordinatorError::ReplicationFailed {
                attempted: 2,
                succeeded: 1,
                required: 2,
                ..
            })
        ));

        // The successful replica is kept and recorded
        assert_eq!(fx.metadata.list_locations(chunk.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unrecordable_replicas_are_undone() {
        // The chunk row is gone (purged by a concurrent delete) by the time
        // locations are recorded.
        let fx = fixture(&[(1, 1000, 0), (2, 1000, 0)]).await;
        let data = vec![3u8; 64];
        let checksum = IntegrityVerifier::default().calculate_checksum(&data);
        let chunk = FileChunk::new(fx.file.id, 0, 64, checksum);

        let result = fx.coordinator(1).place(&chunk, Bytes::from(data), 2).await;
        assert!(matches!(result, Err(CoordinatorError::Metadata(_))));

        assert!(fx.blobs.is_empty());
        for id in [1, 2] {
            let node = fx.metadata.get_node(Uuid::from_u128(id)).await.unwrap();
            assert_eq!(node.used_space, 0);
        }
    }
}
