use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::blob::{BlobKey, BlobStore};
use crate::coordinator::error::CoordinatorResult;
use crate::coordinator::types::DeletionReport;
use crate::metadata::{FileRecord, MetadataStore};
use crate::metrics::recorder;

/// Removes a file's replicas and metadata.
#[derive(Clone)]
pub struct DeletionCoordinator {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    io_timeout: Duration,
    concurrency: usize,
}

impl DeletionCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        io_timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            metadata,
            blobs,
            io_timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Remove every replica of every chunk, release the space they held,
    /// then purge chunk metadata and mark the file deleted in one step.
    ///
    /// Blob removal failures are logged and counted, never returned.
    pub async fn delete(&self, file: &FileRecord) -> CoordinatorResult<DeletionReport> {
        let chunks = self.metadata.list_chunks(file.id).await?;

        let mut replicas = Vec::new();
        for chunk in &chunks {
            for location in self.metadata.list_locations(chunk.id).await? {
                replicas.push((BlobKey::new(chunk.id, location.node_id), chunk.size));
            }
        }

        let outcomes: Vec<bool> = stream::iter(replicas)
            .map(|(key, size)| async move {
                let removed = self.remove_blob(&key).await;
                if let Err(e) = self.metadata.release_space(key.node_id, size).await {
                    warn!("Failed to release {} bytes on node {}: {}", size, key.node_id, e);
                }
                removed
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let replicas_removed = outcomes.iter().filter(|removed| **removed).count() as u64;
        let failed_removals = outcomes.len() as u64 - replicas_removed;

        let summary = self.metadata.purge_file(file.id).await?;

        debug!(
            "Purged file {}: {} chunks, {} locations",
            file.id, summary.chunks_removed, summary.locations_removed
        );

        Ok(DeletionReport {
            file_id: file.id,
            chunks_removed: summary.chunks_removed,
            replicas_removed,
            failed_removals,
        })
    }

    async fn remove_blob(&self, key: &BlobKey) -> bool {
        let error = match tokio::time::timeout(self.io_timeout, self.blobs.delete(key)).await {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.io_timeout),
        };

        warn!("Failed to remove blob {}: {}", key, error);
        recorder::record_cleanup_failure();
        false
    }
}
