use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::blob::{BlobKey, BlobStore};
use crate::coordinator::error::{CoordinatorError, CoordinatorResult};
use crate::coordinator::types::{AuditReport, ReplicaRef};
use crate::integrity::IntegrityVerifier;
use crate::metadata::types::now_millis;
use crate::metadata::{ChunkLocation, FileChunk, FileRecord, LocationStatus, MetadataStore};
use crate::metrics::recorder;

/// Order in which replicas of a chunk are tried: the AVAILABLE primary
/// first, then the remaining AVAILABLE replicas by ascending node id.
pub fn read_candidates(locations: &[ChunkLocation]) -> Vec<ChunkLocation> {
    let mut candidates: Vec<ChunkLocation> = locations
        .iter()
        .filter(|l| l.is_available())
        .cloned()
        .collect();
    candidates.sort_by(|a, b| {
        b.is_primary
            .cmp(&a.is_primary)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    candidates
}

enum ReplicaRead {
    Verified(Bytes),
    Corrupted,
    Failed(String),
}

/// Rebuilds files from their chunks and verifies them end to end.
#[derive(Clone)]
pub struct RetrievalCoordinator {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    verifier: IntegrityVerifier,
    io_timeout: Duration,
    concurrency: usize,
    retry_on_corruption: bool,
}

impl RetrievalCoordinator {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        verifier: IntegrityVerifier,
        io_timeout: Duration,
        concurrency: usize,
        retry_on_corruption: bool,
    ) -> Self {
        Self {
            metadata,
            blobs,
            verifier,
            io_timeout,
            concurrency: concurrency.max(1),
            retry_on_corruption,
        }
    }

    /// Reassemble `file` and verify every chunk plus the whole-file
    /// checksum. No bytes are returned unless everything verifies.
    pub async fn retrieve(&self, file: &FileRecord) -> CoordinatorResult<Bytes> {
        if file.is_deleted {
            return Err(CoordinatorError::FileDeleted(file.id));
        }
        if !file.is_finalized() {
            return Err(CoordinatorError::FileIncomplete(file.id));
        }

        let chunks = self.metadata.list_chunks(file.id).await?;
        let total = check_sequence(file, &chunks)?;

        let mut hasher = self.verifier.hasher();
        // Sized from the chunk rows, not the unverified file size
        let mut buffer = BytesMut::with_capacity(usize::try_from(total).unwrap_or(0));

        // Chunks are fetched concurrently but yielded in sequence order
        let fetches: Vec<_> = chunks
            .iter()
            .map(|chunk| self.fetch_chunk(file.id, chunk))
            .collect();
        let mut fetched = std::pin::pin!(stream::iter(fetches).buffered(self.concurrency));

        while let Some(data) = fetched.next().await {
            let data = data?;
            hasher.update(&data);
            buffer.extend_from_slice(&data);
        }

        let actual = hasher.finalize();
        if actual != file.checksum {
            error!(
                "File {} failed verification: expected {}, got {}",
                file.id, file.checksum, actual
            );
            recorder::record_corruption("file");
            return Err(CoordinatorError::FileCorrupted {
                file_id: file.id,
                expected: file.checksum.clone(),
                actual,
            });
        }

        debug!("Reassembled file {} from {} chunks", file.id, chunks.len());
        Ok(buffer.freeze())
    }

    /// Read one chunk, falling through to the next candidate replica when a
    /// read fails or times out.
    pub async fn fetch_chunk(&self, file_id: Uuid, chunk: &FileChunk) -> CoordinatorResult<Bytes> {
        let locations = self.metadata.list_locations(chunk.id).await?;
        let candidates = read_candidates(&locations);
        if candidates.is_empty() {
            return Err(CoordinatorError::ChunkUnavailable {
                file_id,
                chunk_id: chunk.id,
                sequence: chunk.sequence,
                reason: "no available replica".to_string(),
            });
        }

        let mut corrupted_on = None;
        let mut last_failure = String::new();

        for (attempt, location) in candidates.iter().enumerate() {
            match self.read_replica(chunk, location.node_id).await {
                ReplicaRead::Verified(data) => {
                    if attempt > 0 {
                        debug!(
                            "Chunk {} (seq {}) served by fallback replica on node {}",
                            chunk.id, chunk.sequence, location.node_id
                        );
                        recorder::record_replica_fallback();
                    }
                    return Ok(data);
                }
                ReplicaRead::Corrupted => {
                    error!(
                        "Chunk {} (seq {}) of file {} failed verification on node {}",
                        chunk.id, chunk.sequence, file_id, location.node_id
                    );
                    recorder::record_corruption("chunk");

                    let err = CoordinatorError::ChunkCorrupted {
                        file_id,
                        chunk_id: chunk.id,
                        sequence: chunk.sequence,
                        node_id: location.node_id,
                    };
                    if !self.retry_on_corruption {
                        return Err(err);
                    }
                    corrupted_on.get_or_insert(err);
                }
                ReplicaRead::Failed(reason) => {
                    warn!(
                        "Reading chunk {} (seq {}) from node {} failed: {}",
                        chunk.id, chunk.sequence, location.node_id, reason
                    );
                    last_failure = format!("node {}: {}", location.node_id, reason);
                }
            }
        }

        match corrupted_on {
            Some(err) => Err(err),
            None => Err(CoordinatorError::ChunkUnavailable {
                file_id,
                chunk_id: chunk.id,
                sequence: chunk.sequence,
                reason: format!(
                    "all {} replicas failed, last: {}",
                    candidates.len(),
                    last_failure
                ),
            }),
        }
    }

    /// Read and verify every replica of every chunk, recording the result
    /// on each location. Nothing is repaired.
    pub async fn audit(&self, file: &FileRecord) -> CoordinatorResult<AuditReport> {
        if file.is_deleted {
            return Err(CoordinatorError::FileDeleted(file.id));
        }

        let chunks = self.metadata.list_chunks(file.id).await?;
        let mut report = AuditReport {
            file_id: file.id,
            chunks_checked: chunks.len(),
            ..Default::default()
        };

        for chunk in &chunks {
            let locations = self.metadata.list_locations(chunk.id).await?;
            let mut healthy = 0;

            for location in &locations {
                let replica = ReplicaRef {
                    chunk_id: chunk.id,
                    sequence: chunk.sequence,
                    node_id: location.node_id,
                };
                let status = match self.read_replica(chunk, location.node_id).await {
                    ReplicaRead::Verified(_) => {
                        healthy += 1;
                        LocationStatus::Available
                    }
                    ReplicaRead::Corrupted => {
                        recorder::record_corruption("chunk");
                        report.corrupted.push(replica);
                        LocationStatus::Corrupted
                    }
                    ReplicaRead::Failed(reason) => {
                        debug!(
                            "Audit: chunk {} missing on node {}: {}",
                            chunk.id, location.node_id, reason
                        );
                        report.missing.push(replica);
                        LocationStatus::Missing
                    }
                };

                self.metadata
                    .set_location_status(chunk.id, location.node_id, status, now_millis())
                    .await?;
            }

            report.replicas_checked += locations.len();
            report.healthy_replicas += healthy;
            if healthy == 0 {
                report.unrecoverable_chunks.push(chunk.sequence);
            }
        }

        if !report.is_healthy() {
            warn!(
                "Audit of file {}: {} missing, {} corrupted, {} chunks unrecoverable",
                file.id,
                report.missing.len(),
                report.corrupted.len(),
                report.unrecoverable_chunks.len()
            );
        }
        Ok(report)
    }

    async fn read_replica(&self, chunk: &FileChunk, node_id: Uuid) -> ReplicaRead {
        let key = BlobKey::new(chunk.id, node_id);
        match tokio::time::timeout(self.io_timeout, self.blobs.get(&key)).await {
            Ok(Ok(data)) if self.verifier.verify(&data, &chunk.checksum) => {
                ReplicaRead::Verified(data)
            }
            Ok(Ok(_)) => ReplicaRead::Corrupted,
            Ok(Err(e)) => ReplicaRead::Failed(e.to_string()),
            Err(_) => ReplicaRead::Failed(format!("timed out after {:?}", self.io_timeout)),
        }
    }
}

/// Chunks must cover sequences `0..n` without gaps and add up to at least
/// the recorded file size. Returns their total size.
fn check_sequence(file: &FileRecord, chunks: &[FileChunk]) -> CoordinatorResult<u64> {
    for (expected, chunk) in chunks.iter().enumerate() {
        if chunk.sequence as usize != expected {
            return Err(CoordinatorError::MissingChunk {
                file_id: file.id,
                sequence: expected as u32,
            });
        }
    }

    let total: u64 = chunks.iter().map(|c| c.size).sum();
    if total < file.size {
        return Err(CoordinatorError::MissingChunk {
            file_id: file.id,
            sequence: chunks.len() as u32,
        });
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(node: u128, is_primary: bool, status: LocationStatus) -> ChunkLocation {
        let mut location = ChunkLocation::new(Uuid::nil(), Uuid::from_u128(node), is_primary);
        location.status = status;
        location
    }

    fn nodes(candidates: &[ChunkLocation]) -> Vec<u128> {
        candidates.iter().map(|l| l.node_id.as_u128()).collect()
    }

    #[test]
    fn test_primary_first_then_node_order() {
        let locations = vec![
            location(1, false, LocationStatus::Available),
            location(5, true, LocationStatus::Available),
            location(3, false, LocationStatus::Available),
        ];
        assert_eq!(nodes(&read_candidates(&locations)), vec![5, 1, 3]);
    }

    #[test]
    fn test_unavailable_replicas_skipped() {
        let locations = vec![
            location(1, true, LocationStatus::Missing),
            location(4, false, LocationStatus::Available),
            location(2, false, LocationStatus::Corrupted),
        ];
        assert_eq!(nodes(&read_candidates(&locations)), vec![4]);
        assert!(read_candidates(&[location(1, true, LocationStatus::Corrupted)]).is_empty());
    }

    #[test]
    fn test_sequence_gap_detected() {
        let verifier = IntegrityVerifier::default();
        let mut file = FileRecord::new("alice", "f");
        file.size = 3;
        let chunk = |seq| FileChunk::new(file.id, seq, 1, verifier.calculate_checksum(b"x"));

        assert_eq!(
            check_sequence(&file, &[chunk(0), chunk(1), chunk(2)]).unwrap(),
            3
        );
        assert!(matches!(
            check_sequence(&file, &[chunk(0), chunk(2), chunk(3)]),
            Err(CoordinatorError::MissingChunk { sequence: 1, .. })
        ));
        assert!(matches!(
            check_sequence(&file, &[chunk(0), chunk(1)]),
            Err(CoordinatorError::MissingChunk { sequence: 2, .. })
        ));
    }
}
