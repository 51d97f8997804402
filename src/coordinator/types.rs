use crate::metadata::FileRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How many of the requested replicas a chunk ended up with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReplicationHealth {
    Full,
    Degraded { succeeded: usize, requested: usize },
}

impl ReplicationHealth {
    pub fn new(succeeded: usize, requested: usize) -> Self {
        if succeeded >= requested {
            ReplicationHealth::Full
        } else {
            ReplicationHealth::Degraded {
                succeeded,
                requested,
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ReplicationHealth::Degraded { .. })
    }
}

/// Result of placing one chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkPlacement {
    pub chunk_id: Uuid,
    pub sequence: u32,
    /// Nodes holding a replica, in selector rank order; the first is primary
    pub replicas: Vec<Uuid>,
    /// Selected nodes whose write failed
    pub failed_nodes: Vec<Uuid>,
    pub health: ReplicationHealth,
}

impl ChunkPlacement {
    pub fn primary(&self) -> Option<Uuid> {
        self.replicas.first().copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub file: FileRecord,
    /// Placements in sequence order
    pub placements: Vec<ChunkPlacement>,
}

impl UploadOutcome {
    pub fn chunk_count(&self) -> usize {
        self.placements.len()
    }

    pub fn is_degraded(&self) -> bool {
        self.placements.iter().any(|p| p.health.is_degraded())
    }

    pub fn degraded_chunks(&self) -> impl Iterator<Item = &ChunkPlacement> {
        self.placements.iter().filter(|p| p.health.is_degraded())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletionReport {
    pub file_id: Uuid,
    pub chunks_removed: u64,
    pub replicas_removed: u64,
    /// Blob removals that failed and were skipped
    pub failed_removals: u64,
}

impl DeletionReport {
    pub fn is_clean(&self) -> bool {
        self.failed_removals == 0
    }
}

/// One replica identified by chunk and node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaRef {
    pub chunk_id: Uuid,
    pub sequence: u32,
    pub node_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditReport {
    pub file_id: Uuid,
    pub chunks_checked: usize,
    pub replicas_checked: usize,
    pub healthy_replicas: usize,
    pub missing: Vec<ReplicaRef>,
    pub corrupted: Vec<ReplicaRef>,
    /// Sequences left with no verified replica
    pub unrecoverable_chunks: Vec<u32>,
}

impl AuditReport {
    pub fn is_healthy(&self) -> bool {
        self.missing.is_empty() && self.corrupted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replication_health() {
        assert_eq!(ReplicationHealth::new(3, 3), ReplicationHealth::Full);
        assert!(ReplicationHealth::new(1, 3).is_degraded());
        assert!(!ReplicationHealth::new(4, 3).is_degraded());
    }

    #[test]
    fn test_primary_is_first_replica() {
        let a = Uuid::from_u128(7);
        let b = Uuid::from_u128(3);
        let placement = ChunkPlacement {
            chunk_id: Uuid::new_v4(),
            sequence: 0,
            replicas: vec![a, b],
            failed_nodes: vec![],
            health: ReplicationHealth::Full,
        };
        assert_eq!(placement.primary(), Some(a));
    }
}
