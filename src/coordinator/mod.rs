mod deletion;
mod engine;
mod error;
mod placement;
mod retrieval;
mod selector;
mod types;

pub use deletion::DeletionCoordinator;
pub use engine::StorageEngine;
pub use error::{CoordinatorError, CoordinatorResult};
pub use placement::PlacementCoordinator;
pub use retrieval::{read_candidates, RetrievalCoordinator};
pub use selector::{rank_nodes, NodeSelector};
pub use types::{
    AuditReport, ChunkPlacement, DeletionReport, ReplicaRef, ReplicationHealth, UploadOutcome,
};
