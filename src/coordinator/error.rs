use crate::integrity::Checksum;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("No eligible storage node for chunk {sequence} ({chunk_id}) of {required} bytes")]
    CapacityExhausted {
        chunk_id: Uuid,
        sequence: u32,
        required: u64,
    },

    #[error("Chunk {sequence} ({chunk_id}): {succeeded} of {attempted} replica writes succeeded, {required} required")]
    ReplicationFailed {
        chunk_id: Uuid,
        sequence: u32,
        attempted: usize,
        succeeded: usize,
        required: usize,
    },

    #[error("Chunk {sequence} ({chunk_id}) of file {file_id} is unavailable: {reason}")]
    ChunkUnavailable {
        file_id: Uuid,
        chunk_id: Uuid,
        sequence: u32,
        reason: String,
    },

    #[error("Chunk {sequence} ({chunk_id}) of file {file_id} is corrupted on node {node_id}")]
    ChunkCorrupted {
        file_id: Uuid,
        chunk_id: Uuid,
        sequence: u32,
        node_id: Uuid,
    },

    #[error("File {file_id} is corrupted: expected checksum {expected}, got {actual}")]
    FileCorrupted {
        file_id: Uuid,
        expected: Checksum,
        actual: Checksum,
    },

    #[error("File {file_id} is missing chunk {sequence}")]
    MissingChunk { file_id: Uuid, sequence: u32 },

    #[error("File not found: {0}")]
    FileNotFound(Uuid),

    #[error("File has been deleted: {0}")]
    FileDeleted(Uuid),

    #[error("File upload has not completed: {0}")]
    FileIncomplete(Uuid),

    #[error("Storage node not found: {0}")]
    NodeNotFound(Uuid),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] crate::metadata::MetadataError),

    #[error("Chunk error: {0}")]
    Chunk(#[from] crate::chunk::ChunkError),
}

impl CoordinatorError {
    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::CapacityExhausted { .. } => "capacity_exhausted",
            CoordinatorError::ReplicationFailed { .. } => "replication_failed",
            CoordinatorError::ChunkUnavailable { .. } => "chunk_unavailable",
            CoordinatorError::ChunkCorrupted { .. } => "chunk_corrupted",
            CoordinatorError::FileCorrupted { .. } => "file_corrupted",
            CoordinatorError::MissingChunk { .. } => "missing_chunk",
            CoordinatorError::FileNotFound(_) => "file_not_found",
            CoordinatorError::FileDeleted(_) => "file_deleted",
            CoordinatorError::FileIncomplete(_) => "file_incomplete",
            CoordinatorError::NodeNotFound(_) => "node_not_found",
            CoordinatorError::Config(_) => "config",
            CoordinatorError::Metadata(_) => "metadata",
            CoordinatorError::Chunk(_) => "chunk",
        }
    }

    /// Whether the error signals stored data failing verification
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            CoordinatorError::ChunkCorrupted { .. } | CoordinatorError::FileCorrupted { .. }
        )
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
