use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Address of one replica's bytes: `"{chunk_id}/{node_id}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobKey {
    pub chunk_id: Uuid,
    pub node_id: Uuid,
}

impl BlobKey {
    pub fn new(chunk_id: Uuid, node_id: Uuid) -> Self {
        Self { chunk_id, node_id }
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chunk_id, self.node_id)
    }
}
