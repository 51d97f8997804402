use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::blob::error::{BlobError, BlobResult};
use crate::blob::store::BlobStore;
use crate::blob::types::BlobKey;

/// Blob store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<BlobKey, Bytes>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn contains(&self, key: &BlobKey) -> bool {
        self.blobs.contains_key(key)
    }

    /// Total bytes held across all blobs
    pub fn total_bytes(&self) -> u64 {
        self.blobs.iter().map(|entry| entry.value().len() as u64).sum()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &BlobKey, data: Bytes) -> BlobResult<()> {
        self.blobs.insert(*key, data);
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> BlobResult<Bytes> {
        self.blobs
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &BlobKey) -> BlobResult<()> {
        self.blobs.remove(key);
        Ok(())
    }
}
