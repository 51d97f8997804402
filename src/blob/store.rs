use async_trait::async_trait;
use bytes::Bytes;

use crate::blob::error::BlobResult;
use crate::blob::types::BlobKey;

/// Raw replica bytes, addressed by [`BlobKey`].
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key`, replacing any previous value.
    async fn put(&self, key: &BlobKey, data: Bytes) -> BlobResult<()>;

    /// Fetch bytes stored under `key`. Missing keys are `BlobError::NotFound`.
    async fn get(&self, key: &BlobKey) -> BlobResult<Bytes>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &BlobKey) -> BlobResult<()>;
}
