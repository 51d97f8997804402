//! Shared fixtures for engine-level tests
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use filenest::blob::{BlobError, BlobKey, BlobResult, BlobStore, MemoryBlobStore};
use filenest::metadata::{InMemoryMetadataStore, MetadataStore, StorageNode};
use filenest::{EngineConfig, StorageEngine};
use parking_lot::RwLock;
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Default)]
struct Faults {
    failing_puts: HashSet<Uuid>,
    failing_gets: HashSet<Uuid>,
    failing_deletes: HashSet<Uuid>,
    corrupt_reads: HashSet<Uuid>,
    stalled: HashSet<Uuid>,
}

/// In-memory blob store whose nodes can be made to fail, stall, or return
/// corrupted bytes.
#[derive(Default)]
pub struct FaultyBlobStore {
    inner: MemoryBlobStore,
    faults: RwLock<Faults>,
}

impl FaultyBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryBlobStore {
        &self.inner
    }

    pub fn fail_puts(&self, node_id: Uuid) {
        self.faults.write().failing_puts.insert(node_id);
    }

    pub fn fail_gets(&self, node_id: Uuid) {
        self.faults.write().failing_gets.insert(node_id);
    }

    pub fn fail_deletes(&self, node_id: Uuid) {
        self.faults.write().failing_deletes.insert(node_id);
    }

    pub fn corrupt_reads(&self, node_id: Uuid) {
        self.faults.write().corrupt_reads.insert(node_id);
    }

    /// Every operation against `node_id` hangs
    pub fn stall(&self, node_id: Uuid) {
        self.faults.write().stalled.insert(node_id);
    }

    pub fn heal(&self, node_id: Uuid) {
        let mut faults = self.faults.write();
        faults.failing_puts.remove(&node_id);
        faults.failing_gets.remove(&node_id);
        faults.failing_deletes.remove(&node_id);
        faults.corrupt_reads.remove(&node_id);
        faults.stalled.remove(&node_id);
    }

    async fn maybe_stall(&self, node_id: Uuid) {
        let stalled = self.faults.read().stalled.contains(&node_id);
        if stalled {
            std::future::pending::<()>().await;
        }
    }
}

fn unreachable(key: &BlobKey) -> BlobError {
    BlobError::Unavailable(format!("node {} unreachable", key.node_id))
}

#[async_trait]
impl BlobStore for FaultyBlobStore {
    async fn put(&self, key: &BlobKey, data: Bytes) -> BlobResult<()> {
        self.maybe_stall(key.node_id).await;
        let failing = self.faults.read().failing_puts.contains(&key.node_id);
        if failing {
            return Err(unreachable(key));
        }
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &BlobKey) -> BlobResult<Bytes> {
        self.maybe_stall(key.node_id).await;
        let (failing, corrupt) = {
            let faults = self.faults.read();
            (
                faults.failing_gets.contains(&key.node_id),
                faults.corrupt_reads.contains(&key.node_id),
            )
        };
        if failing {
            return Err(unreachable(key));
        }

        let data = self.inner.get(key).await?;
        if corrupt {
            let mut flipped = data.to_vec();
            match flipped.first_mut() {
                Some(byte) => *byte ^= 0xFF,
                None => flipped.push(0),
            }
            return Ok(Bytes::from(flipped));
        }
        Ok(data)
    }

    async fn delete(&self, key: &BlobKey) -> BlobResult<()> {
        self.maybe_stall(key.node_id).await;
        let failing = self.faults.read().failing_deletes.contains(&key.node_id);
        if failing {
            return Err(unreachable(key));
        }
        self.inner.delete(key).await
    }
}

/// Blob store whose writes park until the test opens the gate.
#[derive(Default)]
pub struct GatedBlobStore {
    inner: MemoryBlobStore,
    entered: Notify,
    gate: Notify,
}

impl GatedBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryBlobStore {
        &self.inner
    }

    /// Wait until a write is parked at the gate
    pub async fn wait_for_write(&self) {
        self.entered.notified().await;
    }

    /// Let one parked write through
    pub fn open(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl BlobStore for GatedBlobStore {
    async fn put(&self, key: &BlobKey, data: Bytes) -> BlobResult<()> {
        self.entered.notify_one();
        self.gate.notified().await;
        self.inner.put(key, data).await
    }

    async fn get(&self, key: &BlobKey) -> BlobResult<Bytes> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &BlobKey) -> BlobResult<()> {
        self.inner.delete(key).await
    }
}

pub struct Harness {
    pub engine: StorageEngine,
    pub metadata: Arc<InMemoryMetadataStore>,
    pub blobs: Arc<FaultyBlobStore>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let blobs = Arc::new(FaultyBlobStore::new());
        let engine = StorageEngine::new(config, metadata.clone(), blobs.clone())
            .expect("valid engine config");
        Self {
            engine,
            metadata,
            blobs,
        }
    }

    /// Insert a node with a fixed id and usage so rank order is predictable
    pub async fn add_node(&self, id: u128, capacity: u64, used_space: u64) -> StorageNode {
        let mut node = StorageNode::new(format!("10.0.0.{id}:7000"), capacity);
        node.id = Uuid::from_u128(id);
        node.used_space = used_space;
        self.metadata.insert_node(&node).await.unwrap();
        node
    }
}

pub fn config(chunk_size: usize, replication_factor: usize) -> EngineConfig {
    EngineConfig::builder()
        .max_chunk_size(chunk_size)
        .replication_factor(replication_factor)
        .upload_concurrency(4)
        .download_concurrency(4)
        .io_timeout(Duration::from_millis(200))
        .build()
        .expect("valid test config")
}

/// Deterministic, non-repeating-per-chunk payload
pub fn payload(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i * 31 % 251) as u8).collect::<Vec<u8>>())
}
