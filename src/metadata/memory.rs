use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::integrity::Checksum;
use crate::metadata::error::{MetadataError, MetadataResult};
use crate::metadata::store::MetadataStore;
use crate::metadata::types::{
    now_millis, ChunkLocation, FileChunk, FileRecord, LocationStatus, NodeStatus, PurgeSummary,
    StorageNode,
};

#[derive(Default)]
struct Tables {
    nodes: BTreeMap<Uuid, StorageNode>,
    files: HashMap<Uuid, FileRecord>,
    chunks: HashMap<Uuid, FileChunk>,
    /// Keyed by (chunk, node); ordered so a chunk's replicas are contiguous
    locations: BTreeMap<(Uuid, Uuid), ChunkLocation>,
}

/// Metadata store held entirely in process memory. Every operation runs
/// under one lock, which makes reservations and purges atomic.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    tables: RwLock<Tables>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn node_not_found(node_id: Uuid) -> MetadataError {
    MetadataError::NotFound(format!("node {node_id}"))
}

fn file_not_found(file_id: Uuid) -> MetadataError {
    MetadataError::NotFound(format!("file {file_id}"))
}

fn chunk_range(chunk_id: Uuid) -> std::ops::RangeInclusive<(Uuid, Uuid)> {
    (chunk_id, Uuid::nil())..=(chunk_id, Uuid::from_u128(u128::MAX))
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert_node(&self, node: &StorageNode) -> MetadataResult<()> {
        if node.used_space > node.capacity {
            return Err(MetadataError::InvalidInput(format!(
                "node {} uses {} of {} bytes",
                node.id, node.used_space, node.capacity
            )));
        }

        let mut tables = self.tables.write();
        if tables.nodes.contains_key(&node.id) {
            return Err(MetadataError::Duplicate(format!("node {}", node.id)));
        }
        tables.nodes.insert(node.id, node.clone());
        Ok(())
    }

    async fn get_node(&self, node_id: Uuid) -> MetadataResult<StorageNode> {
        self.tables
            .read()
            .nodes
            .get(&node_id)
            .cloned()
            .ok_or_else(|| node_not_found(node_id))
    }

    async fn list_nodes(&self) -> MetadataResult<Vec<StorageNode>> {
        Ok(self.tables.read().nodes.values().cloned().collect())
    }

    async fn set_node_status(&self, node_id: Uuid, status: NodeStatus) -> MetadataResult<()> {
        let mut tables = self.tables.write();
        let node = tables
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| node_not_found(node_id))?;
        node.status = status;
        Ok(())
    }

    async fn record_heartbeat(
        &self,
        node_id: Uuid,
        used_space: u64,
        at: i64,
    ) -> MetadataResult<()> {
        let mut tables = self.tables.write();
        let node = tables
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| node_not_found(node_id))?;
        node.used_space = used_space.min(node.capacity);
        node.last_heartbeat = Some(at);
        Ok(())
    }

    async fn reserve_space(&self, node_id: Uuid, bytes: u64) -> MetadataResult<bool> {
        let mut tables = self.tables.write();
        let Some(node) = tables.nodes.get_mut(&node_id) else {
            return Ok(false);
        };

        match node.used_space.checked_add(bytes) {
            Some(total) if total <= node.capacity => {
                node.used_space = total;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_space(&self, node_id: Uuid, bytes: u64) -> MetadataResult<()> {
        let mut tables = self.tables.write();
        let node = tables
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| node_not_found(node_id))?;
        node.used_space = node.used_space.saturating_sub(bytes);
        Ok(())
    }

    async fn insert_file(&self, file: &FileRecord) -> MetadataResult<()> {
        let mut tables = self.tables.write();
        if tables.files.contains_key(&file.id) {
            return Err(MetadataError::Duplicate(format!("file {}", file.id)));
        }
        tables.files.insert(file.id, file.clone());
        Ok(())
    }

    async fn get_file(&self, file_id: Uuid) -> MetadataResult<FileRecord> {
        self.tables
            .read()
            .files
            .get(&file_id)
            .cloned()
            .ok_or_else(|| file_not_found(file_id))
    }

    async fn list_files(&self, owner: &str) -> MetadataResult<Vec<FileRecord>> {
        let mut files: Vec<FileRecord> = self
            .tables
            .read()
            .files
            .values()
            .filter(|f| f.owner == owner && !f.is_deleted)
            .cloned()
            .collect();
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(files)
    }

    async fn finalize_file(
        &self,
        file_id: Uuid,
        size: u64,
        checksum: &Checksum,
    ) -> MetadataResult<()> {
        let mut tables = self.tables.write();
        let file = tables
            .files
            .get_mut(&file_id)
            .filter(|f| !f.is_deleted)
            .ok_or_else(|| file_not_found(file_id))?;
        file.size = size;
        file.checksum = checksum.clone();
        file.updated_at = now_millis();
        Ok(())
    }

    async fn insert_chunk(&self, chunk: &FileChunk) -> MetadataResult<()> {
        let mut tables = self.tables.write();
        if !tables.files.contains_key(&chunk.file_id) {
            return Err(MetadataError::InvalidInput(format!(
                "chunk references unknown file {}",
                chunk.file_id
            )));
        }
        if tables.chunks.contains_key(&chunk.id) {
            return Err(MetadataError::Duplicate(format!("chunk {}", chunk.id)));
        }
        if tables
            .chunks
            .values()
            .any(|c| c.file_id == chunk.file_id && c.sequence == chunk.sequence)
        {
            return Err(MetadataError::Duplicate(format!(
                "chunk {} of file {}",
                chunk.sequence, chunk.file_id
            )));
        }
        tables.chunks.insert(chunk.id, chunk.clone());
        Ok(())
    }

    async fn list_chunks(&self, file_id: Uuid) -> MetadataResult<Vec<FileChunk>> {
        let mut chunks: Vec<FileChunk> = self
            .tables
            .read()
            .chunks
            .values()
            .filter(|c| c.file_id == file_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.sequence);
        Ok(chunks)
    }

    async fn insert_location(&self, location: &ChunkLocation) -> MetadataResult<()> {
        let mut tables = self.tables.write();
        if !tables.chunks.contains_key(&location.chunk_id) {
            return Err(MetadataError::InvalidInput(format!(
                "location references unknown chunk {}",
                location.chunk_id
            )));
        }
        if !tables.nodes.contains_key(&location.node_id) {
            return Err(MetadataError::InvalidInput(format!(
                "location references unknown node {}",
                location.node_id
            )));
        }

        let key = (location.chunk_id, location.node_id);
        if tables.locations.contains_key(&key) {
            return Err(MetadataError::Duplicate(format!(
                "chunk {} on node {}",
                location.chunk_id, location.node_id
            )));
        }
        if location.is_primary
            && tables
                .locations
                .range(chunk_range(location.chunk_id))
                .any(|(_, l)| l.is_primary)
        {
            return Err(MetadataError::Duplicate(format!(
                "primary for chunk {}",
                location.chunk_id
            )));
        }

        tables.locations.insert(key, location.clone());
        Ok(())
    }

    async fn list_locations(&self, chunk_id: Uuid) -> MetadataResult<Vec<ChunkLocation>> {
        Ok(self
            .tables
            .read()
            .locations
            .range(chunk_range(chunk_id))
            .map(|(_, l)| l.clone())
            .collect())
    }

    async fn set_location_status(
        &self,
        chunk_id: Uuid,
        node_id: Uuid,
        status: LocationStatus,
        verified_at: i64,
    ) -> MetadataResult<()> {
        let mut tables = self.tables.write();
        let location = tables
            .locations
            .get_mut(&(chunk_id, node_id))
            .ok_or_else(|| {
                MetadataError::NotFound(format!("location of chunk {chunk_id} on node {node_id}"))
            })?;
        location.status = status;
        location.last_verified = Some(verified_at);
        Ok(())
    }

    async fn purge_file(&self, file_id: Uuid) -> MetadataResult<PurgeSummary> {
        let mut tables = self.tables.write();
        if !tables.files.contains_key(&file_id) {
            return Err(file_not_found(file_id));
        }

        let chunk_ids: Vec<Uuid> = tables
            .chunks
            .values()
            .filter(|c| c.file_id == file_id)
            .map(|c| c.id)
            .collect();

        let before = tables.locations.len();
        tables
            .locations
            .retain(|(chunk_id, _), _| !chunk_ids.contains(chunk_id));
        let locations_removed = (before - tables.locations.len()) as u64;

        for chunk_id in &chunk_ids {
            tables.chunks.remove(chunk_id);
        }

        if let Some(file) = tables.files.get_mut(&file_id) {
            file.is_deleted = true;
            file.updated_at = now_millis();
        }

        Ok(PurgeSummary {
            chunks_removed: chunk_ids.len() as u64,
            locations_removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::IntegrityVerifier;

    fn checksum(data: &[u8]) -> Checksum {
        IntegrityVerifier::default().calculate_checksum(data)
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let store = InMemoryMetadataStore::new();
        let node = StorageNode::new("n1", 100);
        store.insert_node(&node).await.unwrap();

        assert!(store.reserve_space(node.id, 100).await.unwrap());
        assert!(!store.reserve_space(node.id, 1).await.unwrap());
        assert!(!store.reserve_space(Uuid::new_v4(), 1).await.unwrap());

        store.release_space(node.id, 250).await.unwrap();
        assert_eq!(store.get_node(node.id).await.unwrap().used_space, 0);
    }

    #[tokio::test]
    async fn test_location_constraints() {
        let store = InMemoryMetadataStore::new();
        let a = StorageNode::new("a", 100);
        let b = StorageNode::new("b", 100);
        store.insert_node(&a).await.unwrap();
        store.insert_node(&b).await.unwrap();

        let file = FileRecord::new("alice", "f");
        store.insert_file(&file).await.unwrap();
        let chunk = FileChunk::new(file.id, 0, 1, checksum(b"x"));
        store.insert_chunk(&chunk).await.unwrap();

        store
            .insert_location(&ChunkLocation::new(chunk.id, a.id, true))
            .await
            .unwrap();
        assert!(matches!(
            store
                .insert_location(&ChunkLocation::new(chunk.id, b.id, true))
                .await,
            Err(MetadataError::Duplicate(_))
        ));
        store
            .insert_location(&ChunkLocation::new(chunk.id, b.id, false))
            .await
            .unwrap();

        let locations = store.list_locations(chunk.id).await.unwrap();
        assert_eq!(locations.len(), 2);
        assert!(locations.windows(2).all(|w| w[0].node_id < w[1].node_id));
    }

    #[tokio::test]
    async fn test_chunk_requires_file() {
        let store = InMemoryMetadataStore::new();
        let orphan = FileChunk::new(Uuid::new_v4(), 0, 1, checksum(b"x"));
        assert!(matches!(
            store.insert_chunk(&orphan).await,
            Err(MetadataError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_removes_everything() {
        let store = InMemoryMetadataStore::new();
        let node = StorageNode::new("n1", 100);
        store.insert_node(&node).await.unwrap();

        let file = FileRecord::new("alice", "f");
        let keep = FileRecord::new("alice", "g");
        store.insert_file(&file).await.unwrap();
        store.insert_file(&keep).await.unwrap();

        for (f, seq) in [(&file, 0u32), (&file, 1), (&keep, 0)] {
            let chunk = FileChunk::new(f.id, seq, 1, checksum(&[seq as u8]));
            store.insert_chunk(&chunk).await.unwrap();
            store
                .insert_location(&ChunkLocation::new(chunk.id, node.id, true))
                .await
                .unwrap();
        }

        let summary = store.purge_file(file.id).await.unwrap();
        assert_eq!(
            summary,
            PurgeSummary {
                chunks_removed: 2,
                locations_removed: 2
            }
        );
        assert!(store.get_file(file.id).await.unwrap().is_deleted);
        assert!(store.list_chunks(file.id).await.unwrap().is_empty());
        assert_eq!(store.list_chunks(keep.id).await.unwrap().len(), 1);

        let remaining: Vec<String> = store
            .list_files("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(remaining, vec!["g"]);
    }
}
