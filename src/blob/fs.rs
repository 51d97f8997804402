use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::blob::error::{BlobError, BlobResult};
use crate::blob::store::BlobStore;
use crate::blob::types::BlobKey;

/// Blob store laid out as `<root>/<chunk_id>/<node_id>` on a local
/// filesystem. Writes land in a temporary file first and are renamed into
/// place, so readers never observe a partial replica.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn new(root: impl AsRef<Path>) -> BlobResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &BlobKey) -> PathBuf {
        self.root
            .join(key.chunk_id.to_string())
            .join(key.node_id.to_string())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &BlobKey, data: Bytes) -> BlobResult<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = TempPath::new(path.with_extension(format!(
            "{TMP_MARKER}{}",
            Uuid::new_v4().simple()
        )));
        let mut file = fs::File::create(tmp.path()).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(tmp.path(), &path).await?;
        tmp.persist();
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> BlobResult<Bytes> {
        match fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &BlobKey) -> BlobResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = path.parent() {
            sweep_stale_temp_files(parent, key).await;
            // Drop the chunk directory once its last replica is gone
            let _ = fs::remove_dir(parent).await;
        }
        Ok(())
    }
}

const TMP_MARKER: &str = "tmp-";

/// Temporary write target, removed on drop unless persisted. Covers writes
/// abandoned mid-flight, e.g. when the caller's timeout drops the future.
struct TempPath {
    path: PathBuf,
    armed: bool,
}

impl TempPath {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// The file was renamed into place; nothing to clean up
    fn persist(mut self) {
        self.armed = false;
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Remove leftover `<node_id>.tmp-*` files of `key`
async fn sweep_stale_temp_files(dir: &Path, key: &BlobKey) {
    let prefix = format!("{}.{TMP_MARKER}", key.node_id);
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            let _ = fs::remove_file(entry.path()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp_dir.path()).await.unwrap();
        let key = BlobKey::new(Uuid::new_v4(), Uuid::new_v4());

        store.put(&key, Bytes::from_static(b"hello")).await.unwrap();
        assert!(store.path_for(&key).exists());
        assert_eq!(store.get(&key).await.unwrap(), Bytes::from_static(b"hello"));

        // Overwrite replaces contents
        store.put(&key, Bytes::from_static(b"bye")).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Bytes::from_static(b"bye"));

        store.delete(&key).await.unwrap();
        assert!(!store.path_for(&key).exists());
        assert!(!temp_dir.path().join(key.chunk_id.to_string()).exists());
        assert!(matches!(store.get(&key).await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_keeps_sibling_replicas() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp_dir.path()).await.unwrap();
        let chunk_id = Uuid::new_v4();
        let a = BlobKey::new(chunk_id, Uuid::new_v4());
        let b = BlobKey::new(chunk_id, Uuid::new_v4());

        store.put(&a, Bytes::from_static(b"x")).await.unwrap();
        store.put(&b, Bytes::from_static(b"x")).await.unwrap();
        store.delete(&a).await.unwrap();

        assert_eq!(store.get(&b).await.unwrap(), Bytes::from_static(b"x"));
        store.delete(&a).await.unwrap();
    }

    #[test]
    fn test_abandoned_temp_file_removed_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("node.tmp-abandoned");
        std::fs::write(&path, b"partial").unwrap();

        drop(TempPath::new(path.clone()));
        assert!(!path.exists());

        let kept = temp_dir.path().join("node.tmp-kept");
        std::fs::write(&kept, b"full").unwrap();
        TempPath::new(kept.clone()).persist();
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn test_delete_sweeps_stale_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp_dir.path()).await.unwrap();
        let key = BlobKey::new(Uuid::new_v4(), Uuid::new_v4());

        store.put(&key, Bytes::from_static(b"data")).await.unwrap();
        let stale = store
            .path_for(&key)
            .with_extension(format!("{TMP_MARKER}{}", Uuid::new_v4().simple()));
        std::fs::write(&stale, b"half").unwrap();

        store.delete(&key).await.unwrap();
        assert!(!stale.exists());
        assert!(!temp_dir.path().join(key.chunk_id.to_string()).exists());
    }
}
