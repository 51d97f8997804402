use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::integrity::Checksum;
use crate::metadata::error::{MetadataError, MetadataResult};
use crate::metadata::store::MetadataStore;
use crate::metadata::types::{
    now_millis, ChunkLocation, FileChunk, FileRecord, LocationStatus, NodeStatus, PurgeSummary,
    StorageNode,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS storage_nodes (
        id TEXT PRIMARY KEY,
        address TEXT NOT NULL,
        capacity INTEGER NOT NULL,
        used_space INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        last_heartbeat INTEGER,
        created_at INTEGER NOT NULL,
        CHECK (used_space >= 0 AND used_space <= capacity)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        name TEXT NOT NULL,
        size INTEGER NOT NULL,
        checksum TEXT NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS file_chunks (
        id TEXT PRIMARY KEY,
        file_id TEXT NOT NULL REFERENCES files(id),
        sequence INTEGER NOT NULL,
        size INTEGER NOT NULL,
        checksum TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE (file_id, sequence)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_locations (
        chunk_id TEXT NOT NULL REFERENCES file_chunks(id),
        node_id TEXT NOT NULL REFERENCES storage_nodes(id),
        is_primary INTEGER NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        last_verified INTEGER,
        UNIQUE (chunk_id, node_id)
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_locations_one_primary ON chunk_locations(chunk_id) WHERE is_primary = 1",
    "CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner, is_deleted, created_at)",
];

/// SQLite-backed metadata store.
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `url` and initialize the schema
    pub async fn connect(url: &str) -> MetadataResult<Self> {
        let in_memory = url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` opens its own database, so keep a
        // single connection alive for the lifetime of the pool.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options.connect_with(options).await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        debug!("Metadata store ready at {}", url);
        Ok(Self { pool })
    }

    /// In-memory database (for testing)
    pub async fn new_in_memory() -> MetadataResult<Self> {
        Self::connect("sqlite::memory:").await
    }
}

fn to_i64(value: u64, field: &str) -> MetadataResult<i64> {
    i64::try_from(value)
        .map_err(|_| MetadataError::InvalidInput(format!("{field} {value} out of range")))
}

fn to_u64(value: i64, field: &str) -> MetadataResult<u64> {
    u64::try_from(value).map_err(|_| MetadataError::Corrupt(format!("negative {field} {value}")))
}

fn parse_uuid(row: &SqliteRow, column: &str) -> MetadataResult<Uuid> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| MetadataError::Corrupt(format!("{column} '{raw}': {e}")))
}

fn node_from_row(row: &SqliteRow) -> MetadataResult<StorageNode> {
    Ok(StorageNode {
        id: parse_uuid(row, "id")?,
        address: row.try_get("address")?,
        capacity: to_u64(row.try_get("capacity")?, "capacity")?,
        used_space: to_u64(row.try_get("used_space")?, "used_space")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        last_heartbeat: row.try_get("last_heartbeat")?,
        created_at: row.try_get("created_at")?,
    })
}

fn file_from_row(row: &SqliteRow) -> MetadataResult<FileRecord> {
    Ok(FileRecord {
        id: parse_uuid(row, "id")?,
        owner: row.try_get("owner")?,
        name: row.try_get("name")?,
        size: to_u64(row.try_get("size")?, "size")?,
        checksum: Checksum::parse(&row.try_get::<String, _>("checksum")?)?,
        is_deleted: row.try_get("is_deleted")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn chunk_from_row(row: &SqliteRow) -> MetadataResult<FileChunk> {
    let sequence: i64 = row.try_get("sequence")?;
    Ok(FileChunk {
        id: parse_uuid(row, "id")?,
        file_id: parse_uuid(row, "file_id")?,
        sequence: u32::try_from(sequence)
            .map_err(|_| MetadataError::Corrupt(format!("sequence {sequence} out of range")))?,
        size: to_u64(row.try_get("size")?, "size")?,
        checksum: Checksum::parse(&row.try_get::<String, _>("checksum")?)?,
        created_at: row.try_get("created_at")?,
    })
}

fn location_from_row(row: &SqliteRow) -> MetadataResult<ChunkLocation> {
    Ok(ChunkLocation {
        chunk_id: parse_uuid(row, "chunk_id")?,
        node_id: parse_uuid(row, "node_id")?,
        is_primary: row.try_get("is_primary")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        last_verified: row.try_get("last_verified")?,
    })
}

fn expect_one(rows_affected: u64, what: impl FnOnce() -> String) -> MetadataResult<()> {
    if rows_affected == 0 {
        return Err(MetadataError::NotFound(what()));
    }
    Ok(())
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert_node(&self, node: &StorageNode) -> MetadataResult<()> {
        if node.used_space > node.capacity {
            return Err(MetadataError::InvalidInput(format!(
                "node {} uses {} of {} bytes",
                node.id, node.used_space, node.capacity
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO storage_nodes
            (id, address, capacity, used_space, status, last_heartbeat, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(node.id.to_string())
        .bind(&node.address)
        .bind(to_i64(node.capacity, "capacity")?)
        .bind(to_i64(node.used_space, "used_space")?)
        .bind(node.status.as_str())
        .bind(node.last_heartbeat)
        .bind(node.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_node(&self, node_id: Uuid) -> MetadataResult<StorageNode> {
        let row = sqlx::query("SELECT * FROM storage_nodes WHERE id = ?")
            .bind(node_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("node {node_id}")))?;

        node_from_row(&row)
    }

    async fn list_nodes(&self) -> MetadataResult<Vec<StorageNode>> {
        let rows = sqlx::query("SELECT * FROM storage_nodes ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(node_from_row).collect()
    }

    async fn set_node_status(&self, node_id: Uuid, status: NodeStatus) -> MetadataResult<()> {
        let result = sqlx::query("UPDATE storage_nodes SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(node_id.to_string())
            .execute(&self.pool)
            .await?;

        expect_one(result.rows_affected(), || format!("node {node_id}"))
    }

    async fn record_heartbeat(
        &self,
        node_id: Uuid,
        used_space: u64,
        at: i64,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE storage_nodes SET used_space = MIN(?, capacity), last_heartbeat = ? WHERE id = ?",
        )
        .bind(to_i64(used_space, "used_space")?)
        .bind(at)
        .bind(node_id.to_string())
        .execute(&self.pool)
        .await?;

        expect_one(result.rows_affected(), || format!("node {node_id}"))
    }

    async fn reserve_space(&self, node_id: Uuid, bytes: u64) -> MetadataResult<bool> {
        let bytes = to_i64(bytes, "reservation")?;
        let result = sqlx::query(
            "UPDATE storage_nodes SET used_space = used_space + ? WHERE id = ? AND used_space + ? <= capacity",
        )
        .bind(bytes)
        .bind(node_id.to_string())
        .bind(bytes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_space(&self, node_id: Uuid, bytes: u64) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE storage_nodes SET used_space = MAX(0, used_space - ?) WHERE id = ?",
        )
        .bind(to_i64(bytes, "release")?)
        .bind(node_id.to_string())
        .execute(&self.pool)
        .await?;

        expect_one(result.rows_affected(), || format!("node {node_id}"))
    }

    async fn insert_file(&self, file: &FileRecord) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO files
            (id, owner, name, size, checksum, is_deleted, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.id.to_string())
        .bind(&file.owner)
        .bind(&file.name)
        .bind(to_i64(file.size, "size")?)
        .bind(file.checksum.as_str())
        .bind(file.is_deleted)
        .bind(file.created_at)
        .bind(file.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_file(&self, file_id: Uuid) -> MetadataResult<FileRecord> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?")
            .bind(file_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("file {file_id}")))?;

        file_from_row(&row)
    }

    async fn list_files(&self, owner: &str) -> MetadataResult<Vec<FileRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM files WHERE owner = ? AND is_deleted = 0 ORDER BY created_at DESC, id ASC",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(file_from_row).collect()
    }

    async fn finalize_file(
        &self,
        file_id: Uuid,
        size: u64,
        checksum: &Checksum,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE files SET size = ?, checksum = ?, updated_at = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(to_i64(size, "size")?)
        .bind(checksum.as_str())
        .bind(now_millis())
        .bind(file_id.to_string())
        .execute(&self.pool)
        .await?;

        expect_one(result.rows_affected(), || format!("file {file_id}"))
    }

    async fn insert_chunk(&self, chunk: &FileChunk) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO file_chunks (id, file_id, sequence, size, checksum, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chunk.id.to_string())
        .bind(chunk.file_id.to_string())
        .bind(i64::from(chunk.sequence))
        .bind(to_i64(chunk.size, "size")?)
        .bind(chunk.checksum.as_str())
        .bind(chunk.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_chunks(&self, file_id: Uuid) -> MetadataResult<Vec<FileChunk>> {
        let rows = sqlx::query("SELECT * FROM file_chunks WHERE file_id = ? ORDER BY sequence ASC")
            .bind(file_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(chunk_from_row).collect()
    }

    async fn insert_location(&self, location: &ChunkLocation) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chunk_locations
            (chunk_id, node_id, is_primary, status, created_at, last_verified)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(location.chunk_id.to_string())
        .bind(location.node_id.to_string())
        .bind(location.is_primary)
        .bind(location.status.as_str())
        .bind(location.created_at)
        .bind(location.last_verified)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_locations(&self, chunk_id: Uuid) -> MetadataResult<Vec<ChunkLocation>> {
        let rows =
            sqlx::query("SELECT * FROM chunk_locations WHERE chunk_id = ? ORDER BY node_id ASC")
                .bind(chunk_id.to_string())
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(location_from_row).collect()
    }

    async fn set_location_status(
        &self,
        chunk_id: Uuid,
        node_id: Uuid,
        status: LocationStatus,
        verified_at: i64,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE chunk_locations SET status = ?, last_verified = ? WHERE chunk_id = ? AND node_id = ?",
        )
        .bind(status.as_str())
        .bind(verified_at)
        .bind(chunk_id.to_string())
        .bind(node_id.to_string())
        .execute(&self.pool)
        .await?;

        expect_one(result.rows_affected(), || {
            format!("location of chunk {chunk_id} on node {node_id}")
        })
    }

    async fn purge_file(&self, file_id: Uuid) -> MetadataResult<PurgeSummary> {
        let id = file_id.to_string();
        let mut tx = self.pool.begin().await?;

        let locations = sqlx::query(
            "DELETE FROM chunk_locations WHERE chunk_id IN (SELECT id FROM file_chunks WHERE file_id = ?)",
        )
        .bind(&id)
        .execute(&mut *tx)
        .await?;

        let chunks = sqlx::query("DELETE FROM file_chunks WHERE file_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        let file = sqlx::query("UPDATE files SET is_deleted = 1, updated_at = ? WHERE id = ?")
            .bind(now_millis())
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        // Dropping the transaction rolls it back
        expect_one(file.rows_affected(), || format!("file {file_id}"))?;

        tx.commit().await?;

        Ok(PurgeSummary {
            chunks_removed: chunks.rows_affected(),
            locations_removed: locations.rows_affected(),
        })
    }
}
