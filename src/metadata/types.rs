use crate::integrity::Checksum;
use crate::metadata::error::MetadataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    Active,
    Inactive,
    Maintenance,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "ACTIVE",
            NodeStatus::Inactive => "INACTIVE",
            NodeStatus::Maintenance => "MAINTENANCE",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(NodeStatus::Active),
            "INACTIVE" => Ok(NodeStatus::Inactive),
            "MAINTENANCE" => Ok(NodeStatus::Maintenance),
            other => Err(MetadataError::Corrupt(format!("unknown node status '{other}'"))),
        }
    }
}

/// A storage node as tracked by the metadata store. Health and usage are
/// written by an external monitor; the engine only reserves and releases
/// space for the replicas it places.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageNode {
    pub id: Uuid,
    pub address: String,
    pub capacity: u64,
    pub used_space: u64,
    pub status: NodeStatus,
    pub last_heartbeat: Option<i64>,
    pub created_at: i64,
}

impl StorageNode {
    pub fn new(address: impl Into<String>, capacity: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            capacity,
            used_space: 0,
            status: NodeStatus::Active,
            last_heartbeat: None,
            created_at: now_millis(),
        }
    }

    pub fn available_space(&self) -> u64 {
        self.capacity.saturating_sub(self.used_space)
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub id: Uuid,
    pub owner: String,
    pub name: String,
    pub size: u64,
    /// `pending` until every chunk is committed
    pub checksum: Checksum,
    pub is_deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FileRecord {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            name: name.into(),
            size: 0,
            checksum: Checksum::pending(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_finalized(&self) -> bool {
        !self.checksum.is_pending()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChunk {
    pub id: Uuid,
    pub file_id: Uuid,
    pub sequence: u32,
    pub size: u64,
    pub checksum: Checksum,
    pub created_at: i64,
}

impl FileChunk {
    pub fn new(file_id: Uuid, sequence: u32, size: u64, checksum: Checksum) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_id,
            sequence,
            size,
            checksum,
            created_at: now_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LocationStatus {
    Available,
    Missing,
    Corrupted,
}

impl LocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationStatus::Available => "AVAILABLE",
            LocationStatus::Missing => "MISSING",
            LocationStatus::Corrupted => "CORRUPTED",
        }
    }
}

impl fmt::Display for LocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocationStatus {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(LocationStatus::Available),
            "MISSING" => Ok(LocationStatus::Missing),
            "CORRUPTED" => Ok(LocationStatus::Corrupted),
            other => Err(MetadataError::Corrupt(format!(
                "unknown location status '{other}'"
            ))),
        }
    }
}

/// One replica of a chunk on one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkLocation {
    pub chunk_id: Uuid,
    pub node_id: Uuid,
    pub is_primary: bool,
    pub status: LocationStatus,
    pub created_at: i64,
    pub last_verified: Option<i64>,
}

impl ChunkLocation {
    pub fn new(chunk_id: Uuid, node_id: Uuid, is_primary: bool) -> Self {
        Self {
            chunk_id,
            node_id,
            is_primary,
            status: LocationStatus::Available,
            created_at: now_millis(),
            last_verified: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == LocationStatus::Available
    }
}

/// Rows removed by a file purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub chunks_removed: u64,
    pub locations_removed: u64,
}
