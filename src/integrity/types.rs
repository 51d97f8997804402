use crate::integrity::error::{IntegrityError, IntegrityResult};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;

/// Digest algorithm used for chunk and file checksums. Both produce 256 bits.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    #[default]
    Sha256,
    Blake3,
}

impl ChecksumType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumType::Sha256 => "sha256",
            ChecksumType::Blake3 => "blake3",
        }
    }
}

impl std::str::FromStr for ChecksumType {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(ChecksumType::Sha256),
            "blake3" => Ok(ChecksumType::Blake3),
            other => Err(IntegrityError::InvalidChecksum(format!(
                "unknown checksum type '{other}'"
            ))),
        }
    }
}

/// Lowercase hex encoding of a 256-bit digest, or the `pending` sentinel
/// carried by files whose chunks are not yet committed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    pub const PENDING: &'static str = "pending";
    pub const HEX_LEN: usize = 64;

    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn pending() -> Self {
        Self(Self::PENDING.to_string())
    }

    /// Parse a stored checksum, accepting the `pending` sentinel.
    pub fn parse(value: &str) -> IntegrityResult<Self> {
        if value == Self::PENDING {
            return Ok(Self::pending());
        }
        if value.len() != Self::HEX_LEN || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IntegrityError::InvalidChecksum(value.to_string()));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn is_pending(&self) -> bool {
        self.0 == Self::PENDING
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Checksum {
    type Error = IntegrityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.0
    }
}

enum HasherKind {
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

/// Running hash context. Feeding chunk bytes in sequence order yields the
/// same digest as hashing the whole file at once.
pub struct StreamingHasher {
    inner: HasherKind,
    bytes_hashed: u64,
}

impl StreamingHasher {
    pub fn new(checksum_type: ChecksumType) -> Self {
        let inner = match checksum_type {
            ChecksumType::Sha256 => HasherKind::Sha256(sha2::Sha256::new()),
            ChecksumType::Blake3 => HasherKind::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self {
            inner,
            bytes_hashed: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            HasherKind::Sha256(h) => h.update(data),
            HasherKind::Blake3(h) => {
                h.update(data);
            }
        }
        self.bytes_hashed += data.len() as u64;
    }

    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    pub fn finalize(self) -> Checksum {
        let digest: [u8; 32] = match self.inner {
            HasherKind::Sha256(h) => h.finalize().into(),
            HasherKind::Blake3(h) => *h.finalize().as_bytes(),
        };
        Checksum::from_digest(digest)
    }
}
