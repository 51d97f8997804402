use crate::integrity::types::{Checksum, ChecksumType, StreamingHasher};

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityVerifier {
    checksum_type: ChecksumType,
}

impl IntegrityVerifier {
    pub fn new(checksum_type: ChecksumType) -> Self {
        Self { checksum_type }
    }

    pub fn checksum_type(&self) -> ChecksumType {
        self.checksum_type
    }

    /// Calculate checksum for byte slice
    pub fn calculate_checksum(&self, data: &[u8]) -> Checksum {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Fresh running context for whole-file digests
    pub fn hasher(&self) -> StreamingHasher {
        StreamingHasher::new(self.checksum_type)
    }

    pub fn verify(&self, data: &[u8], expected: &Checksum) -> bool {
        !expected.is_pending() && self.calculate_checksum(data) == *expected
    }
}
