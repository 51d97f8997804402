use bytes::Bytes;

/// One contiguous slice of a file, zero-indexed by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    pub sequence: u32,
    pub data: Bytes,
}

impl ChunkData {
    pub fn new(sequence: u32, data: Bytes) -> Self {
        Self { sequence, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
