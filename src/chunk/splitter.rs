use bytes::Bytes;
use futures::stream::{self, Stream};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::{ChunkError, ChunkResult};
use super::types::ChunkData;

/// Partitions a byte stream into ordered chunks of at most `chunk_size`
/// bytes. Every chunk but the last is exactly `chunk_size` long; empty input
/// yields no chunks.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSplitter {
    chunk_size: usize,
}

impl ChunkSplitter {
    pub fn new(chunk_size: usize) -> ChunkResult<Self> {
        if chunk_size == 0 {
            return Err(ChunkError::InvalidChunkSize(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks `len` bytes split into
    pub fn chunk_count(&self, len: u64) -> u64 {
        len.div_ceil(self.chunk_size as u64)
    }

    /// Split an in-memory buffer. Chunks share the buffer's allocation.
    pub fn split(&self, data: Bytes) -> ChunkResult<Vec<ChunkData>> {
        let count = self.chunk_count(data.len() as u64);
        if count > u64::from(u32::MAX) + 1 {
            return Err(ChunkError::SequenceOverflow(u32::MAX));
        }

        let mut chunks = Vec::with_capacity(count as usize);
        let mut offset = 0;
        let mut sequence = 0u32;

        while offset < data.len() {
            let end = std::cmp::min(offset + self.chunk_size, data.len());
            chunks.push(ChunkData::new(sequence, data.slice(offset..end)));
            offset = end;
            sequence = sequence.wrapping_add(1);
        }

        Ok(chunks)
    }

    /// Split an async reader lazily, holding at most one chunk in memory.
    pub fn stream<R>(&self, reader: R) -> impl Stream<Item = ChunkResult<ChunkData>> + Send
    where
        R: AsyncRead + Unpin + Send,
    {
        let chunk_size = self.chunk_size;
        stream::try_unfold((reader, Some(0u32)), move |(reader, sequence)| {
            next_chunk(reader, sequence, chunk_size)
        })
    }
}

type ReaderState<R> = (R, Option<u32>);

async fn next_chunk<R>(
    mut reader: R,
    sequence: Option<u32>,
    chunk_size: usize,
) -> ChunkResult<Option<(ChunkData, ReaderState<R>)>>
where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = Vec::with_capacity(chunk_size);
    (&mut reader)
        .take(chunk_size as u64)
        .read_to_end(&mut buf)
        .await?;

    if buf.is_empty() {
        return Ok(None);
    }

    // `None` means the previous chunk used the last representable sequence
    let Some(current) = sequence else {
        return Err(ChunkError::SequenceOverflow(u32::MAX));
    };

    let chunk = ChunkData::new(current, Bytes::from(buf));
    Ok(Some((chunk, (reader, current.checked_add(1)))))
}
