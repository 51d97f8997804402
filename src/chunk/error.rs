use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Too many chunks: sequence overflow after {0}")]
    SequenceOverflow(u32),
}

pub type ChunkResult<T> = std::result::Result<T, ChunkError>;
