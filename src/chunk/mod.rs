pub mod error;
pub mod splitter;
pub mod types;

pub use error::{ChunkError, ChunkResult};
pub use splitter::ChunkSplitter;
pub use types::ChunkData;
