pub mod error;
pub mod fs;
pub mod memory;
pub mod store;
pub mod types;

pub use error::{BlobError, BlobResult};
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use store::BlobStore;
pub use types::BlobKey;
