use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use bytes::Bytes;
use filenest::blob::{BlobStore, FsBlobStore, MemoryBlobStore};
use filenest::integrity::IntegrityVerifier;
use filenest::metadata::SqliteMetadataStore;
use filenest::metrics::init_metrics;
use filenest::{EngineConfig, StorageEngine};
use tracing_subscriber::EnvFilter;

const DEMO_NODES: usize = 4;
const DEMO_NODE_CAPACITY: u64 = 1 << 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    init_metrics();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next().map(PathBuf::from) else {
        bail!("usage: filenest <file> [metadata-url] [blob-dir]");
    };
    let metadata_url = args.next().unwrap_or_else(|| "sqlite::memory:".to_string());
    let blob_dir = args.next().map(PathBuf::from);

    println!("\nFileNest - distributed file storage engine");
    println!("==========================================\n");

    let config = EngineConfig::from_env().context("loading configuration")?;
    println!(
        "Chunk size: {} bytes, replication factor: {}, checksum: {}",
        config.max_chunk_size,
        config.replication_factor,
        config.checksum_type.as_str()
    );

    let metadata = Arc::new(
        SqliteMetadataStore::connect(&metadata_url)
            .await
            .context("opening metadata store")?,
    );
    let blobs: Arc<dyn BlobStore> = match &blob_dir {
        Some(dir) => Arc::new(FsBlobStore::new(dir).await.context("opening blob directory")?),
        None => Arc::new(MemoryBlobStore::new()),
    };
    println!("Metadata: {metadata_url}");
    match &blob_dir {
        Some(dir) => println!("Blobs: {}", dir.display()),
        None => println!("Blobs: in memory"),
    }

    let verifier = IntegrityVerifier::new(config.checksum_type);
    let engine = StorageEngine::new(config, metadata, blobs)?;

    if engine.list_nodes().await?.is_empty() {
        for i in 0..DEMO_NODES {
            engine
                .register_node(format!("127.0.0.1:{}", 9000 + i), DEMO_NODE_CAPACITY)
                .await?;
        }
    }
    println!("Nodes: {}\n", engine.list_nodes().await?.len());

    let data = Bytes::from(
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
    );
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let outcome = engine.upload("demo", &name, data.clone()).await?;
    println!(
        "Uploaded {} ({} bytes) as {} in {} chunks",
        name,
        outcome.file.size,
        outcome.file.id,
        outcome.chunk_count()
    );
    if outcome.is_degraded() {
        println!(
            "  {} chunks are under-replicated",
            outcome.degraded_chunks().count()
        );
    }

    let downloaded = engine.download(outcome.file.id, "demo").await?;
    let local = verifier.calculate_checksum(&data);
    println!("Local checksum:  {local}");
    println!("Stored checksum: {}", outcome.file.checksum);
    if downloaded != data {
        bail!("downloaded bytes differ from the original");
    }
    println!("Download verified ({} bytes)", downloaded.len());

    Ok(())
}
