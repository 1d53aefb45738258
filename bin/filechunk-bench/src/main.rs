//! FileChunk bench
//!
//! Builds a number of multi-file stores on one in-memory backend, writes every
//! chunk of every store concurrently, reads it all back, verifies checksums
//! and tears the stores down again.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail, ensure};
use bytes::Bytes;
use clap::Parser;
use filechunk_common::{FileSpec, GetRange, StoreConfig, StoreId, StoreOptions};
use filechunk_store::{ChunkStore, MemoryBackend, StoreContext};
use futures::future::try_join_all;
use rand::{Rng, RngCore};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "filechunk-bench", about = "FileChunk chunk store load generator")]
struct Args {
    /// Number of stores
    #[arg(long, default_value_t = 8)]
    stores: usize,

    /// Item length per store in bytes
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    item_bytes: u64,

    /// Backing files per store
    #[arg(long, default_value_t = 5)]
    files: usize,

    /// Chunk length in bytes
    #[arg(long, default_value_t = 16 * 1024)]
    chunk_bytes: u64,

    /// Global I/O concurrency (overrides the config file)
    #[arg(long, env = "FILECHUNK_IO_CONCURRENCY")]
    io_concurrency: Option<usize>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace / debug / info / warn / error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    ensure!(args.stores > 0, "--stores must be at least 1");
    ensure!(args.files > 0, "--files must be at least 1");
    ensure!(args.chunk_bytes > 0, "--chunk-bytes must be positive");

    // ── Context ───────────────────────────────────────────────────────────────
    let mut config = match &args.config {
        Some(path) => StoreConfig::from_json_file(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(width) = args.io_concurrency {
        config.io_concurrency = width;
    }

    let backend = MemoryBackend::from_config(&config);
    let ctx = StoreContext::new(Arc::new(backend.clone()), config).context("create store context")?;
    info!(
        "Bench: {} stores x {} bytes in {} files, chunk {} bytes, io concurrency {}",
        args.stores,
        args.item_bytes,
        args.files,
        args.chunk_bytes,
        ctx.limiter().width()
    );

    // ── Stores ────────────────────────────────────────────────────────────────
    let mut stores = Vec::with_capacity(args.stores);
    for _ in 0..args.stores {
        let options = StoreOptions::new(StoreId::random(), split(args.item_bytes, args.files))
            .with_length(args.item_bytes);
        let store = ctx
            .create_store(args.chunk_bytes, options)
            .context("create store")?;
        stores.push(store);
    }
    let started = Instant::now();
    try_join_all(stores.iter().map(|store| store.ready()))
        .await
        .context("allocate stores")?;
    info!("Allocated {} bytes in {:?}", ctx.size(), started.elapsed());

    // ── Write ─────────────────────────────────────────────────────────────────
    let started = Instant::now();
    let writers: Vec<_> = stores
        .iter()
        .cloned()
        .map(|store| tokio::spawn(write_item(store)))
        .collect();
    let mut checksums = Vec::with_capacity(stores.len());
    for writer in writers {
        checksums.push(writer.await.context("writer task")??);
    }
    let write_time = started.elapsed();

    // ── Read and verify ───────────────────────────────────────────────────────
    let started = Instant::now();
    let readers: Vec<_> = stores
        .iter()
        .cloned()
        .map(|store| tokio::spawn(read_item(store)))
        .collect();
    for (reader, (store, expected)) in readers.into_iter().zip(stores.iter().zip(&checksums)) {
        let actual = reader.await.context("reader task")??;
        if actual != *expected {
            bail!(
                "checksum mismatch on store {}: wrote {:08x}, read {:08x}",
                store.identifier(),
                expected,
                actual
            );
        }
    }
    let read_time = started.elapsed();

    // ── Teardown ──────────────────────────────────────────────────────────────
    try_join_all(stores.iter().map(|store| store.destroy()))
        .await
        .context("destroy stores")?;
    ensure!(ctx.size() == 0, "capacity counter is {} after teardown", ctx.size());
    ensure!(ctx.registry().is_empty(), "stores left in the registry");
    ensure!(backend.file_names().is_empty(), "files left on the backend");

    // ── Report ────────────────────────────────────────────────────────────────
    let total = args.item_bytes * args.stores as u64;
    let io = backend.stats();
    println!("FileChunk Bench");
    println!("===============");
    println!("Data:       {} bytes", total);
    println!("Write:      {:?} ({:.1} MiB/s)", write_time, throughput(total, write_time));
    println!("Read:       {:?} ({:.1} MiB/s)", read_time, throughput(total, read_time));
    println!("Opens:      {}", io.opens);
    println!("Writes:     {}", io.writes);
    println!("Reads:      {}", io.reads);
    println!("Max open:   {}", io.max_open_handles);
    println!("Verified:   {} stores", checksums.len());

    Ok(())
}

/// Split `total` bytes into `count` files of random lengths
fn split(total: u64, count: usize) -> Vec<FileSpec> {
    let mut rng = rand::thread_rng();
    let mut cuts: Vec<u64> = (1..count).map(|_| rng.gen_range(0..=total)).collect();
    cuts.push(0);
    cuts.push(total);
    cuts.sort_unstable();

    cuts.windows(2)
        .enumerate()
        .map(|(i, w)| FileSpec::new(format!("item/part{i:04}.bin"), w[1] - w[0]))
        .collect()
}

/// Fill every chunk with random data; returns the item checksum
async fn write_item(store: ChunkStore) -> Result<u32> {
    let mut data = vec![0u8; usize::try_from(store.length())?];
    rand::thread_rng().fill_bytes(&mut data);
    let data = Bytes::from(data);
    let checksum = crc32c::crc32c(&data);

    let chunk_length = store.chunk_length();
    let puts = (0..store.chunk_count()).map(|index| {
        let start = (index * chunk_length) as usize;
        let end = (start + store.chunk_len(index) as usize).min(data.len());
        store.put(index, data.slice(start..end))
    });
    try_join_all(puts)
        .await
        .with_context(|| format!("write store {}", store.identifier()))?;

    debug!("Wrote store {} ({:08x})", store.identifier(), checksum);
    Ok(checksum)
}

/// Read every chunk back in order; returns the item checksum
async fn read_item(store: ChunkStore) -> Result<u32> {
    let gets = (0..store.chunk_count()).map(|index| store.get(index, GetRange::full()));
    let chunks = try_join_all(gets)
        .await
        .with_context(|| format!("read store {}", store.identifier()))?;

    Ok(chunks
        .iter()
        .fold(0, |crc, chunk| crc32c::crc32c_append(crc, chunk)))
}

fn throughput(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    bytes as f64 / secs / (1024.0 * 1024.0)
}
