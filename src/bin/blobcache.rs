//! blobcache - inspect and exercise an on-disk blob cache from the shell.
//! Usage: cargo run --bin blobcache -- --path /tmp/imgcache put 0x2a photo.jpg

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use blob_cache::{BlobCache, BlobCacheOptions};
use clap::{Parser, Subcommand};
use rand::Rng;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path prefix of the cache files (<path>.idx, <path>.0, <path>.1)
    #[arg(short, long, default_value = "imgcache")]
    path: PathBuf,

    /// JSON file with cache options; the flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hash slots per region (only used when the cache is created or reset)
    #[arg(long)]
    max_entries: Option<u32>,

    /// Data bytes per region (only used when the cache is created or reset)
    #[arg(long)]
    max_bytes: Option<u32>,

    /// Payload schema version; a mismatch empties the cache
    #[arg(long)]
    version_tag: Option<u32>,

    /// Copy hits from the inactive region into the active one
    #[arg(long)]
    promote: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a file (or stdin, with "-") under a key
    Put {
        #[arg(value_parser = parse_key)]
        key: u64,
        input: PathBuf,
    },
    /// Fetch a key, writing the payload to a file or printing a preview
    Get {
        #[arg(value_parser = parse_key)]
        key: u64,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Print header counters as JSON
    Stats,
    /// Empty the cache, keeping its files
    Reset,
    /// Remove the cache files
    Delete,
    /// Insert random payloads, e.g. to watch regions rotate
    Fill {
        count: u64,
        #[arg(default_value_t = 1024)]
        size: usize,
        #[arg(long, default_value_t = 0)]
        first_key: u64,
    },
}

/// Accepts decimal or 0x-prefixed hex.
fn parse_key(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid key {s:?}: {e}"))
}

fn options(args: &Args) -> Result<BlobCacheOptions> {
    let mut options = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => BlobCacheOptions::default(),
    };
    if let Some(n) = args.max_entries {
        options.max_entries = n;
    }
    if let Some(n) = args.max_bytes {
        options.max_bytes = n;
    }
    if let Some(v) = args.version_tag {
        options.version = v;
    }
    options.promote_on_hit |= args.promote;
    Ok(options)
}

fn open(args: &Args, options: &BlobCacheOptions) -> Result<BlobCache> {
    BlobCache::open_with(&args.path, options)
        .with_context(|| format!("opening cache at {}", args.path.display()))
}

fn close(cache: BlobCache) {
    if let Err(e) = cache.close() {
        warn!("cache closed without a full sync: {}", e);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let options = options(&args)?;

    match &args.command {
        Command::Put { key, input } => {
            let data = if input.as_os_str() == "-" {
                let mut data = Vec::new();
                std::io::stdin().read_to_end(&mut data)?;
                data
            } else {
                fs::read(input).with_context(|| format!("reading {}", input.display()))?
            };
            let mut cache = open(&args, &options)?;
            cache.insert(*key, &data)?;
            info!("Stored {} bytes under {:#x}", data.len(), key);
            close(cache);
        }
        Command::Get { key, out } => {
            let mut cache = open(&args, &options)?;
            let Some(data) = cache.lookup(*key)? else {
                close(cache);
                bail!("key {:#x} not found", key);
            };
            close(cache);
            match out {
                Some(path) => {
                    fs::File::create(path)?.write_all(&data)?;
                    info!("Wrote {} bytes to {}", data.len(), path.display());
                }
                None => {
                    println!("[{:#x}] {} bytes", key, data.len());
                    let peek_len = data.len().min(32);
                    println!("  Peek: {}", hex::encode(&data[..peek_len]));
                }
            }
        }
        Command::Stats => {
            let mut cache = open(&args, &options)?;
            let stats = cache.stats();
            let valid = cache.active_count()?;
            let mut report = serde_json::to_value(&stats)?;
            report["active_valid"] = serde_json::json!(valid);
            println!("{}", serde_json::to_string_pretty(&report)?);
            close(cache);
        }
        Command::Reset => {
            let options = options.clone().reset(true);
            close(open(&args, &options)?);
            info!("Cache at {} reset", args.path.display());
        }
        Command::Delete => {
            BlobCache::delete_files(&args.path);
            info!("Cache files under {} deleted", args.path.display());
        }
        Command::Fill { count, size, first_key } => {
            let mut cache = open(&args, &options)?;
            let mut rng = rand::thread_rng();
            let mut payload = vec![0u8; *size];
            let mut rotations = 0u64;
            let start = Instant::now();
            for key in *first_key..first_key.saturating_add(*count) {
                rng.fill(&mut payload[..]);
                let before = cache.active_region();
                cache.insert(key, &payload)?;
                if cache.active_region() != before {
                    rotations += 1;
                }
            }
            let elapsed = start.elapsed();
            info!(
                "Inserted {} x {} bytes in {:.2?} ({} rotations)",
                count, size, elapsed, rotations
            );
            println!("{}", serde_json::to_string_pretty(&cache.stats())?);
            close(cache);
        }
    }

    Ok(())
}
