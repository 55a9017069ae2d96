use std::fs;
use std::io::{BufRead, BufReader};

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{info, warn};

use chunkstore::cli::{Cli, Command};
use chunkstore::config::Config;
use chunkstore::{CatalogItem, ChunkStore};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    Ok(())
}

fn open_store(cli: &Cli, config: &Config) -> Result<ChunkStore> {
    let dir = cli.dir.clone().unwrap_or_else(|| config.store_path.clone());
    let prefix = cli.prefix.as_deref().unwrap_or(&config.file_prefix);
    ChunkStore::open_with(&dir, prefix, config.store_options())
        .context(format!("Failed to open store at {}", dir.display()))
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("chunkstore starting");

    let store = open_store(&cli, &config)?;

    match cli.command {
        Command::Append {
            name,
            description,
            reference,
        } => {
            let item = CatalogItem::new(name, description, reference);
            let id = store.append_chunk(&item.encode()?)?;
            println!("{} Appended chunk {}", "✓".green(), id.to_string().cyan());
        }
        Command::Ingest { file } => {
            let reader = BufReader::new(
                fs::File::open(&file).context(format!("Failed to open {}", file.display()))?,
            );
            let mut appended = 0usize;
            let mut skipped = 0usize;
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let item: CatalogItem = match serde_json::from_str(&line) {
                    Ok(item) => item,
                    Err(e) => {
                        warn!("Skipping line {}: {}", line_no + 1, e);
                        skipped += 1;
                        continue;
                    }
                };
                let payload = match item.encode() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Skipping line {}: {}", line_no + 1, e);
                        skipped += 1;
                        continue;
                    }
                };
                store.append_chunk(&payload)?;
                appended += 1;
            }
            println!(
                "{} Ingested {} items ({} skipped), store now holds {}",
                "✓".green(),
                appended,
                skipped,
                store.chunk_count()
            );
        }
        Command::Cat { id, raw } => {
            let payload = store.read_chunk(id)?;
            if raw {
                let hex: String = payload.iter().map(|b| format!("{:02x}", b)).collect();
                println!("{} bytes: {}", payload.len(), hex);
            } else {
                let item = CatalogItem::decode(&payload).context(format!("Chunk {} is not a catalog item", id))?;
                println!("{}", item.name.bold());
                println!("  {}", item.description);
                println!("  {}", item.reference.dimmed());
            }
        }
        Command::Stats => {
            let stats = store.stats()?;
            println!("Store: {}", store.dir().display().to_string().cyan());
            println!("  Prefix: {}", store.prefix());
            println!("  Chunks: {}", stats.chunk_count);
            println!("  Segments: {}", stats.segment_count);
            println!("  Payload bytes: {}", stats.payload_bytes);
            println!("  Disk bytes: {}", stats.disk_bytes);
        }
        Command::Recent { count } => {
            let total = store.chunk_count() as u64;
            if total == 0 {
                println!("Store is empty");
            }
            for id in (0..total).rev().take(count) {
                match CatalogItem::decode(&store.read_chunk(id)?) {
                    Ok(item) => println!("{} {}", id.to_string().yellow(), item.name),
                    Err(e) => println!("{} {}", id.to_string().yellow(), format!("<{}>", e).red()),
                }
            }
        }
    }

    Ok(())
}
