//! CLI argument parsing for chunkstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cs")]
#[command(author, version, about = "Append-only catalog chunk store", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Store directory (overrides config)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Segment file prefix (overrides config)
    #[arg(short, long)]
    pub prefix: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Encode one item and append it
    Append {
        /// Item name (at most 255 bytes)
        #[arg(required = true)]
        name: String,

        /// Item description
        #[arg(required = true)]
        description: String,

        /// Opaque content reference
        #[arg(required = true)]
        reference: String,
    },

    /// Append items from a JSONL file ({"name", "description", "reference"} per line)
    Ingest {
        /// JSONL file to read
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Display a chunk
    Cat {
        /// Chunk ID
        #[arg(required = true)]
        id: u64,

        /// Print the payload length and hex instead of decoding
        #[arg(short, long)]
        raw: bool,
    },

    /// Show store statistics
    Stats,

    /// List the newest items
    Recent {
        /// Number of items to list
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },
}
