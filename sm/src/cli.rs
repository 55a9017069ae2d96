//! CLI argument parsing for catalogsearch

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sm")]
#[command(author, version, about = "Newest-first paginated catalog search", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Store directory (overrides config)
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,

    /// Segment file prefix (overrides config)
    #[arg(short, long, global = true)]
    pub prefix: Option<String>,

    /// Matches per page (overrides config)
    #[arg(long = "page-size", global = true)]
    pub page_size: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search item names, newest first
    Search {
        /// Case-insensitive substring to look for
        #[arg(required = true)]
        query: String,

        /// Number of pages to fetch
        #[arg(short = 'n', long, default_value = "1")]
        pages: usize,

        /// Emit one JSON object per match
        #[arg(long)]
        json: bool,
    },

    /// Interactive search: a line sets the query, `more` fetches the next page
    Repl,
}
