//! CatalogSearch - newest-first paginated catalog search
//!
//! CLI entry point for one-shot searches and the interactive prompt.

use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{debug, info};

use catalogsearch::cli::{Cli, Command};
use catalogsearch::config::Config;
use catalogsearch::{ResultSink, ScanHandle, ScanOutcome, SearchManager, SinkMaterializer};
use chunkstore::{CatalogItem, ChunkStore};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    Ok(())
}

fn open_manager(cli: &Cli, config: &Config) -> Result<(SearchManager, ResultSink)> {
    let dir = cli.dir.clone().unwrap_or_else(|| config.store.store_path.clone());
    let prefix = cli.prefix.as_deref().unwrap_or(&config.store.file_prefix);
    let store = ChunkStore::open_with(&dir, prefix, config.store.store_options())
        .context(format!("Failed to open store at {}", dir.display()))?;

    let page_size = cli.page_size.unwrap_or(config.search.page_size).max(1);
    let sink = ResultSink::new(page_size);
    let manager = SearchManager::new(
        Arc::new(store),
        Arc::new(SinkMaterializer::new(sink.clone())),
        page_size,
    );
    Ok((manager, sink))
}

/// Wait for a pass and print the page it produced
async fn show_page(scan: ScanHandle, sink: &ResultSink, page: usize, json: bool) -> Result<ScanOutcome> {
    let outcome = scan.wait().await.context("Search pass failed")?;
    let items = sink.take();
    if json {
        for item in &items {
            println!("{}", serde_json::to_string(item)?);
        }
    } else {
        print_items(&items, page, sink.capacity());
        if outcome.exhausted {
            println!("{}", "(end of results)".dimmed());
        }
    }
    Ok(outcome)
}

fn print_items(items: &[CatalogItem], page: usize, page_size: usize) {
    for (i, item) in items.iter().enumerate() {
        let rank = page * page_size + i + 1;
        println!("{}. {}", rank.to_string().yellow(), item.name.bold());
        if !item.description.is_empty() {
            println!("   {}", item.description);
        }
        println!("   {}", item.reference.dimmed());
    }
}

async fn cmd_search(manager: &SearchManager, sink: &ResultSink, query: &str, pages: usize, json: bool) -> Result<()> {
    debug!(%query, pages, json, "cmd_search: called");
    let Some(scan) = manager.set_query(query) else {
        eyre::bail!("Query must not be empty");
    };

    let mut delivered = show_page(scan, sink, 0, json).await?.delivered;
    for page in 1..pages.max(1) {
        let Some(scan) = manager.fetch_more() else {
            break;
        };
        delivered += show_page(scan, sink, page, json).await?.delivered;
    }

    if delivered == 0 && !json {
        println!("No matches for {}", query.cyan());
    }
    Ok(())
}

fn print_status(manager: &SearchManager) {
    let status = manager.status();
    println!(
        "query: {}  cursor: {}  generation: {}  chunks: {}  exhausted: {}",
        status.query.as_deref().unwrap_or("-").cyan(),
        status.cursor,
        status.generation,
        status.chunk_count,
        status.exhausted
    );
}

async fn cmd_repl(manager: &SearchManager, sink: &ResultSink) -> Result<()> {
    debug!("cmd_repl: called");
    println!();
    println!("{}", "CatalogSearch".bright_cyan().bold());
    println!(
        "Type a query to search, {} for the next page, {} or {} to leave",
        "more".yellow(),
        "status".yellow(),
        "quit".yellow()
    );
    println!();

    let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;
    let mut page = 0usize;

    loop {
        match rl.readline(&format!("{} ", ">".bright_green())) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);

                match input {
                    "quit" | "exit" => break,
                    "status" => print_status(manager),
                    "more" => match manager.fetch_more() {
                        Some(scan) => {
                            page += 1;
                            show_page(scan, sink, page, false).await?;
                        }
                        None if manager.query().is_none() => println!("{}", "No query yet".dimmed()),
                        None => println!("{}", "(end of results)".dimmed()),
                    },
                    query => {
                        page = 0;
                        if let Some(scan) = manager.set_query(query) {
                            let outcome = show_page(scan, sink, page, false).await?;
                            if outcome.delivered == 0 && outcome.exhausted {
                                println!("No matches for {}", query.cyan());
                            }
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(err) => {
                return Err(eyre::eyre!("Readline error: {}", err));
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let (manager, sink) = open_manager(&cli, &config)?;
    info!(chunks = manager.store().chunk_count(), page_size = manager.page_size(), "catalogsearch ready");

    match &cli.command {
        Command::Search { query, pages, json } => cmd_search(&manager, &sink, query, *pages, *json).await,
        Command::Repl => cmd_repl(&manager, &sink).await,
    }
}
