//! CatalogSearch - newest-first paginated search over a chunk store
//!
//! A [`SearchManager`] holds the active query and a cursor counting down from
//! the newest chunk. Each pass scans backward, decodes items, keeps those
//! whose name contains the query (case-insensitive) and hands them to a
//! [`Materializer`] until a page is full or the store is exhausted.
//!
//! # Flow
//!
//! ```text
//! ChunkStore -> CatalogItem::decode -> SearchManager -> Materializer -> ResultSink
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use catalogsearch::{ResultSink, SearchManager, SinkMaterializer};
//!
//! let sink = ResultSink::new(5);
//! let manager = SearchManager::new(store, Arc::new(SinkMaterializer::new(sink.clone())), 5);
//! if let Some(scan) = manager.set_query("bunny") {
//!     scan.wait().await?;
//! }
//! for item in sink.take() {
//!     println!("{}", item.name);
//! }
//! ```

pub mod cli;
pub mod config;
mod error;
mod manager;
pub mod materializer;

pub use error::SearchError;
pub use manager::{ScanHandle, ScanOutcome, SearchManager, SearchStatus};
pub use materializer::{
    ChannelMaterializer, FetchEvent, Materializer, ResultSink, SinkMaterializer, SinkPush,
};

/// Matches delivered per page
pub const DEFAULT_PAGE_SIZE: usize = 5;
