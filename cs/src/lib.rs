//! ChunkStore - append-only segmented storage for catalog items
//!
//! Records are framed with a 4-byte little-endian length prefix and laid
//! back-to-back in a sequence of size-capped segment files. The in-memory
//! index is rebuilt by a linear scan on open; there is no index file.
//!
//! # Architecture
//!
//! ```text
//! {store_path}/
//! ├── catalog000      # [len: u32 LE][payload]... up to ~20 MiB
//! ├── catalog001
//! └── ...
//! ```
//!
//! Each payload is a [`CatalogItem`] encoded as
//! `u8 nameLen | name | u16 descLen | desc | u16 refLen | ref`.
//!
//! # Example
//!
//! ```ignore
//! use chunkstore::{CatalogItem, ChunkStore};
//!
//! let store = ChunkStore::open("/var/lib/catalog", "catalog")?;
//! let item = CatalogItem::new("Big Buck Bunny", "open movie", "magnet:?xt=...");
//! let id = store.append_chunk(&item.encode()?)?;
//! let back = CatalogItem::decode(&store.read_chunk(id)?)?;
//! ```

pub mod cli;
pub mod config;
mod error;
pub mod item;
mod segment;
mod store;

pub use error::{CodecError, StoreError};
pub use item::{CatalogItem, decode_item, encode_item};
pub use segment::{ChunkLocation, segment_path};
pub use store::{ChunkId, ChunkStore, StoreOptions, StoreStats};

/// Segment size cap (20 MiB); a tail larger than this rolls over on the next append
pub const DEFAULT_SEGMENT_MAX_BYTES: u64 = 20 * 1024 * 1024;

/// Default segment file prefix
pub const DEFAULT_FILE_PREFIX: &str = "catalog";

/// Size of the per-chunk length prefix
pub const FRAME_HEADER_LEN: u64 = 4;
