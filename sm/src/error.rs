//! Search error types

use chunkstore::StoreError;
use thiserror::Error;

/// Errors that end a scan pass
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scan worker failed: {0}")]
    Worker(String),
}
