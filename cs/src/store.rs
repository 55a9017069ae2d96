//! Core ChunkStore implementation

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::segment::{ChunkLocation, Segment, segment_path};

/// Dense chunk identifier, assigned in append order starting at 0
pub type ChunkId = u64;

/// Options for opening a store
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// A tail segment larger than this rolls over before the next append
    pub segment_max_bytes: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            segment_max_bytes: crate::DEFAULT_SEGMENT_MAX_BYTES,
        }
    }
}

/// Statistics for a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of indexed chunks
    pub chunk_count: usize,
    /// Number of segment files
    pub segment_count: usize,
    /// Sum of payload lengths
    pub payload_bytes: u64,
    /// Sum of segment file lengths
    pub disk_bytes: u64,
}

/// Writer-side state, guarded by the append lock
#[derive(Debug)]
struct AppendState {
    tail: Arc<Segment>,
    /// Set when the tail ends in a partial frame; the next append cuts it
    tail_valid_len: Option<u64>,
}

/// Append-only store of length-framed chunks across rolling segment files
#[derive(Debug)]
pub struct ChunkStore {
    dir: PathBuf,
    prefix: String,
    options: StoreOptions,
    segments: RwLock<Vec<Arc<Segment>>>,
    index: RwLock<Vec<ChunkLocation>>,
    append: Mutex<AppendState>,
}

impl ChunkStore {
    /// Open or create a store in `dir` with segment files named `{prefix}NNN`
    pub fn open(dir: impl AsRef<Path>, prefix: &str) -> Result<Self, StoreError> {
        Self::open_with(dir, prefix, StoreOptions::default())
    }

    /// Open with explicit options
    ///
    /// Scans every segment once to rebuild the in-memory index. Either the
    /// scan completes or opening fails.
    pub fn open_with(dir: impl AsRef<Path>, prefix: &str, options: StoreOptions) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        debug!(dir = %dir.display(), prefix, "ChunkStore::open_with: called");
        fs::create_dir_all(&dir).map_err(|e| StoreError::io("create dir", &dir, e))?;

        let mut segments = Vec::new();
        let mut index = Vec::new();
        let mut tail_valid_len = None;
        let mut id = 0u32;

        loop {
            let segment = Segment::open(&dir, prefix, id)?;
            let scan = segment.scan()?;
            index.extend(scan.frames.iter().map(|&(offset, len)| ChunkLocation {
                segment: id,
                offset,
                len,
            }));

            let is_last = !segment_path(&dir, prefix, id + 1).exists();
            if scan.has_corrupt_tail() {
                warn!(
                    segment = id,
                    valid_len = scan.valid_len,
                    file_len = scan.file_len,
                    "ChunkStore::open_with: ignoring partial trailing frame"
                );
                if is_last {
                    tail_valid_len = Some(scan.valid_len);
                }
            }
            segments.push(Arc::new(segment));

            if is_last {
                break;
            }
            id += 1;
        }

        info!(
            dir = %dir.display(),
            prefix,
            chunks = index.len(),
            segments = segments.len(),
            "Opened chunk store"
        );

        let tail = segments
            .last()
            .cloned()
            .ok_or_else(|| StoreError::io("open", &dir, std::io::Error::other("no segment opened")))?;

        Ok(Self {
            dir,
            prefix: prefix.to_string(),
            options,
            segments: RwLock::new(segments),
            index: RwLock::new(index),
            append: Mutex::new(AppendState { tail, tail_valid_len }),
        })
    }

    /// Directory holding the segment files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Segment file prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of chunks currently indexed
    pub fn chunk_count(&self) -> usize {
        self.index.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of segment files
    pub fn segment_count(&self) -> usize {
        self.segments.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Append a payload, returning its chunk id
    ///
    /// Rolls over to a new segment first if the tail has grown past the cap.
    /// The index entry is published only after the whole frame is written.
    pub fn append_chunk(&self, payload: &[u8]) -> Result<ChunkId, StoreError> {
        debug!(len = payload.len(), "ChunkStore::append_chunk: called");
        if payload.len() > u32::MAX as usize {
            return Err(StoreError::ChunkTooLarge { len: payload.len() });
        }

        let mut state = self.append.lock().unwrap_or_else(PoisonError::into_inner);

        let mut tail_len = state.tail.len()?;
        if tail_len > self.options.segment_max_bytes {
            let next_id = state.tail.id() + 1;
            let segment = Arc::new(Segment::open(&self.dir, &self.prefix, next_id)?);
            self.segments
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::clone(&segment));
            info!(
                segment = next_id,
                path = %segment.path().display(),
                "Rolled over to new segment"
            );
            state.tail = segment;
            state.tail_valid_len = None;
            tail_len = 0;
        }

        // A failed write may leave a partial frame; the next append cuts back to here
        let start = state.tail_valid_len.unwrap_or(tail_len);
        let offset = match state.tail.append_frame(payload, state.tail_valid_len) {
            Ok(offset) => offset,
            Err(e) => {
                state.tail_valid_len = Some(start);
                return Err(e);
            }
        };
        state.tail_valid_len = None;
        let location = ChunkLocation {
            segment: state.tail.id(),
            offset,
            len: payload.len() as u32,
        };

        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let id = index.len() as ChunkId;
        index.push(location);
        debug!(id, segment = location.segment, offset, "ChunkStore::append_chunk: indexed");
        Ok(id)
    }

    /// Where chunk `id` lives on disk
    pub fn location(&self, id: ChunkId) -> Result<ChunkLocation, StoreError> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        usize::try_from(id)
            .ok()
            .and_then(|i| index.get(i).copied())
            .ok_or(StoreError::NotFound { id, count: index.len() })
    }

    /// Read the payload of chunk `id`
    pub fn read_chunk(&self, id: ChunkId) -> Result<Vec<u8>, StoreError> {
        let location = self.location(id)?;
        let segment = self.segment(location.segment)?;
        segment.read_at(location.offset, location.len)
    }

    /// Chunk, segment and byte totals
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let (chunk_count, payload_bytes) = {
            let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
            (index.len(), index.iter().map(|loc| u64::from(loc.len)).sum::<u64>())
        };
        let segments: Vec<Arc<Segment>> = self.segments.read().unwrap_or_else(PoisonError::into_inner).clone();
        let mut disk_bytes = 0;
        for segment in &segments {
            disk_bytes += segment.len()?;
        }
        Ok(StoreStats {
            chunk_count,
            segment_count: segments.len(),
            payload_bytes,
            disk_bytes,
        })
    }

    fn segment(&self, id: u32) -> Result<Arc<Segment>, StoreError> {
        self.segments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id as usize)
            .cloned()
            .ok_or_else(|| {
                StoreError::io(
                    "locate segment",
                    segment_path(&self.dir, &self.prefix, id),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "segment not open"),
                )
            })
    }
}
