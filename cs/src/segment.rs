//! Segment files: one physical file holding a contiguous run of frames

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::FRAME_HEADER_LEN;
use crate::error::StoreError;

/// Where a chunk's payload lives on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLocation {
    /// Segment sequence number
    pub segment: u32,
    /// Byte offset of the payload (just past the length prefix)
    pub offset: u64,
    /// Payload length in bytes
    pub len: u32,
}

/// Path of segment `id`: `{dir}/{prefix}{id:03}`
pub fn segment_path(dir: &Path, prefix: &str, id: u32) -> PathBuf {
    dir.join(format!("{}{:03}", prefix, id))
}

/// Result of scanning one segment from offset 0
#[derive(Debug, Default)]
pub(crate) struct SegmentScan {
    /// `(payload_offset, len)` for every complete frame, in file order
    pub frames: Vec<(u64, u32)>,
    /// End of the last complete frame
    pub valid_len: u64,
    /// Physical file length
    pub file_len: u64,
}

impl SegmentScan {
    /// True if the file ends with a partial frame
    pub fn has_corrupt_tail(&self) -> bool {
        self.valid_len < self.file_len
    }
}

/// An open segment file
///
/// The handle's cursor is shared state, so every access goes through the
/// mutex as a whole seek+read or seek+write unit.
#[derive(Debug)]
pub(crate) struct Segment {
    id: u32,
    path: PathBuf,
    file: Mutex<File>,
}

impl Segment {
    /// Open segment `id`, creating the file if it does not exist
    pub fn open(dir: &Path, prefix: &str, id: u32) -> Result<Self, StoreError> {
        let path = segment_path(dir, prefix, id);
        debug!(path = %path.display(), "Segment::open: called");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io("open", &path, e))?;
        Ok(Self {
            id,
            path,
            file: Mutex::new(file),
        })
    }

    /// Open an existing segment without write access
    #[cfg(test)]
    pub(crate) fn open_read_only(dir: &Path, prefix: &str, id: u32) -> Result<Self, StoreError> {
        let path = segment_path(dir, prefix, id);
        let file = File::open(&path).map_err(|e| StoreError::io("open", &path, e))?;
        Ok(Self {
            id,
            path,
            file: Mutex::new(file),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current physical length of the file
    pub fn len(&self) -> Result<u64, StoreError> {
        let file = self.lock();
        file.metadata()
            .map(|m| m.len())
            .map_err(|e| StoreError::io("stat", &self.path, e))
    }

    /// Walk the frames from offset 0
    ///
    /// A trailing length prefix that is incomplete, or that claims more bytes
    /// than remain, ends the scan without error.
    pub fn scan(&self) -> Result<SegmentScan, StoreError> {
        let mut file = self.lock();
        let file_len = file
            .metadata()
            .map_err(|e| StoreError::io("stat", &self.path, e))?
            .len();

        let mut scan = SegmentScan {
            file_len,
            ..Default::default()
        };
        let mut pos = 0u64;
        let mut header = [0u8; FRAME_HEADER_LEN as usize];

        while pos < file_len {
            if pos + FRAME_HEADER_LEN > file_len {
                warn!(
                    path = %self.path.display(),
                    offset = pos,
                    remaining = file_len - pos,
                    "Segment::scan: partial length prefix at end of file"
                );
                break;
            }
            file.seek(SeekFrom::Start(pos))
                .map_err(|e| StoreError::io("seek", &self.path, e))?;
            file.read_exact(&mut header)
                .map_err(|e| StoreError::io("read", &self.path, e))?;

            let len = u32::from_le_bytes(header);
            let payload_offset = pos + FRAME_HEADER_LEN;
            if payload_offset + u64::from(len) > file_len {
                warn!(
                    path = %self.path.display(),
                    offset = pos,
                    claimed = len,
                    remaining = file_len - payload_offset,
                    "Segment::scan: length prefix runs past end of file"
                );
                break;
            }

            scan.frames.push((payload_offset, len));
            pos = payload_offset + u64::from(len);
        }

        scan.valid_len = pos.min(file_len);
        debug!(
            path = %self.path.display(),
            frames = scan.frames.len(),
            valid_len = scan.valid_len,
            file_len,
            "Segment::scan: complete"
        );
        Ok(scan)
    }

    /// Read exactly `len` bytes at `offset`
    pub fn read_at(&self, offset: u64, len: u32) -> Result<Vec<u8>, StoreError> {
        let mut file = self.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| StoreError::io("seek", &self.path, e))?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf)
            .map_err(|e| StoreError::io("read", &self.path, e))?;
        Ok(buf)
    }

    /// Append one frame at the end of the file, returning the payload offset
    ///
    /// With `truncate_to` set, bytes past that length are cut first so the
    /// new frame directly follows the last complete one.
    pub fn append_frame(&self, payload: &[u8], truncate_to: Option<u64>) -> Result<u64, StoreError> {
        let mut file = self.lock();
        let end = file
            .seek(SeekFrom::End(0))
            .map_err(|e| StoreError::io("seek", &self.path, e))?;

        let start = match truncate_to {
            Some(valid_len) if valid_len < end => {
                warn!(
                    path = %self.path.display(),
                    dropped = end - valid_len,
                    "Segment::append_frame: truncating partial frame before append"
                );
                file.set_len(valid_len)
                    .map_err(|e| StoreError::io("truncate", &self.path, e))?;
                file.seek(SeekFrom::Start(valid_len))
                    .map_err(|e| StoreError::io("seek", &self.path, e))?
            }
            _ => end,
        };

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN as usize + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        let written = match file.write_all(&frame) {
            Ok(()) => file.flush(),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(cut) = file.set_len(start) {
                warn!(
                    path = %self.path.display(),
                    offset = start,
                    error = %cut,
                    "Segment::append_frame: could not cut partial frame after failed write"
                );
            }
            return Err(StoreError::io("write", &self.path, e));
        }

        Ok(start + FRAME_HEADER_LEN)
    }
}
