//! Catalog item codec
//!
//! Payload layout (all lengths little-endian):
//!
//! ```text
//! [name_len: u8][name][desc_len: u16][description][ref_len: u16][reference]
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CodecError;

/// Maximum encoded name length
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Maximum encoded description length
pub const MAX_DESCRIPTION_LEN: usize = u16::MAX as usize;

/// Maximum encoded reference length
pub const MAX_REFERENCE_LEN: usize = u16::MAX as usize;

/// A decoded catalog record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Display name, the field searches match against
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Opaque content-fetch identifier (e.g. a magnet URI)
    pub reference: String,
}

impl CatalogItem {
    pub fn new(name: impl Into<String>, description: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            reference: reference.into(),
        }
    }

    /// Encode into the chunk payload layout
    ///
    /// Fields over their length limit are rejected, never truncated.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_item(&self.name, &self.description, &self.reference)
    }

    /// Decode a chunk payload
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        decode_item(buf)
    }

    /// Case-insensitive substring match of `query` against the name
    pub fn matches(&self, query: &str) -> bool {
        self.name.to_lowercase().contains(&query.to_lowercase())
    }
}

/// Encode the three fields into a payload buffer
pub fn encode_item(name: &str, description: &str, reference: &str) -> Result<Vec<u8>, CodecError> {
    check_len("name", name, MAX_NAME_LEN)?;
    check_len("description", description, MAX_DESCRIPTION_LEN)?;
    check_len("reference", reference, MAX_REFERENCE_LEN)?;

    let mut buf = Vec::with_capacity(1 + name.len() + 2 + description.len() + 2 + reference.len());
    buf.push(name.len() as u8);
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&(description.len() as u16).to_le_bytes());
    buf.extend_from_slice(description.as_bytes());
    buf.extend_from_slice(&(reference.len() as u16).to_le_bytes());
    buf.extend_from_slice(reference.as_bytes());
    Ok(buf)
}

/// Decode a payload buffer into a [`CatalogItem`]
///
/// Fails with [`CodecError::Truncated`] as soon as a length prefix or its
/// declared bytes would run past the end of `buf`. Bytes after the
/// reference are ignored.
pub fn decode_item(buf: &[u8]) -> Result<CatalogItem, CodecError> {
    let mut reader = FieldReader { buf, pos: 0 };

    let name_len = reader.take("name length", 1)?[0] as usize;
    let name = reader.take_str("name", name_len)?;

    let desc_len = reader.take_u16("description length")? as usize;
    let description = reader.take_str("description", desc_len)?;

    let ref_len = reader.take_u16("reference length")? as usize;
    let reference = reader.take_str("reference", ref_len)?;

    if reader.pos < buf.len() {
        debug!(trailing = buf.len() - reader.pos, "decode_item: ignoring trailing bytes");
    }

    Ok(CatalogItem {
        name,
        description,
        reference,
    })
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), CodecError> {
    if value.len() > max {
        return Err(CodecError::FieldTooLong {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn take(&mut self, field: &'static str, n: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.buf.len() - self.pos;
        if n > remaining {
            return Err(CodecError::Truncated {
                field,
                needed: n,
                remaining,
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_u16(&mut self, field: &'static str) -> Result<u16, CodecError> {
        let bytes = self.take(field, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn take_str(&mut self, field: &'static str, n: usize) -> Result<String, CodecError> {
        // Invalid UTF-8 (e.g. Latin-1 names) decodes lossily
        let bytes = self.take(field, n)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}
