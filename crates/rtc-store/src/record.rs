//! Non-critical Record Framing
//!
//! Every non-critical record is an 8-byte little-endian header `{ tag, len }`
//! followed by exactly `len` payload bytes. Tags are small integers interned
//! by a [`TagRegistry`]; zero is never issued, so zeroed memory does not parse
//! as a record.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

/// Size of a record header in bytes
pub const HEADER_LEN: usize = 8;

/// Interned record tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagId(NonZeroU32);

impl TagId {
    pub fn get(self) -> u32 {
        self.0.get()
    }

    fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(TagId)
    }
}

/// Maps tag ids to static descriptions.
///
/// Ids follow registration order, so registering the same descriptions in the
/// same order at every boot keeps records written before a warm reset readable.
#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    descriptions: Vec<&'static str>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `description`, returning the existing id if already registered
    pub fn register(&mut self, description: &'static str) -> TagId {
        let index = match self.descriptions.iter().position(|d| *d == description) {
            Some(index) => index,
            None => {
                self.descriptions.push(description);
                self.descriptions.len() - 1
            }
        };
        TagId(NonZeroU32::MIN.saturating_add(index as u32))
    }

    pub fn describe(&self, tag: TagId) -> Option<&'static str> {
        self.descriptions.get(tag.get() as usize - 1).copied()
    }

    pub fn contains(&self, tag: TagId) -> bool {
        self.describe(tag).is_some()
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }
}

/// Header preceding every non-critical payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Raw tag value, zero when the memory was never written
    pub tag: u32,
    /// Payload length in bytes
    pub len: u32,
}

impl RecordHeader {
    pub fn new(tag: TagId, len: u32) -> Self {
        Self { tag: tag.get(), len }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..4].copy_from_slice(&self.tag.to_le_bytes());
        bytes[4..].copy_from_slice(&self.len.to_le_bytes());
        bytes
    }

    /// Decode the header at the start of `bytes`, if long enough
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let tag = u32::from_le_bytes(bytes.get(..4)?.try_into().ok()?);
        let len = u32::from_le_bytes(bytes.get(4..HEADER_LEN)?.try_into().ok()?);
        Some(Self { tag, len })
    }

    pub fn tag_id(&self) -> Option<TagId> {
        TagId::from_raw(self.tag)
    }

    /// Header plus payload
    pub fn framed_len(&self) -> usize {
        HEADER_LEN.saturating_add(self.len as usize)
    }
}

/// One decoded non-critical record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'w> {
    pub tag: TagId,
    pub description: &'static str,
    pub payload: &'w [u8],
}

/// Iterator over the records of a read window.
///
/// Stops at the first header with an unknown or zero tag, a zero length, or
/// a payload running past the window.
#[derive(Debug, Clone)]
pub struct Records<'w, 't> {
    window: &'w [u8],
    offset: usize,
    tags: &'t TagRegistry,
}

impl<'w, 't> Records<'w, 't> {
    pub fn new(window: &'w [u8], tags: &'t TagRegistry) -> Self {
        Self {
            window,
            offset: 0,
            tags,
        }
    }

    /// Bytes covered by the records yielded so far
    pub fn consumed(&self) -> usize {
        self.offset
    }
}

impl<'w> Iterator for Records<'w, '_> {
    type Item = Record<'w>;

    fn next(&mut self) -> Option<Record<'w>> {
        let rest = &self.window[self.offset..];
        let header = RecordHeader::decode(rest)?;
        let tag = header.tag_id()?;
        let description = self.tags.describe(tag)?;
        if header.len == 0 {
            return None;
        }
        let payload = rest.get(HEADER_LEN..header.framed_len())?;
        self.offset += header.framed_len();
        Some(Record {
            tag,
            description,
            payload,
        })
    }
}
