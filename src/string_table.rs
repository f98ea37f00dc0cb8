//! Document string table of null-terminated entries keyed by byte offset.
//!
//! Body tokens may reference any offset in the table, including offsets that
//! land in the middle of an entry.

use crate::{Result, WbxmlError, charset};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Entry {
    start: u32,
    /// Entry length in bytes including the stripped null terminator.
    len: u32,
    text: String,
}

/// Immutable offset-indexed view of the header string table.
#[derive(Debug, Clone, Default)]
pub struct StringTable {
    raw: Vec<u8>,
    mib: u32,
    entries: Vec<Entry>,
    by_offset: HashMap<u32, usize>,
}

impl StringTable {
    /// Index a byte run of null-terminated entries.
    ///
    /// `base` is the buffer position of the first table byte, used for error
    /// context only. A trailing entry without a terminator is a parse error.
    pub fn build(bytes: &[u8], mib: u32, base: usize) -> Result<Self> {
        let mut table = Self {
            raw: bytes.to_vec(),
            mib,
            ..Self::default()
        };
        let mut start = 0usize;

        while start < bytes.len() {
            let rel_end = bytes[start..]
                .iter()
                .position(|&b| b == 0x00)
                .ok_or_else(|| {
                    WbxmlError::parse("unterminated string table entry", base + start)
                })?;
            let end = start + rel_end;
            let text = charset::decode(mib, &bytes[start..end], base + start)?;
            table.by_offset.insert(start as u32, table.entries.len());
            table.entries.push(Entry {
                start: start as u32,
                len: (rel_end + 1) as u32,
                text,
            });
            start = end + 1;
        }

        Ok(table)
    }

    /// Resolve a table reference.
    ///
    /// An offset at an entry boundary returns the stored string; an offset
    /// inside an entry decodes the suffix of that entry starting there. Any
    /// offset past the table is a parse error.
    pub fn get(&self, offset: u32) -> Result<String> {
        if let Some(&index) = self.by_offset.get(&offset) {
            return Ok(self.entries[index].text.clone());
        }

        for entry in &self.entries {
            if offset >= entry.start && offset < entry.start + entry.len {
                // Suffix span excludes the stripped terminator.
                let end = (entry.start + entry.len - 1) as usize;
                return charset::decode(self.mib, &self.raw[offset as usize..end], offset as usize);
            }
        }

        Err(WbxmlError::parse(
            format!(
                "string table offset {offset} out of range (table is {} bytes)",
                self.raw.len()
            ),
            offset as usize,
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn byte_len(&self) -> u32 {
        self.raw.len() as u32
    }
}
