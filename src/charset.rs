//! Character set handling for document headers and string payloads.
//!
//! WBXML identifies its charset by IANA MIB enum number in the document
//! header. Only the charsets named by the format are listed; of those,
//! US-ASCII, UTF-8 and ISO-8859-1 can actually be decoded and encoded.

use crate::{Result, WbxmlError};

pub const US_ASCII: u32 = 3;
pub const ISO_8859_1: u32 = 4;
pub const ISO_8859_2: u32 = 5;
pub const ISO_8859_3: u32 = 6;
pub const ISO_8859_4: u32 = 7;
pub const ISO_8859_5: u32 = 8;
pub const ISO_8859_6: u32 = 9;
pub const ISO_8859_7: u32 = 10;
pub const ISO_8859_8: u32 = 11;
pub const ISO_8859_9: u32 = 12;
pub const ISO_8859_10: u32 = 13;
pub const UTF_8: u32 = 106;

/// Canonical IANA name for a MIB enum value, if it is one this format uses.
pub fn name(mib: u32) -> Option<&'static str> {
    match mib {
        US_ASCII => Some("US-ASCII"),
        ISO_8859_1 => Some("ISO-8859-1"),
        ISO_8859_2 => Some("ISO-8859-2"),
        ISO_8859_3 => Some("ISO-8859-3"),
        ISO_8859_4 => Some("ISO-8859-4"),
        ISO_8859_5 => Some("ISO-8859-5"),
        ISO_8859_6 => Some("ISO-8859-6"),
        ISO_8859_7 => Some("ISO-8859-7"),
        ISO_8859_8 => Some("ISO-8859-8"),
        ISO_8859_9 => Some("ISO-8859-9"),
        ISO_8859_10 => Some("ISO-8859-10"),
        UTF_8 => Some("UTF-8"),
        _ => None,
    }
}

/// Decode raw string bytes per the document charset.
///
/// `offset` is the buffer position of the first byte, used for error context.
pub fn decode(mib: u32, bytes: &[u8], offset: usize) -> Result<String> {
    match mib {
        UTF_8 => String::from_utf8(bytes.to_vec())
            .map_err(|_| WbxmlError::parse("invalid UTF-8 in string", offset)),
        US_ASCII => {
            if bytes.iter().any(|&b| b >= 0x80) {
                return Err(WbxmlError::parse("non-ASCII byte in US-ASCII string", offset));
            }
            Ok(bytes.iter().map(|&b| b as char).collect())
        }
        // Latin-1 maps bytes to the first 256 codepoints directly
        ISO_8859_1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        mib => match name(mib) {
            Some(name) => Err(WbxmlError::parse(
                format!("charset {name} is not supported for decoding"),
                offset,
            )),
            None => Err(WbxmlError::parse(format!("unknown charset MIB {mib}"), offset)),
        },
    }
}

/// Encode a string per the document charset. Writer-side: failures are usage
/// errors, not data errors.
pub fn encode(mib: u32, text: &str) -> Result<Vec<u8>> {
    match mib {
        UTF_8 => Ok(text.as_bytes().to_vec()),
        US_ASCII => {
            if !text.is_ascii() {
                return Err(WbxmlError::writer(format!(
                    "string {text:?} is not representable in US-ASCII"
                )));
            }
            Ok(text.as_bytes().to_vec())
        }
        ISO_8859_1 => text
            .chars()
            .map(|c| {
                u8::try_from(c as u32).map_err(|_| {
                    WbxmlError::writer(format!("character {c:?} is not representable in ISO-8859-1"))
                })
            })
            .collect(),
        mib => Err(WbxmlError::writer(format!(
            "charset MIB {mib} is not supported for encoding"
        ))),
    }
}
