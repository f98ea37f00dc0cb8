//! A codec for WBXML (WAP Binary XML), the compact tokenized encoding of
//! XML-like documents used by ActiveSync-style sync protocols.
//!
//! The crate has three collaborating pieces: a [`Reader`] that decodes a
//! complete in-memory buffer into a lazy sequence of structural [`Node`]s, a
//! [`Writer`] that builds a buffer through a fluent tag/attribute/text API,
//! and an [`EventParser`] that layers path-based subscriptions on top of a
//! Reader. Tag and attribute codes are resolved through an immutable
//! [`CodepageTable`] compiled once from a caller-supplied description.
//!
//! # Examples
//!
//! ```
//! use wbxml::{CodepageDef, CodepageTable, Reader, Writer, charset};
//!
//! let pages = CodepageTable::compile(&[CodepageDef {
//!     namespace: "AirSync".into(),
//!     tags: vec![("Sync".into(), 0x0005)],
//!     attrs: vec![],
//! }]).unwrap();
//!
//! let mut writer = Writer::new("1.3", 0x01, charset::UTF_8, &[]).unwrap();
//! writer.stag(0x0005).unwrap()
//!       .text("hello").unwrap()
//!       .etag(None).unwrap();
//!
//! let reader = Reader::new(writer.bytes(), &pages).unwrap();
//! for node in reader.document() {
//!     println!("{:?}", node.unwrap());
//! }
//! ```

use std::io;
use thiserror::Error;

pub mod charset;
pub mod cli;
mod codepage;
mod dump;
mod event_parser;
mod reader;
mod string_table;
mod writer;

pub use codepage::{AttrDef, AttrDescriptor, CodepageDef, CodepageTable};
pub use dump::XmlDumper;
pub use event_parser::{
    CallbackError, EventParser, EventParserError, PathStep, RecordedItem, RecordedNode,
};
pub use reader::{
    AttrValue, Attribute, Document, Element, ElementKind, ExtValue, Extension, Node,
    ProcessingInstruction, PublicId, Reader, TagRef, ValuePiece,
};
pub use string_table::StringTable;
pub use writer::{Attr, AttrName, TagName, Value, Writer};

/// Error types for WBXML decoding, encoding and conversion
#[derive(Error, Debug)]
pub enum WbxmlError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("parse error at offset {offset}: {reason}")]
    Parse { reason: String, offset: usize },
    #[error("writer misuse: {0}")]
    Writer(String),
    #[error("{0}")]
    Usage(String),
}

impl WbxmlError {
    pub(crate) fn parse(reason: impl Into<String>, offset: usize) -> Self {
        WbxmlError::Parse {
            reason: reason.into(),
            offset,
        }
    }

    pub(crate) fn writer(reason: impl Into<String>) -> Self {
        WbxmlError::Writer(reason.into())
    }
}

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, WbxmlError>;

// Global tokens, valid in every parser state
pub const SWITCH_PAGE: u8 = 0x00;
pub const END: u8 = 0x01;
pub const ENTITY: u8 = 0x02;
pub const STR_I: u8 = 0x03;
pub const LITERAL: u8 = 0x04;
pub const EXT_I_0: u8 = 0x40;
pub const EXT_I_1: u8 = 0x41;
pub const EXT_I_2: u8 = 0x42;
pub const PI: u8 = 0x43;
pub const LITERAL_C: u8 = 0x44;
pub const EXT_T_0: u8 = 0x80;
pub const EXT_T_1: u8 = 0x81;
pub const EXT_T_2: u8 = 0x82;
pub const STR_T: u8 = 0x83;
pub const LITERAL_A: u8 = 0x84;
pub const EXT_0: u8 = 0xC0;
pub const EXT_1: u8 = 0xC1;
pub const EXT_2: u8 = 0xC2;
pub const OPAQUE: u8 = 0xC3;
pub const LITERAL_AC: u8 = 0xC4;

// Tag byte layout: low 6 bits carry the codepage-local code
pub const TAG_CODE_MASK: u8 = 0x3F;
pub const TAG_HAS_CONTENT: u8 = 0x40;
pub const TAG_HAS_ATTRS: u8 = 0x80;
