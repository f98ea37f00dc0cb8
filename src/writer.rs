//! Encoder that builds a WBXML buffer through a fluent tag/attribute/text API.
//!
//! Codepage switching is transparent. Whenever a coded tag or attribute
//! crosses a page boundary, a SWITCH_PAGE token is emitted first. Literal
//! (string-table-referenced) names never switch pages.

use crate::reader::ExtValue;
use crate::{Result, WbxmlError, charset};
use crate::{
    END, ENTITY, EXT_0, EXT_I_0, EXT_T_0, LITERAL, OPAQUE, PI, STR_I, STR_T, SWITCH_PAGE,
    TAG_CODE_MASK, TAG_HAS_ATTRS, TAG_HAS_CONTENT,
};
use std::collections::HashMap;

/// Encode an mb_uint32: 7 bits per byte, most significant first,
/// continuation bit 0x80 on every byte but the last.
pub(crate) fn encode_mb_uint32(buf: &mut Vec<u8>, mut value: u32) {
    let mut groups = [0u8; 5];
    let mut count = 0;
    loop {
        groups[count] = (value & 0x7F) as u8;
        value >>= 7;
        count += 1;
        if value == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i > 0 { 0x80 } else { 0x00 };
        buf.push(groups[i] | continuation);
    }
}

/// Tag identity on the encoder side: a packed page/code number, or a literal
/// name resolved against the writer's own string table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagName {
    Code(u16),
    Literal(String),
}

impl From<u16> for TagName {
    fn from(code: u16) -> Self {
        TagName::Code(code)
    }
}

impl From<&str> for TagName {
    fn from(name: &str) -> Self {
        TagName::Literal(name.to_string())
    }
}

/// Attribute identity; codes use the full low byte (attribute-start tokens
/// are 7-bit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrName {
    Code(u16),
    Literal(String),
}

impl From<u16> for AttrName {
    fn from(code: u16) -> Self {
        AttrName::Code(code)
    }
}

impl From<&str> for AttrName {
    fn from(name: &str) -> Self {
        AttrName::Literal(name.to_string())
    }
}

/// One value piece for `text`, attributes and processing instructions.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Inline charset-encoded string (STR_I).
    Str(String),
    /// Reference to an entry of the writer's string table (STR_T).
    TableRef(String),
    /// Numeric character entity (ENTITY).
    Entity(u32),
    /// Extension token in value position.
    Ext(u8, ExtValue),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// An attribute for `stag_attrs`/`tag_attrs`: a name and an ordered piece
/// list.
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    name: AttrName,
    pieces: Vec<Value>,
}

impl Attr {
    pub fn new(name: impl Into<AttrName>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            pieces: vec![value.into()],
        }
    }

    pub fn with_pieces(name: impl Into<AttrName>, pieces: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            pieces,
        }
    }
}

/// Single-use encoder for one WBXML document.
pub struct Writer {
    buf: Vec<u8>,
    charset_mib: u32,
    page: u8,
    stack: Vec<TagName>,
    string_offsets: HashMap<String, u32>,
}

impl Writer {
    /// Emit the fixed header: version byte `((major-1)<<4)|minor`, public id,
    /// charset MIB and string table (a single zero byte when empty).
    pub fn new(version: &str, public_id: u32, charset_mib: u32, strings: &[&str]) -> Result<Self> {
        let (major, minor) = parse_version(version)?;
        if charset::name(charset_mib).is_none() {
            return Err(WbxmlError::writer(format!("unknown charset MIB {charset_mib}")));
        }

        let mut string_offsets = HashMap::new();
        let mut table = Vec::new();
        for name in strings {
            string_offsets
                .entry(name.to_string())
                .or_insert(table.len() as u32);
            table.extend_from_slice(&charset::encode(charset_mib, name)?);
            table.push(0x00);
        }

        let mut buf = Vec::with_capacity(64 + table.len());
        buf.push(((major - 1) << 4) | minor);
        encode_mb_uint32(&mut buf, public_id);
        encode_mb_uint32(&mut buf, charset_mib);
        encode_mb_uint32(&mut buf, table.len() as u32);
        buf.extend_from_slice(&table);

        Ok(Self {
            buf,
            charset_mib,
            page: 0,
            stack: Vec::new(),
            string_offsets,
        })
    }

    /// Open an element with children.
    pub fn stag(&mut self, tag: impl Into<TagName>) -> Result<&mut Self> {
        self.stag_attrs(tag, &[])
    }

    /// Open an element with children and attributes.
    pub fn stag_attrs(&mut self, tag: impl Into<TagName>, attrs: &[Attr]) -> Result<&mut Self> {
        let tag = tag.into();
        self.element(&tag, attrs, TAG_HAS_CONTENT)?;
        self.stack.push(tag);
        Ok(self)
    }

    /// Emit a self-contained (empty) element.
    pub fn tag(&mut self, tag: impl Into<TagName>) -> Result<&mut Self> {
        self.tag_attrs(tag, &[])
    }

    /// Emit a self-contained element with attributes.
    pub fn tag_attrs(&mut self, tag: impl Into<TagName>, attrs: &[Attr]) -> Result<&mut Self> {
        self.element(&tag.into(), attrs, 0)?;
        Ok(self)
    }

    /// Convenience text leaf: stag, text, etag in one call.
    pub fn text_tag(&mut self, tag: impl Into<TagName>, value: impl Into<Value>) -> Result<&mut Self> {
        self.stag(tag)?.text(value)?.etag(None)
    }

    /// Close the most recently opened element. With `expected`, fails unless
    /// the top of the tag stack is that code.
    pub fn etag(&mut self, expected: impl Into<Option<u16>>) -> Result<&mut Self> {
        let top = self
            .stack
            .pop()
            .ok_or_else(|| WbxmlError::writer("etag with no open element"))?;
        if let Some(code) = expected.into() {
            if top != TagName::Code(code) {
                return Err(WbxmlError::writer(format!(
                    "etag expected tag 0x{code:04X} but the open element is {top:?}"
                )));
            }
        }
        self.buf.push(END);
        Ok(self)
    }

    /// Append one text value to the current content.
    pub fn text(&mut self, value: impl Into<Value>) -> Result<&mut Self> {
        self.value_piece(&value.into())?;
        Ok(self)
    }

    /// Append mixed value pieces in order.
    pub fn text_pieces(&mut self, pieces: &[Value]) -> Result<&mut Self> {
        for piece in pieces {
            self.value_piece(piece)?;
        }
        Ok(self)
    }

    /// Emit a processing instruction with the given target and data pieces.
    pub fn pi(&mut self, target: impl Into<AttrName>, data: &[Value]) -> Result<&mut Self> {
        self.buf.push(PI);
        self.attr_name(&target.into())?;
        for piece in data {
            self.value_piece(piece)?;
        }
        self.buf.push(END);
        Ok(self)
    }

    /// Emit an extension token in content position. The payload form is
    /// carried by `value`; the slot must be 0, 1 or 2.
    pub fn ext(&mut self, slot: u8, value: ExtValue) -> Result<&mut Self> {
        self.ext_tokens(slot, &value)?;
        Ok(self)
    }

    /// Emit a length-prefixed opaque payload.
    pub fn opaque(&mut self, data: &[u8]) -> Result<&mut Self> {
        self.buf.push(OPAQUE);
        encode_mb_uint32(&mut self.buf, data.len() as u32);
        self.buf.extend_from_slice(data);
        Ok(self)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Number of open elements.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn element(&mut self, tag: &TagName, attrs: &[Attr], flags: u8) -> Result<()> {
        let flags = if attrs.is_empty() {
            flags
        } else {
            flags | TAG_HAS_ATTRS
        };
        self.tag_byte(tag, flags)?;
        if !attrs.is_empty() {
            for attr in attrs {
                self.attr_name(&attr.name)?;
                for piece in &attr.pieces {
                    self.value_piece(piece)?;
                }
            }
            self.buf.push(END);
        }
        Ok(())
    }

    fn tag_byte(&mut self, tag: &TagName, flags: u8) -> Result<()> {
        match tag {
            TagName::Code(code) => {
                let local = (code & 0xFF) as u8;
                if local & !TAG_CODE_MASK != 0 || local < 5 {
                    return Err(WbxmlError::writer(format!(
                        "tag code 0x{code:04X} has an invalid in-page value 0x{local:02X}"
                    )));
                }
                self.ensure_page(*code);
                self.buf.push(local | flags);
            }
            TagName::Literal(name) => {
                let offset = self.string_offset(name)?;
                self.buf.push(LITERAL | flags);
                encode_mb_uint32(&mut self.buf, offset);
            }
        }
        Ok(())
    }

    fn attr_name(&mut self, name: &AttrName) -> Result<()> {
        match name {
            AttrName::Code(code) => {
                let local = (code & 0xFF) as u8;
                if local & 0x80 != 0 || local < 5 {
                    return Err(WbxmlError::writer(format!(
                        "attribute code 0x{code:04X} has an invalid in-page value 0x{local:02X}"
                    )));
                }
                self.ensure_page(*code);
                self.buf.push(local);
            }
            AttrName::Literal(name) => {
                let offset = self.string_offset(name)?;
                self.buf.push(LITERAL);
                encode_mb_uint32(&mut self.buf, offset);
            }
        }
        Ok(())
    }

    fn value_piece(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Str(s) => {
                let encoded = charset::encode(self.charset_mib, s)?;
                if encoded.contains(&0x00) {
                    return Err(WbxmlError::writer("inline string contains a null byte"));
                }
                self.buf.push(STR_I);
                self.buf.extend_from_slice(&encoded);
                self.buf.push(0x00);
            }
            Value::TableRef(name) => {
                let offset = self.string_offset(name)?;
                self.buf.push(STR_T);
                encode_mb_uint32(&mut self.buf, offset);
            }
            Value::Entity(codepoint) => {
                self.buf.push(ENTITY);
                encode_mb_uint32(&mut self.buf, *codepoint);
            }
            Value::Ext(slot, ext) => self.ext_tokens(*slot, ext)?,
        }
        Ok(())
    }

    fn ext_tokens(&mut self, slot: u8, value: &ExtValue) -> Result<()> {
        if slot > 2 {
            return Err(WbxmlError::writer(format!("extension slot {slot} out of range 0..=2")));
        }
        match value {
            ExtValue::Str(s) => {
                let encoded = charset::encode(self.charset_mib, s)?;
                if encoded.contains(&0x00) {
                    return Err(WbxmlError::writer("extension string contains a null byte"));
                }
                self.buf.push(EXT_I_0 + slot);
                self.buf.extend_from_slice(&encoded);
                self.buf.push(0x00);
            }
            ExtValue::Int(v) => {
                self.buf.push(EXT_T_0 + slot);
                encode_mb_uint32(&mut self.buf, *v);
            }
            ExtValue::Byte => self.buf.push(EXT_0 + slot),
        }
        Ok(())
    }

    fn ensure_page(&mut self, code: u16) {
        let page = (code >> 8) as u8;
        if page != self.page {
            self.buf.push(SWITCH_PAGE);
            self.buf.push(page);
            self.page = page;
        }
    }

    fn string_offset(&self, name: &str) -> Result<u32> {
        self.string_offsets.get(name).copied().ok_or_else(|| {
            WbxmlError::writer(format!("{name:?} is not in the writer string table"))
        })
    }
}

fn parse_version(version: &str) -> Result<(u8, u8)> {
    let invalid = || WbxmlError::writer(format!("invalid WBXML version {version:?}"));
    let (major, minor) = version.split_once('.').ok_or_else(invalid)?;
    let major: u8 = major.parse().map_err(|_| invalid())?;
    let minor: u8 = minor.parse().map_err(|_| invalid())?;
    if major < 1 || major > 16 || minor > 15 {
        return Err(invalid());
    }
    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codepage::{AttrDef, CodepageDef, CodepageTable};
    use crate::reader::{ElementKind, Node, Reader, TagRef};
    use crate::{Extension, charset};

    fn pages() -> CodepageTable {
        CodepageTable::compile(&[
            CodepageDef {
                namespace: "AirSync".into(),
                tags: vec![("Sync".into(), 0x0005), ("Collections".into(), 0x0006)],
                attrs: vec![AttrDef {
                    name: "Version".into(),
                    value: 0x0005,
                    data: None,
                }],
            },
            CodepageDef {
                namespace: "Contacts".into(),
                tags: vec![("Anniversary".into(), 0x0105)],
                attrs: vec![],
            },
        ])
        .unwrap()
    }

    fn decode(bytes: &[u8], pages: &CodepageTable) -> Vec<Node> {
        let reader = Reader::new(bytes, pages).unwrap();
        reader.document().map(|n| n.unwrap()).collect()
    }

    #[test]
    fn varint_encoding_matches_the_wire_format() {
        let mut buf = Vec::new();
        encode_mb_uint32(&mut buf, 300);
        assert_eq!(buf, vec![0x82, 0x2C]);
        buf.clear();
        encode_mb_uint32(&mut buf, 0);
        assert_eq!(buf, vec![0x00]);
        buf.clear();
        encode_mb_uint32(&mut buf, u32::MAX);
        assert_eq!(buf, vec![0x8F, 0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn header_without_string_table_ends_in_a_zero_byte() {
        let writer = Writer::new("1.3", 1, charset::UTF_8, &[]).unwrap();
        assert_eq!(writer.bytes(), &[0x03, 0x01, 0x6A, 0x00]);
    }

    #[test]
    fn header_with_string_table_emits_length_and_entries() {
        let writer = Writer::new("1.1", 1, charset::UTF_8, &["alpha", "beta"]).unwrap();
        assert_eq!(
            writer.bytes(),
            &[
                0x01, 0x01, 0x6A, 0x0B, b'a', b'l', b'p', b'h', b'a', 0x00, b'b', b'e', b't',
                b'a', 0x00
            ]
        );
    }

    #[test]
    fn invalid_version_strings_fail() {
        assert!(Writer::new("0.9", 1, charset::UTF_8, &[]).is_err());
        assert!(Writer::new("three", 1, charset::UTF_8, &[]).is_err());
        assert!(Writer::new("1.99", 1, charset::UTF_8, &[]).is_err());
    }

    #[test]
    fn etag_with_empty_stack_fails() {
        let mut writer = Writer::new("1.3", 1, charset::UTF_8, &[]).unwrap();
        assert!(matches!(writer.etag(None), Err(WbxmlError::Writer(_))));
    }

    #[test]
    fn etag_with_mismatched_expectation_fails() {
        let mut writer = Writer::new("1.3", 1, charset::UTF_8, &[]).unwrap();
        writer.stag(0x0005).unwrap();
        assert!(writer.etag(0x0006).is_err());
    }

    #[test]
    fn etag_with_matching_expectation_succeeds() {
        let mut writer = Writer::new("1.3", 1, charset::UTF_8, &[]).unwrap();
        writer.stag(0x0005).unwrap().etag(0x0005).unwrap();
        assert_eq!(writer.depth(), 0);
    }

    #[test]
    fn invalid_tag_codes_fail_at_the_call_site() {
        let mut writer = Writer::new("1.3", 1, charset::UTF_8, &[]).unwrap();
        // in-page value does not fit 6 bits
        assert!(writer.stag(0x0045).is_err());
        // reserved in-page value
        assert!(writer.stag(0x0001).is_err());
    }

    #[test]
    fn literal_tag_not_in_string_table_fails() {
        let mut writer = Writer::new("1.3", 1, charset::UTF_8, &["Known"]).unwrap();
        assert!(writer.stag("Unknown").is_err());
        writer.stag("Known").unwrap().etag(None).unwrap();
    }

    #[test]
    fn extension_slot_out_of_range_fails() {
        let mut writer = Writer::new("1.3", 1, charset::UTF_8, &[]).unwrap();
        writer.stag(0x0005).unwrap();
        assert!(writer.ext(3, ExtValue::Byte).is_err());
    }

    #[test]
    fn coded_tags_switch_pages_automatically() {
        let pages = pages();
        let mut writer = Writer::new("1.3", 1, charset::UTF_8, &[]).unwrap();
        writer
            .stag(0x0005).unwrap()
            .tag(0x0105).unwrap()
            .tag(0x0105).unwrap()
            .etag(None).unwrap();

        // exactly one switch: the second page-1 tag reuses the active page
        let switches = writer
            .bytes()
            .windows(2)
            .filter(|w| w[0] == SWITCH_PAGE && w[1] == 0x01)
            .count();
        assert_eq!(switches, 1);

        let nodes = decode(writer.bytes(), &pages);
        match &nodes[1] {
            Node::Element(el) => assert_eq!(el.tag, TagRef::Coded(0x0105)),
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn document_round_trips_through_the_reader() {
        let pages = pages();
        let mut writer =
            Writer::new("1.3", 1, charset::UTF_8, &["shared", "Custom"]).unwrap();
        writer
            .stag_attrs(0x0005, &[Attr::new(0x0005, "4.0")]).unwrap()
            .text_tag(0x0006, "leaf").unwrap()
            .stag("Custom").unwrap()
            .text_pieces(&[
                Value::Str("a".into()),
                Value::TableRef("shared".into()),
                Value::Entity(38),
            ]).unwrap()
            .etag(None).unwrap()
            .opaque(&[0xDE, 0xAD]).unwrap()
            .pi(0x0005, &[Value::Str("pi-data".into())]).unwrap()
            .etag(0x0005).unwrap();

        let nodes = decode(writer.bytes(), &pages);
        let mut it = nodes.iter();

        match it.next().unwrap() {
            Node::Element(el) => {
                assert_eq!(el.kind, ElementKind::Stag);
                assert_eq!(el.tag, TagRef::Coded(0x0005));
                assert_eq!(el.attributes[0].name, TagRef::Coded(0x0005));
                assert_eq!(el.attributes[0].value.as_single_str(), Some("4.0"));
            }
            other => panic!("unexpected node {other:?}"),
        }
        match it.next().unwrap() {
            Node::Element(el) => assert_eq!(el.tag, TagRef::Coded(0x0006)),
            other => panic!("unexpected node {other:?}"),
        }
        assert_eq!(it.next().unwrap(), &Node::Text("leaf".into()));
        assert_eq!(it.next().unwrap(), &Node::EndTag);
        match it.next().unwrap() {
            Node::Element(el) => assert_eq!(el.tag, TagRef::Named("Custom".into())),
            other => panic!("unexpected node {other:?}"),
        }
        assert_eq!(it.next().unwrap(), &Node::Text("ashared&#38;".into()));
        assert_eq!(it.next().unwrap(), &Node::EndTag);
        assert_eq!(it.next().unwrap(), &Node::Opaque(vec![0xDE, 0xAD]));
        match it.next().unwrap() {
            Node::Pi(pi) => {
                assert_eq!(pi.target, TagRef::Coded(0x0005));
                assert_eq!(pi.data.as_single_str(), Some("pi-data"));
            }
            other => panic!("unexpected node {other:?}"),
        }
        assert_eq!(it.next().unwrap(), &Node::EndTag);
        assert!(it.next().is_none());
    }

    #[test]
    fn extensions_round_trip_for_every_subtype_and_slot() {
        let pages = pages();
        for slot in 0..3u8 {
            for value in [
                ExtValue::Str(format!("s{slot}")),
                ExtValue::Int(300 + u32::from(slot)),
                ExtValue::Byte,
            ] {
                let mut writer = Writer::new("1.3", 1, charset::UTF_8, &[]).unwrap();
                writer
                    .stag(0x0005).unwrap()
                    .ext(slot, value.clone()).unwrap()
                    .etag(None).unwrap();
                let nodes = decode(writer.bytes(), &pages);
                assert_eq!(nodes[1], Node::Extension(Extension { slot, value }));
            }
        }
    }
}
