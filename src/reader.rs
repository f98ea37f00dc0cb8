//! Decoder for complete WBXML buffers.
//!
//! A [`Reader`] parses the document header once at construction. Each call to
//! [`Reader::document`] or [`Reader::rewind`] hands out a fresh [`Document`]
//! iterator over the body. Nothing is shared between passes except the
//! immutable buffer, string table and codepage table.

use crate::codepage::CodepageTable;
use crate::string_table::StringTable;
use crate::{Result, WbxmlError, charset};
use crate::{
    END, ENTITY, LITERAL, LITERAL_C, OPAQUE, PI, STR_I, STR_T, SWITCH_PAGE, TAG_CODE_MASK,
    TAG_HAS_ATTRS, TAG_HAS_CONTENT,
};

/// Bounded cursor over the in-memory document buffer.
pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        let b = self
            .buf
            .get(self.pos)
            .copied()
            .ok_or_else(|| WbxmlError::parse("unexpected end of input", self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    pub(crate) fn peek_u8(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.buf.len());
        let end = end.ok_or_else(|| {
            WbxmlError::parse(format!("{len} bytes requested past end of input"), self.pos)
        })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read up to (and consume) a null terminator; returns the content bytes.
    pub(crate) fn read_cstr_bytes(&mut self) -> Result<&'a [u8]> {
        let rel = self.buf[self.pos..]
            .iter()
            .position(|&b| b == 0x00)
            .ok_or_else(|| WbxmlError::parse("unterminated inline string", self.pos))?;
        let slice = &self.buf[self.pos..self.pos + rel];
        self.pos += rel + 1;
        Ok(slice)
    }

    /// Decode an mb_uint32: 7 bits per byte, most significant first,
    /// continuation bit 0x80 on every byte but the last.
    pub(crate) fn read_mb_uint32(&mut self) -> Result<u32> {
        let start = self.pos;
        let mut acc: u64 = 0;
        for _ in 0..5 {
            let b = self.read_u8()?;
            acc = (acc << 7) | u64::from(b & 0x7F);
            if acc > u64::from(u32::MAX) {
                return Err(WbxmlError::parse("mb_uint32 overflows 32 bits", start));
            }
            if b & 0x80 == 0 {
                return Ok(acc as u32);
            }
        }
        Err(WbxmlError::parse("mb_uint32 longer than 5 bytes", start))
    }
}

/// Tag identity: a literal name from the string table, or a packed code whose
/// high byte is the codepage and whose low bits are the in-page tag code.
/// Coded tags resolve to names through the codepage table at the point of use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagRef {
    Named(String),
    Coded(u16),
}

impl TagRef {
    pub fn resolve<'t>(&'t self, pages: &'t CodepageTable) -> Option<&'t str> {
        match self {
            TagRef::Named(name) => Some(name),
            TagRef::Coded(code) => pages.tag_name(*code),
        }
    }

    /// Resolved name, falling back to a `TAG_pp_cc` placeholder for codes the
    /// table does not know.
    pub fn display_name(&self, pages: &CodepageTable) -> String {
        match self {
            TagRef::Named(name) => name.clone(),
            TagRef::Coded(code) => match pages.tag_name(*code) {
                Some(name) => name.to_string(),
                None => format!("TAG_{:02X}_{:02X}", code >> 8, code & 0xFF),
            },
        }
    }
}

/// Payload of an extension token: inline string, table-encoded integer, or
/// the bare single-byte form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtValue {
    Str(String),
    Int(u32),
    Byte,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub slot: u8,
    pub value: ExtValue,
}

/// One piece of an attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValuePiece {
    Str(String),
    Entity(u32),
    Ext(Extension),
}

/// An ordered list of attribute-value pieces.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttrValue {
    pub pieces: Vec<ValuePiece>,
}

impl AttrValue {
    /// The collapsed scalar view of a single-piece string value.
    pub fn as_single_str(&self) -> Option<&str> {
        match self.pieces.as_slice() {
            [ValuePiece::Str(s)] => Some(s),
            _ => None,
        }
    }

    /// Debug-oriented concatenation of the pieces: entities render as
    /// `&#N;`, integer extensions as decimal, bare extensions as nothing.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                ValuePiece::Str(s) => out.push_str(s),
                ValuePiece::Entity(cp) => out.push_str(&format!("&#{cp};")),
                ValuePiece::Ext(ext) => match &ext.value {
                    ExtValue::Str(s) => out.push_str(s),
                    ExtValue::Int(v) => out.push_str(&v.to_string()),
                    ExtValue::Byte => {}
                },
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: TagRef,
    pub value: AttrValue,
}

/// `Stag` opens a nesting level and is closed by a matching [`Node::EndTag`];
/// `Tag` is complete in itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Stag,
    Tag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub kind: ElementKind,
    pub tag: TagRef,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingInstruction {
    pub target: TagRef,
    pub data: AttrValue,
}

/// One structural event of the decoded document.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    EndTag,
    Text(String),
    Extension(Extension),
    Pi(ProcessingInstruction),
    Opaque(Vec<u8>),
}

/// Document public id from the header: a well-known numeric id, or a literal
/// name resolved through the string table when the wire value is zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicId {
    Code(u32),
    Literal(String),
}

/// Decoder over a complete in-memory WBXML buffer.
pub struct Reader<'a> {
    buf: &'a [u8],
    pages: &'a CodepageTable,
    version: (u8, u8),
    public_id: PublicId,
    charset_mib: u32,
    strings: StringTable,
    body_start: usize,
}

impl<'a> Reader<'a> {
    /// Parse the header (version, public id, charset, string table) and
    /// position at the start of the body.
    pub fn new(buf: &'a [u8], pages: &'a CodepageTable) -> Result<Self> {
        let mut cur = ByteCursor::new(buf, 0);

        let version_byte = cur.read_u8()?;
        let version = ((version_byte >> 4) + 1, version_byte & 0x0F);

        let raw_public_id = cur.read_mb_uint32()?;
        // Public id 0 means "literal": an index into the string table follows.
        let public_id_index = if raw_public_id == 0 {
            Some(cur.read_mb_uint32()?)
        } else {
            None
        };

        let charset_pos = cur.pos();
        let charset_mib = cur.read_mb_uint32()?;
        if charset::name(charset_mib).is_none() {
            return Err(WbxmlError::parse(
                format!("unknown charset MIB {charset_mib}"),
                charset_pos,
            ));
        }

        let table_len = cur.read_mb_uint32()? as usize;
        let table_base = cur.pos();
        let table_bytes = cur.read_bytes(table_len)?;
        let strings = StringTable::build(table_bytes, charset_mib, table_base)?;

        let public_id = match public_id_index {
            Some(index) => PublicId::Literal(strings.get(index)?),
            None => PublicId::Code(raw_public_id),
        };

        Ok(Self {
            buf,
            pages,
            version,
            public_id,
            charset_mib,
            strings,
            body_start: cur.pos(),
        })
    }

    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    pub fn public_id(&self) -> &PublicId {
        &self.public_id
    }

    pub fn charset(&self) -> u32 {
        self.charset_mib
    }

    pub fn string_table(&self) -> &StringTable {
        &self.strings
    }

    pub fn codepages(&self) -> &CodepageTable {
        self.pages
    }

    /// A fresh pass over the body. Nodes are produced lazily; any parse error
    /// ends the pass.
    pub fn document(&self) -> Document<'_> {
        Document {
            cur: ByteCursor::new(self.buf, self.body_start),
            pages: self.pages,
            strings: &self.strings,
            charset_mib: self.charset_mib,
            page: 0,
            depth: 0,
            root_seen: false,
            pending: None,
            finished: false,
        }
    }

    /// Restart from the beginning of the body. Equivalent to `document()`;
    /// there is no mid-stream restart.
    pub fn rewind(&self) -> Document<'_> {
        self.document()
    }
}

/// Element or processing instruction whose attribute section is being read.
enum Pending {
    Element {
        kind: ElementKind,
        tag: TagRef,
        attributes: Vec<Attribute>,
        current: Option<(TagRef, AttrValue)>,
    },
    Pi {
        target: Option<TagRef>,
        data: AttrValue,
    },
}

/// Lazy iterator over the node sequence of one pass.
pub struct Document<'a> {
    cur: ByteCursor<'a>,
    pages: &'a CodepageTable,
    strings: &'a StringTable,
    charset_mib: u32,
    page: u8,
    depth: u32,
    root_seen: bool,
    pending: Option<Pending>,
    finished: bool,
}

fn is_ext_token(tok: u8) -> bool {
    (tok & 0xC0) != 0 && (tok & TAG_CODE_MASK) < 3
}

impl<'a> Document<'a> {
    /// Current byte offset into the document buffer.
    pub fn offset(&self) -> usize {
        self.cur.pos()
    }

    fn read_node(&mut self) -> Result<Option<Node>> {
        loop {
            if self.cur.is_eof() {
                if self.pending.is_some() {
                    return Err(WbxmlError::parse(
                        "input ended inside an attribute section",
                        self.cur.pos(),
                    ));
                }
                if self.depth > 0 {
                    return Err(WbxmlError::parse(
                        format!("input ended with {} unclosed element(s)", self.depth),
                        self.cur.pos(),
                    ));
                }
                if !self.root_seen {
                    return Err(WbxmlError::parse(
                        "input ended before the root element",
                        self.cur.pos(),
                    ));
                }
                return Ok(None);
            }

            let tok_pos = self.cur.pos();
            let tok = self.cur.read_u8()?;
            let produced = if self.pending.is_some() {
                self.attr_token(tok, tok_pos)?
            } else {
                self.body_token(tok, tok_pos)?
            };
            if let Some(node) = produced {
                return Ok(Some(node));
            }
        }
    }

    fn switch_page(&mut self) -> Result<()> {
        let pos = self.cur.pos();
        let page = self.cur.read_u8()?;
        if !self.pages.contains_page(page) {
            return Err(WbxmlError::parse(format!("switch to unknown codepage {page}"), pos));
        }
        self.page = page;
        Ok(())
    }

    fn body_token(&mut self, tok: u8, tok_pos: usize) -> Result<Option<Node>> {
        match tok {
            SWITCH_PAGE => {
                self.switch_page()?;
                Ok(None)
            }
            END => {
                if self.depth == 0 {
                    return Err(WbxmlError::parse("end token with no open element", tok_pos));
                }
                self.depth -= 1;
                Ok(Some(Node::EndTag))
            }
            ENTITY | STR_I | STR_T => {
                if tok == ENTITY && self.depth == 0 {
                    return Err(WbxmlError::parse("entity outside element content", tok_pos));
                }
                let mut text = String::new();
                self.text_fragment(tok, &mut text)?;
                // Adjacent text-producing tokens merge into one node. A page
                // switch emits no node, so it does not split the run either.
                while let Some(next) = self.cur.peek_u8() {
                    match next {
                        SWITCH_PAGE => {
                            self.cur.read_u8()?;
                            self.switch_page()?;
                            continue;
                        }
                        STR_I | STR_T => {}
                        ENTITY if self.depth > 0 => {}
                        _ => break,
                    }
                    let tok = self.cur.read_u8()?;
                    self.text_fragment(tok, &mut text)?;
                }
                Ok(Some(Node::Text(text)))
            }
            PI => {
                self.pending = Some(Pending::Pi {
                    target: None,
                    data: AttrValue::default(),
                });
                Ok(None)
            }
            OPAQUE => {
                let len = self.cur.read_mb_uint32()? as usize;
                Ok(Some(Node::Opaque(self.cur.read_bytes(len)?.to_vec())))
            }
            tok if is_ext_token(tok) => Ok(Some(Node::Extension(self.extension(tok)?))),
            tok => {
                if self.depth == 0 {
                    if self.root_seen {
                        return Err(WbxmlError::parse("document has multiple root elements", tok_pos));
                    }
                    self.root_seen = true;
                }
                let tag = if tok & TAG_CODE_MASK == LITERAL {
                    let offset = self.cur.read_mb_uint32()?;
                    TagRef::Named(self.strings.get(offset)?)
                } else {
                    TagRef::Coded(u16::from(self.page) << 8 | u16::from(tok & TAG_CODE_MASK))
                };
                let kind = if tok & TAG_HAS_CONTENT != 0 {
                    ElementKind::Stag
                } else {
                    ElementKind::Tag
                };
                if tok & TAG_HAS_ATTRS != 0 {
                    self.pending = Some(Pending::Element {
                        kind,
                        tag,
                        attributes: Vec::new(),
                        current: None,
                    });
                    return Ok(None);
                }
                if kind == ElementKind::Stag {
                    self.depth += 1;
                }
                Ok(Some(Node::Element(Element {
                    kind,
                    tag,
                    attributes: Vec::new(),
                })))
            }
        }
    }

    fn attr_token(&mut self, tok: u8, tok_pos: usize) -> Result<Option<Node>> {
        match tok {
            SWITCH_PAGE => {
                self.switch_page()?;
                Ok(None)
            }
            END => match self.pending.take() {
                Some(Pending::Element {
                    kind,
                    tag,
                    mut attributes,
                    current,
                }) => {
                    if let Some((name, value)) = current {
                        attributes.push(Attribute { name, value });
                    }
                    if kind == ElementKind::Stag {
                        self.depth += 1;
                    }
                    Ok(Some(Node::Element(Element {
                        kind,
                        tag,
                        attributes,
                    })))
                }
                Some(Pending::Pi { target, data }) => {
                    let target = target.ok_or_else(|| {
                        WbxmlError::parse("processing instruction without a target", tok_pos)
                    })?;
                    Ok(Some(Node::Pi(ProcessingInstruction { target, data })))
                }
                None => unreachable!("attr_token called without a pending section"),
            },
            ENTITY => {
                let codepoint = self.cur.read_mb_uint32()?;
                self.push_piece(ValuePiece::Entity(codepoint), tok_pos)?;
                Ok(None)
            }
            STR_I => {
                let text = self.inline_str()?;
                self.push_piece(ValuePiece::Str(text), tok_pos)?;
                Ok(None)
            }
            STR_T => {
                let offset = self.cur.read_mb_uint32()?;
                let text = self.strings.get(offset)?;
                self.push_piece(ValuePiece::Str(text), tok_pos)?;
                Ok(None)
            }
            OPAQUE => Err(WbxmlError::parse("opaque data inside an attribute section", tok_pos)),
            PI | LITERAL_C => Err(WbxmlError::parse(
                format!("unexpected token 0x{tok:02X} in attribute section"),
                tok_pos,
            )),
            tok if is_ext_token(tok) => {
                let ext = self.extension(tok)?;
                self.push_piece(ValuePiece::Ext(ext), tok_pos)?;
                Ok(None)
            }
            tok if tok & 0x80 == 0 => {
                // Attribute start: literal name or codepage-coded.
                let name = if tok == LITERAL {
                    let offset = self.cur.read_mb_uint32()?;
                    TagRef::Named(self.strings.get(offset)?)
                } else {
                    TagRef::Coded(u16::from(self.page) << 8 | u16::from(tok))
                };
                self.begin_attribute(name, tok_pos)?;
                Ok(None)
            }
            tok => {
                // Attribute value constant; its fixed text joins the pieces.
                let code = u16::from(self.page) << 8 | u16::from(tok);
                let descriptor = self.pages.attr_descriptor(code).ok_or_else(|| {
                    WbxmlError::parse(format!("unknown attribute value code 0x{code:04X}"), tok_pos)
                })?;
                let text = descriptor
                    .data
                    .clone()
                    .unwrap_or_else(|| descriptor.name.clone());
                self.push_piece(ValuePiece::Str(text), tok_pos)?;
                Ok(None)
            }
        }
    }

    fn begin_attribute(&mut self, name: TagRef, tok_pos: usize) -> Result<()> {
        // A coded attribute-start may carry fixed prefix text.
        let mut value = AttrValue::default();
        if let TagRef::Coded(code) = &name {
            if let Some(descriptor) = self.pages.attr_descriptor(*code) {
                if let Some(data) = &descriptor.data {
                    value.pieces.push(ValuePiece::Str(data.clone()));
                }
            }
        }

        match self.pending.as_mut() {
            Some(Pending::Element {
                attributes,
                current,
                ..
            }) => {
                if let Some((prev_name, prev_value)) = current.take() {
                    attributes.push(Attribute {
                        name: prev_name,
                        value: prev_value,
                    });
                }
                if attributes.iter().any(|a| a.name == name) {
                    return Err(WbxmlError::parse(
                        format!("attribute {name:?} repeated within one element"),
                        tok_pos,
                    ));
                }
                *current = Some((name, value));
                Ok(())
            }
            Some(Pending::Pi { target, data }) => {
                if target.is_some() {
                    return Err(WbxmlError::parse(
                        "processing instruction with more than one target",
                        tok_pos,
                    ));
                }
                *target = Some(name);
                data.pieces.extend(value.pieces);
                Ok(())
            }
            None => unreachable!("begin_attribute called without a pending section"),
        }
    }

    fn push_piece(&mut self, piece: ValuePiece, tok_pos: usize) -> Result<()> {
        match self.pending.as_mut() {
            Some(Pending::Element { current, .. }) => match current {
                Some((_, value)) => {
                    value.pieces.push(piece);
                    Ok(())
                }
                None => Err(WbxmlError::parse(
                    "attribute value before any attribute name",
                    tok_pos,
                )),
            },
            Some(Pending::Pi { target, data }) => {
                if target.is_none() {
                    return Err(WbxmlError::parse(
                        "processing instruction data before its target",
                        tok_pos,
                    ));
                }
                data.pieces.push(piece);
                Ok(())
            }
            None => unreachable!("push_piece called without a pending section"),
        }
    }

    fn inline_str(&mut self) -> Result<String> {
        let pos = self.cur.pos();
        let bytes = self.cur.read_cstr_bytes()?;
        charset::decode(self.charset_mib, bytes, pos)
    }

    fn text_fragment(&mut self, tok: u8, out: &mut String) -> Result<()> {
        match tok {
            STR_I => out.push_str(&self.inline_str()?),
            STR_T => {
                let offset = self.cur.read_mb_uint32()?;
                out.push_str(&self.strings.get(offset)?);
            }
            ENTITY => {
                let codepoint = self.cur.read_mb_uint32()?;
                out.push_str(&format!("&#{codepoint};"));
            }
            _ => unreachable!("text_fragment called with a non-text token"),
        }
        Ok(())
    }

    fn extension(&mut self, tok: u8) -> Result<Extension> {
        let slot = tok & TAG_CODE_MASK;
        let value = match tok & 0xC0 {
            0x40 => ExtValue::Str(self.inline_str()?),
            0x80 => ExtValue::Int(self.cur.read_mb_uint32()?),
            _ => ExtValue::Byte,
        };
        Ok(Extension { slot, value })
    }
}

impl<'a> Iterator for Document<'a> {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Result<Node>> {
        if self.finished {
            return None;
        }
        match self.read_node() {
            Ok(Some(node)) => Some(Ok(node)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
