//! Debug dump that renders a WBXML buffer as human-readable XML.
//!
//! The output is for inspection, not re-encoding. Opaque payloads come out
//! base64-encoded, extension tokens become `<ext>` elements, and coded names
//! the codepage table does not know render as hex placeholders.

use crate::codepage::CodepageTable;
use crate::reader::{ElementKind, ExtValue, Node, Reader, TagRef};
use crate::{Result, WbxmlError, charset};
use base64::Engine;
use quick_xml::Writer as XmlWriter;
use quick_xml::events::{BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use std::fs;
use std::io::{self, Read, Write};

fn attr_display_name(name: &TagRef, pages: &CodepageTable) -> String {
    match name {
        TagRef::Named(name) => name.clone(),
        TagRef::Coded(code) => match pages.attr_descriptor(*code) {
            Some(descriptor) => descriptor.name.clone(),
            None => format!("ATTR_{:02X}_{:02X}", code >> 8, code & 0xFF),
        },
    }
}

/// WBXML to debug-XML converter.
///
/// # Examples
///
/// ```no_run
/// use wbxml::XmlDumper;
///
/// let data = std::fs::read("input.wbxml").unwrap();
/// let xml = XmlDumper::new().convert_bytes(&data).unwrap();
/// println!("{xml}");
/// ```
#[derive(Default)]
pub struct XmlDumper<'p> {
    pages: Option<&'p CodepageTable>,
    keep_going: bool,
}

impl<'p> XmlDumper<'p> {
    /// A dumper with no codepage table; coded names render as placeholders.
    pub fn new() -> XmlDumper<'static> {
        XmlDumper {
            pages: None,
            keep_going: false,
        }
    }

    /// A dumper that resolves coded names through `pages`.
    pub fn with_pages(pages: &'p CodepageTable) -> Self {
        Self {
            pages: Some(pages),
            keep_going: false,
        }
    }

    /// Stop at the first malformed token and emit what decoded so far,
    /// instead of failing the whole conversion.
    pub fn keep_going(mut self, yes: bool) -> Self {
        self.keep_going = yes;
        self
    }

    /// Convert an in-memory WBXML buffer to an XML string.
    pub fn convert_bytes(&self, data: &[u8]) -> Result<String> {
        let empty = CodepageTable::empty();
        let pages = self.pages.unwrap_or(&empty);
        let reader = Reader::new(data, pages)?;

        let mut xw = XmlWriter::new(Vec::new());
        xw.write_event(Event::Decl(BytesDecl::new(
            "1.0",
            charset::name(reader.charset()),
            None,
        )))?;

        let mut open: Vec<String> = Vec::new();
        for node in reader.document() {
            let node = match node {
                Ok(node) => node,
                Err(e) if self.keep_going => {
                    eprintln!("Warning: stopping early: {e}");
                    break;
                }
                Err(e) => return Err(e),
            };
            match node {
                Node::Element(el) => {
                    let name = el.tag.display_name(pages);
                    let mut start = BytesStart::new(name.clone());
                    for attr in &el.attributes {
                        start.push_attribute((
                            attr_display_name(&attr.name, pages).as_str(),
                            attr.value.to_text().as_str(),
                        ));
                    }
                    match el.kind {
                        ElementKind::Stag => {
                            xw.write_event(Event::Start(start))?;
                            open.push(name);
                        }
                        ElementKind::Tag => xw.write_event(Event::Empty(start))?,
                    }
                }
                Node::EndTag => {
                    // The reader never emits an unmatched end tag.
                    if let Some(name) = open.pop() {
                        xw.write_event(Event::End(BytesEnd::new(name)))?;
                    }
                }
                Node::Text(text) => {
                    xw.write_event(Event::Text(BytesText::new(&text)))?;
                }
                Node::Opaque(bytes) => {
                    let mut start = BytesStart::new("opaque");
                    start.push_attribute(("encoding", "base64"));
                    xw.write_event(Event::Start(start))?;
                    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                    xw.write_event(Event::Text(BytesText::new(&encoded)))?;
                    xw.write_event(Event::End(BytesEnd::new("opaque")))?;
                }
                Node::Extension(ext) => {
                    let mut start = BytesStart::new("ext");
                    let slot = ext.slot.to_string();
                    start.push_attribute(("slot", slot.as_str()));
                    match &ext.value {
                        ExtValue::Str(s) => {
                            start.push_attribute(("subtype", "string"));
                            xw.write_event(Event::Start(start))?;
                            xw.write_event(Event::Text(BytesText::new(s)))?;
                            xw.write_event(Event::End(BytesEnd::new("ext")))?;
                        }
                        ExtValue::Int(v) => {
                            start.push_attribute(("subtype", "integer"));
                            let hex = hex::encode_upper(v.to_be_bytes());
                            start.push_attribute(("hex", hex.as_str()));
                            xw.write_event(Event::Start(start))?;
                            xw.write_event(Event::Text(BytesText::new(&v.to_string())))?;
                            xw.write_event(Event::End(BytesEnd::new("ext")))?;
                        }
                        ExtValue::Byte => {
                            start.push_attribute(("subtype", "byte"));
                            xw.write_event(Event::Empty(start))?;
                        }
                    }
                }
                Node::Pi(pi) => {
                    let target = attr_display_name(&pi.target, pages);
                    let data = pi.data.to_text();
                    let content = if data.is_empty() {
                        target
                    } else {
                        format!("{target} {data}")
                    };
                    xw.write_event(Event::PI(BytesPI::new(content)))?;
                }
            }
        }

        // Only reachable with keep_going: close whatever is still open.
        for name in open.drain(..).rev() {
            xw.write_event(Event::End(BytesEnd::new(name)))?;
        }

        String::from_utf8(xw.into_inner())
            .map_err(|_| WbxmlError::parse("invalid UTF-8 in dump output", 0))
    }

    /// Convert a WBXML file to an XML file. Converting a file onto itself
    /// reads it fully first, so in-place conversion is safe.
    pub fn convert_file(&self, input_path: &str, output_path: &str) -> Result<()> {
        let xml = self.convert_bytes(&fs::read(input_path)?)?;
        fs::write(output_path, xml)?;
        Ok(())
    }

    /// Convert WBXML from stdin to XML on stdout.
    pub fn convert_stdin_stdout(&self) -> Result<()> {
        let xml = self.convert_bytes(&read_stdin()?)?;
        io::stdout().write_all(xml.as_bytes())?;
        Ok(())
    }

    /// Convert WBXML from stdin to an XML file.
    pub fn convert_stdin_to_file(&self, output_path: &str) -> Result<()> {
        let xml = self.convert_bytes(&read_stdin()?)?;
        fs::write(output_path, xml)?;
        Ok(())
    }

    /// Convert a WBXML file to XML on stdout.
    pub fn convert_file_to_stdout(&self, input_path: &str) -> Result<()> {
        let xml = self.convert_bytes(&fs::read(input_path)?)?;
        io::stdout().write_all(xml.as_bytes())?;
        Ok(())
    }
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut data = Vec::new();
    io::stdin().lock().read_to_end(&mut data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codepage::{AttrDef, CodepageDef};
    use crate::reader::ExtValue;
    use crate::writer::{Attr, Writer};
    use crate::charset;

    fn pages() -> CodepageTable {
        CodepageTable::compile(&[CodepageDef {
            namespace: "AirSync".into(),
            tags: vec![("Sync".into(), 0x0005), ("Collections".into(), 0x0006)],
            attrs: vec![AttrDef {
                name: "Version".into(),
                value: 0x0005,
                data: None,
            }],
        }])
        .unwrap()
    }

    fn sample() -> Vec<u8> {
        let mut writer = Writer::new("1.3", 1, charset::UTF_8, &[]).unwrap();
        writer
            .stag_attrs(0x0005, &[Attr::new(0x0005, "4.0")]).unwrap()
            .text_tag(0x0006, "a<b").unwrap()
            .opaque(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap()
            .ext(1, ExtValue::Int(300)).unwrap()
            .etag(None).unwrap();
        writer.into_bytes()
    }

    #[test]
    fn named_dump_uses_codepage_names_and_escapes_text() {
        let pages = pages();
        let xml = XmlDumper::with_pages(&pages).convert_bytes(&sample()).unwrap();
        assert!(xml.contains("<Sync Version=\"4.0\">"));
        assert!(xml.contains("<Collections>a&lt;b</Collections>"));
        assert!(xml.contains("</Sync>"));
    }

    #[test]
    fn unnamed_dump_falls_back_to_placeholders() {
        let xml = XmlDumper::new().convert_bytes(&sample()).unwrap();
        assert!(xml.contains("<TAG_00_05 ATTR_00_05=\"4.0\">"));
        assert!(xml.contains("<TAG_00_06>"));
    }

    #[test]
    fn opaque_renders_as_base64() {
        let xml = XmlDumper::new().convert_bytes(&sample()).unwrap();
        assert!(xml.contains("<opaque encoding=\"base64\">3q2+7w==</opaque>"));
    }

    #[test]
    fn integer_extension_renders_decimal_and_hex() {
        let xml = XmlDumper::new().convert_bytes(&sample()).unwrap();
        assert!(xml.contains("slot=\"1\""));
        assert!(xml.contains("subtype=\"integer\""));
        assert!(xml.contains("hex=\"0000012C\""));
        assert!(xml.contains(">300</ext>"));
    }

    #[test]
    fn malformed_input_fails_unless_keep_going() {
        let pages = pages();
        let mut truncated = sample();
        truncated.truncate(truncated.len() - 1); // drop the final END
        assert!(XmlDumper::with_pages(&pages).convert_bytes(&truncated).is_err());

        let xml = XmlDumper::with_pages(&pages)
            .keep_going(true)
            .convert_bytes(&truncated)
            .unwrap();
        // the open root is closed for us
        assert!(xml.contains("</Sync>"));
    }
}
