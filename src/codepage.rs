//! Codepage compilation: caller-supplied namespace descriptions become one
//! immutable lookup table shared by every Reader and Writer.

use crate::{Result, WbxmlError};
use std::collections::HashMap;

/// One namespace worth of tag and attribute assignments.
///
/// Tag and attribute codes are 16-bit values whose high byte is the codepage
/// number and whose low byte is the in-page code, so a single description can
/// span several pages.
#[derive(Debug, Clone)]
pub struct CodepageDef {
    pub namespace: String,
    pub tags: Vec<(String, u16)>,
    pub attrs: Vec<AttrDef>,
}

/// An attribute-start or attribute-value assignment within a namespace.
#[derive(Debug, Clone)]
pub struct AttrDef {
    pub name: String,
    pub value: u16,
    /// Fixed text this code contributes to the attribute value, if any.
    pub data: Option<String>,
}

/// Normalized attribute descriptor, as returned by lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrDescriptor {
    pub name: String,
    pub data: Option<String>,
}

/// Compiled reverse-lookup tables: codepage number to namespace name, tag
/// code to tag name, attribute code to descriptor. Built once, immutable for
/// the life of any Reader or Writer that uses it.
#[derive(Debug, Clone, Default)]
pub struct CodepageTable {
    ns_names: HashMap<u8, String>,
    ns_numbers: HashMap<String, u8>,
    tag_names: HashMap<u16, String>,
    attr_data: HashMap<u16, AttrDescriptor>,
}

impl CodepageTable {
    /// A table with no assignments. Coded tags still decode (they resolve to
    /// placeholder names at the point of use), coded attribute values do not.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile a caller description into lookup tables.
    ///
    /// Idempotent for a given input; fails if two namespaces claim the same
    /// codepage number or two assignments claim the same code.
    pub fn compile(defs: &[CodepageDef]) -> Result<Self> {
        let mut table = Self::default();

        for def in defs {
            for (tag_name, code) in &def.tags {
                table.claim_page(*code >> 8, &def.namespace)?;
                if table.tag_names.insert(*code, tag_name.clone()).is_some() {
                    return Err(WbxmlError::writer(format!(
                        "tag code 0x{code:04X} assigned twice (namespace {})",
                        def.namespace
                    )));
                }
            }
            for attr in &def.attrs {
                table.claim_page(attr.value >> 8, &def.namespace)?;
                let descriptor = AttrDescriptor {
                    name: attr.name.clone(),
                    data: attr.data.clone(),
                };
                if table.attr_data.insert(attr.value, descriptor).is_some() {
                    return Err(WbxmlError::writer(format!(
                        "attribute code 0x{:04X} assigned twice (namespace {})",
                        attr.value, def.namespace
                    )));
                }
            }
        }

        Ok(table)
    }

    fn claim_page(&mut self, page: u16, namespace: &str) -> Result<()> {
        let page = page as u8;
        match self.ns_names.get(&page) {
            Some(owner) if owner != namespace => Err(WbxmlError::writer(format!(
                "codepage {page} claimed by both {owner} and {namespace}"
            ))),
            Some(_) => Ok(()),
            None => {
                self.ns_names.insert(page, namespace.to_string());
                self.ns_numbers.entry(namespace.to_string()).or_insert(page);
                Ok(())
            }
        }
    }

    pub fn contains_page(&self, page: u8) -> bool {
        self.ns_names.contains_key(&page)
    }

    pub fn namespace_name(&self, page: u8) -> Option<&str> {
        self.ns_names.get(&page).map(String::as_str)
    }

    /// First codepage number claimed by a namespace.
    pub fn namespace_number(&self, namespace: &str) -> Option<u8> {
        self.ns_numbers.get(namespace).copied()
    }

    pub fn tag_name(&self, code: u16) -> Option<&str> {
        self.tag_names.get(&code).map(String::as_str)
    }

    pub fn attr_descriptor(&self, code: u16) -> Option<&AttrDescriptor> {
        self.attr_data.get(&code)
    }
}
