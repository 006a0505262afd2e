// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! The block/section model every parser plugs into.
//!
//! A block is a four-CC plus an ordered set of sections; a section owns raw
//! bytes, a coding, an optional name and (once parsed) typed content. The
//! section walks a fixed ladder of states:
//!
//! ```text
//! Unread ──get_raw──▶ RawLoaded ──parse──▶ Parsed ──mutate──▶ DirtyParsed
//!                                                               │ prepare
//!                                                               ▼
//!                                                          RawReprepared
//! ```
//!
//! Parsing is allowed to fail per-section: the section keeps its raw bytes,
//! latches `parse_failed`, and every later prepare writes those original
//! bytes back out untouched. That one rule is what makes whole-file
//! round-trips survive blocks we cannot interpret.
//!
//! There is no attribute forwarding to an "active" section — callers name
//! the section they mean, or use [`Block::default_section_idx`] which picks
//! the section whose index has the smallest absolute value.

pub mod bdpw;
pub mod dfds;
pub mod dthp;
pub mod heap;
pub mod leaf;
pub mod libn;
pub mod lvsr;
pub mod registry;
pub mod tm80;
pub mod vctp;
pub mod vers;
pub mod vicd;

use log::warn;

use crate::coding::{self, BlockCoding};
use crate::container::header::{ident_str, SectionStart, NO_NAME};
use crate::error::{LvError, Result};
use crate::path::PathObject;
use crate::version::Version;

pub use registry::BlockKind;

/// Section lifecycle state. See the module docs for the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SectionState {
    #[default]
    Unread,
    RawLoaded,
    Parsed,
    DirtyParsed,
    RawReprepared,
}

/// How a section's content is stored when exported to XML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageFormat {
    /// Parsed content becomes an XML subtree of the Section element.
    #[default]
    Inline,
    /// Parsed content goes to a sibling `.xml` file.
    XmlFile,
    /// Raw bytes go to a sibling `.bin` file.
    Bin,
}

impl StorageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageFormat::Inline => "inline",
            StorageFormat::XmlFile => "xml",
            StorageFormat::Bin => "bin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "inline" => Some(StorageFormat::Inline),
            "xml" => Some(StorageFormat::XmlFile),
            "bin" => Some(StorageFormat::Bin),
            _ => None,
        }
    }
}

/// Parsed content of a section, one variant per interpreted block family.
/// `Raw` covers both unknown idents and sections degraded by parse failure.
#[derive(Debug, Clone, Default)]
pub enum Content {
    #[default]
    Raw,
    Vers(vers::VersRecord),
    Lvsr(lvsr::SaveRecord),
    Bdpw(bdpw::PasswordRecord),
    Libn(libn::LibNames),
    Vctp(vctp::TypeTable),
    TypeMap(tm80::TypeMap),
    Dfds(dfds::DataFills),
    Dthp(dthp::HeapTypes),
    Heap(heap::HeapContent),
    Vicd(vicd::CodeRecord),
    SingleInt(leaf::SingleInt),
    TdIndex(leaf::TdIndex),
}

/// One section of a block.
#[derive(Debug, Clone, Default)]
pub struct Section {
    pub start: SectionStart,
    /// Absolute file offset of this section's 4-byte data header, if the
    /// section came from a container file.
    pub block_pos: Option<u64>,
    /// Raw bytes as stored (still coded). `None` until loaded.
    pub raw: Option<Vec<u8>>,
    pub state: SectionState,
    pub coding: BlockCoding,
    /// Section name bytes from the name pool, if any.
    pub name: Option<Vec<u8>>,
    /// Structured form of the name when it is a serialized path object.
    pub name_obj: Option<PathObject>,
    pub content: Content,
    pub parse_failed: bool,
    pub storage: StorageFormat,
    /// Plain (decoded) size last observed; feeds print maps and previews.
    pub last_plain_size: Option<usize>,
}

impl Section {
    pub fn new(section_idx: i32) -> Self {
        Section {
            start: SectionStart {
                section_idx,
                ..SectionStart::default()
            },
            ..Section::default()
        }
    }

    pub fn index(&self) -> i32 {
        self.start.section_idx
    }

    pub fn has_name(&self) -> bool {
        self.name.is_some() || self.name_obj.is_some()
    }

    /// Name bytes as they go into the pool (path objects serialize first).
    pub fn name_bytes(&self) -> Option<Vec<u8>> {
        if let Some(obj) = &self.name_obj {
            Some(obj.prepare())
        } else {
            self.name.clone()
        }
    }

    /// Raw bytes, which must already be loaded.
    pub fn raw_bytes(&self) -> Result<&[u8]> {
        self.raw
            .as_deref()
            .ok_or_else(|| LvError::ContainerMalformed("section raw data never loaded".into()))
    }

    /// Decoded (plain) bytes under the section's current coding.
    pub fn plain_bytes(&self, ident: &[u8; 4]) -> Result<Vec<u8>> {
        let raw = self.raw_bytes()?;
        let plain = coding::decode(self.coding, raw, ident, self.index())?;
        Ok(plain)
    }

    /// Replace raw bytes, marking the section as needing a re-parse.
    pub fn set_raw(&mut self, raw: Vec<u8>) {
        self.raw = Some(raw);
        self.state = SectionState::RawLoaded;
        self.parse_failed = false;
    }

    /// Encode plain bytes under the current coding and store them as raw.
    pub fn set_plain(&mut self, plain: &[u8]) -> Result<()> {
        let raw = coding::encode(self.coding, plain)?;
        self.last_plain_size = Some(plain.len());
        self.raw = Some(raw);
        Ok(())
    }

    /// Re-code already-loaded raw bytes from `old` to the current coding.
    /// Used when an XML import was written under a different version's
    /// coding than the one now in force.
    pub fn recode_from(&mut self, old: BlockCoding, ident: &[u8; 4]) -> Result<()> {
        if old == self.coding {
            return Ok(());
        }
        if let Some(raw) = self.raw.take() {
            let plain = coding::decode(old, &raw, ident, self.index())?;
            self.raw = Some(coding::encode(self.coding, &plain)?);
        }
        Ok(())
    }
}

/// A block: ident, dispatch kind and its sections in file order.
#[derive(Debug, Clone)]
pub struct Block {
    pub ident: [u8; 4],
    pub kind: BlockKind,
    /// Sections in the order their start records appeared. Not necessarily
    /// sorted by index; the order is part of byte-exact round-tripping.
    pub sections: Vec<Section>,
}

impl Block {
    pub fn new(ident: [u8; 4]) -> Self {
        Block {
            ident,
            kind: registry::lookup(&ident),
            sections: Vec::new(),
        }
    }

    pub fn pretty_ident(&self) -> String {
        ident_str(&self.ident)
    }

    /// Index of the default section: smallest |section_idx|.
    pub fn default_section_idx(&self) -> Option<i32> {
        self.sections
            .iter()
            .map(Section::index)
            .min_by_key(|idx| (idx.unsigned_abs(), *idx))
    }

    pub fn section(&self, section_idx: i32) -> Option<&Section> {
        self.sections.iter().find(|s| s.index() == section_idx)
    }

    pub fn section_mut(&mut self, section_idx: i32) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.index() == section_idx)
    }

    pub fn default_section(&self) -> Option<&Section> {
        self.default_section_idx().and_then(|i| self.section(i))
    }

    /// Sections that contribute a name to the pool, in file order.
    pub fn named_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.has_name())
    }

    /// Parse one section's plain bytes into typed content.
    ///
    /// Local errors degrade the section to raw passthrough with a warning;
    /// the container keeps reading. A parser that stops short of the payload
    /// end degrades the same way, so `prepare` can never lose trailing bytes
    /// it did not understand.
    pub fn parse_section(&mut self, section_idx: i32, version: &Version) -> Result<()> {
        let ident = self.ident;
        let kind = self.kind;
        let Some(section) = self.section_mut(section_idx) else {
            return Err(LvError::ContainerMalformed(format!(
                "block {} has no section {}",
                ident_str(&ident),
                section_idx
            )));
        };
        if matches!(section.state, SectionState::Parsed | SectionState::DirtyParsed) {
            return Ok(());
        }
        let plain = match section.plain_bytes(&ident) {
            Ok(plain) => plain,
            Err(err) if err.is_section_local() => {
                warn!(
                    "block {} section {}: {}; keeping raw form",
                    ident_str(&ident),
                    section_idx,
                    err
                );
                section.parse_failed = true;
                section.content = Content::Raw;
                section.state = SectionState::Parsed;
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        section.last_plain_size = Some(plain.len());
        let mut reader = crate::codec::Reader::new(&plain);
        match registry::parse(kind, version, &mut reader) {
            Ok(content) => {
                if reader.remaining() > 0 {
                    warn!(
                        "block {} section {}: parser left {} of {} bytes; keeping raw form",
                        ident_str(&ident),
                        section_idx,
                        reader.remaining(),
                        plain.len()
                    );
                    section.parse_failed = true;
                    section.content = Content::Raw;
                } else {
                    section.content = content;
                    section.parse_failed = false;
                }
                section.state = SectionState::Parsed;
                Ok(())
            }
            Err(err) if err.is_section_local() || matches!(err, LvError::ContainerMalformed(_)) => {
                warn!(
                    "block {} section {} parse failed: {}; keeping raw form",
                    ident_str(&ident),
                    section_idx,
                    err
                );
                section.parse_failed = true;
                section.content = Content::Raw;
                section.state = SectionState::Parsed;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Re-serialize one section's content to raw bytes.
    ///
    /// A failed section keeps its original raw form. A healthy section runs
    /// through `prepare`, the `expected_size` self-check, and re-encoding
    /// under the section's coding.
    pub fn update_section_data(&mut self, section_idx: i32, version: &Version) -> Result<()> {
        let ident = self.ident;
        let kind = self.kind;
        let Some(section) = self.section_mut(section_idx) else {
            return Err(LvError::ContainerMalformed(format!(
                "block {} has no section {}",
                ident_str(&ident),
                section_idx
            )));
        };
        if section.parse_failed || matches!(section.content, Content::Raw) {
            if section.raw.is_none() {
                return Err(LvError::ContainerMalformed(format!(
                    "block {} section {} has neither parsed content nor raw data",
                    ident_str(&ident),
                    section_idx
                )));
            }
            if section.parse_failed {
                warn!(
                    "block {} section {} left in original raw form",
                    ident_str(&ident),
                    section_idx
                );
            }
            return Ok(());
        }
        let plain = registry::prepare(kind, version, &section.content)?;
        if let Some(expected) = registry::expected_size(kind, version, &section.content) {
            if plain.len() != expected {
                return Err(LvError::PrepareSizeMismatch {
                    ident: ident_str(&ident),
                    section: section_idx,
                    got: plain.len(),
                    expected,
                });
            }
        }
        section.set_plain(&plain)?;
        section.state = SectionState::RawReprepared;
        Ok(())
    }

    /// Refresh raw data for every section of this block.
    pub fn update_data(&mut self, version: &Version) -> Result<()> {
        let indices: Vec<i32> = self.sections.iter().map(Section::index).collect();
        for idx in indices {
            self.parse_section(idx, version)?;
            self.update_section_data(idx, version)?;
        }
        Ok(())
    }

    /// Apply the registry's version-sensitive coding policy and preferred
    /// XML storage to all sections.
    pub fn apply_default_coding(&mut self, version: &Version) {
        let coding = registry::default_coding(self.kind, version);
        let storage = registry::default_storage(self.kind);
        for section in &mut self.sections {
            section.coding = coding;
            section.storage = storage;
        }
    }

    /// Hex preview of the default section, `list`-command style: up to 31
    /// bytes, with `..` marking truncation.
    pub fn preview(&self) -> String {
        let Some(section) = self.default_section() else {
            return String::from("<no sections>");
        };
        let Some(raw) = section.raw.as_deref() else {
            return String::from("<unread>");
        };
        if raw.len() > 32 {
            format!("<{}..>", hex::encode(&raw[..31]))
        } else {
            format!("<{}>", hex::encode(raw))
        }
    }
}

/// Resolve a section name from the pool bytes at `name_offset`.
pub fn name_from_pool(pool: &[u8], name_offset: u32) -> Result<Option<Vec<u8>>> {
    if name_offset == NO_NAME {
        return Ok(None);
    }
    let off = name_offset as usize;
    let len = *pool
        .get(off)
        .ok_or_else(|| LvError::ContainerMalformed(format!("name offset {} outside pool", off)))?
        as usize;
    let bytes = pool
        .get(off + 1..off + 1 + len)
        .ok_or_else(|| LvError::ContainerMalformed(format!("name at {} overruns pool", off)))?;
    Ok(Some(bytes.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_section_is_smallest_abs_index() {
        let mut block = Block::new(*b"TEST");
        for idx in [2, -1, 3] {
            block.sections.push(Section::new(idx));
        }
        assert_eq!(block.default_section_idx(), Some(-1));
        block.sections.push(Section::new(0));
        assert_eq!(block.default_section_idx(), Some(0));
    }

    #[test]
    fn tied_abs_index_prefers_negative() {
        // min_by_key on (abs, idx): -1 sorts before 1.
        let mut block = Block::new(*b"TEST");
        block.sections.push(Section::new(1));
        block.sections.push(Section::new(-1));
        assert_eq!(block.default_section_idx(), Some(-1));
    }

    #[test]
    fn name_pool_lookup() {
        let pool = [4, b'v', b'e', b'r', b's', 2, b'h', b'i'];
        assert_eq!(name_from_pool(&pool, 0).unwrap().unwrap(), b"vers");
        assert_eq!(name_from_pool(&pool, 5).unwrap().unwrap(), b"hi");
        assert!(name_from_pool(&pool, NO_NAME).unwrap().is_none());
        assert!(name_from_pool(&pool, 7).is_err());
    }

    #[test]
    fn unknown_ident_parses_as_raw_and_reprepares_untouched() {
        let mut block = Block::new(*b"ZZZZ");
        let mut section = Section::new(0);
        section.set_raw(vec![1, 2, 3, 4, 5]);
        block.sections.push(section);
        let ver = Version::default();
        block.parse_section(0, &ver).unwrap();
        block.update_section_data(0, &ver).unwrap();
        assert_eq!(block.section(0).unwrap().raw.as_deref(), Some(&[1, 2, 3, 4, 5][..]));
    }

    #[test]
    fn short_parse_degrades_to_raw() {
        let mut block = Block::new(*b"BDSE");
        let mut section = Section::new(0);
        // SingleInt wants exactly 4 bytes; give it six.
        section.set_raw(vec![0, 0, 0, 7, 9, 9]);
        block.sections.push(section);
        let ver = Version::default();
        block.parse_section(0, &ver).unwrap();
        let section = block.section(0).unwrap();
        assert!(section.parse_failed);
        assert!(matches!(section.content, Content::Raw));
        // And prepare keeps the original six bytes.
        block.update_section_data(0, &ver).unwrap();
        assert_eq!(block.section(0).unwrap().raw.as_deref(), Some(&[0, 0, 0, 7, 9, 9][..]));
    }
}
