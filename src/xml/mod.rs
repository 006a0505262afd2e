// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! XML transport: a container in, a container out.
//!
//! The root element is `RSRC` (FormatVersion, Type or TypeHex when the
//! four-CC has non-printables, Encoding, and the legacy Int1/Int2 for LLBs
//! and pre-7.0 files). Each block becomes an element named by its pretty
//! ident holding `Section` children; each section declares how its content
//! is stored:
//!
//! * `Format="inline"` — parsed content as a subtree;
//! * `Format="xml"`    — parsed content in a sibling file under a
//!   `SectionRoot` root, referenced by relative name;
//! * `Format="bin"`    — section bytes in a sibling file. The file holds
//!   the *plain* (decoded) bytes; only a section whose decode failed keeps
//!   its coded bytes, marked by a `Coding` attribute naming their tag.
//!
//! A failed section always exports as `bin`; `dump` mode forces `bin` for
//! everything. A `SpecialOrder/Names` child reproduces the names-order
//! hint so shuffled name pools survive the trip. On import, a section
//! re-encodes when the coding implied by the file version now in force
//! differs from the tag its bytes came in under: decode under the old
//! tag, encode under the new.
//!
//! Import builds a small DOM first; per-block schemas are strict and any
//! unexpected tag or attribute is an [`LvError::XmlSchemaViolation`] fatal
//! for that block.

use std::fs;
use std::io::{BufReader, Write as _};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::block::{
    bdpw, dfds, dthp, heap, leaf, libn, lvsr, tm80, vctp, vers, vicd, Block, BlockKind, Content,
    Section, StorageFormat,
};
use crate::container::header::{ident_from_pretty, ident_str, FileType, NO_NAME};
use crate::container::{Config, Container};
use crate::error::{LvError, Result};
use crate::path::{PathKind, PathObject};
use crate::typedesc::{TdBody, TdKind, TypeDesc};
use crate::version::{Stage, Version};

// ============================================================================
// SMALL DOM
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct XmlElem {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlElem>,
    pub text: String,
}

impl XmlElem {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElem> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.attr(key).ok_or_else(|| {
            LvError::XmlSchemaViolation(format!("<{}> missing attribute {}", self.name, key))
        })
    }
}

fn parse_int(s: &str) -> Result<i64> {
    let s = s.trim();
    let (digits, radix, neg) = if let Some(rest) = s.strip_prefix("-0x") {
        (rest, 16, true)
    } else if let Some(rest) = s.strip_prefix("0x") {
        (rest, 16, false)
    } else if let Some(rest) = s.strip_prefix('-') {
        (rest, 10, true)
    } else {
        (s, 10, false)
    };
    let v = i64::from_str_radix(digits, radix)
        .map_err(|_| LvError::XmlSchemaViolation(format!("bad integer '{}'", s)))?;
    Ok(if neg { -v } else { v })
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    hex::decode(s.trim()).map_err(|_| LvError::XmlSchemaViolation(format!("bad hex '{}'", s)))
}

fn parse_md5(s: &str) -> Result<[u8; 16]> {
    let bytes = parse_hex_bytes(s)?;
    bytes
        .try_into()
        .map_err(|_| LvError::XmlSchemaViolation("hash is not 16 bytes".into()))
}

fn parse_u16_list(s: &str) -> Result<Vec<u16>> {
    s.split_whitespace()
        .map(|tok| {
            parse_int(tok).and_then(|v| {
                u16::try_from(v)
                    .map_err(|_| LvError::XmlSchemaViolation(format!("index '{}' too wide", tok)))
            })
        })
        .collect()
}

fn parse_u32_list(s: &str) -> Result<Vec<u32>> {
    s.split_whitespace()
        .map(|tok| {
            parse_int(tok).and_then(|v| {
                u32::try_from(v)
                    .map_err(|_| LvError::XmlSchemaViolation(format!("value '{}' too wide", tok)))
            })
        })
        .collect()
}

fn join_u16(values: &[u16]) -> String {
    values
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn join_u32(values: &[u32]) -> String {
    values
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read a whole XML file into the DOM.
pub fn read_dom(path: &Path) -> Result<XmlElem> {
    let file = fs::File::open(path)?;
    let mut reader = quick_xml::Reader::from_reader(BufReader::new(file));
    let mut buf = Vec::new();
    let mut stack: Vec<XmlElem> = Vec::new();
    let mut root: Option<XmlElem> = None;

    fn start_elem(e: &BytesStart<'_>) -> Result<XmlElem> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| {
                LvError::XmlSchemaViolation(format!("bad attribute syntax: {}", err))
            })?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| LvError::XmlSchemaViolation(format!("bad attribute value: {}", err)))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(XmlElem {
            name,
            attrs,
            ..XmlElem::default()
        })
    }

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => stack.push(start_elem(&e)?),
            Event::Empty(e) => {
                let elem = start_elem(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(elem),
                    None => root = Some(elem),
                }
            }
            Event::End(_) => {
                let elem = stack
                    .pop()
                    .ok_or_else(|| LvError::XmlSchemaViolation("unbalanced end tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(elem),
                    None => root = Some(elem),
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|err| LvError::XmlSchemaViolation(format!("bad text: {}", err)))?;
                if let Some(parent) = stack.last_mut() {
                    parent.text.push_str(&text);
                }
            }
            Event::Eof => break,
            // Declarations, comments and processing instructions carry no
            // imported state.
            _ => {}
        }
        buf.clear();
    }
    root.ok_or_else(|| LvError::XmlSchemaViolation("empty XML document".into()))
}

// ============================================================================
// EXPORT
// ============================================================================

type XW = quick_xml::Writer<Vec<u8>>;

fn empty_with<'a>(name: &'a str, attrs: &[(&str, String)]) -> BytesStart<'a> {
    let mut e = BytesStart::new(name);
    for (k, v) in attrs {
        e.push_attribute((*k, v.as_str()));
    }
    e
}

fn write_empty(w: &mut XW, name: &str, attrs: &[(&str, String)]) -> Result<()> {
    w.write_event(Event::Empty(empty_with(name, attrs)))?;
    Ok(())
}

fn write_comment(w: &mut XW, text: &str) -> Result<()> {
    w.write_event(Event::Comment(BytesText::new(&format!(" {} ", text))))?;
    Ok(())
}

/// File-name base for side files of one section:
/// `<xmlstem>_<IDENT>` plus the section index when there are several.
fn files_base(
    xml_path: &Path,
    block: &Block,
    section: &Section,
    keep_names: bool,
    textenc: crate::textenc::TextEncoding,
) -> PathBuf {
    let mut base = xml_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rsrc".to_string());
    if keep_names {
        if let Some(name) = section.name_bytes() {
            if name.len() >= 2 && !PathObject::sniff(&name) {
                let decoded = textenc.decode(&name);
                let stem = decoded.rsplit_once('.').map_or(decoded.as_str(), |(s, _)| s);
                base = stem.to_string();
            }
        }
    }
    let mut base: String = base
        .chars()
        .map(|c| {
            if c.is_control() || "\\/*?:<>|".contains(c) {
                '-'
            } else {
                c
            }
        })
        .collect();
    if base.starts_with('-') {
        base.replace_range(0..1, "m");
    } else if base.starts_with('+') {
        base.replace_range(0..1, "p");
    }
    let ident = block.pretty_ident();
    let suffix = if block.sections.len() == 1 {
        ident
    } else if section.index() >= 0 {
        format!("{}{}", ident, section.index())
    } else {
        format!("{}m{}", ident, -section.index())
    };
    let name = format!("{}_{}", base, suffix);
    xml_path.with_file_name(name)
}

/// Export a container to XML plus side files.
///
/// `simple_bin` is the `dump` command: every section goes to a BIN side
/// file with no content parsing on the way out.
pub fn export_file<R>(container: &mut Container<R>, xml_path: &Path, simple_bin: bool) -> Result<()> {
    prepare_export(container)?;

    let mut w = quick_xml::Writer::new_with_indent(Vec::new(), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let version = container.version();
    let textenc = container.config.textenc;
    let mut root = BytesStart::new("RSRC");
    root.push_attribute(("FormatVersion", container.format_version.to_string().as_str()));
    let rsrc_type = container.rsrc_type;
    if rsrc_type.iter().all(|b| (b' '..=b'~').contains(b)) {
        root.push_attribute(("Type", String::from_utf8_lossy(&rsrc_type).as_ref()));
    } else {
        root.push_attribute(("TypeHex", hex::encode(rsrc_type).as_str()));
    }
    root.push_attribute(("Encoding", textenc.label()));
    let legacy_ints = container.file_type() == FileType::Llb || !version.at_least(7, 0, 0, 0);
    if legacy_ints {
        root.push_attribute(("Int1", format!("0x{:08X}", container.list_header.int1).as_str()));
        root.push_attribute(("Int2", format!("0x{:08X}", container.list_header.int2).as_str()));
    }
    w.write_event(Event::Start(root))?;

    let legacy_int5 = container.file_type() == FileType::Llb || !version.at_least(8, 0, 0, 0);
    for block_idx in 0..container.blocks.len() {
        export_block(container, block_idx, &mut w, xml_path, simple_bin, legacy_int5)?;
    }

    if let Some(order) = &container.names_order {
        w.write_event(Event::Start(BytesStart::new("SpecialOrder")))?;
        write_comment(&mut w, "Provides information on how items were ordered in the RSRC file")?;
        w.write_event(Event::Start(BytesStart::new("Names")))?;
        for (ident, section_idx) in order {
            write_empty(
                &mut w,
                &ident_str(ident),
                &[("Index", section_idx.to_string())],
            )?;
        }
        w.write_event(Event::End(BytesEnd::new("Names")))?;
        w.write_event(Event::End(BytesEnd::new("SpecialOrder")))?;
    }

    w.write_event(Event::End(BytesEnd::new("RSRC")))?;
    let mut file = fs::File::create(xml_path)?;
    file.write_all(&w.into_inner())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Pre-export pass: make sure BDPW is parametrized (password recognized,
/// salt located) so the XML carries reconstructible fields.
fn prepare_export<R>(container: &mut Container<R>) -> Result<()> {
    let Some(block) = container.block(b"BDPW") else {
        return Ok(());
    };
    let indices: Vec<i32> = block.sections.iter().map(Section::index).collect();
    for section_idx in indices {
        let scan = match container.bdpw_scan(section_idx) {
            Ok(scan) => scan,
            Err(err) => {
                warn!("BDPW section {} not fully parametrized: {}", section_idx, err);
                continue;
            }
        };
        let Some(block) = container.block_mut(b"BDPW") else {
            break;
        };
        if let Some(Section {
            content: Content::Bdpw(rec),
            ..
        }) = block.section_mut(section_idx)
        {
            if rec.password.is_none() {
                rec.password = bdpw::recognize_password(&rec.password_md5).map(str::to_string);
            }
            if let Some(scan) = scan {
                rec.salt = Some(scan.salt);
                rec.salt_source = scan.source;
                rec.salt_td_flat_idx = scan.td_flat_idx;
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn export_block<R>(
    container: &Container<R>,
    block_idx: usize,
    w: &mut XW,
    xml_path: &Path,
    simple_bin: bool,
    legacy_int5: bool,
) -> Result<()> {
    let block = &container.blocks[block_idx];
    let textenc = container.config.textenc;
    let pretty = block.pretty_ident();
    w.write_event(Event::Start(BytesStart::new(pretty.as_str())))?;
    for section in &block.sections {
        let mut elem = BytesStart::new("Section");
        elem.push_attribute(("Index", section.index().to_string().as_str()));
        if let Some(name) = &section.name {
            if section.name_obj.is_none() {
                elem.push_attribute(("Name", textenc.decode(name).as_str()));
            }
        }
        if legacy_int5 {
            elem.push_attribute(("Int5", format!("0x{:08X}", section.start.int5).as_str()));
        }

        let storage = if simple_bin || section.parse_failed || matches!(section.content, Content::Raw)
        {
            StorageFormat::Bin
        } else if container.config.raw_connectors && block.kind == BlockKind::Vctp {
            StorageFormat::Bin
        } else {
            section.storage
        };
        elem.push_attribute(("Format", storage.as_str()));

        let base = files_base(xml_path, block, section, container.config.keep_names, textenc);
        match storage {
            StorageFormat::Bin => {
                let file = base.with_extension("bin");
                // Side files hold plain bytes, so import can re-encode
                // under whatever the importing version demands. A section
                // whose decode failed keeps its coded bytes, labeled so
                // import restores them untouched.
                let (bytes, coded_as) = match section.plain_bytes(&block.ident) {
                    Ok(plain) => (plain, None),
                    Err(_) => (section.raw_bytes()?.to_vec(), Some(section.coding)),
                };
                fs::write(&file, &bytes)?;
                if let Some(coding) = coded_as {
                    elem.push_attribute(("Coding", coding.as_str()));
                }
                let fname = file.file_name().unwrap_or_default().to_string_lossy();
                elem.push_attribute(("File", fname.as_ref()));
                write_section_shell::<R>(w, elem, section, textenc, None)?;
            }
            StorageFormat::XmlFile => {
                let file = base.with_extension("xml");
                let mut side = quick_xml::Writer::new_with_indent(Vec::new(), b' ', 2);
                side.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
                side.write_event(Event::Start(BytesStart::new("SectionRoot")))?;
                export_content(container, block, section, &mut side)?;
                side.write_event(Event::End(BytesEnd::new("SectionRoot")))?;
                fs::write(&file, side.into_inner())?;
                let fname = file.file_name().unwrap_or_default().to_string_lossy();
                elem.push_attribute(("File", fname.as_ref()));
                write_section_shell::<R>(w, elem, section, textenc, None)?;
            }
            StorageFormat::Inline => {
                write_section_shell(w, elem, section, textenc, Some((container, block)))?;
            }
        }
    }
    w.write_event(Event::End(BytesEnd::new(pretty.as_str())))?;
    Ok(())
}

/// Write the Section element: name object child, then (for inline) the
/// content subtree.
fn write_section_shell<R>(
    w: &mut XW,
    elem: BytesStart<'_>,
    section: &Section,
    textenc: crate::textenc::TextEncoding,
    inline: Option<(&Container<R>, &Block)>,
) -> Result<()> {
    let self_closing = section.name_obj.is_none() && inline.is_none();
    if self_closing {
        w.write_event(Event::Empty(elem))?;
        return Ok(());
    }
    w.write_event(Event::Start(elem))?;
    if let Some(obj) = &section.name_obj {
        let mut name_elem = BytesStart::new("NameObject");
        name_elem.push_attribute(("Kind", obj.kind.to_wire().to_string().as_str()));
        w.write_event(Event::Start(name_elem))?;
        for comp in &obj.components {
            w.write_event(Event::Start(BytesStart::new("Component")))?;
            w.write_event(Event::Text(BytesText::new(&textenc.decode(comp))))?;
            w.write_event(Event::End(BytesEnd::new("Component")))?;
        }
        w.write_event(Event::End(BytesEnd::new("NameObject")))?;
    }
    if let Some((container, block)) = inline {
        export_content(container, block, section, w)?;
    }
    w.write_event(Event::End(BytesEnd::new("Section")))?;
    Ok(())
}

fn export_content<R>(
    container: &Container<R>,
    block: &Block,
    section: &Section,
    w: &mut XW,
) -> Result<()> {
    let textenc = container.config.textenc;
    match &section.content {
        Content::Vers(rec) => export_version_elem(w, "Version", &rec.version, Some(rec), textenc),
        Content::Lvsr(rec) => export_lvsr(w, rec),
        Content::Bdpw(rec) => export_bdpw(w, rec),
        Content::Libn(rec) => {
            for name in &rec.names {
                w.write_event(Event::Start(BytesStart::new("Library")))?;
                w.write_event(Event::Text(BytesText::new(&textenc.decode(name))))?;
                w.write_event(Event::End(BytesEnd::new("Library")))?;
            }
            Ok(())
        }
        Content::Vctp(table) => export_vctp(w, table, textenc),
        Content::TypeMap(map) => export_tm(container, w, map),
        Content::Dfds(fills) => export_dfds(container, w, fills),
        Content::Dthp(rec) => export_dthp(container, w, rec),
        Content::Heap(rec) => {
            // Heaps normally go to side files; inline is the hex fallback.
            write_empty(
                w,
                "HeapData",
                &[
                    ("Hex", hex::encode(&rec.content)),
                    ("TrailingHex", hex::encode(&rec.trailing)),
                ],
            )
        }
        Content::Vicd(rec) => write_empty(w, "CodeData", &[("Hex", hex::encode(&rec.raw))]),
        Content::SingleInt(rec) => write_empty(w, "Value", &[("Int", rec.value.to_string())]),
        Content::TdIndex(rec) => write_empty(w, "TypeDesc", &[("TypeID", rec.type_id.to_string())]),
        Content::Raw => Err(LvError::XmlSchemaViolation(
            "raw section cannot be exported inline".into(),
        )),
    }
}

fn export_version_elem(
    w: &mut XW,
    tag: &str,
    version: &Version,
    vers_rec: Option<&vers::VersRecord>,
    textenc: crate::textenc::TextEncoding,
) -> Result<()> {
    let mut attrs = vec![
        ("Major", version.major.to_string()),
        ("Minor", version.minor.to_string()),
        ("Bugfix", version.bugfix.to_string()),
        ("Stage", version.stage.as_str().to_string()),
        ("Build", version.build.to_string()),
        ("Flags", format!("0x{:X}", version.flags)),
    ];
    if let Some(rec) = vers_rec {
        attrs.push(("Text", textenc.decode(&rec.version_text)));
        attrs.push(("Info", textenc.decode(&rec.version_info)));
        attrs.push(("Comment", textenc.decode(&rec.comment)));
    }
    write_empty(w, tag, &attrs)
}

fn export_lvsr(w: &mut XW, rec: &lvsr::SaveRecord) -> Result<()> {
    export_version_elem(w, "Version", &rec.version, None, crate::textenc::TextEncoding::Utf8)?;
    write_empty(
        w,
        "Library",
        &[
            ("Protected", u8::from(rec.protected).to_string()),
            ("PasswordHash", hex::encode(rec.libpass_md5)),
            ("HashType", "MD5".to_string()),
        ],
    )?;
    write_empty(
        w,
        "Execution",
        &[
            ("State", rec.exec_state.to_string()),
            ("Priority", rec.exec_prio.to_string()),
            ("PrefExecSyst", rec.pref_exec_syst.to_string()),
            ("Flags", format!("0x{:08X}", rec.exec_flags)),
        ],
    )?;
    write_empty(w, "Execution2", &[("Flags", format!("0x{:08X}", rec.vi_flags2))])?;
    write_empty(
        w,
        "ButtonsHidden",
        &[("Flags", format!("0x{:04X}", rec.buttons_hidden))],
    )?;
    write_empty(
        w,
        "Instrument",
        &[
            ("Type", rec.vi_type.to_string()),
            ("Signature", hex::encode(rec.vi_signature)),
            ("Flags", format!("0x{:08X}", rec.instr_state)),
        ],
    )?;
    write_empty(
        w,
        "FrontPanel",
        &[
            ("CtrlIndStyle", rec.ctrl_ind_style.to_string()),
            ("Flags", format!("0x{:04X}", rec.frontp_flags)),
        ],
    )?;
    write_empty(w, "Flags0C", &[("Value", format!("0x{:08X}", rec.field_0c))])?;
    write_empty(w, "Flags12", &[("Value", format!("0x{:04X}", rec.field_12))])?;
    write_empty(
        w,
        "Unknown",
        &[
            ("Flags10", rec.flags_10.to_string()),
            ("Field28", rec.field_28.to_string()),
            ("Field2C", rec.field_2c.to_string()),
            ("Field30", rec.field_30.to_string()),
            ("AlignGridFP", rec.align_grid_fp.to_string()),
            ("AlignGridBD", rec.align_grid_bd.to_string()),
            ("Field4C", rec.field_4c.to_string()),
            ("Field50Hash", hex::encode(rec.field_50_md5)),
            ("Field70", rec.field_70.to_string()),
            ("Field74", rec.field_74.to_string()),
            ("Field78Hash", hex::encode(rec.field_78_md5)),
            ("InlineStg", rec.inline_stg.to_string()),
            ("Field8C", rec.field_8c.to_string()),
        ],
    )?;
    if !rec.tail.is_empty() {
        write_empty(w, "Tail", &[("Hex", hex::encode(&rec.tail))])?;
    }
    Ok(())
}

fn export_bdpw(w: &mut XW, rec: &bdpw::PasswordRecord) -> Result<()> {
    let mut attrs: Vec<(&str, String)> = Vec::new();
    if let Some(password) = &rec.password {
        attrs.push(("Text", password.clone()));
    } else {
        attrs.push(("Hash", hex::encode(rec.password_md5)));
        attrs.push(("HashType", "MD5".to_string()));
    }
    if rec.salt_source != bdpw::SaltSource::None {
        attrs.push(("SaltSource", rec.salt_source.as_str().to_string()));
    }
    if let Some(flat_idx) = rec.salt_td_flat_idx {
        attrs.push(("SaltFlatTypeID", flat_idx.to_string()));
    } else if let Some(salt) = &rec.salt {
        attrs.push(("SaltData", hex::encode(salt)));
    } else {
        attrs.push(("RawHash1", hex::encode(rec.hash_1)));
        attrs.push(("RawHash2", hex::encode(rec.hash_2.unwrap_or_default())));
    }
    write_empty(w, "Password", &attrs)
}

fn export_typedesc(w: &mut XW, td: &TypeDesc, textenc: crate::textenc::TextEncoding) -> Result<()> {
    let mut attrs: Vec<(&str, String)> = vec![("Type", td.kind().name().to_string())];
    if td.kind() == TdKind::Unknown {
        attrs.push(("TypeByte", format!("0x{:02X}", td.kind_byte)));
    }
    attrs.push(("Flags", format!("0x{:02X}", td.flags)));
    if td.long_form {
        attrs.push(("LongForm", "1".to_string()));
    }
    match &td.body {
        TdBody::Empty => {}
        TdBody::Sized { prefix_size } => attrs.push(("Prefix", format!("0x{:08X}", prefix_size))),
        TdBody::Array { dims, elem } => {
            attrs.push(("Dims", join_u32(dims)));
            attrs.push(("Elem", elem.to_string()));
        }
        TdBody::Cluster { fields } => attrs.push(("Fields", join_u16(fields))),
        TdBody::RepeatedBlock { num_repeats, elem } => {
            attrs.push(("NumRepeats", num_repeats.to_string()));
            attrs.push(("Elem", elem.to_string()));
        }
        TdBody::Refnum { ref_kind } => attrs.push(("RefKind", ref_kind.to_string())),
        TdBody::Function { terminals, pattern } => {
            attrs.push(("Terminals", join_u16(terminals)));
            attrs.push(("Pattern", format!("0x{:04X}", pattern)));
        }
        TdBody::Opaque(bytes) => attrs.push(("Data", hex::encode(bytes))),
    }
    if let Some(label) = &td.label {
        attrs.push(("Label", textenc.decode(label)));
    }
    if !td.trailing.is_empty() {
        attrs.push(("TrailingHex", hex::encode(&td.trailing)));
    }
    write_empty(w, "TypeDesc", &attrs)
}

fn export_vctp(w: &mut XW, table: &vctp::TypeTable, textenc: crate::textenc::TextEncoding) -> Result<()> {
    for (i, td) in table.flat.iter().enumerate() {
        match &td.purpose {
            Some(purpose) => write_comment(w, &format!("FlatTypeID {}: {}", i, purpose))?,
            None => write_comment(w, &format!("FlatTypeID {}", i))?,
        }
        export_typedesc(w, td, textenc)?;
    }
    w.write_event(Event::Start(BytesStart::new("TopLevel")))?;
    write_comment(
        w,
        "When Consolidated Type is referred to in other blocks, the TypeID is Index from this list",
    )?;
    for (i, &flat_idx) in table.top_level.iter().enumerate() {
        write_empty(
            w,
            "TypeDesc",
            &[
                ("Index", (i + 1).to_string()),
                ("FlatTypeID", flat_idx.to_string()),
            ],
        )?;
    }
    w.write_event(Event::End(BytesEnd::new("TopLevel")))?;
    Ok(())
}

fn export_tm<R>(container: &Container<R>, w: &mut XW, map: &tm80::TypeMap) -> Result<()> {
    // Wrapper carries the shift; entries are self-closing Clients.
    let mut elem = BytesStart::new("TypeMap");
    elem.push_attribute(("IndexShift", map.index_shift.to_string().as_str()));
    w.write_event(Event::Start(elem))?;
    for (type_id, flags) in map.iter_entries() {
        match container.type_table().and_then(|t| t.top_type(type_id)) {
            Some(td) => write_comment(w, &format!("TypeID {}: {}", type_id, td.kind().name()))?,
            None => write_comment(w, &format!("TypeID {}", type_id))?,
        }
        write_empty(w, "Client", &[("Flags", format!("0x{:04X}", flags.bits()))])?;
    }
    if map.entries.is_empty() {
        write_comment(w, "List of types is empty")?;
    }
    w.write_event(Event::End(BytesEnd::new("TypeMap")))?;
    Ok(())
}

fn export_dthp<R>(container: &Container<R>, w: &mut XW, rec: &dthp::HeapTypes) -> Result<()> {
    for i in 1..=rec.td_count {
        let type_id = rec.index_shift + i - 1;
        match container.type_table().and_then(|t| t.top_type(type_id)) {
            Some(td) => write_comment(
                w,
                &format!(
                    "Heap TypeID {:2} = Consolidated TypeID {:2}: {}",
                    i,
                    type_id,
                    td.kind().name()
                ),
            )?,
            None => write_comment(
                w,
                &format!("Heap TypeID {:2} = Consolidated TypeID {:2}", i, type_id),
            )?,
        }
    }
    write_empty(
        w,
        "TypeDescSlice",
        &[
            ("IndexShift", rec.index_shift.to_string()),
            ("Count", rec.td_count.to_string()),
        ],
    )
}

fn export_fill(w: &mut XW, fill: &dfds::Fill) -> Result<()> {
    use dfds::Fill;
    match fill {
        Fill::Void => write_empty(w, "Void", &[]),
        Fill::Bool(v) => write_empty(w, "Bool", &[("Value", v.to_string())]),
        Fill::I8(v) => write_empty(w, "I8", &[("Value", v.to_string())]),
        Fill::I16(v) => write_empty(w, "I16", &[("Value", v.to_string())]),
        Fill::I32(v) => write_empty(w, "I32", &[("Value", v.to_string())]),
        Fill::I64(v) => write_empty(w, "I64", &[("Value", v.to_string())]),
        Fill::U8(v) => write_empty(w, "U8", &[("Value", v.to_string())]),
        Fill::U16(v) => write_empty(w, "U16", &[("Value", v.to_string())]),
        Fill::U32(v) => write_empty(w, "U32", &[("Value", v.to_string())]),
        Fill::U64(v) => write_empty(w, "U64", &[("Value", v.to_string())]),
        Fill::F32(bits) => write_empty(w, "F32", &[("Bits", format!("0x{:08X}", bits))]),
        Fill::F64(bits) => write_empty(w, "F64", &[("Bits", format!("0x{:016X}", bits))]),
        Fill::FExt(bytes) => write_empty(w, "FExt", &[("Hex", hex::encode(bytes))]),
        Fill::Raw(bytes) => write_empty(w, "RawData", &[("Hex", hex::encode(bytes))]),
        Fill::Bytes(bytes) => write_empty(w, "Bytes", &[("Hex", hex::encode(bytes))]),
        Fill::Refnum(v) => write_empty(w, "Refnum", &[("Value", v.to_string())]),
        Fill::Array { dims, elems } => {
            let mut elem = BytesStart::new("Array");
            elem.push_attribute(("Dims", join_u32(dims).as_str()));
            w.write_event(Event::Start(elem))?;
            for e in elems {
                export_fill(w, e)?;
            }
            w.write_event(Event::End(BytesEnd::new("Array")))?;
            Ok(())
        }
        Fill::Cluster(fields) => {
            w.write_event(Event::Start(BytesStart::new("Cluster")))?;
            for f in fields {
                export_fill(w, f)?;
            }
            w.write_event(Event::End(BytesEnd::new("Cluster")))?;
            Ok(())
        }
        Fill::Repeated(elems) => {
            w.write_event(Event::Start(BytesStart::new("Repeated")))?;
            for e in elems {
                export_fill(w, e)?;
            }
            w.write_event(Event::End(BytesEnd::new("Repeated")))?;
            Ok(())
        }
        Fill::Variant { flat_idx, value } => {
            let mut elem = BytesStart::new("Variant");
            elem.push_attribute(("FlatTypeID", flat_idx.to_string().as_str()));
            w.write_event(Event::Start(elem))?;
            export_fill(w, value)?;
            w.write_event(Event::End(BytesEnd::new("Variant")))?;
            Ok(())
        }
        Fill::Special { selector, value } => {
            let mut elem = BytesStart::new("SpecialDSTMCluster");
            elem.push_attribute(("Selector", selector.to_string().as_str()));
            w.write_event(Event::Start(elem))?;
            export_fill(w, value)?;
            w.write_event(Event::End(BytesEnd::new("SpecialDSTMCluster")))?;
            Ok(())
        }
    }
}

fn export_dfds<R>(container: &Container<R>, w: &mut XW, fills: &dfds::DataFills) -> Result<()> {
    for fill in &fills.fills {
        let mut elem = BytesStart::new("DataFill");
        elem.push_attribute(("TypeID", fill.type_id.to_string().as_str()));
        elem.push_attribute(("Flags", format!("0x{:04X}", fill.flags.bits()).as_str()));
        w.write_event(Event::Start(elem))?;
        if let Some(td) = container.type_table().and_then(|t| t.top_type(fill.type_id)) {
            if let Some(purpose) = &td.purpose {
                write_comment(w, purpose)?;
            }
        }
        export_fill(w, &fill.value)?;
        w.write_event(Event::End(BytesEnd::new("DataFill")))?;
    }
    Ok(())
}

// ============================================================================
// IMPORT
// ============================================================================

/// Import a container from XML (plus side files next to it).
pub fn import_file(xml_path: &Path, config: Config) -> Result<Container<fs::File>> {
    let root = read_dom(xml_path)?;
    if root.name != "RSRC" {
        return Err(LvError::XmlSchemaViolation(format!(
            "root tag is <{}>, not <RSRC>",
            root.name
        )));
    }
    let format_version = parse_int(root.require("FormatVersion")?)? as u16;
    let rsrc_type: [u8; 4] = if let Some(pretty) = root.attr("Type") {
        let bytes = pretty.as_bytes();
        let mut ident = [b' '; 4];
        ident[..bytes.len().min(4)].copy_from_slice(&bytes[..bytes.len().min(4)]);
        ident
    } else {
        parse_hex_bytes(root.require("TypeHex")?)?
            .try_into()
            .map_err(|_| LvError::XmlSchemaViolation("TypeHex is not 4 bytes".into()))?
    };

    let mut config = config;
    if let Some(label) = root.attr("Encoding") {
        if let Some(enc) = crate::textenc::TextEncoding::from_label(label) {
            config.textenc = enc;
        } else {
            warn!("unknown text encoding '{}'; keeping {}", label, config.textenc);
        }
    }

    let mut container = Container::from_xml_shell(format_version, rsrc_type, config);
    if let Some(int1) = root.attr("Int1") {
        container.list_header.int1 = parse_int(int1)? as u32;
    }
    if let Some(int2) = root.attr("Int2") {
        container.list_header.int2 = parse_int(int2)? as u32;
    }

    let mut finalize_bdpw: Vec<i32> = Vec::new();
    for block_elem in &root.children {
        if block_elem.name == "SpecialOrder" {
            continue;
        }
        let block = import_block(block_elem, xml_path, &container.config, &mut finalize_bdpw)?;
        if container.block(&block.ident).is_some() {
            return Err(LvError::XmlSchemaViolation(format!(
                "block {} appears twice",
                ident_str(&block.ident)
            )));
        }
        container.blocks.push(block);
    }

    if let Some(order_elem) = root.child("SpecialOrder") {
        if let Some(names) = order_elem.child("Names") {
            let mut order = Vec::new();
            for entry in &names.children {
                let ident = ident_from_pretty(&entry.name);
                let section_idx = entry.attr("Index").map_or(Ok(0), parse_int)? as i32;
                order.push((ident, section_idx));
            }
            if !order.is_empty() {
                container.names_order = Some(order);
            }
        }
    }

    container.finish_xml_import()?;
    for section_idx in finalize_bdpw {
        if let Err(err) = container.finalize_password(section_idx) {
            warn!("BDPW section {} hashes left as imported: {}", section_idx, err);
        }
    }
    Ok(container)
}

fn import_block(
    block_elem: &XmlElem,
    xml_path: &Path,
    config: &Config,
    finalize_bdpw: &mut Vec<i32>,
) -> Result<Block> {
    let ident = ident_from_pretty(&block_elem.name);
    let mut block = Block::new(ident);
    debug!("importing block {}", block.pretty_ident());
    for section_elem in &block_elem.children {
        if section_elem.name != "Section" {
            return Err(LvError::XmlSchemaViolation(format!(
                "<{}> contains <{}> instead of <Section>",
                block_elem.name, section_elem.name
            )));
        }
        let section_idx = parse_int(section_elem.require("Index")?)? as i32;
        if block.section(section_idx).is_some() {
            return Err(LvError::XmlSchemaViolation(format!(
                "block {} section {} appears twice",
                block.pretty_ident(),
                section_idx
            )));
        }
        let mut section = Section::new(section_idx);
        if let Some(int5) = section_elem.attr("Int5") {
            section.start.int5 = parse_int(int5)? as u32;
        }
        if let Some(name) = section_elem.attr("Name") {
            section.name = Some(config.textenc.encode(name));
        }
        if let Some(obj_elem) = section_elem.child("NameObject") {
            let mut obj = PathObject {
                kind: PathKind::from_wire(parse_int(obj_elem.require("Kind")?)? as u32),
                components: Vec::new(),
            };
            for comp in &obj_elem.children {
                if comp.name != "Component" {
                    return Err(LvError::XmlSchemaViolation(
                        "NameObject holds non-Component child".into(),
                    ));
                }
                obj.components.push(config.textenc.encode(&comp.text));
            }
            if section.name.is_some() {
                warn!(
                    "block {} section {} has both Name and NameObject",
                    block.pretty_ident(),
                    section_idx
                );
            }
            section.name = Some(obj.prepare());
            section.name_obj = Some(obj);
        }
        // The name pool offset is assigned at write; mark named-ness only.
        if !section.has_name() {
            section.start.name_offset = NO_NAME;
        }

        let format = section_elem.require("Format")?;
        let storage = StorageFormat::from_str(format).ok_or_else(|| {
            LvError::XmlSchemaViolation(format!("unknown storage format '{}'", format))
        })?;
        match storage {
            StorageFormat::Bin => {
                let file = xml_path.with_file_name(section_elem.require("File")?);
                section.set_raw(fs::read(&file)?);
                // Absent Coding means the side file holds plain bytes; the
                // coding fix-up after import re-encodes them as needed.
                if let Some(label) = section_elem.attr("Coding") {
                    section.coding = crate::coding::BlockCoding::from_label(label).ok_or_else(
                        || LvError::XmlSchemaViolation(format!("unknown coding '{}'", label)),
                    )?;
                }
                section.storage = StorageFormat::Bin;
            }
            StorageFormat::XmlFile => {
                let file = xml_path.with_file_name(section_elem.require("File")?);
                let side_root = read_dom(&file)?;
                if side_root.name != "SectionRoot" {
                    return Err(LvError::XmlSchemaViolation(format!(
                        "side file root is <{}>, not <SectionRoot>",
                        side_root.name
                    )));
                }
                section.content =
                    import_content(block.kind, &side_root, config, section_idx, finalize_bdpw)?;
                section.storage = StorageFormat::XmlFile;
            }
            StorageFormat::Inline => {
                section.content =
                    import_content(block.kind, section_elem, config, section_idx, finalize_bdpw)?;
                section.storage = StorageFormat::Inline;
            }
        }
        block.sections.push(section);
    }
    Ok(block)
}

fn content_children<'a>(elem: &'a XmlElem) -> impl Iterator<Item = &'a XmlElem> {
    elem.children.iter().filter(|c| c.name != "NameObject")
}

fn import_content(
    kind: BlockKind,
    elem: &XmlElem,
    config: &Config,
    section_idx: i32,
    finalize_bdpw: &mut Vec<i32>,
) -> Result<Content> {
    let content = match kind {
        BlockKind::Vers => Content::Vers(import_vers(elem, config)?),
        BlockKind::Lvsr => Content::Lvsr(import_lvsr(elem, config)?),
        BlockKind::Bdpw => {
            let (rec, needs_finalize) = import_bdpw(elem, config)?;
            if needs_finalize {
                finalize_bdpw.push(section_idx);
            }
            Content::Bdpw(rec)
        }
        BlockKind::Libn => {
            let mut names = Vec::new();
            for child in content_children(elem) {
                if child.name != "Library" {
                    return Err(LvError::XmlSchemaViolation(format!(
                        "LIBN contains <{}>",
                        child.name
                    )));
                }
                names.push(config.textenc.encode(&child.text));
            }
            Content::Libn(libn::LibNames { names })
        }
        BlockKind::Vctp => Content::Vctp(import_vctp(elem, config)?),
        BlockKind::Tm80 => Content::TypeMap(import_tm(elem)?),
        BlockKind::Dfds => Content::Dfds(import_dfds(elem)?),
        BlockKind::Dthp => {
            let slice = elem
                .child("TypeDescSlice")
                .ok_or_else(|| LvError::XmlSchemaViolation("DTHP without TypeDescSlice".into()))?;
            Content::Dthp(dthp::HeapTypes {
                index_shift: parse_int(slice.require("IndexShift")?)? as u32,
                td_count: parse_int(slice.require("Count")?)? as u32,
            })
        }
        BlockKind::HeapP | BlockKind::HeapB | BlockKind::HeapC => {
            let data = elem
                .child("HeapData")
                .ok_or_else(|| LvError::XmlSchemaViolation("heap without HeapData".into()))?;
            Content::Heap(heap::HeapContent {
                content: parse_hex_bytes(data.require("Hex")?)?,
                trailing: data.attr("TrailingHex").map_or(Ok(Vec::new()), parse_hex_bytes)?,
            })
        }
        BlockKind::Vicd => {
            let data = elem
                .child("CodeData")
                .ok_or_else(|| LvError::XmlSchemaViolation("VICD without CodeData".into()))?;
            let raw = parse_hex_bytes(data.require("Hex")?)?;
            let mut r = crate::codec::Reader::new(&raw);
            Content::Vicd(vicd::parse(&mut r)?)
        }
        BlockKind::SingleInt => {
            let value = elem
                .child("Value")
                .ok_or_else(|| LvError::XmlSchemaViolation("no Value element".into()))?;
            Content::SingleInt(leaf::SingleInt {
                value: parse_int(value.require("Int")?)? as u32,
            })
        }
        BlockKind::TdIndex => {
            let td = elem
                .child("TypeDesc")
                .ok_or_else(|| LvError::XmlSchemaViolation("no TypeDesc element".into()))?;
            Content::TdIndex(leaf::TdIndex {
                type_id: parse_int(td.require("TypeID")?)? as u16,
            })
        }
        BlockKind::Raw | BlockKind::Dstm | BlockKind::Lvzp => {
            return Err(LvError::XmlSchemaViolation(
                "this block kind only supports Format=\"bin\"".into(),
            ))
        }
    };
    Ok(content)
}

fn import_version_attrs(elem: &XmlElem) -> Result<Version> {
    Ok(Version {
        major: parse_int(elem.require("Major")?)? as u8,
        minor: parse_int(elem.require("Minor")?)? as u8,
        bugfix: parse_int(elem.require("Bugfix")?)? as u8,
        stage: Stage::from_name(elem.require("Stage")?),
        build: parse_int(elem.require("Build")?)? as u8,
        flags: parse_int(elem.require("Flags")?)? as u8,
    })
}

fn import_vers(elem: &XmlElem, config: &Config) -> Result<vers::VersRecord> {
    let v = elem
        .child("Version")
        .ok_or_else(|| LvError::XmlSchemaViolation("vers without Version".into()))?;
    Ok(vers::VersRecord {
        version: import_version_attrs(v)?,
        version_text: config.textenc.encode(v.require("Text")?),
        version_info: config.textenc.encode(v.require("Info")?),
        comment: config.textenc.encode(v.attr("Comment").unwrap_or_default()),
    })
}

fn import_lvsr(elem: &XmlElem, _config: &Config) -> Result<lvsr::SaveRecord> {
    let mut rec = lvsr::SaveRecord::default();
    for child in content_children(elem) {
        match child.name.as_str() {
            "Version" => rec.version = import_version_attrs(child)?,
            "Library" => {
                rec.protected = parse_int(child.require("Protected")?)? != 0;
                rec.libpass_md5 = parse_md5(child.require("PasswordHash")?)?;
            }
            "Execution" => {
                rec.exec_state = parse_int(child.require("State")?)? as u32;
                rec.exec_prio = parse_int(child.require("Priority")?)? as u16;
                rec.pref_exec_syst = parse_int(child.require("PrefExecSyst")?)? as i32;
                rec.exec_flags = parse_int(child.require("Flags")?)? as u32;
            }
            "Execution2" => rec.vi_flags2 = parse_int(child.require("Flags")?)? as u32,
            "ButtonsHidden" => rec.buttons_hidden = parse_int(child.require("Flags")?)? as u16,
            "Instrument" => {
                rec.vi_type = parse_int(child.require("Type")?)? as u16;
                rec.vi_signature = parse_md5(child.require("Signature")?)?;
                rec.instr_state = parse_int(child.require("Flags")?)? as u32;
            }
            "FrontPanel" => {
                rec.ctrl_ind_style = parse_int(child.require("CtrlIndStyle")?)? as u16;
                rec.frontp_flags = parse_int(child.require("Flags")?)? as u16;
            }
            "Flags0C" => rec.field_0c = parse_int(child.require("Value")?)? as u32,
            "Flags12" => rec.field_12 = parse_int(child.require("Value")?)? as u16,
            "Unknown" => {
                rec.flags_10 = parse_int(child.require("Flags10")?)? as u16;
                rec.field_28 = parse_int(child.require("Field28")?)? as u32;
                rec.field_2c = parse_int(child.require("Field2C")?)? as u32;
                rec.field_30 = parse_int(child.require("Field30")?)? as u32;
                rec.align_grid_fp = parse_int(child.require("AlignGridFP")?)? as u32;
                rec.align_grid_bd = parse_int(child.require("AlignGridBD")?)? as u32;
                rec.field_4c = parse_int(child.require("Field4C")?)? as u16;
                rec.field_50_md5 = parse_md5(child.require("Field50Hash")?)?;
                rec.field_70 = parse_int(child.require("Field70")?)? as u32;
                rec.field_74 = parse_int(child.require("Field74")?)? as i32;
                if let Some(hash) = child.attr("Field78Hash") {
                    rec.field_78_md5 = parse_md5(hash)?;
                }
                if let Some(v) = child.attr("InlineStg") {
                    rec.inline_stg = parse_int(v)? as u8;
                }
                if let Some(v) = child.attr("Field8C") {
                    rec.field_8c = parse_int(v)? as u32;
                }
            }
            "Tail" => rec.tail = parse_hex_bytes(child.require("Hex")?)?,
            other => {
                return Err(LvError::XmlSchemaViolation(format!(
                    "LVSR contains <{}>",
                    other
                )))
            }
        }
    }
    Ok(rec)
}

/// Returns the record and whether the hash chain must be recomputed (no
/// raw hashes were carried in the XML).
fn import_bdpw(elem: &XmlElem, config: &Config) -> Result<(bdpw::PasswordRecord, bool)> {
    let p = elem
        .child("Password")
        .ok_or_else(|| LvError::XmlSchemaViolation("BDPW without Password".into()))?;
    let mut rec = bdpw::PasswordRecord::default();
    if let Some(text) = p.attr("Text") {
        rec.set_password(text, config.textenc);
    } else {
        rec.set_password_md5(parse_md5(p.require("Hash")?)?);
    }
    if let Some(source) = p.attr("SaltSource") {
        rec.salt_source = bdpw::SaltSource::from_name(source);
    }
    if let Some(flat_idx) = p.attr("SaltFlatTypeID") {
        rec.salt_td_flat_idx = Some(parse_int(flat_idx)? as u32);
    } else if let Some(salt) = p.attr("SaltData") {
        rec.salt = Some(parse_hex_bytes(salt)?);
    }
    let mut have_raw = false;
    if let Some(h1) = p.attr("RawHash1") {
        rec.hash_1 = parse_md5(h1)?;
        have_raw = true;
    }
    if let Some(h2) = p.attr("RawHash2") {
        rec.hash_2 = Some(parse_md5(h2)?);
        have_raw = true;
    }
    Ok((rec, !have_raw))
}

fn import_typedesc(elem: &XmlElem, config: &Config) -> Result<TypeDesc> {
    let type_name = elem.require("Type")?;
    let kind_byte = match TdKind::from_name(type_name) {
        Some(byte) => byte,
        None => {
            let byte = elem.attr("TypeByte").ok_or_else(|| {
                LvError::XmlSchemaViolation(format!("unknown type kind '{}'", type_name))
            })?;
            parse_int(byte)? as u8
        }
    };
    let kind = TdKind::from(kind_byte);
    let body = if kind == TdKind::Unknown {
        TdBody::Opaque(parse_hex_bytes(elem.attr("Data").unwrap_or_default())?)
    } else {
        match kind {
            TdKind::String | TdKind::CString | TdKind::PasString | TdKind::Path | TdKind::Tag => {
                TdBody::Sized {
                    prefix_size: parse_int(elem.require("Prefix")?)? as u32,
                }
            }
            TdKind::Array => TdBody::Array {
                dims: parse_u32_list(elem.require("Dims")?)?,
                elem: parse_int(elem.require("Elem")?)? as u16,
            },
            TdKind::Cluster => TdBody::Cluster {
                fields: parse_u16_list(elem.require("Fields")?)?,
            },
            TdKind::RepeatedBlock => TdBody::RepeatedBlock {
                num_repeats: parse_int(elem.require("NumRepeats")?)? as u32,
                elem: parse_int(elem.require("Elem")?)? as u16,
            },
            TdKind::Refnum => TdBody::Refnum {
                ref_kind: parse_int(elem.require("RefKind")?)? as u16,
            },
            TdKind::Function => TdBody::Function {
                terminals: parse_u16_list(elem.require("Terminals")?)?,
                pattern: parse_int(elem.require("Pattern")?)? as u16,
            },
            _ => TdBody::Empty,
        }
    };
    Ok(TypeDesc {
        flags: parse_int(elem.require("Flags")?)? as u8,
        kind_byte,
        long_form: elem.attr("LongForm").is_some(),
        body,
        label: elem.attr("Label").map(|l| config.textenc.encode(l)),
        trailing: elem.attr("TrailingHex").map_or(Ok(Vec::new()), parse_hex_bytes)?,
        purpose: None,
    })
}

fn import_vctp(elem: &XmlElem, config: &Config) -> Result<vctp::TypeTable> {
    let mut table = vctp::TypeTable::default();
    for child in content_children(elem) {
        match child.name.as_str() {
            "TypeDesc" => table.flat.push(import_typedesc(child, config)?),
            "TopLevel" => {
                for entry in &child.children {
                    if entry.name != "TypeDesc" {
                        return Err(LvError::XmlSchemaViolation(format!(
                            "TopLevel contains <{}>",
                            entry.name
                        )));
                    }
                    let index = parse_int(entry.require("Index")?)? as usize;
                    let flat_idx = parse_int(entry.require("FlatTypeID")?)? as u32;
                    if index < 1 {
                        return Err(LvError::XmlSchemaViolation("TopLevel Index below 1".into()));
                    }
                    if table.top_level.len() < index {
                        table.top_level.resize(index, 0);
                    }
                    table.top_level[index - 1] = flat_idx;
                }
            }
            other => {
                return Err(LvError::XmlSchemaViolation(format!(
                    "VCTP contains <{}>",
                    other
                )))
            }
        }
    }
    Ok(table)
}

fn import_tm(elem: &XmlElem) -> Result<tm80::TypeMap> {
    let wrapper = elem
        .child("TypeMap")
        .ok_or_else(|| LvError::XmlSchemaViolation("TM80 without TypeMap".into()))?;
    let mut map = tm80::TypeMap {
        index_shift: parse_int(wrapper.require("IndexShift")?)? as u32,
        entries: Vec::new(),
    };
    for child in &wrapper.children {
        if child.name != "Client" {
            return Err(LvError::XmlSchemaViolation(format!(
                "TypeMap contains <{}>",
                child.name
            )));
        }
        map.entries.push(tm80::TmFlags::from_bits_retain(
            parse_int(child.require("Flags")?)? as u32,
        ));
    }
    Ok(map)
}

fn import_fill(elem: &XmlElem) -> Result<dfds::Fill> {
    use dfds::Fill;
    let fill = match elem.name.as_str() {
        "Void" => Fill::Void,
        "Bool" => Fill::Bool(parse_int(elem.require("Value")?)? as u8),
        "I8" => Fill::I8(parse_int(elem.require("Value")?)? as i8),
        "I16" => Fill::I16(parse_int(elem.require("Value")?)? as i16),
        "I32" => Fill::I32(parse_int(elem.require("Value")?)? as i32),
        "I64" => Fill::I64(parse_int(elem.require("Value")?)?),
        "U8" => Fill::U8(parse_int(elem.require("Value")?)? as u8),
        "U16" => Fill::U16(parse_int(elem.require("Value")?)? as u16),
        "U32" => Fill::U32(parse_int(elem.require("Value")?)? as u32),
        "U64" => Fill::U64(parse_int(elem.require("Value")?)? as u64),
        "F32" => Fill::F32(parse_int(elem.require("Bits")?)? as u32),
        "F64" => Fill::F64(parse_int(elem.require("Bits")?)? as u64),
        "FExt" => Fill::FExt(
            parse_hex_bytes(elem.require("Hex")?)?
                .try_into()
                .map_err(|_| LvError::XmlSchemaViolation("FExt is not 16 bytes".into()))?,
        ),
        "RawData" => Fill::Raw(parse_hex_bytes(elem.require("Hex")?)?),
        "Bytes" => Fill::Bytes(parse_hex_bytes(elem.require("Hex")?)?),
        "Refnum" => Fill::Refnum(parse_int(elem.require("Value")?)? as u32),
        "Array" => Fill::Array {
            dims: parse_u32_list(elem.require("Dims")?)?,
            elems: elem.children.iter().map(import_fill).collect::<Result<_>>()?,
        },
        "Cluster" => {
            Fill::Cluster(elem.children.iter().map(import_fill).collect::<Result<_>>()?)
        }
        "Repeated" => {
            Fill::Repeated(elem.children.iter().map(import_fill).collect::<Result<_>>()?)
        }
        "Variant" => {
            let value = elem.children.first().ok_or_else(|| {
                LvError::XmlSchemaViolation("Variant without inner fill".into())
            })?;
            Fill::Variant {
                flat_idx: parse_int(elem.require("FlatTypeID")?)? as u32,
                value: Box::new(import_fill(value)?),
            }
        }
        "SpecialDSTMCluster" => {
            let value = elem.children.first().ok_or_else(|| {
                LvError::XmlSchemaViolation("SpecialDSTMCluster without inner fill".into())
            })?;
            Fill::Special {
                selector: parse_int(elem.require("Selector")?)? as u16,
                value: Box::new(import_fill(value)?),
            }
        }
        other => {
            return Err(LvError::XmlSchemaViolation(format!(
                "unknown fill element <{}>",
                other
            )))
        }
    };
    Ok(fill)
}

fn import_dfds(elem: &XmlElem) -> Result<dfds::DataFills> {
    let mut fills = dfds::DataFills::default();
    for child in content_children(elem) {
        if child.name != "DataFill" {
            return Err(LvError::XmlSchemaViolation(format!(
                "DFDS contains <{}>",
                child.name
            )));
        }
        let value_elem = child.children.first().ok_or_else(|| {
            LvError::XmlSchemaViolation("DataFill without fill element".into())
        })?;
        fills.fills.push(dfds::DataFill {
            type_id: parse_int(child.require("TypeID")?)? as u32,
            flags: tm80::TmFlags::from_bits_retain(
                child.attr("Flags").map_or(Ok(0), parse_int)? as u32
            ),
            value: import_fill(value_elem)?,
        });
    }
    Ok(fills)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_parsing_accepts_hex_and_negatives() {
        assert_eq!(parse_int("42").unwrap(), 42);
        assert_eq!(parse_int("0x2A").unwrap(), 42);
        assert_eq!(parse_int("-7").unwrap(), -7);
        assert!(parse_int("x").is_err());
    }

    #[test]
    fn list_helpers_roundtrip() {
        let list = vec![0u16, 5, 65535];
        assert_eq!(parse_u16_list(&join_u16(&list)).unwrap(), list);
        let list = vec![0u32, 7, 0xFFFF_FFFF];
        assert_eq!(parse_u32_list(&join_u32(&list)).unwrap(), list);
    }

    #[test]
    fn fill_tree_export_import() {
        let fill = dfds::Fill::Cluster(vec![
            dfds::Fill::I32(-5),
            dfds::Fill::Bytes(b"abc".to_vec()),
            dfds::Fill::Array {
                dims: vec![2],
                elems: vec![dfds::Fill::U8(1), dfds::Fill::U8(2)],
            },
        ]);
        let mut w = quick_xml::Writer::new(Vec::new());
        export_fill(&mut w, &fill).unwrap();
        let xml = String::from_utf8(w.into_inner()).unwrap();
        let tmp = tempfile::NamedTempFile::new().unwrap();
        fs::write(tmp.path(), &xml).unwrap();
        let dom = read_dom(tmp.path()).unwrap();
        assert_eq!(import_fill(&dom).unwrap(), fill);
    }

    #[test]
    fn typedesc_export_import() {
        let mut td = TypeDesc::new(
            TdKind::Function,
            TdBody::Function {
                terminals: vec![0, 1, 2],
                pattern: 0x10,
            },
        );
        td.flags = 0x40;
        td.label = Some(b"connector pane".to_vec());
        let mut w = quick_xml::Writer::new(Vec::new());
        export_typedesc(&mut w, &td, crate::textenc::TextEncoding::MacRoman).unwrap();
        let tmp = tempfile::NamedTempFile::new().unwrap();
        fs::write(tmp.path(), w.into_inner()).unwrap();
        let dom = read_dom(tmp.path()).unwrap();
        let config = Config::default();
        assert_eq!(import_typedesc(&dom, &config).unwrap(), td);
    }
}
