// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Reader, writer and XML round-trip library for LabVIEW RSRC containers.
//!
//! RSRC is the on-disk container behind `.vi`, `.ctl`, `.llb`, `.lvlibp`
//! and friends: a data region of section payloads and an info region of
//! block bookkeeping, each fronted by an identical header. This crate
//! reads the container, interprets the blocks that hold the format
//! together — the version record, the consolidated type table, the type
//! map, the default data fills, the password hash chain — and writes the
//! whole thing back byte-for-byte.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐    ┌─────────────┐    ┌──────────────────────┐
//! │  codec     │───▶│  coding     │───▶│  container           │
//! │ (cursor,   │    │ (none/zlib/ │    │ (headers, read/write │
//! │  varwidth, │    │  zeromask8/ │    │  drivers, name pool) │
//! │  xor, rle) │    │  xor)       │    └──────────┬───────────┘
//! └────────────┘    └─────────────┘               │
//!                                                 ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  block (Section state machine, registry dispatch)           │
//! │  vers · lvsr · libn · vctp/typedesc · tm80 · dfds · dthp    │
//! │  bdpw · heap · vicd · leaf                                  │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │
//!                            ▼
//!                    ┌──────────────┐
//!                    │  xml         │
//!                    │ (dump/extract│
//!                    │  /create)    │
//!                    └──────────────┘
//! ```
//!
//! # The rule everything bends around
//!
//! `read` then `write` must reproduce the input file exactly, even for
//! blocks this crate cannot interpret. Every parser that fails degrades
//! its section to raw passthrough; every parser that succeeds has a
//! `prepare` that is its exact inverse. Cross-block work (DFDS needs TM80
//! needs VCTP) runs in a separate integration phase after all local
//! parsing, so no parse ever depends on a peer's parse state.
//!
//! # Usage
//!
//! ```no_run
//! use lvrsrc::container::{Config, Container};
//!
//! let file = std::fs::File::open("program.vi")?;
//! let mut vi = Container::open(file, Config::default())?;
//! vi.set_password("qwerty")?;
//! let mut out = std::fs::OpenOptions::new()
//!     .write(true).create(true).truncate(true).open("program.vi")?;
//! vi.write(&mut out)?;
//! # Ok::<(), lvrsrc::error::LvError>(())
//! ```

pub mod block;
pub mod codec;
pub mod coding;
pub mod container;
pub mod error;
pub mod path;
pub mod printmap;
pub mod textenc;
pub mod typedesc;
pub mod version;
pub mod xml;

// Re-exports for the common entry points.
pub use coding::BlockCoding;
pub use container::{Config, Container};
pub use error::{LvError, Result};
pub use textenc::TextEncoding;
pub use version::{Stage, Version};

#[cfg(test)]
mod tests {
    //! End-to-end scenarios over whole containers: the byte-exact
    //! round-trip law, the password workflow, and the XML trip with a
    //! reordered name pool.

    use std::io::Cursor;

    use crate::block::{bdpw, tm80::TmFlags, vctp, vers, Block, Content, Section};
    use crate::codec::Writer;
    use crate::coding::{self, BlockCoding};
    use crate::container::{Config, Container};
    use crate::error::LvError;
    use crate::typedesc::{TdBody, TdKind, TypeDesc};
    use crate::version::Stage;

    const LV14: u32 = 0x1400_8000;

    fn raw_block(ident: [u8; 4], raw: Vec<u8>) -> Block {
        let mut block = Block::new(ident);
        let mut section = Section::new(0);
        section.set_raw(raw);
        block.sections.push(section);
        block
    }

    fn vers_raw(word: u32) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u32(word);
        w.write_pstr(b"14.0");
        w.write_u8(0);
        w.write_pstr(b"14.0f0");
        w.write_pstr(b"");
        w.into_bytes()
    }

    fn lvsr_raw(word: u32) -> Vec<u8> {
        let mut raw = vec![0u8; 137];
        raw[0..4].copy_from_slice(&word.to_be_bytes());
        raw
    }

    fn salt_table_raw() -> Vec<u8> {
        // Int32, Float64, String, Path, Function(2 numeric, 1 string, 0 path
        // terminals); top list exposes the Function as type id 1 and the
        // scalars after it.
        let table = vctp::TypeTable {
            flat: vec![
                TypeDesc::new(TdKind::Int32, TdBody::Empty),
                TypeDesc::new(TdKind::Float64, TdBody::Empty),
                TypeDesc::new(TdKind::String, TdBody::Sized { prefix_size: 0xFFFF_FFFF }),
                TypeDesc::new(
                    TdKind::Function,
                    TdBody::Function {
                        terminals: vec![0, 1, 2],
                        pattern: 0,
                    },
                ),
            ],
            top_level: vec![3, 0, 2],
        };
        vctp::prepare(&table)
    }

    fn build(blocks: Vec<Block>) -> Vec<u8> {
        let mut c = Container::from_xml_shell(3, *b"LVIN", Config::default());
        c.blocks = blocks;
        let mut out = Cursor::new(Vec::new());
        c.write(&mut out).unwrap();
        out.into_inner()
    }

    fn zlibbed(plain: &[u8]) -> Vec<u8> {
        coding::encode(BlockCoding::Zlib, plain).unwrap()
    }

    // =========================================================================
    // SCENARIOS
    // =========================================================================

    #[test]
    fn scenario_open_vi_and_list() {
        let bytes = build(vec![
            raw_block(*b"vers", vers_raw(LV14)),
            raw_block(*b"LVSR", lvsr_raw(LV14)),
        ]);
        let c = Container::open(Cursor::new(bytes), Config::default()).unwrap();
        let v = c.version();
        assert_eq!(
            (v.major, v.minor, v.bugfix, v.stage, v.build),
            (14, 0, 0, Stage::Release, 0)
        );
        // `list` prints one line per block.
        let lines: Vec<String> = c
            .blocks
            .iter()
            .map(|b| format!("{}\t{}", b.pretty_ident(), b.preview()))
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("vers\t"));
        assert!(lines[1].starts_with("LVSR\t"));
    }

    #[test]
    fn scenario_password_change() {
        let lvsr = lvsr_raw(LV14);
        // Stored hashes consistent with the empty password and the salt of
        // the Function type (2 numeric, 1 string, 0 path).
        let salt = bdpw::salt_from_counts(2, 1, 0);
        assert_eq!(&salt[..], b"\x02\x00\x00\x00\x01\x00\x00\x00\x00\x00\x00\x00");
        let empty_md5 = md5::compute(b"").0;
        let h1 = bdpw::hash_1(&empty_md5, b"", &lvsr, &salt);
        let h2 = bdpw::hash_2(&h1, None);
        let mut bdpw_raw = empty_md5.to_vec();
        bdpw_raw.extend_from_slice(&h1);
        bdpw_raw.extend_from_slice(&h2);

        let mut cpc2 = Writer::new();
        cpc2.write_u16(1);

        let bytes = build(vec![
            raw_block(*b"vers", vers_raw(LV14)),
            raw_block(*b"LVSR", lvsr.clone()),
            raw_block(*b"VCTP", zlibbed(&salt_table_raw())),
            raw_block(*b"CPC2", cpc2.into_bytes()),
            raw_block(*b"BDPW", bdpw_raw),
        ]);
        let mut c = Container::open(Cursor::new(bytes), Config::default()).unwrap();
        c.set_password("qwerty").unwrap();

        let block = c.block(b"BDPW").unwrap();
        let Content::Bdpw(rec) = &block.default_section().unwrap().content else {
            panic!("BDPW did not parse");
        };
        assert_eq!(
            hex::encode(rec.password_md5),
            "d8578edf8458ce06fbc5bb76a58c5ca4"
        );
        assert_eq!(rec.salt.as_deref(), Some(&salt[..]));
        assert_eq!(rec.salt_source, bdpw::SaltSource::Cpc2);
        let expected_h1 = bdpw::hash_1(&rec.password_md5.clone(), b"", &lvsr, &salt);
        assert_eq!(rec.hash_1, expected_h1);
        assert_eq!(rec.hash_2, Some(bdpw::hash_2(&expected_h1, None)));

        // The change survives a write/read cycle.
        let mut out = Cursor::new(Vec::new());
        c.write(&mut out).unwrap();
        let c2 = Container::open(Cursor::new(out.into_inner()), Config::default()).unwrap();
        let Content::Bdpw(rec2) = &c2
            .block(b"BDPW")
            .unwrap()
            .default_section()
            .unwrap()
            .content
        else {
            panic!("BDPW did not re-parse");
        };
        assert_eq!(rec2.hash_1, expected_h1);
    }

    #[test]
    fn scenario_empty_password_clears_protection() {
        let mut lvsr = lvsr_raw(LV14);
        lvsr[6] |= 0x20; // LIB_PROTECTED bit 0x2000 of the exec flags word
        let mut bdpw_raw = md5::compute(b"qwerty").0.to_vec();
        bdpw_raw.extend_from_slice(&[0u8; 32]);
        let bytes = build(vec![
            raw_block(*b"vers", vers_raw(LV14)),
            raw_block(*b"LVSR", lvsr),
            raw_block(*b"BDPW", bdpw_raw),
        ]);
        let mut c = Container::open(Cursor::new(bytes), Config::default()).unwrap();
        c.set_password("").unwrap();

        let Content::Lvsr(rec) = &c
            .block(b"LVSR")
            .unwrap()
            .default_section()
            .unwrap()
            .content
        else {
            panic!("LVSR did not parse");
        };
        assert!(!rec.protected);
        let Content::Bdpw(rec) = &c
            .block(b"BDPW")
            .unwrap()
            .default_section()
            .unwrap()
            .content
        else {
            panic!("BDPW did not parse");
        };
        assert_eq!(rec.password_md5, md5::compute(b"").0);
        // LVSR raw must carry the cleared bit.
        let raw = c
            .block(b"LVSR")
            .unwrap()
            .default_section()
            .unwrap()
            .raw
            .clone()
            .unwrap();
        assert_eq!(raw[6] & 0x20, 0);
    }

    #[test]
    fn scenario_prepare_size_mismatch_aborts_before_output() {
        let mut c = Container::from_xml_shell(3, *b"LVIN", Config::default());
        let mut block = Block::new(*b"vers");
        let mut section = Section::new(0);
        // A version text past the P-string limit: prepare truncates to 255,
        // expected_size counts all 300.
        section.content = Content::Vers(vers::VersRecord {
            version_text: vec![b'x'; 300],
            ..vers::VersRecord::default()
        });
        section.state = crate::block::SectionState::DirtyParsed;
        block.sections.push(section);
        c.blocks.push(block);
        let mut out = Cursor::new(Vec::new());
        let err = c.write(&mut out).unwrap_err();
        assert!(matches!(err, LvError::PrepareSizeMismatch { .. }));
        assert!(out.into_inner().is_empty());
    }

    // =========================================================================
    // ROUND-TRIPS
    // =========================================================================

    fn full_fixture() -> Vec<u8> {
        // VCTP: Int32, String, Function; top ids 1..=3 map flats 0,1,2.
        let table = vctp::TypeTable {
            flat: vec![
                TypeDesc::new(TdKind::Int32, TdBody::Empty),
                TypeDesc::new(TdKind::String, TdBody::Sized { prefix_size: 0xFFFF_FFFF }),
                TypeDesc::new(
                    TdKind::Function,
                    TdBody::Function {
                        terminals: vec![0, 1],
                        pattern: 0,
                    },
                ),
            ],
            top_level: vec![0, 1, 2],
        };
        // TM80 covering ids 1..=3: Int32 fills, String fills, Function skips.
        let tm = crate::block::tm80::TypeMap {
            index_shift: 1,
            entries: vec![TmFlags::BIT0, TmFlags::BIT13, TmFlags::BIT3],
        };
        let mut dfds_plain = Vec::new();
        dfds_plain.extend(42i32.to_be_bytes());
        dfds_plain.extend(5u32.to_be_bytes());
        dfds_plain.extend(b"hello");
        let mut heap = Writer::new();
        heap.write_lstr(b"opaque heap tag tree");
        let mut libn = Writer::new();
        libn.write_u32(1);
        libn.write_pstr(b"Outer.lvlib");

        build(vec![
            raw_block(*b"vers", vers_raw(LV14)),
            raw_block(*b"LVSR", lvsr_raw(LV14)),
            raw_block(*b"LIBN", libn.into_bytes()),
            raw_block(*b"VCTP", zlibbed(&vctp::prepare(&table))),
            raw_block(*b"TM80", zlibbed(&crate::block::tm80::prepare(&tm))),
            raw_block(*b"DFDS", zlibbed(&dfds_plain)),
            raw_block(*b"BDHc", zlibbed(&heap.into_bytes())),
            raw_block(*b"Zuk0", vec![0xAB; 13]),
        ])
    }

    #[test]
    fn universal_roundtrip() {
        let bytes = full_fixture();
        let mut c = Container::open(Cursor::new(bytes.clone()), Config::default()).unwrap();
        // DFDS must have integrated, not stayed raw.
        let dfds = c.block(b"DFDS").unwrap().default_section().unwrap();
        assert!(matches!(dfds.content, Content::Dfds(_)));
        let mut out = Cursor::new(Vec::new());
        c.write(&mut out).unwrap();
        assert_eq!(out.into_inner(), bytes);
    }

    #[test]
    fn integration_annotates_nothing_but_roundtrip_still_holds_without_tm() {
        // A VCTP alone (no TM80/DFDS) still parses, integrates and writes
        // back exactly.
        let table = vctp::TypeTable {
            flat: vec![TypeDesc::new(TdKind::Boolean, TdBody::Empty)],
            top_level: vec![0],
        };
        let bytes = build(vec![
            raw_block(*b"vers", vers_raw(LV14)),
            raw_block(*b"VCTP", zlibbed(&vctp::prepare(&table))),
        ]);
        let mut c = Container::open(Cursor::new(bytes.clone()), Config::default()).unwrap();
        let mut out = Cursor::new(Vec::new());
        c.write(&mut out).unwrap();
        assert_eq!(out.into_inner(), bytes);
    }

    #[test]
    fn xml_trip_with_reordered_names() {
        // Two named blocks; the pool stores names in reverse order, so the
        // hint must survive XML for the bytes to come back identical.
        let mut a = raw_block(*b"AAAA", vec![1, 2, 3]);
        a.sections[0].name = Some(b"second".to_vec());
        let mut b = raw_block(*b"BBBB", vec![4, 5, 6, 7]);
        b.sections[0].name = Some(b"first".to_vec());

        let mut c = Container::from_xml_shell(3, *b"LVIN", Config::default());
        c.blocks = vec![raw_block(*b"vers", vers_raw(LV14)), a, b];
        c.names_order = Some(vec![(*b"BBBB", 0), (*b"AAAA", 0)]);
        let mut out = Cursor::new(Vec::new());
        c.write(&mut out).unwrap();
        let bytes = out.into_inner();

        let mut c = Container::open(Cursor::new(bytes.clone()), Config::default()).unwrap();
        assert_eq!(
            c.names_order,
            Some(vec![(*b"BBBB", 0), (*b"AAAA", 0)]),
            "shuffled pool must be detected"
        );

        let dir = tempfile::tempdir().unwrap();
        let xml_path = dir.path().join("fixture.xml");
        crate::xml::export_file(&mut c, &xml_path, true).unwrap();
        let mut c2 = crate::xml::import_file(&xml_path, Config::default()).unwrap();
        assert_eq!(c2.names_order, Some(vec![(*b"BBBB", 0), (*b"AAAA", 0)]));
        let mut out = Cursor::new(Vec::new());
        c2.write(&mut out).unwrap();
        assert_eq!(out.into_inner(), bytes);
    }

    #[test]
    fn dump_import_roundtrip_recodes_compressed_sections() {
        // Dump writes every section's PLAIN bytes to BIN side files; the
        // importer must re-encode zlib-coded sections (VCTP, TM80, DFDS,
        // BDHc here) under the version's coding, not wrap them again.
        let bytes = full_fixture();
        let mut c = Container::open(Cursor::new(bytes.clone()), Config::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let xml_path = dir.path().join("dumped.xml");
        crate::xml::export_file(&mut c, &xml_path, true).unwrap();
        let mut c2 = crate::xml::import_file(&xml_path, Config::default()).unwrap();
        let vctp = c2.block(b"VCTP").unwrap().default_section().unwrap();
        assert_eq!(vctp.coding, BlockCoding::Zlib);
        let mut out = Cursor::new(Vec::new());
        c2.write(&mut out).unwrap();
        assert_eq!(out.into_inner(), bytes);
    }

    #[test]
    fn extract_import_roundtrip() {
        let bytes = full_fixture();
        let mut c = Container::open(Cursor::new(bytes.clone()), Config::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let xml_path = dir.path().join("full.xml");
        crate::xml::export_file(&mut c, &xml_path, false).unwrap();
        let mut c2 = crate::xml::import_file(&xml_path, Config::default()).unwrap();
        let mut out = Cursor::new(Vec::new());
        c2.write(&mut out).unwrap();
        assert_eq!(out.into_inner(), bytes);
    }

    #[test]
    fn damaged_section_still_roundtrips() {
        // A TM80 whose payload is garbage under zlib: the section degrades
        // to raw and the file still writes back byte-identical.
        let bytes = build(vec![
            raw_block(*b"vers", vers_raw(LV14)),
            raw_block(*b"TM80", vec![0xDE, 0xAD, 0xBE, 0xEF, 0x01]),
        ]);
        let mut c = Container::open(Cursor::new(bytes.clone()), Config::default()).unwrap();
        let section = c.block(b"TM80").unwrap().default_section().unwrap();
        assert!(section.parse_failed);
        let mut out = Cursor::new(Vec::new());
        c.write(&mut out).unwrap();
        assert_eq!(out.into_inner(), bytes);
    }
}
