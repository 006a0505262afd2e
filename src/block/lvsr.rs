// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! `LVSR`, the save record.
//!
//! A fixed 68-byte core that has only ever grown: 7.0 added alignment grids
//! and a hash, 8.0 the library password hash, 10.0-release another hash,
//! 14.0 a single inlining byte, 15.0 a padded u32. Whatever follows the
//! last known field is carried verbatim so files from newer versions
//! round-trip. Gates run on the version stored inside the record itself,
//! not the container's `vers` block.
//!
//! The library-protected bit lives inside the execution flags; it is split
//! out at parse and recombined at prepare, because the password workflow
//! flips it independently of everything else in the word.

use bitflags::bitflags;

use crate::codec::{Reader, Writer};
use crate::error::Result;
use crate::version::{Stage, Version};

bitflags! {
    /// Execution flag word. Only the bit the password workflow needs is
    /// named; the rest ride along untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExecFlags: u32 {
        const LIB_PROTECTED = 0x2000;
        const _ = !0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaveRecord {
    pub version: Version,
    pub protected: bool,
    /// Execution flags with `LIB_PROTECTED` masked out.
    pub exec_flags: u32,
    pub vi_flags2: u32,
    pub field_0c: u32,
    pub flags_10: u16,
    pub field_12: u16,
    pub buttons_hidden: u16,
    pub frontp_flags: u16,
    pub instr_state: u32,
    pub exec_state: u32,
    pub exec_prio: u16,
    pub vi_type: u16,
    pub pref_exec_syst: i32,
    pub field_28: u32,
    pub field_2c: u32,
    pub field_30: u32,
    pub vi_signature: [u8; 16],
    // 7.0+
    pub align_grid_fp: u32,
    pub align_grid_bd: u32,
    pub field_4c: u16,
    pub ctrl_ind_style: u16,
    pub field_50_md5: [u8; 16],
    // 8.0+
    pub libpass_md5: [u8; 16],
    pub field_70: u32,
    pub field_74: i32,
    // 10.0 release+
    pub field_78_md5: [u8; 16],
    // 14.0+
    pub inline_stg: u8,
    // 15.0+
    pub field_8c: u32,
    /// Data past the newest field this codec knows, verbatim.
    pub tail: Vec<u8>,
}

fn read_md5(r: &mut Reader<'_>) -> Result<[u8; 16]> {
    let mut out = [0u8; 16];
    out.copy_from_slice(r.read_bytes(16)?);
    Ok(out)
}

pub fn parse(r: &mut Reader<'_>) -> Result<SaveRecord> {
    let mut rec = SaveRecord {
        version: Version::decode(r.read_u32()?),
        ..SaveRecord::default()
    };
    let exec_word = ExecFlags::from_bits_retain(r.read_u32()?);
    rec.protected = exec_word.contains(ExecFlags::LIB_PROTECTED);
    rec.exec_flags = exec_word.difference(ExecFlags::LIB_PROTECTED).bits();
    rec.vi_flags2 = r.read_u32()?;
    rec.field_0c = r.read_u32()?;
    rec.flags_10 = r.read_u16()?;
    rec.field_12 = r.read_u16()?;
    rec.buttons_hidden = r.read_u16()?;
    rec.frontp_flags = r.read_u16()?;
    rec.instr_state = r.read_u32()?;
    rec.exec_state = r.read_u32()?;
    rec.exec_prio = r.read_u16()?;
    rec.vi_type = r.read_u16()?;
    rec.pref_exec_syst = r.read_i32()?;
    rec.field_28 = r.read_u32()?;
    rec.field_2c = r.read_u32()?;
    rec.field_30 = r.read_u32()?;
    rec.vi_signature = read_md5(r)?;
    if rec.version.at_least(7, 0, 0, 0) {
        rec.align_grid_fp = r.read_u32()?;
        rec.align_grid_bd = r.read_u32()?;
        rec.field_4c = r.read_u16()?;
        rec.ctrl_ind_style = r.read_u16()?;
        rec.field_50_md5 = read_md5(r)?;
    }
    if rec.version.at_least(8, 0, 0, 0) {
        rec.libpass_md5 = read_md5(r)?;
        rec.field_70 = r.read_u32()?;
        rec.field_74 = r.read_i32()?;
    }
    if rec.version.at_least_stage(10, 0, Stage::Release) {
        rec.field_78_md5 = read_md5(r)?;
    }
    if rec.version.at_least(14, 0, 0, 0) {
        rec.inline_stg = r.read_u8()?;
    }
    if rec.version.at_least(15, 0, 0, 0) {
        r.read_bytes(3)?;
        rec.field_8c = r.read_u32()?;
    }
    rec.tail = r.read_rest().to_vec();
    Ok(rec)
}

pub fn prepare(rec: &SaveRecord) -> Vec<u8> {
    let mut w = Writer::with_capacity(expected_size(rec));
    w.write_u32(rec.version.encode());
    let mut exec_word = ExecFlags::from_bits_retain(rec.exec_flags);
    exec_word.remove(ExecFlags::LIB_PROTECTED);
    if rec.protected {
        exec_word.insert(ExecFlags::LIB_PROTECTED);
    }
    w.write_u32(exec_word.bits());
    w.write_u32(rec.vi_flags2);
    w.write_u32(rec.field_0c);
    w.write_u16(rec.flags_10);
    w.write_u16(rec.field_12);
    w.write_u16(rec.buttons_hidden);
    w.write_u16(rec.frontp_flags);
    w.write_u32(rec.instr_state);
    w.write_u32(rec.exec_state);
    w.write_u16(rec.exec_prio);
    w.write_u16(rec.vi_type);
    w.write_i32(rec.pref_exec_syst);
    w.write_u32(rec.field_28);
    w.write_u32(rec.field_2c);
    w.write_u32(rec.field_30);
    w.write_bytes(&rec.vi_signature);
    if rec.version.at_least(7, 0, 0, 0) {
        w.write_u32(rec.align_grid_fp);
        w.write_u32(rec.align_grid_bd);
        w.write_u16(rec.field_4c);
        w.write_u16(rec.ctrl_ind_style);
        w.write_bytes(&rec.field_50_md5);
    }
    if rec.version.at_least(8, 0, 0, 0) {
        w.write_bytes(&rec.libpass_md5);
        w.write_u32(rec.field_70);
        w.write_i32(rec.field_74);
    }
    if rec.version.at_least_stage(10, 0, Stage::Release) {
        w.write_bytes(&rec.field_78_md5);
    }
    if rec.version.at_least(14, 0, 0, 0) {
        w.write_u8(rec.inline_stg);
    }
    if rec.version.at_least(15, 0, 0, 0) {
        w.write_bytes(&[0, 0, 0]);
        w.write_u32(rec.field_8c);
    }
    w.write_bytes(&rec.tail);
    w.into_bytes()
}

pub fn expected_size(rec: &SaveRecord) -> usize {
    let mut len = 68;
    if rec.version.at_least(7, 0, 0, 0) {
        len += 28;
    }
    if rec.version.at_least(8, 0, 0, 0) {
        len += 24;
    }
    if rec.version.at_least_stage(10, 0, Stage::Release) {
        len += 16;
    }
    if rec.version.at_least(14, 0, 0, 0) {
        len += 1;
    }
    if rec.version.at_least(15, 0, 0, 0) {
        len += 3 + 4;
    }
    len + rec.tail.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(word: u32) -> SaveRecord {
        SaveRecord {
            version: Version::decode(word),
            exec_flags: 0x0001_0040,
            vi_signature: [7u8; 16],
            ..SaveRecord::default()
        }
    }

    #[test]
    fn sizes_per_version() {
        assert_eq!(expected_size(&record_at(0x0601_8000)), 68);
        assert_eq!(expected_size(&record_at(0x0710_8000)), 96);
        assert_eq!(expected_size(&record_at(0x0860_6007)), 120);
        assert_eq!(expected_size(&record_at(0x0A00_8000)), 136);
        assert_eq!(expected_size(&record_at(0x1400_8000)), 137);
    }

    #[test]
    fn roundtrip_modern() {
        let mut rec = record_at(0x1400_8000);
        rec.libpass_md5 = [3u8; 16];
        rec.field_78_md5 = [9u8; 16];
        rec.inline_stg = 1;
        rec.tail = vec![0xAA, 0xBB];
        let bytes = prepare(&rec);
        assert_eq!(bytes.len(), expected_size(&rec));
        let mut r = Reader::new(&bytes);
        let back = parse(&mut r).unwrap();
        assert_eq!(r.remaining(), 0);
        assert_eq!(back, rec);
    }

    #[test]
    fn protected_bit_splits_and_recombines() {
        let mut rec = record_at(0x0860_8000);
        rec.protected = true;
        let bytes = prepare(&rec);
        let word = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_ne!(word & ExecFlags::LIB_PROTECTED.bits(), 0);
        let back = parse(&mut Reader::new(&bytes)).unwrap();
        assert!(back.protected);
        assert_eq!(back.exec_flags, rec.exec_flags);
        assert_eq!(back.exec_flags & ExecFlags::LIB_PROTECTED.bits(), 0);
    }
}
