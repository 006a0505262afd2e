// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size structures framing the container: the RSRC header that opens
//! both the data and info regions, the block-info list header, the
//! block-info header, block headers and per-section start records.
//!
//! Every struct here knows its wire size and carries a `check_sanity` in the
//! same spirit as the rest of the format: soft-fail with a reason so the
//! caller decides whether the context makes it fatal.

use crate::codec::{Reader, Writer};
use crate::error::{LvError, Result};

/// Magic for format version 3 and newer.
pub const RSRC_MAGIC_V3: &[u8; 6] = b"RSRC\r\n";
/// Magic for format version 2 and older.
pub const RSRC_MAGIC_V2: &[u8; 6] = b"RSRC\0\0";
/// Standard signature four-CC.
pub const RSRC_SIGNATURE: &[u8; 4] = b"LBVW";
/// Signature used by legacy resource-service files.
pub const RSRC_SIGNATURE_RESC: &[u8; 4] = b"ResC";

/// Anything above this block count is treated as a corrupt file.
pub const BLOCKINFO_COUNT_LIMIT: u32 = 4096;

/// Pretty form of a four-CC: printable bytes pass through, the rest become
/// `_`. Used for XML tags, log lines and file names.
pub fn ident_str(ident: &[u8; 4]) -> String {
    ident
        .iter()
        .map(|&b| {
            if b.is_ascii_alphanumeric() {
                b as char
            } else {
                '_'
            }
        })
        .collect()
}

/// Inverse of [`ident_str`] for reading XML tags back: `_` stands for space.
pub fn ident_from_pretty(pretty: &str) -> [u8; 4] {
    let mut ident = [b' '; 4];
    for (slot, ch) in ident.iter_mut().zip(pretty.chars()) {
        *slot = if ch == '_' { b' ' } else { ch as u8 };
    }
    ident
}

// ============================================================================
// FILE TYPE
// ============================================================================

/// Recognized container file types by their four-CC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    None,
    Control,
    DLog,
    ClassLib,
    Project,
    Library,
    PackedProjLib,
    Llb,
    MenuPalette,
    TemplateControl,
    TemplateVi,
    XControl,
    UsrIfaceResrc,
    RFilesService,
    RFilesOld,
    Subroutine,
    Vi,
    Zero,
}

impl FileType {
    pub const ALL: [FileType; 17] = [
        FileType::Control,
        FileType::DLog,
        FileType::ClassLib,
        FileType::Project,
        FileType::Library,
        FileType::PackedProjLib,
        FileType::Llb,
        FileType::MenuPalette,
        FileType::TemplateControl,
        FileType::TemplateVi,
        FileType::XControl,
        FileType::UsrIfaceResrc,
        FileType::RFilesService,
        FileType::RFilesOld,
        FileType::Subroutine,
        FileType::Vi,
        FileType::Zero,
    ];

    pub fn four_cc(self) -> Option<&'static [u8; 4]> {
        match self {
            FileType::Control => Some(b"LVCC"),
            FileType::DLog => Some(b"LVDL"),
            FileType::ClassLib => Some(b"CLIB"),
            FileType::Project => Some(b"LVPJ"),
            FileType::Library => Some(b"LIBR"),
            FileType::PackedProjLib => Some(b"LIBP"),
            FileType::Llb => Some(b"LVAR"),
            FileType::MenuPalette => Some(b"LMNU"),
            FileType::RFilesService => Some(b"LVRS"),
            FileType::RFilesOld => Some(b"rsc "),
            FileType::TemplateControl => Some(b"sVCC"),
            FileType::TemplateVi => Some(b"sVIN"),
            FileType::XControl => Some(b"LVXC"),
            FileType::UsrIfaceResrc => Some(b"iUWl"),
            FileType::Subroutine => Some(b"LVSB"),
            FileType::Vi => Some(b"LVIN"),
            FileType::Zero => Some(b"\0\0\0\0"),
            FileType::None => None,
        }
    }

    pub fn recognize(four_cc: &[u8; 4]) -> FileType {
        FileType::ALL
            .into_iter()
            .find(|t| t.four_cc() == Some(four_cc))
            .unwrap_or(FileType::None)
    }

    /// Preferred file extension for this type (`rsrc` when nothing better).
    pub fn extension(self) -> &'static str {
        match self {
            FileType::Control => "ctl",
            FileType::DLog => "dlog",
            FileType::ClassLib => "lvclass",
            FileType::Project => "lvproj",
            FileType::PackedProjLib => "lvlibp",
            FileType::Library => "lvlib",
            FileType::Llb => "llb",
            FileType::MenuPalette => "mnu",
            FileType::TemplateControl => "ctt",
            FileType::TemplateVi => "vit",
            FileType::XControl => "xctl",
            FileType::UsrIfaceResrc => "uir",
            FileType::Subroutine => "lsb",
            FileType::Vi => "vi",
            _ => "rsrc",
        }
    }
}

// ============================================================================
// RSRC HEADER
// ============================================================================

/// The 32-byte header that opens both regions of the file. The second copy
/// repeats the first; both are rewritten once offsets are final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsrcHeader {
    pub magic: [u8; 6],
    pub format_version: u16,
    pub rsrc_type: [u8; 4],
    pub signature: [u8; 4],
    pub info_offset: u32,
    pub info_size: u32,
    pub data_offset: u32,
    pub data_size: u32,
}

impl RsrcHeader {
    pub const SIZE: usize = 32;

    pub fn new(format_version: u16, rsrc_type: [u8; 4]) -> Self {
        RsrcHeader {
            magic: if format_version >= 3 {
                *RSRC_MAGIC_V3
            } else {
                *RSRC_MAGIC_V2
            },
            format_version,
            rsrc_type,
            signature: *RSRC_SIGNATURE,
            info_offset: 0,
            info_size: 0,
            data_offset: Self::SIZE as u32,
            data_size: 0,
        }
    }

    pub fn file_type(&self) -> FileType {
        FileType::recognize(&self.rsrc_type)
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        let magic_bytes = r.read_bytes(6)?;
        let mut magic = [0u8; 6];
        magic.copy_from_slice(magic_bytes);
        let format_version = r.read_u16()?;
        let mut rsrc_type = [0u8; 4];
        rsrc_type.copy_from_slice(r.read_bytes(4)?);
        let mut signature = [0u8; 4];
        signature.copy_from_slice(r.read_bytes(4)?);
        Ok(RsrcHeader {
            magic,
            format_version,
            rsrc_type,
            signature,
            info_offset: r.read_u32()?,
            info_size: r.read_u32()?,
            data_offset: r.read_u32()?,
            data_size: r.read_u32()?,
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_bytes(&self.magic);
        w.write_u16(self.format_version);
        w.write_bytes(&self.rsrc_type);
        w.write_bytes(&self.signature);
        w.write_u32(self.info_offset);
        w.write_u32(self.info_size);
        w.write_u32(self.data_offset);
        w.write_u32(self.data_size);
    }

    /// Magic, type and signature validation per format version.
    pub fn check_sanity(&self) -> std::result::Result<(), String> {
        let magic_ok = self.magic == *RSRC_MAGIC_V3
            || (self.format_version <= 2 && self.magic == *RSRC_MAGIC_V2);
        if !magic_ok {
            return Err(format!("unexpected magic {:02x?}", self.magic));
        }
        let ftype = self.file_type();
        if ftype == FileType::None {
            return Err(format!("unrecognized file type {:02x?}", self.rsrc_type));
        }
        let sig_ok = self.signature == *RSRC_SIGNATURE
            || (ftype == FileType::RFilesOld && self.signature == *RSRC_SIGNATURE_RESC)
            || (self.format_version <= 2 && self.signature == [0u8; 4]);
        if !sig_ok {
            return Err(format!("unexpected signature {:02x?}", self.signature));
        }
        if (self.data_offset as usize) < Self::SIZE {
            return Err(format!("data offset {} inside header", self.data_offset));
        }
        Ok(())
    }
}

// ============================================================================
// INFO REGION HEADERS
// ============================================================================

/// First structure after the info-region RSRC header. `int1`/`int2` carry
/// meaning only in LLBs and pre-7.0 files; `int3` repeats the RSRC header
/// size as a sanity anchor.
#[derive(Debug, Clone, Default)]
pub struct BlockInfoListHeader {
    pub int1: u32,
    pub int2: u32,
    pub int3: u32,
    pub blockinfo_offset: u32,
    pub blockinfo_size: u32,
}

impl BlockInfoListHeader {
    pub const SIZE: usize = 20;

    pub fn new() -> Self {
        BlockInfoListHeader {
            int1: 0,
            int2: 0,
            int3: RsrcHeader::SIZE as u32,
            blockinfo_offset: (RsrcHeader::SIZE + Self::SIZE) as u32,
            blockinfo_size: 0,
        }
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(BlockInfoListHeader {
            int1: r.read_u32()?,
            int2: r.read_u32()?,
            int3: r.read_u32()?,
            blockinfo_offset: r.read_u32()?,
            blockinfo_size: r.read_u32()?,
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_u32(self.int1);
        w.write_u32(self.int2);
        w.write_u32(self.int3);
        w.write_u32(self.blockinfo_offset);
        w.write_u32(self.blockinfo_size);
    }

    pub fn check_sanity(&self) -> std::result::Result<(), String> {
        if self.int3 != RsrcHeader::SIZE as u32 {
            return Err(format!("list header anchor {} != {}", self.int3, RsrcHeader::SIZE));
        }
        if self.blockinfo_offset != (RsrcHeader::SIZE + Self::SIZE) as u32 {
            return Err(format!("blockinfo offset {} unexpected", self.blockinfo_offset));
        }
        Ok(())
    }
}

/// One u32: the block count minus one.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockInfoHeader {
    pub count_minus_one: u32,
}

impl BlockInfoHeader {
    pub const SIZE: usize = 4;

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(BlockInfoHeader {
            count_minus_one: r.read_u32()?,
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_u32(self.count_minus_one);
    }

    pub fn block_count(&self) -> Result<usize> {
        if self.count_minus_one > BLOCKINFO_COUNT_LIMIT {
            return Err(LvError::ContainerMalformed(format!(
                "block count {} above limit {}",
                self.count_minus_one, BLOCKINFO_COUNT_LIMIT
            )));
        }
        Ok(self.count_minus_one as usize + 1)
    }
}

/// Per-block record in the info region: ident, section count minus one, and
/// the offset of this block's section-start array relative to
/// `info_offset + blockinfo_offset`.
#[derive(Debug, Clone)]
pub struct BlockHeaderRec {
    pub ident: [u8; 4],
    pub count_minus_one: u32,
    pub offset: u32,
}

impl BlockHeaderRec {
    pub const SIZE: usize = 12;

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        let mut ident = [0u8; 4];
        ident.copy_from_slice(r.read_bytes(4)?);
        Ok(BlockHeaderRec {
            ident,
            count_minus_one: r.read_u32()?,
            offset: r.read_u32()?,
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_bytes(&self.ident);
        w.write_u32(self.count_minus_one);
        w.write_u32(self.offset);
    }
}

/// Start record of one section: index, name offset (0xFFFFFFFF = unnamed),
/// a reserved int, data offset relative to the data region, reserved int.
#[derive(Debug, Clone)]
pub struct SectionStart {
    pub section_idx: i32,
    pub name_offset: u32,
    pub int3: u32,
    pub data_offset: u32,
    pub int5: u32,
}

/// Sentinel name offset of an unnamed section.
pub const NO_NAME: u32 = 0xFFFF_FFFF;

impl Default for SectionStart {
    fn default() -> Self {
        SectionStart {
            section_idx: 0,
            name_offset: NO_NAME,
            int3: 0,
            data_offset: 0,
            int5: 0,
        }
    }
}

impl SectionStart {
    pub const SIZE: usize = 20;

    pub fn read(r: &mut Reader<'_>) -> Result<Self> {
        Ok(SectionStart {
            section_idx: r.read_i32()?,
            name_offset: r.read_u32()?,
            int3: r.read_u32()?,
            data_offset: r.read_u32()?,
            int5: r.read_u32()?,
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_i32(self.section_idx);
        w.write_u32(self.name_offset);
        w.write_u32(self.int3);
        w.write_u32(self.data_offset);
        w.write_u32(self.int5);
    }
}

/// The 4-byte size prefix in front of each section's raw payload.
pub const SECTION_DATA_HEADER_SIZE: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let hdr = RsrcHeader::new(3, *b"LVIN");
        let mut w = Writer::new();
        hdr.write(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), RsrcHeader::SIZE);
        let mut r = Reader::new(&bytes);
        let back = RsrcHeader::read(&mut r).unwrap();
        assert_eq!(back, hdr);
        assert!(back.check_sanity().is_ok());
        assert_eq!(back.file_type(), FileType::Vi);
    }

    #[test]
    fn legacy_magic_only_for_old_formats() {
        let mut hdr = RsrcHeader::new(3, *b"LVIN");
        hdr.magic = *RSRC_MAGIC_V2;
        assert!(hdr.check_sanity().is_err());
        hdr.format_version = 2;
        assert!(hdr.check_sanity().is_ok());
    }

    #[test]
    fn file_type_table() {
        assert_eq!(FileType::recognize(b"LIBP"), FileType::PackedProjLib);
        assert_eq!(FileType::recognize(b"LVAR"), FileType::Llb);
        assert_eq!(FileType::recognize(b"ZZZZ"), FileType::None);
        assert_eq!(FileType::Vi.extension(), "vi");
        assert_eq!(FileType::RFilesService.extension(), "rsrc");
    }

    #[test]
    fn block_count_limit() {
        let h = BlockInfoHeader {
            count_minus_one: BLOCKINFO_COUNT_LIMIT + 1,
        };
        assert!(h.block_count().is_err());
    }

    #[test]
    fn ident_pretty_roundtrip() {
        assert_eq!(ident_str(b"VCTP"), "VCTP");
        assert_eq!(ident_str(b"rsc "), "rsc_");
        assert_eq!(ident_from_pretty("rsc_"), *b"rsc ");
    }
}
