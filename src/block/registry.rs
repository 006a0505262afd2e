// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Dispatch from four-CC to block implementation.
//!
//! One static table, consulted at block construction; there is no runtime
//! class lookup. Idents with identical wire layout share a kind (the
//! connector-pane pair `CPC2`/`CPCT`, the heap families, the single-u32
//! family). Anything not in the table is `Raw` and round-trips untouched.
//!
//! `DSTM`, `DFDS` and `LVzp` are also parsed as raw here: `DSTM` because
//! its pre-8.0 layout is unsupported, `LVzp` because its payload is an
//! opaque zip archive, and `DFDS` because its parse needs TM80 and VCTP —
//! the container fills its content in during the integration phase.

use crate::codec::Reader;
use crate::coding::BlockCoding;
use crate::error::{LvError, Result};
use crate::version::Version;

use super::{bdpw, dfds, dthp, heap, leaf, libn, lvsr, tm80, vctp, vers, vicd, Content};

/// Implementation selector for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockKind {
    #[default]
    Raw,
    Vers,
    Lvsr,
    Bdpw,
    Libn,
    Vctp,
    Tm80,
    /// Pre-8.0 type map; kept raw, but owns the version-gated coding.
    Dstm,
    Dfds,
    Dthp,
    HeapP,
    HeapB,
    HeapC,
    Vicd,
    /// Zipped program tree; opaque, XOR-coded.
    Lvzp,
    SingleInt,
    TdIndex,
}

/// The dispatch table. Order only matters for readability.
const REGISTRY: &[(&[u8; 4], BlockKind)] = &[
    (b"vers", BlockKind::Vers),
    (b"LVSR", BlockKind::Lvsr),
    (b"BDPW", BlockKind::Bdpw),
    (b"LIBN", BlockKind::Libn),
    (b"VCTP", BlockKind::Vctp),
    (b"TM80", BlockKind::Tm80),
    (b"DSTM", BlockKind::Dstm),
    (b"DFDS", BlockKind::Dfds),
    (b"DTHP", BlockKind::Dthp),
    (b"BDHP", BlockKind::HeapP),
    (b"FPHP", BlockKind::HeapP),
    (b"BDHb", BlockKind::HeapB),
    (b"FPHb", BlockKind::HeapB),
    (b"BDHc", BlockKind::HeapC),
    (b"FPHc", BlockKind::HeapC),
    (b"VICD", BlockKind::Vicd),
    (b"LVzp", BlockKind::Lvzp),
    (b"BDSE", BlockKind::SingleInt),
    (b"FPSE", BlockKind::SingleInt),
    (b"MUID", BlockKind::SingleInt),
    (b"FLAG", BlockKind::SingleInt),
    (b"CCST", BlockKind::SingleInt),
    (b"CONP", BlockKind::TdIndex),
    (b"CPC2", BlockKind::TdIndex),
    (b"CPCT", BlockKind::TdIndex),
    (b"CPD2", BlockKind::TdIndex),
    (b"CPDI", BlockKind::TdIndex),
    (b"FPTD", BlockKind::TdIndex),
];

pub fn lookup(ident: &[u8; 4]) -> BlockKind {
    REGISTRY
        .iter()
        .find(|(id, _)| *id == ident)
        .map(|(_, kind)| *kind)
        .unwrap_or(BlockKind::Raw)
}

/// Parse a section's plain bytes. The reader must be fully consumed;
/// kinds kept raw consume everything by definition.
pub fn parse(kind: BlockKind, version: &Version, r: &mut Reader<'_>) -> Result<Content> {
    let content = match kind {
        BlockKind::Raw | BlockKind::Dstm | BlockKind::Lvzp | BlockKind::Dfds => {
            r.read_rest();
            Content::Raw
        }
        BlockKind::Vers => Content::Vers(vers::parse(r)?),
        BlockKind::Lvsr => Content::Lvsr(lvsr::parse(r)?),
        BlockKind::Bdpw => Content::Bdpw(bdpw::parse(r, version)?),
        BlockKind::Libn => Content::Libn(libn::parse(r)?),
        BlockKind::Vctp => Content::Vctp(vctp::parse(r)?),
        BlockKind::Tm80 => Content::TypeMap(tm80::parse(r)?),
        BlockKind::Dthp => Content::Dthp(dthp::parse(r, version)?),
        BlockKind::HeapP | BlockKind::HeapB | BlockKind::HeapC => Content::Heap(heap::parse(r)?),
        BlockKind::Vicd => Content::Vicd(vicd::parse(r)?),
        BlockKind::SingleInt => Content::SingleInt(leaf::parse_single_int(r)?),
        BlockKind::TdIndex => Content::TdIndex(leaf::parse_td_index(r)?),
    };
    Ok(content)
}

/// Serialize parsed content back to plain bytes.
pub fn prepare(kind: BlockKind, version: &Version, content: &Content) -> Result<Vec<u8>> {
    let plain = match (kind, content) {
        (BlockKind::Vers, Content::Vers(rec)) => vers::prepare(rec),
        (BlockKind::Lvsr, Content::Lvsr(rec)) => lvsr::prepare(rec),
        (BlockKind::Bdpw, Content::Bdpw(rec)) => bdpw::prepare(rec, version),
        (BlockKind::Libn, Content::Libn(rec)) => libn::prepare(rec),
        (BlockKind::Vctp, Content::Vctp(table)) => vctp::prepare(table),
        (BlockKind::Tm80, Content::TypeMap(map)) => tm80::prepare(map),
        (BlockKind::Dfds, Content::Dfds(fills)) => dfds::prepare(fills),
        (BlockKind::Dthp, Content::Dthp(rec)) => dthp::prepare(rec),
        (BlockKind::HeapP | BlockKind::HeapB | BlockKind::HeapC, Content::Heap(rec)) => {
            heap::prepare(rec)
        }
        (BlockKind::Vicd, Content::Vicd(rec)) => vicd::prepare(rec),
        (BlockKind::SingleInt, Content::SingleInt(rec)) => leaf::prepare_single_int(rec),
        (BlockKind::TdIndex, Content::TdIndex(rec)) => leaf::prepare_td_index(rec),
        (kind, content) => {
            return Err(LvError::ContainerMalformed(format!(
                "cannot prepare {:?} content for {:?} block",
                std::mem::discriminant(content),
                kind
            )))
        }
    };
    Ok(plain)
}

/// Size `prepare` must produce, when the kind can predict it.
pub fn expected_size(kind: BlockKind, version: &Version, content: &Content) -> Option<usize> {
    match (kind, content) {
        (BlockKind::Vers, Content::Vers(rec)) => Some(vers::expected_size(rec)),
        (BlockKind::Lvsr, Content::Lvsr(rec)) => Some(lvsr::expected_size(rec)),
        (BlockKind::Bdpw, Content::Bdpw(_)) => Some(bdpw::expected_size(version)),
        (BlockKind::Libn, Content::Libn(rec)) => Some(libn::expected_size(rec)),
        (BlockKind::Tm80, Content::TypeMap(map)) => Some(tm80::expected_size(map)),
        (BlockKind::Dfds, Content::Dfds(fills)) => Some(dfds::expected_size(fills)),
        (BlockKind::Dthp, Content::Dthp(rec)) => Some(dthp::expected_size(rec)),
        (BlockKind::HeapP | BlockKind::HeapB | BlockKind::HeapC, Content::Heap(rec)) => {
            Some(heap::expected_size(rec))
        }
        (BlockKind::Vicd, Content::Vicd(rec)) => Some(vicd::expected_size(rec)),
        (BlockKind::SingleInt, Content::SingleInt(_)) => Some(4),
        (BlockKind::TdIndex, Content::TdIndex(_)) => Some(2),
        // The type table's nested sizing is its own serializer; no
        // independent prediction to check against.
        _ => None,
    }
}

/// Preferred XML storage per kind: big opaque payloads go to side files,
/// the type table to its own XML, parsed records inline.
pub fn default_storage(kind: BlockKind) -> super::StorageFormat {
    use super::StorageFormat;
    match kind {
        BlockKind::Raw
        | BlockKind::Dstm
        | BlockKind::Lvzp
        | BlockKind::Vicd
        | BlockKind::HeapP
        | BlockKind::HeapB
        | BlockKind::HeapC => StorageFormat::Bin,
        BlockKind::Vctp => StorageFormat::XmlFile,
        _ => StorageFormat::Inline,
    }
}

/// Version-sensitive coding policy per kind.
pub fn default_coding(kind: BlockKind, version: &Version) -> BlockCoding {
    match kind {
        BlockKind::Vctp => BlockCoding::Zlib,
        BlockKind::HeapB | BlockKind::HeapC => BlockCoding::Zlib,
        BlockKind::Tm80 => tm80::default_coding(version),
        BlockKind::Dfds => dfds::default_coding(version),
        BlockKind::Vicd => vicd::default_coding(version),
        BlockKind::Lvzp => BlockCoding::Xor,
        BlockKind::Dstm => {
            if version.at_least(8, 0, 0, 0) {
                BlockCoding::Zlib
            } else {
                BlockCoding::None
            }
        }
        _ => BlockCoding::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_layouts_map_to_one_kind() {
        assert_eq!(lookup(b"CPC2"), lookup(b"CPCT"));
        assert_eq!(lookup(b"BDHc"), lookup(b"FPHc"));
        assert_eq!(lookup(b"BDSE"), lookup(b"MUID"));
    }

    #[test]
    fn unknown_ident_is_raw() {
        assert_eq!(lookup(b"ZZZZ"), BlockKind::Raw);
        assert_eq!(lookup(b"\0\0\0\0"), BlockKind::Raw);
    }

    #[test]
    fn coding_policy_by_version() {
        let v71 = Version::decode(0x0710_8000);
        let v86 = Version::decode(0x0860_8000);
        let v10 = Version::decode(0x0A00_8000);
        assert_eq!(default_coding(BlockKind::Vctp, &v71), BlockCoding::Zlib);
        assert_eq!(default_coding(BlockKind::Dfds, &v71), BlockCoding::None);
        assert_eq!(default_coding(BlockKind::Dfds, &v86), BlockCoding::Zlib);
        assert_eq!(default_coding(BlockKind::Tm80, &v86), BlockCoding::None);
        assert_eq!(default_coding(BlockKind::Tm80, &v10), BlockCoding::Zlib);
        assert_eq!(default_coding(BlockKind::Lvzp, &v71), BlockCoding::Xor);
        assert_eq!(default_coding(BlockKind::Vers, &v10), BlockCoding::None);
    }

    #[test]
    fn vicd_coding_needs_the_bugfix_build() {
        let v800 = Version::decode(0x0800_8000);
        let v8003 = Version::decode(0x0800_8003);
        assert_eq!(default_coding(BlockKind::Vicd, &v800), BlockCoding::None);
        assert_eq!(default_coding(BlockKind::Vicd, &v8003), BlockCoding::Zlib);
    }
}
