// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! `VICD`: the compiled code block.
//!
//! Disassembly is out of scope; what the core keeps is just enough to
//! round-trip and label the block: the code-ID word up front, which also
//! decides the endianness of everything after it, and the patch-table
//! marker. Patch tables come in two on-wire shapes — the newer one opens
//! with `0xBADEEBAD` ("MCLVRT"), anything else is the older plain form —
//! and both are carried as opaque bytes.
//!
//! The section is zlib-coded from 8.0.0.3.

use crate::codec::Reader;
use crate::error::Result;
use crate::version::Version;

/// Marker opening the newer patch-table shape.
pub const PATCHES_MARKER: u32 = 0xBADE_EBAD;

/// Code-ID values whose payload is little-endian.
const LITTLE_ENDIAN_CODE_IDS: [&[u8; 4]; 4] = [b"i386", b"wx64", b"ux86", b"ux64"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchShape {
    /// Opens with `0xBADEEBAD`.
    McLvrt,
    /// Anything else.
    Lvrt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRecord {
    /// Everything, verbatim. The fields below are a read-only view.
    pub raw: Vec<u8>,
    pub code_id: [u8; 4],
    pub little_endian: bool,
    pub patch_shape: PatchShape,
}

pub fn parse(r: &mut Reader<'_>) -> Result<CodeRecord> {
    let raw = r.read_rest().to_vec();
    let mut code_id = [0u8; 4];
    if raw.len() >= 4 {
        code_id.copy_from_slice(&raw[0..4]);
    }
    let little_endian = LITTLE_ENDIAN_CODE_IDS.contains(&&code_id);
    let patch_shape = if raw.len() >= 8 {
        let marker = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
        if marker == PATCHES_MARKER {
            PatchShape::McLvrt
        } else {
            PatchShape::Lvrt
        }
    } else {
        PatchShape::Lvrt
    };
    Ok(CodeRecord {
        raw,
        code_id,
        little_endian,
        patch_shape,
    })
}

pub fn prepare(rec: &CodeRecord) -> Vec<u8> {
    rec.raw.clone()
}

pub fn expected_size(rec: &CodeRecord) -> usize {
    rec.raw.len()
}

/// Coding policy: zlib from 8.0.0.3.
pub fn default_coding(version: &Version) -> crate::coding::BlockCoding {
    if version.at_least(8, 0, 0, 3) {
        crate::coding::BlockCoding::Zlib
    } else {
        crate::coding::BlockCoding::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endianness_sniff() {
        let mut bytes = b"i386".to_vec();
        bytes.extend(PATCHES_MARKER.to_be_bytes());
        bytes.extend([0u8; 8]);
        let rec = parse(&mut Reader::new(&bytes)).unwrap();
        assert!(rec.little_endian);
        assert_eq!(rec.patch_shape, PatchShape::McLvrt);
        assert_eq!(prepare(&rec), bytes);
    }

    #[test]
    fn plain_shape_and_big_endian() {
        let mut bytes = b"PWNT".to_vec();
        bytes.extend([0u8; 12]);
        let rec = parse(&mut Reader::new(&bytes)).unwrap();
        assert!(!rec.little_endian);
        assert_eq!(rec.patch_shape, PatchShape::Lvrt);
    }

    #[test]
    fn tiny_payload_still_roundtrips() {
        let bytes = vec![1u8, 2];
        let rec = parse(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(prepare(&rec), bytes);
        assert_eq!(expected_size(&rec), 2);
    }
}
