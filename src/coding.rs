// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Per-section payload coding.
//!
//! A section's raw bytes may be stored plain, zlib-deflated, zero-mask-8
//! compressed, or XOR-ciphered. Which one applies is a property of the block
//! kind and the file version, decided by the registry; this module only
//! knows how to move bytes between the raw and plain forms.
//!
//! For the two compressed codings the raw form starts with a big-endian u32
//! holding the plain size. Decoding validates that size against the coding's
//! legal expansion ratio before inflating anything, so a hostile header
//! cannot demand an absurd allocation: zlib tops out at 1032:1 and
//! zero-mask-8 at 8:1.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::codec::{runmask, xor};
use crate::error::{LvError, Result};

/// Storage coding of one section's raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockCoding {
    #[default]
    None,
    /// The authoring tool's zero-mask-8 scheme.
    ZeroMask8,
    Zlib,
    Xor,
}

impl BlockCoding {
    /// Name used in diagnostics, print maps and the XML `Coding` attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            BlockCoding::None => "none",
            BlockCoding::ZeroMask8 => "zeromask8",
            BlockCoding::Zlib => "zlib",
            BlockCoding::Xor => "xor",
        }
    }

    /// Inverse of [`as_str`](Self::as_str), for reading the attribute back.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "none" => Some(BlockCoding::None),
            "zeromask8" => Some(BlockCoding::ZeroMask8),
            "zlib" => Some(BlockCoding::Zlib),
            "xor" => Some(BlockCoding::Xor),
            _ => None,
        }
    }
}

fn bounds_err(ident: &[u8; 4], section: i32, detail: String) -> LvError {
    LvError::CodecBounds {
        ident: crate::container::ident_str(ident),
        section,
        detail,
    }
}

/// Decode raw section bytes to their plain form.
///
/// `ident`/`section` only feed error messages.
pub fn decode(coding: BlockCoding, raw: &[u8], ident: &[u8; 4], section: i32) -> Result<Vec<u8>> {
    match coding {
        BlockCoding::None => Ok(raw.to_vec()),
        BlockCoding::Xor => Ok(xor::apply(raw)),
        BlockCoding::ZeroMask8 => {
            let size = raw.len().saturating_sub(4);
            if size < 2 {
                return Err(bounds_err(ident, section, format!("block too short: {}", raw.len())));
            }
            let usize_ = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
            // Every 8 plain bytes need at least one mask byte, and at most
            // 7 plain bytes of the last group are padding.
            if usize_ > size * 8 || usize_ + 7 < (size * 8) / 9 {
                return Err(bounds_err(
                    ident,
                    section,
                    format!("zero-mask-8 size {} implausible for {} raw bytes", usize_, size),
                ));
            }
            runmask::decompress(&raw[4..], usize_)
        }
        BlockCoding::Zlib => {
            let size = raw.len().saturating_sub(4);
            if size < 2 {
                return Err(bounds_err(ident, section, format!("block too short: {}", raw.len())));
            }
            let usize_ = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
            // zlib's max theoretical ratio is 1032:1; the low-side floors
            // catch payloads that claim to have shrunk incompressible data.
            if (size > 16 && usize_ < (size * 5) / 10)
                || (size > 128 && usize_ < (size * 9) / 10)
                || usize_ > size * 1032
            {
                return Err(bounds_err(
                    ident,
                    section,
                    format!("zlib size {} implausible for {} raw bytes", usize_, size),
                ));
            }
            let mut plain = Vec::with_capacity(usize_);
            let mut dec = ZlibDecoder::new(&raw[4..]);
            dec.read_to_end(&mut plain)
                .map_err(|e| bounds_err(ident, section, format!("zlib inflate failed: {}", e)))?;
            Ok(plain)
        }
    }
}

/// Encode plain bytes into the raw form stored in the container.
pub fn encode(coding: BlockCoding, plain: &[u8]) -> Result<Vec<u8>> {
    match coding {
        BlockCoding::None => Ok(plain.to_vec()),
        BlockCoding::Xor => Ok(xor::apply(plain)),
        BlockCoding::ZeroMask8 => {
            let mut raw = (plain.len() as u32).to_be_bytes().to_vec();
            raw.extend(runmask::compress(plain));
            Ok(raw)
        }
        BlockCoding::Zlib => {
            let mut raw = (plain.len() as u32).to_be_bytes().to_vec();
            let mut enc = ZlibEncoder::new(raw, Compression::default());
            enc.write_all(plain)?;
            raw = enc.finish()?;
            Ok(raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ID: &[u8; 4] = b"TST0";

    #[test]
    fn none_is_passthrough() {
        let plain = b"abcdef".to_vec();
        let raw = encode(BlockCoding::None, &plain).unwrap();
        assert_eq!(raw, plain);
        assert_eq!(decode(BlockCoding::None, &raw, ID, 0).unwrap(), plain);
    }

    #[test]
    fn zlib_header_carries_plain_size() {
        let plain = vec![0x42u8; 300];
        let raw = encode(BlockCoding::Zlib, &plain).unwrap();
        let declared = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        assert_eq!(declared as usize, plain.len());
        assert_eq!(decode(BlockCoding::Zlib, &raw, ID, 0).unwrap(), plain);
    }

    #[test]
    fn zlib_rejects_ratio_violation() {
        let plain = vec![7u8; 64];
        let mut raw = encode(BlockCoding::Zlib, &plain).unwrap();
        // Claim an impossible plain size.
        let huge = (raw.len() as u32 - 4) * 1032 + 1;
        raw[..4].copy_from_slice(&huge.to_be_bytes());
        assert!(matches!(
            decode(BlockCoding::Zlib, &raw, ID, 0),
            Err(LvError::CodecBounds { .. })
        ));
    }

    #[test]
    fn zeromask_rejects_undersized_claim() {
        // 10 raw bytes past the header can encode at most 80 plain bytes.
        let mut raw = 100u32.to_be_bytes().to_vec();
        raw.extend([0u8; 10]);
        assert!(matches!(
            decode(BlockCoding::ZeroMask8, &raw, ID, 0),
            Err(LvError::CodecBounds { .. })
        ));
    }

    proptest! {
        #[test]
        // Lower bound stays above the zlib plausibility floor: stored-block
        // overhead on tiny incompressible payloads looks like a bad ratio.
        fn every_coding_inverts(plain in proptest::collection::vec(any::<u8>(), 16..512)) {
            for coding in [BlockCoding::None, BlockCoding::ZeroMask8, BlockCoding::Zlib, BlockCoding::Xor] {
                let raw = encode(coding, &plain).unwrap();
                prop_assert_eq!(decode(coding, &raw, ID, -1).unwrap(), plain.clone());
            }
        }
    }
}
