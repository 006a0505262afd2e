// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Zero-mask-8 compression: the authoring tool's scheme for sparse payloads.
//!
//! The stream is a sequence of groups. Each group is one mask byte followed
//! by the literal bytes for the mask's set bits, MSB first: bit 7 describes
//! the first of eight output bytes. A clear bit expands to a zero byte with
//! no input consumed. Eight input bytes therefore cost at most nine bytes
//! (all literals) and at least one (all zeros), which is where the 8/9..8/1
//! expansion bounds enforced by the coding layer come from.

use crate::error::{LvError, Result};

/// Expand a zero-mask-8 stream to exactly `plain_len` bytes.
pub fn decompress(data: &[u8], plain_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(plain_len);
    let mut pos = 0usize;
    while out.len() < plain_len {
        let mask = *data
            .get(pos)
            .ok_or_else(|| LvError::UnexpectedEnd("zero-mask-8 mask byte".into()))?;
        pos += 1;
        for bit in (0..8).rev() {
            if out.len() >= plain_len {
                // Trailing bits of the final mask describe padding.
                break;
            }
            if mask & (1 << bit) != 0 {
                let b = *data
                    .get(pos)
                    .ok_or_else(|| LvError::UnexpectedEnd("zero-mask-8 literal byte".into()))?;
                pos += 1;
                out.push(b);
            } else {
                out.push(0);
            }
        }
    }
    Ok(out)
}

/// Compress by eliding zero bytes behind a per-group mask.
pub fn compress(plain: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(plain.len() + plain.len() / 8 + 1);
    for group in plain.chunks(8) {
        let mut mask = 0u8;
        for (i, &b) in group.iter().enumerate() {
            if b != 0 {
                mask |= 1 << (7 - i);
            }
        }
        out.push(mask);
        out.extend(group.iter().filter(|&&b| b != 0));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zeros_collapse_to_masks() {
        let plain = [0u8; 16];
        let comp = compress(&plain);
        assert_eq!(comp, vec![0, 0]);
        assert_eq!(decompress(&comp, 16).unwrap(), plain);
    }

    #[test]
    fn dense_data_costs_one_mask_per_group() {
        let plain: Vec<u8> = (1u8..=8).collect();
        let comp = compress(&plain);
        assert_eq!(comp.len(), 9);
        assert_eq!(comp[0], 0xFF);
        assert_eq!(decompress(&comp, 8).unwrap(), plain);
    }

    #[test]
    fn partial_tail_group() {
        let plain = [0u8, 7, 0];
        let comp = compress(&plain);
        assert_eq!(comp, vec![0b0100_0000, 7]);
        assert_eq!(decompress(&comp, 3).unwrap(), plain);
    }

    #[test]
    fn truncated_stream_errors() {
        assert!(decompress(&[0xFF, 1, 2], 8).is_err());
    }

    proptest! {
        #[test]
        fn roundtrip(plain in proptest::collection::vec(any::<u8>(), 0..600)) {
            let comp = compress(&plain);
            prop_assert_eq!(decompress(&comp, plain.len()).unwrap(), plain);
        }
    }
}
