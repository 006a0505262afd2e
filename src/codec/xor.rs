// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! XOR stream cipher with a fixed 8320-byte keystream.
//!
//! Used by the compiled-code stream and the zipped program tree (`LVzp`).
//! The keystream repeats for payloads longer than 8320 bytes, so the cipher
//! is its own inverse: applying it twice yields the original bytes.

use std::sync::OnceLock;

/// Length of the keystream table.
pub const KEYSTREAM_LEN: usize = 8320;

fn keystream() -> &'static [u8; KEYSTREAM_LEN] {
    static KEY: OnceLock<[u8; KEYSTREAM_LEN]> = OnceLock::new();
    KEY.get_or_init(|| {
        // LCG-expanded table; seed and multiplier are fixed so every build
        // produces the same stream.
        let mut key = [0u8; KEYSTREAM_LEN];
        let mut state: u32 = 0x6C56_8B4F;
        for slot in key.iter_mut() {
            state = state.wrapping_mul(0x0001_9660D).wrapping_add(0x3C6E_F35F);
            *slot = (state >> 16) as u8;
        }
        key
    })
}

/// XOR the payload against the keystream, indices taken modulo the stream
/// length. Encryption and decryption are the same operation.
pub fn apply(data: &[u8]) -> Vec<u8> {
    let key = keystream();
    data.iter()
        .enumerate()
        .map(|(i, &b)| b ^ key[i % KEYSTREAM_LEN])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_apply_is_identity() {
        let plain: Vec<u8> = (0u8..=0x0F).collect();
        assert_eq!(apply(&apply(&plain)), plain);
    }

    #[test]
    fn long_payload_wraps_keystream() {
        let plain = vec![0xA5u8; KEYSTREAM_LEN + 17];
        let enc = apply(&plain);
        assert_ne!(enc, plain);
        // Byte at i and i + KEYSTREAM_LEN share a key byte.
        assert_eq!(enc[3], enc[3 + KEYSTREAM_LEN]);
        assert_eq!(apply(&enc), plain);
    }

    #[test]
    fn empty_payload() {
        assert!(apply(&[]).is_empty());
    }
}
