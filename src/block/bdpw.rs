// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! `BDPW`: the password record and the hash chain that pins it.
//!
//! On the wire it is two or three MD5 digests: `password_md5`, `hash_1`,
//! and from 8.0 `hash_2`. The interesting part is what feeds them:
//!
//! ```text
//! hash_1 = MD5( password_md5 ‖ LIBN names joined with ':' ‖ LVSR raw bytes ‖ salt )
//! hash_2 = MD5( hash_1 ‖ MD5(block-diagram heap content) )      (MD5("") if no heap)
//! ```
//!
//! The salt is the LE32 triple of (numeric, string, path) terminal counts
//! of the connector-pane Function type. Which Function that is must be
//! rediscovered at hash time: try the type `CPC2` points at, then every
//! Function in the table in reverse order, then brute-force the counts.
//! Each candidate is verified by reproducing the stored `hash_1`; files
//! below 12.0 skip the scan and use an empty salt.
//!
//! `LVSR` feeds the chain as its *re-prepared* raw bytes, so a protected
//! flag flipped in this session is what gets hashed — that is the whole
//! cross-block transaction behind `password` changes.

use log::{debug, info};

use crate::codec::Reader;
use crate::error::{LvError, Result};
use crate::version::Version;

use super::vctp::TypeTable;

/// Passwords worth testing against a bare `password_md5`, most common first.
const KNOWN_PASSWORDS: [&str; 10] = [
    "", "qwerty", "password", "111111", "12345678", "abc123", "1234567", "password1", "12345",
    "123",
];

/// Where a verified salt came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaltSource {
    #[default]
    None,
    Cpc2,
    TypeScan,
    BruteForce,
}

impl SaltSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SaltSource::None => "None",
            SaltSource::Cpc2 => "CPC2",
            SaltSource::TypeScan => "TD",
            SaltSource::BruteForce => "Brute",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "CPC2" => SaltSource::Cpc2,
            "TD" => SaltSource::TypeScan,
            "Brute" => SaltSource::BruteForce,
            _ => SaltSource::None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordRecord {
    pub password_md5: [u8; 16],
    pub hash_1: [u8; 16],
    /// Present from 8.0 on.
    pub hash_2: Option<[u8; 16]>,
    /// Clear-text password when known (set explicitly or recognized).
    pub password: Option<String>,
    /// Salt bookkeeping from the last scan; never on the wire.
    pub salt: Option<Vec<u8>>,
    pub salt_source: SaltSource,
    pub salt_td_flat_idx: Option<u32>,
}

/// Whether the record carries `hash_2` at this file version.
pub fn has_hash_2(version: &Version) -> bool {
    version.at_least(8, 0, 0, 0)
}

pub fn parse(r: &mut Reader<'_>, version: &Version) -> Result<PasswordRecord> {
    let mut rec = PasswordRecord::default();
    rec.password_md5.copy_from_slice(r.read_bytes(16)?);
    rec.hash_1.copy_from_slice(r.read_bytes(16)?);
    if has_hash_2(version) {
        let mut h2 = [0u8; 16];
        h2.copy_from_slice(r.read_bytes(16)?);
        rec.hash_2 = Some(h2);
    }
    Ok(rec)
}

pub fn prepare(rec: &PasswordRecord, version: &Version) -> Vec<u8> {
    let mut out = Vec::with_capacity(expected_size(version));
    out.extend_from_slice(&rec.password_md5);
    out.extend_from_slice(&rec.hash_1);
    if has_hash_2(version) {
        out.extend_from_slice(&rec.hash_2.unwrap_or_default());
    }
    out
}

pub fn expected_size(version: &Version) -> usize {
    if has_hash_2(version) {
        48
    } else {
        32
    }
}

/// The 12-byte salt from terminal counts, little-endian — one of the few
/// little-endian spots in the format.
pub fn salt_from_counts(numbers: u32, strings: u32, paths: u32) -> [u8; 12] {
    let mut salt = [0u8; 12];
    salt[0..4].copy_from_slice(&numbers.to_le_bytes());
    salt[4..8].copy_from_slice(&strings.to_le_bytes());
    salt[8..12].copy_from_slice(&paths.to_le_bytes());
    salt
}

/// Try to name a password from its MD5 using the common-password table.
pub fn recognize_password(password_md5: &[u8; 16]) -> Option<&'static str> {
    KNOWN_PASSWORDS
        .into_iter()
        .find(|p| md5::compute(p.as_bytes()).0 == *password_md5)
}

/// Outcome of a successful salt search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaltScan {
    pub salt: Vec<u8>,
    pub source: SaltSource,
    pub td_flat_idx: Option<u32>,
}

fn hash1_with(presalt: &[u8], salt: &[u8]) -> [u8; 16] {
    let mut ctx = md5::Context::new();
    ctx.consume(presalt);
    ctx.consume(salt);
    ctx.compute().0
}

/// Find the salt that reproduces `stored_hash_1`.
///
/// `presalt` is `password_md5 ‖ libn ‖ lvsr`. The brute-force counter is
/// bit-interleaved: counter bit `3b+k` feeds bit `b` of count `k`, so each
/// count covers 0..=255.
pub fn scan_for_salt(
    stored_hash_1: &[u8; 16],
    presalt: &[u8],
    table: &TypeTable,
    cpc2_type_id: Option<u32>,
    version: &Version,
) -> Result<SaltScan> {
    if !version.at_least(12, 0, 0, 0) {
        // Pre-12.0 hashes use no salt at all.
        return Ok(SaltScan {
            salt: Vec::new(),
            source: SaltSource::None,
            td_flat_idx: None,
        });
    }

    let salt_of = |flat_idx: u32| -> Option<[u8; 12]> {
        let td = table.flat_type(flat_idx)?;
        let (n, s, p) = table.terminal_counts(td);
        Some(salt_from_counts(n, s, p))
    };

    if let Some(type_id) = cpc2_type_id {
        if let Some(flat_idx) = table.top_flat_idx(type_id) {
            if let Some(salt) = salt_of(flat_idx) {
                if hash1_with(presalt, &salt) == *stored_hash_1 {
                    debug!("salt {} verified via CPC2", hex::encode(salt));
                    return Ok(SaltScan {
                        salt: salt.to_vec(),
                        source: SaltSource::Cpc2,
                        td_flat_idx: Some(flat_idx),
                    });
                }
            }
        }
    }

    // Usually the connector pane is the last Function in the table, so scan
    // in reverse.
    for flat_idx in table.function_flat_indices().into_iter().rev() {
        if let Some(salt) = salt_of(flat_idx) {
            if hash1_with(presalt, &salt) == *stored_hash_1 {
                debug!("salt {} verified via type scan", hex::encode(salt));
                return Ok(SaltScan {
                    salt: salt.to_vec(),
                    source: SaltSource::TypeScan,
                    td_flat_idx: Some(flat_idx),
                });
            }
        }
    }

    info!("no interface matched stored hash; brute-forcing salt counts");
    for i in 0u32..(1 << 24) {
        let mut counts = [0u32; 3];
        for b in 0..8 {
            for (k, count) in counts.iter_mut().enumerate() {
                *count |= ((i >> (3 * b + k)) & 1) << b;
            }
        }
        let salt = salt_from_counts(counts[0], counts[1], counts[2]);
        if hash1_with(presalt, &salt) == *stored_hash_1 {
            debug!("salt {} found by brute force", hex::encode(salt));
            return Ok(SaltScan {
                salt: salt.to_vec(),
                source: SaltSource::BruteForce,
                td_flat_idx: None,
            });
        }
    }
    Err(LvError::PasswordHashMismatch)
}

/// `hash_1` from its four ingredients.
pub fn hash_1(password_md5: &[u8; 16], libn: &[u8], lvsr_raw: &[u8], salt: &[u8]) -> [u8; 16] {
    let mut ctx = md5::Context::new();
    ctx.consume(password_md5);
    ctx.consume(libn);
    ctx.consume(lvsr_raw);
    ctx.consume(salt);
    ctx.compute().0
}

/// `hash_2` chains `hash_1` with the heap hash; with no heap present the
/// digest is of the empty string.
pub fn hash_2(hash_1: &[u8; 16], bdh_hash: Option<[u8; 16]>) -> [u8; 16] {
    match bdh_hash {
        Some(bdh) => {
            let mut ctx = md5::Context::new();
            ctx.consume(hash_1);
            ctx.consume(bdh);
            ctx.compute().0
        }
        None => md5::compute(b"").0,
    }
}

impl PasswordRecord {
    /// Set a new clear-text password. Hashes are not recomputed here; that
    /// is `finalize`'s job on the container, which has the peers.
    pub fn set_password(&mut self, password: &str, textenc: crate::textenc::TextEncoding) {
        self.password = Some(password.to_string());
        self.password_md5 = md5::compute(textenc.encode(password)).0;
    }

    pub fn set_password_md5(&mut self, password_md5: [u8; 16]) {
        self.password = None;
        self.password_md5 = password_md5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::textenc::TextEncoding;
    use crate::typedesc::{TdBody, TdKind, TypeDesc};

    fn lv14() -> Version {
        Version::decode(0x1400_8000)
    }

    #[test]
    fn wire_roundtrip_with_and_without_hash2() {
        let mut rec = PasswordRecord::default();
        rec.password_md5 = [1; 16];
        rec.hash_1 = [2; 16];
        rec.hash_2 = Some([3; 16]);
        let bytes = prepare(&rec, &lv14());
        assert_eq!(bytes.len(), 48);
        let back = parse(&mut Reader::new(&bytes), &lv14()).unwrap();
        assert_eq!(back.password_md5, rec.password_md5);
        assert_eq!(back.hash_2, rec.hash_2);

        let v71 = Version::decode(0x0710_8000);
        let bytes = prepare(&rec, &v71);
        assert_eq!(bytes.len(), 32);
        let back = parse(&mut Reader::new(&bytes), &v71).unwrap();
        assert_eq!(back.hash_2, None);
    }

    #[test]
    fn qwerty_md5_matches_spec() {
        let mut rec = PasswordRecord::default();
        rec.set_password("qwerty", TextEncoding::MacRoman);
        assert_eq!(
            hex::encode(rec.password_md5),
            "d8578edf8458ce06fbc5bb76a58c5ca4"
        );
        assert_eq!(recognize_password(&rec.password_md5), Some("qwerty"));
    }

    #[test]
    fn empty_password_md5() {
        let mut rec = PasswordRecord::default();
        rec.set_password("", TextEncoding::MacRoman);
        assert_eq!(rec.password_md5, md5::compute(b"").0);
        assert_eq!(recognize_password(&rec.password_md5), Some(""));
    }

    #[test]
    fn salt_triple_is_little_endian() {
        assert_eq!(
            salt_from_counts(2, 1, 0),
            *b"\x02\x00\x00\x00\x01\x00\x00\x00\x00\x00\x00\x00"
        );
    }

    fn salt_table() -> TypeTable {
        TypeTable {
            flat: vec![
                TypeDesc::new(TdKind::Int32, TdBody::Empty),
                TypeDesc::new(TdKind::Float64, TdBody::Empty),
                TypeDesc::new(TdKind::String, TdBody::Empty),
                TypeDesc::new(
                    TdKind::Function,
                    TdBody::Function {
                        terminals: vec![0, 1, 2],
                        pattern: 0,
                    },
                ),
            ],
            top_level: vec![3],
        }
    }

    #[test]
    fn scan_prefers_cpc2_then_reverse_type_scan() {
        let table = salt_table();
        let presalt = b"presalt bytes";
        // 2 numeric, 1 string, 0 path terminals.
        let expected_salt = salt_from_counts(2, 1, 0);
        let stored = hash1_with(presalt, &expected_salt);

        let scan = scan_for_salt(&stored, presalt, &table, Some(1), &lv14()).unwrap();
        assert_eq!(scan.source, SaltSource::Cpc2);
        assert_eq!(scan.salt, expected_salt.to_vec());
        assert_eq!(scan.td_flat_idx, Some(3));

        // Without CPC2 the reverse function scan finds the same interface.
        let scan = scan_for_salt(&stored, presalt, &table, None, &lv14()).unwrap();
        assert_eq!(scan.source, SaltSource::TypeScan);
        assert_eq!(scan.td_flat_idx, Some(3));
    }

    #[test]
    fn brute_force_recovers_unlisted_counts() {
        // No Function type in the table at all; counts (3, 0, 1) must come
        // out of the brute-force counter.
        let table = TypeTable::default();
        let presalt = b"x";
        let stored = hash1_with(presalt, &salt_from_counts(3, 0, 1));
        let scan = scan_for_salt(&stored, presalt, &table, None, &lv14()).unwrap();
        assert_eq!(scan.source, SaltSource::BruteForce);
        assert_eq!(scan.salt, salt_from_counts(3, 0, 1).to_vec());
    }

    #[test]
    fn pre_12_files_use_empty_salt() {
        let table = TypeTable::default();
        let scan = scan_for_salt(&[0; 16], b"", &table, None, &Version::decode(0x0A00_8000))
            .unwrap();
        assert_eq!(scan.source, SaltSource::None);
        assert!(scan.salt.is_empty());
    }

    #[test]
    fn hash_chain_formulas() {
        let pw = md5::compute(b"qwerty").0;
        let libn = b"Lib.lvlib";
        let lvsr = [9u8; 20];
        let salt = salt_from_counts(2, 1, 0);
        let h1 = hash_1(&pw, libn, &lvsr, &salt);
        let mut manual = Vec::new();
        manual.extend_from_slice(&pw);
        manual.extend_from_slice(libn);
        manual.extend_from_slice(&lvsr);
        manual.extend_from_slice(&salt);
        assert_eq!(h1, md5::compute(&manual).0);

        let bdh = md5::compute(b"heap").0;
        let h2 = hash_2(&h1, Some(bdh));
        let mut manual = h1.to_vec();
        manual.extend_from_slice(&bdh);
        assert_eq!(h2, md5::compute(&manual).0);
        assert_eq!(hash_2(&h1, None), md5::compute(b"").0);
    }
}
