// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! `LIBN`: names of the libraries that own this file.
//!
//! u32 count followed by that many P-strings. The joined form
//! (colon-separated) feeds the password hash chain, which is why this
//! little block is core material.

use crate::codec::{Reader, Writer};
use crate::error::{LvError, Result};

/// Upper bound shared with the type-descriptor list.
pub const LIST_LIMIT: u32 = 4095;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibNames {
    pub names: Vec<Vec<u8>>,
}

impl LibNames {
    /// `b":"`-joined names, the exact byte string hashed into `hash_1`.
    pub fn joined(&self) -> Vec<u8> {
        self.names.join(&b':')
    }
}

pub fn parse(r: &mut Reader<'_>) -> Result<LibNames> {
    let count = r.read_u32()?;
    if count > LIST_LIMIT {
        return Err(LvError::ContainerMalformed(format!(
            "library name list of {} entries, limit {}",
            count, LIST_LIMIT
        )));
    }
    let mut names = Vec::with_capacity(count as usize);
    for _ in 0..count {
        names.push(r.read_pstr()?);
    }
    Ok(LibNames { names })
}

pub fn prepare(content: &LibNames) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u32(content.names.len() as u32);
    for name in &content.names {
        w.write_pstr(name);
    }
    w.into_bytes()
}

pub fn expected_size(content: &LibNames) -> usize {
    4 + content.names.iter().map(|n| 1 + n.len()).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_join() {
        let content = LibNames {
            names: vec![b"Outer.lvlib".to_vec(), b"Inner.lvlib".to_vec()],
        };
        let bytes = prepare(&content);
        assert_eq!(bytes.len(), expected_size(&content));
        let mut r = Reader::new(&bytes);
        assert_eq!(parse(&mut r).unwrap(), content);
        assert_eq!(r.remaining(), 0);
        assert_eq!(content.joined(), b"Outer.lvlib:Inner.lvlib".to_vec());
    }

    #[test]
    fn empty_list_joins_to_empty() {
        assert!(LibNames::default().joined().is_empty());
    }

    #[test]
    fn count_limit_enforced() {
        let mut bytes = (LIST_LIMIT + 1).to_be_bytes().to_vec();
        bytes.extend([0u8; 8]);
        assert!(parse(&mut Reader::new(&bytes)).is_err());
    }
}
