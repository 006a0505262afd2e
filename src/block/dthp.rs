// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! `DTHP`: which slice of the consolidated type table the heaps use.
//!
//! From 8.0.0.1 the block is just two variable-width fields, count first.
//! A zero count is written without the shift field at all — newer writers
//! emit it that way, and readers must not reach for a shift that is not
//! there. The slice always sits at the end of the consolidated table, so
//! `index_shift + td_count` equals the table's top-level count; TM80 keeps
//! the same pair independently and the two are cross-checked after parse.
//!
//! Pre-8.0 heap type lists are a different, unimplemented layout; those
//! sections keep their raw form.

use crate::codec::{varu_size, Reader, Writer};
use crate::error::{LvError, Result};
use crate::version::Version;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapTypes {
    pub index_shift: u32,
    pub td_count: u32,
}

impl HeapTypes {
    /// Top-level type id for a 1-based heap type id, if in range.
    pub fn top_type_id(&self, heap_type_id: u32) -> Option<u32> {
        if heap_type_id >= 1 && heap_type_id <= self.td_count {
            Some(self.index_shift + heap_type_id - 1)
        } else {
            None
        }
    }
}

pub fn parse(r: &mut Reader<'_>, version: &Version) -> Result<HeapTypes> {
    if !version.at_least(8, 0, 0, 1) {
        return Err(LvError::ContainerMalformed(
            "heap type lists before 8.0.0.1 are not supported".into(),
        ));
    }
    let td_count = r.read_varu()?;
    let index_shift = if td_count > 0 { r.read_varu()? } else { 0 };
    Ok(HeapTypes {
        index_shift,
        td_count,
    })
}

pub fn prepare(content: &HeapTypes) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_varu(content.td_count);
    if content.td_count > 0 {
        w.write_varu(content.index_shift);
    }
    w.into_bytes()
}

pub fn expected_size(content: &HeapTypes) -> usize {
    let mut len = varu_size(content.td_count);
    if content.td_count > 0 {
        len += varu_size(content.index_shift);
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v8() -> Version {
        Version::decode(0x0800_8001)
    }

    #[test]
    fn roundtrip() {
        let content = HeapTypes {
            index_shift: 12,
            td_count: 7,
        };
        let bytes = prepare(&content);
        assert_eq!(bytes.len(), expected_size(&content));
        let mut r = Reader::new(&bytes);
        assert_eq!(parse(&mut r, &v8()).unwrap(), content);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn zero_count_has_no_shift() {
        let content = HeapTypes::default();
        assert_eq!(prepare(&content), vec![0, 0]);
        let mut r = Reader::new(&[0, 0]);
        assert_eq!(parse(&mut r, &v8()).unwrap(), content);
    }

    #[test]
    fn old_versions_are_rejected() {
        let mut r = Reader::new(&[0, 1, 0, 1]);
        assert!(parse(&mut r, &Version::decode(0x0710_8000)).is_err());
    }

    #[test]
    fn heap_id_resolution() {
        let content = HeapTypes {
            index_shift: 10,
            td_count: 3,
        };
        assert_eq!(content.top_type_id(1), Some(10));
        assert_eq!(content.top_type_id(3), Some(12));
        assert_eq!(content.top_type_id(0), None);
        assert_eq!(content.top_type_id(4), None);
    }
}
