// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Small leaf blocks the core depends on.
//!
//! Two families: blocks holding one big-endian u32 (`BDSE`, `FPSE`, `MUID`,
//! `FLAG`, `CCST`) and blocks holding one u16 type-table index (`CONP`,
//! `CPC2`/`CPCT`, `CPD2`/`CPDI`, `FPTD`). `CPC2` is the one the password
//! machinery cares about: it points at the connector-pane Function type the
//! salt is derived from. Idents with identical layout share the
//! implementation, per the registry table.

use crate::codec::{Reader, Writer};
use crate::error::Result;

// ============================================================================
// SINGLE U32
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SingleInt {
    pub value: u32,
}

pub fn parse_single_int(r: &mut Reader<'_>) -> Result<SingleInt> {
    Ok(SingleInt {
        value: r.read_u32()?,
    })
}

pub fn prepare_single_int(content: &SingleInt) -> Vec<u8> {
    content.value.to_be_bytes().to_vec()
}

// ============================================================================
// SINGLE TYPE-TABLE INDEX
// ============================================================================

/// 1-based top-level type id, u16 on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TdIndex {
    pub type_id: u16,
}

pub fn parse_td_index(r: &mut Reader<'_>) -> Result<TdIndex> {
    Ok(TdIndex {
        type_id: r.read_u16()?,
    })
}

pub fn prepare_td_index(content: &TdIndex) -> Vec<u8> {
    let mut w = Writer::with_capacity(2);
    w.write_u16(content.type_id);
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_int_roundtrip() {
        let content = SingleInt { value: 0xDEAD_BEEF };
        let bytes = prepare_single_int(&content);
        assert_eq!(bytes, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let mut r = Reader::new(&bytes);
        assert_eq!(parse_single_int(&mut r).unwrap(), content);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn td_index_roundtrip() {
        let content = TdIndex { type_id: 12 };
        let bytes = prepare_td_index(&content);
        assert_eq!(bytes, vec![0, 12]);
        let mut r = Reader::new(&bytes);
        assert_eq!(parse_td_index(&mut r).unwrap(), content);
    }
}
