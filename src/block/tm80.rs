// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! `TM80` (and its pre-8.0 ancestor `DSTM`): the data-space type map.
//!
//! Wire form is all variable-width integers: count, then indexShift when
//! the count is nonzero, then one flag word per entry. Entry `i` maps
//! logical type `indexShift + i` to the consolidated type at top-level
//! index `indexShift + i`; the flag word decides whether the entry
//! contributes a default fill and whether it is a "special DSTM cluster".
//!
//! Bits 1, 7, 8 and 12 have never been matched to behavior in any block we
//! parse; they round-trip untouched like every other bit.
//!
//! The `DSTM` ancestor keeps its raw form — its wire layout predates the
//! variable-width scheme and is not interpreted, so those sections ride
//! through as raw bytes.

use bitflags::bitflags;

use crate::codec::{varu_size, Reader, Writer};
use crate::error::{LvError, Result};
use crate::version::Version;

bitflags! {
    /// Per-entry flag word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TmFlags: u32 {
        const BIT0 = 1 << 0;
        const BIT1 = 1 << 1;
        const BIT2 = 1 << 2;
        const BIT3 = 1 << 3;
        const BIT4 = 1 << 4;
        const BIT5 = 1 << 5;
        const BIT6 = 1 << 6;
        const BIT7 = 1 << 7;
        const BIT8 = 1 << 8;
        const BIT9 = 1 << 9;
        const BIT10 = 1 << 10;
        const BIT11 = 1 << 11;
        const BIT12 = 1 << 12;
        const BIT13 = 1 << 13;
        const _ = !0;
    }
}

impl TmFlags {
    /// Entry contributes no default fill at all.
    pub fn skips_fill(self) -> bool {
        self.intersects(TmFlags::BIT3 | TmFlags::BIT10 | TmFlags::BIT11)
    }

    /// Entry contributes a plain data fill.
    pub fn has_plain_fill(self) -> bool {
        self.intersects(TmFlags::BIT0 | TmFlags::BIT13)
    }

    /// Entry is a special DSTM cluster when its type is a cluster.
    pub fn special_cluster(self) -> bool {
        self.intersects(TmFlags::BIT2 | TmFlags::BIT4 | TmFlags::BIT5 | TmFlags::BIT6)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeMap {
    pub index_shift: u32,
    pub entries: Vec<TmFlags>,
}

impl TypeMap {
    /// First logical type id mapped by this section.
    pub fn min_type_id(&self) -> u32 {
        self.index_shift
    }

    /// One past the last mapped logical type id.
    pub fn max_type_id(&self) -> u32 {
        self.index_shift + self.entries.len() as u32
    }

    /// (top-level type id, flags) pairs in order.
    pub fn iter_entries(&self) -> impl Iterator<Item = (u32, TmFlags)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, &flags)| (self.index_shift + i as u32, flags))
    }
}

pub fn parse(r: &mut Reader<'_>) -> Result<TypeMap> {
    let count = r.read_varu()?;
    let mut map = TypeMap::default();
    if count > 0 {
        map.index_shift = r.read_varu()?;
    }
    map.entries.reserve(count as usize);
    for _ in 0..count {
        map.entries.push(TmFlags::from_bits_retain(r.read_varu()?));
    }
    Ok(map)
}

pub fn prepare(map: &TypeMap) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_varu(map.entries.len() as u32);
    if !map.entries.is_empty() {
        w.write_varu(map.index_shift);
    }
    for flags in &map.entries {
        w.write_varu(flags.bits());
    }
    w.into_bytes()
}

pub fn expected_size(map: &TypeMap) -> usize {
    let mut len = varu_size(map.entries.len() as u32);
    if !map.entries.is_empty() {
        len += varu_size(map.index_shift);
    }
    len + map.entries.iter().map(|f| varu_size(f.bits())).sum::<usize>()
}

/// Cross-check against the heap type slice: both describe the same tail of
/// the consolidated table, so shift and count must agree.
pub fn check_against_dthp(map: &TypeMap, dthp: &super::dthp::HeapTypes) -> Result<()> {
    if dthp.td_count == 0 {
        return Ok(());
    }
    if map.index_shift != dthp.index_shift || map.entries.len() as u32 != dthp.td_count {
        return Err(LvError::CrossReferenceMissing(format!(
            "type map covers {}+{} but heap slice says {}+{}",
            map.index_shift,
            map.entries.len(),
            dthp.index_shift,
            dthp.td_count
        )));
    }
    Ok(())
}

/// Version-sensitive coding policy: zlib from 10.0 (verified plain in 7.1,
/// compressed from 10.0 on).
pub fn default_coding(version: &Version) -> crate::coding::BlockCoding {
    if version.at_least(10, 0, 0, 0) {
        crate::coding::BlockCoding::Zlib
    } else {
        crate::coding::BlockCoding::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let map = TypeMap {
            index_shift: 3,
            entries: vec![
                TmFlags::BIT0,
                TmFlags::BIT13 | TmFlags::BIT7,
                TmFlags::from_bits_retain(0x8001),
            ],
        };
        let bytes = prepare(&map);
        assert_eq!(bytes.len(), expected_size(&map));
        let mut r = Reader::new(&bytes);
        assert_eq!(parse(&mut r).unwrap(), map);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn empty_map_has_no_shift_field() {
        let map = TypeMap::default();
        assert_eq!(prepare(&map), vec![0, 0]);
        assert_eq!(expected_size(&map), 2);
    }

    #[test]
    fn wide_flag_words_cost_four_bytes() {
        let map = TypeMap {
            index_shift: 1,
            entries: vec![TmFlags::from_bits_retain(0x0001_0000)],
        };
        assert_eq!(expected_size(&map), 2 + 2 + 4);
        let prepared = prepare(&map);
        let mut r = Reader::new(&prepared);
        assert_eq!(parse(&mut r).unwrap(), map);
    }

    #[test]
    fn fill_selection_predicates() {
        assert!(TmFlags::BIT3.skips_fill());
        assert!(TmFlags::BIT10.skips_fill());
        assert!(TmFlags::BIT0.has_plain_fill());
        assert!(TmFlags::BIT13.has_plain_fill());
        assert!(TmFlags::BIT5.special_cluster());
        assert!(!TmFlags::BIT9.skips_fill());
    }

    #[test]
    fn logical_ids_follow_shift() {
        let map = TypeMap {
            index_shift: 5,
            entries: vec![TmFlags::BIT0; 3],
        };
        let ids: Vec<u32> = map.iter_entries().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![5, 6, 7]);
        assert_eq!(map.min_type_id(), 5);
        assert_eq!(map.max_type_id(), 8);
    }
}
