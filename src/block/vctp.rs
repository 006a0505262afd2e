// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! `VCTP`, the consolidated type table.
//!
//! Every data type the file uses lives here exactly once, flattened: a u32
//! count, that many back-to-back TypeDescs, then a variable-width-prefixed
//! list of top-level entries pointing into the flat array. The table is
//! built bottom-up — a cluster's field references always point at earlier
//! flat entries — so a single forward pass parses everything.
//!
//! Other blocks never hold a flat index; they hold a 1-based top-level
//! index ("type id"), resolved through the top list. Both index spaces show
//! up in XML, which is a classic source of off-by-ones; `top_type` is the
//! only place the -1 lives.
//!
//! After every block has parsed, the integration pass walks the table and
//! attaches purpose annotations for the well-known shapes (DSInit, the DCO
//! table, and the tables whose type ids hide inside DSInit's default fill).
//! Annotations are XML comments only and never touch the wire form.

use log::warn;

use crate::codec::{Reader, Writer};
use crate::error::{LvError, Result};
use crate::printmap::PrintMap;
use crate::typedesc::{classify, TdBody, TdKind, TerminalClass, TypeDesc};

use super::dfds::{DataFills, Fill};
use super::tm80::TypeMap;

/// Upper bound on the flat list length.
pub const TYPEDESC_LIST_LIMIT: u32 = 4095;

/// Slot indices into the 51-entry DSInit block that name other tables.
/// Only the slots the integration pass consumes are spelled out.
pub mod dsinit {
    pub const PROBE_TABLE_TMI: usize = 5;
    pub const CLUMP_QE_ALLOC_TMI: usize = 11;
    pub const LOCAL_INPUT_CONN_IDX_TMI: usize = 20;
    pub const INTERNAL_HILITE_TABLE_HANDLE_AND_PTR_TMI: usize = 31;
    pub const SUB_VI_PATCH_TAGS_TMI: usize = 35;
    pub const SUB_VI_PATCH_TMI: usize = 36;
    pub const HILITE_IDX_TABLE_TMI: usize = 45;
    /// Number of slots in a DSInit repeated block.
    pub const SLOT_COUNT: u32 = 51;
}

/// Expected field kinds of the DCO cluster, in order. `None` entries are
/// the three 4-byte custom-copy slots whose kind varies.
const DCO_FIELD_KINDS: [Option<TdKind>; 32] = [
    Some(TdKind::Int16),  // dcoIndex
    Some(TdKind::UInt16), // ipCon
    Some(TdKind::UInt8),  // syncDisplay
    Some(TdKind::UInt8),  // extraUsed
    Some(TdKind::UInt8),  // flat
    Some(TdKind::Int8),   // conNum
    Some(TdKind::Int32),  // flagDSO
    Some(TdKind::Int32),  // flagTMI
    Some(TdKind::Int32),  // defaultDataTMI
    Some(TdKind::Int32),  // extraDataTMI
    Some(TdKind::Int32),  // dsSz
    Some(TdKind::UInt8),  // ddoWriteCode
    Some(TdKind::UInt8),  // ddoNeedsSubVIStartup
    Some(TdKind::UInt8),  // isIndicator
    Some(TdKind::UInt8),  // isScalar
    Some(TdKind::Int32),  // defaultDataOffset
    Some(TdKind::Int32),  // transferDataOffset
    Some(TdKind::Int32),  // extraDataOffset
    Some(TdKind::Int32),  // execDataPtrOffset
    Some(TdKind::Int32),  // eltDsSz
    Some(TdKind::UInt8),  // copyReq
    Some(TdKind::UInt8),  // local
    Some(TdKind::UInt8),  // feo
    Some(TdKind::UInt8),  // nDims
    Some(TdKind::UInt8),  // copyProcIdx
    Some(TdKind::UInt8),  // copyFromRtnIdx
    Some(TdKind::UInt8),  // misclFlags
    Some(TdKind::UInt8),  // unusedFillerByte
    Some(TdKind::Int32),  // subTypeDSO
    None,                 // customCopyFromOffset
    None,                 // customCopyToOffset
    None,                 // customCopyOffset
];

#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    pub flat: Vec<TypeDesc>,
    /// Top-level entries; value is a flat index.
    pub top_level: Vec<u32>,
}

impl TypeTable {
    pub fn flat_type(&self, flat_idx: u32) -> Option<&TypeDesc> {
        self.flat.get(flat_idx as usize)
    }

    /// Resolve a 1-based top-level type id to its descriptor.
    pub fn top_type(&self, type_id: u32) -> Option<&TypeDesc> {
        self.top_flat_idx(type_id).and_then(|i| self.flat_type(i))
    }

    /// Resolve a 1-based top-level type id to its flat index.
    pub fn top_flat_idx(&self, type_id: u32) -> Option<u32> {
        if type_id < 1 {
            return None;
        }
        self.top_level.get(type_id as usize - 1).copied()
    }

    pub fn top_count(&self) -> u32 {
        self.top_level.len() as u32
    }

    /// Terminal counts (numeric, string, path) of a Function descriptor;
    /// the salt triple for the password hash.
    pub fn terminal_counts(&self, iface: &TypeDesc) -> (u32, u32, u32) {
        let mut numbers = 0;
        let mut strings = 0;
        let mut paths = 0;
        if let TdBody::Function { terminals, .. } = &iface.body {
            for &flat_idx in terminals {
                let Some(term) = self.flat_type(u32::from(flat_idx)) else {
                    continue;
                };
                match classify(term.kind()) {
                    TerminalClass::Number => numbers += 1,
                    TerminalClass::String => strings += 1,
                    TerminalClass::Path => paths += 1,
                    _ => {}
                }
            }
        }
        (numbers, strings, paths)
    }

    /// Flat indices of all Function descriptors, in table order.
    pub fn function_flat_indices(&self) -> Vec<u32> {
        self.flat
            .iter()
            .enumerate()
            .filter(|(_, td)| td.kind() == TdKind::Function)
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Warn-level consistency checks. Nothing here is fatal: a damaged
    /// table still round-trips.
    pub fn check_sanity(&self) -> bool {
        let mut ok = true;
        for (i, &flat_idx) in self.top_level.iter().enumerate() {
            if flat_idx as usize >= self.flat.len() {
                warn!(
                    "top-level entry {} points at flat index {} of {}",
                    i,
                    flat_idx,
                    self.flat.len()
                );
                ok = false;
            }
        }
        for (i, td) in self.flat.iter().enumerate() {
            for child in td.child_indices() {
                if child as usize >= i {
                    warn!("flat type {} references {} which is not below it", i, child);
                    ok = false;
                }
            }
        }
        ok
    }
}

pub fn parse(r: &mut Reader<'_>) -> Result<TypeTable> {
    let count = r.read_u32()?;
    if count > TYPEDESC_LIST_LIMIT {
        return Err(LvError::ContainerMalformed(format!(
            "type list of {} descriptors, limit {}",
            count, TYPEDESC_LIST_LIMIT
        )));
    }
    let mut table = TypeTable::default();
    table.flat.reserve(count as usize);
    for _ in 0..count {
        table.flat.push(TypeDesc::parse(r)?);
    }
    let top_count = r.read_varu()?;
    table.top_level.reserve(top_count as usize);
    for _ in 0..top_count {
        table.top_level.push(r.read_varu()?);
    }
    Ok(table)
}

pub fn prepare(table: &TypeTable) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u32(table.flat.len() as u32);
    for td in &table.flat {
        td.prepare(&mut w);
    }
    w.write_varu(table.top_level.len() as u32);
    for &flat_idx in &table.top_level {
        w.write_varu(flat_idx);
    }
    w.into_bytes()
}

/// Record the table layout into a print map. Offsets are within the plain
/// (decoded) section, which is what the map documents for zlib blocks.
pub fn record_map(table: &TypeTable, map: &mut PrintMap) {
    let mut pos = 4u64;
    map.record(pos, 4, "TypeDescListCount");
    for (i, td) in table.flat.iter().enumerate() {
        let len = td.wire_size() as u64;
        pos += len;
        map.record(pos, len, format!("TypeDesc[{}].{}", i, td.kind().name()));
    }
    let top_head = crate::codec::varu_size(table.top_level.len() as u32) as u64;
    pos += top_head;
    map.record(pos, top_head, "TopTypesListCount");
    for (i, &val) in table.top_level.iter().enumerate() {
        let len = crate::codec::varu_size(val) as u64;
        pos += len;
        map.record(pos, len, format!("TypeDesc[{}].Index", i));
    }
}

// ============================================================================
// INTEGRATION PASS
// ============================================================================

fn fill_slot_u32(fill: &Fill, slot: usize) -> Option<u32> {
    let Fill::Repeated(values) = fill else {
        return None;
    };
    match values.get(slot)? {
        Fill::I32(v) => Some(*v as u32),
        Fill::U32(v) => Some(*v),
        _ => None,
    }
}

/// Locate the DSInit descriptor: a 51-slot repeated block, either as a top
/// type inside the mapped range or nested directly in a cluster there.
fn find_ds_init(table: &TypeTable, flat_range: &[u32]) -> Option<u32> {
    for &flat_idx in flat_range {
        let td = table.flat_type(flat_idx)?;
        if td.num_repeats() == Some(dsinit::SLOT_COUNT) {
            return Some(flat_idx);
        }
        if td.kind() == TdKind::Cluster {
            for child in td.child_indices() {
                let child_td = table.flat_type(u32::from(child))?;
                if child_td.num_repeats() == Some(dsinit::SLOT_COUNT) {
                    return Some(u32::from(child));
                }
            }
        }
    }
    None
}

/// Locate the DCO table: a repeated block whose element is a cluster whose
/// field kinds match the fixed DCO layout prefix.
fn find_dco(table: &TypeTable, flat_range: &[u32]) -> Option<(u32, u32)> {
    'outer: for &flat_idx in flat_range {
        let td = table.flat_type(flat_idx)?;
        if td.kind() != TdKind::RepeatedBlock {
            continue;
        }
        let elem = *td.child_indices().last()?;
        let clust = table.flat_type(u32::from(elem))?;
        if clust.kind() != TdKind::Cluster {
            continue;
        }
        let fields = clust.child_indices();
        if fields.is_empty() {
            continue;
        }
        for (i, &field) in fields.iter().enumerate() {
            if i >= DCO_FIELD_KINDS.len() {
                continue 'outer;
            }
            if let Some(expected) = DCO_FIELD_KINDS[i] {
                let actual = table.flat_type(u32::from(field))?.kind();
                if actual != expected {
                    continue 'outer;
                }
            }
        }
        return Some((flat_idx, u32::from(elem)));
    }
    None
}

fn set_purpose(table: &mut TypeTable, flat_idx: u32, text: &str) {
    if let Some(td) = table.flat.get_mut(flat_idx as usize) {
        td.purpose = Some(text.to_string());
    }
}

fn annotate_from_slot(
    table: &mut TypeTable,
    tm: &TypeMap,
    ds_init_fill: &Fill,
    slot: usize,
    text: &str,
) {
    let Some(raw) = fill_slot_u32(ds_init_fill, slot) else {
        return;
    };
    let type_id = tm.min_type_id() + (raw & 0x00FF_FFFF);
    if let Some(flat_idx) = table.top_flat_idx(type_id) {
        set_purpose(table, flat_idx, text);
    }
}

/// Attach purpose annotations. Runs after DFDS integration so DSInit's
/// default fill is available; reads peers, mutates only this table.
pub fn integrate(table: &mut TypeTable, tm: Option<&TypeMap>, fills: Option<&DataFills>) {
    // Restrict the scan to mapped types when a map exists; otherwise scan
    // every top type.
    let top_range: Vec<u32> = match tm {
        Some(tm) => (tm.min_type_id().max(1)..tm.max_type_id()).collect(),
        None => (1..=table.top_count()).collect(),
    };
    let flat_range: Vec<u32> = top_range
        .iter()
        .filter_map(|&id| table.top_flat_idx(id))
        .filter(|&i| (i as usize) < table.flat.len())
        .collect();

    let ds_init = find_ds_init(table, &flat_range);
    if let Some(flat_idx) = ds_init {
        set_purpose(table, flat_idx, "DSInit settings array");
    }

    if let Some((list_idx, clust_idx)) = find_dco(table, &flat_range) {
        set_purpose(table, clust_idx, "Front Panel DCO definition");
        set_purpose(table, list_idx, "Table of Front Panel DCOs");
    }

    let (Some(tm), Some(fills), Some(ds_init_idx)) = (tm, fills, ds_init) else {
        return;
    };
    let Some(ds_init_fill) = fills.fill_for_flat_idx(table, ds_init_idx).cloned() else {
        return;
    };
    let slots = [
        (dsinit::PROBE_TABLE_TMI, "Table of Probe Points"),
        (dsinit::HILITE_IDX_TABLE_TMI, "Table of Hilite Index values"),
        (dsinit::CLUMP_QE_ALLOC_TMI, "Clump QE Alloc"),
        (
            dsinit::INTERNAL_HILITE_TABLE_HANDLE_AND_PTR_TMI,
            "Internal Hilite Table Handle And Ptr",
        ),
        (dsinit::SUB_VI_PATCH_TMI, "SubVI Patch"),
        (dsinit::SUB_VI_PATCH_TAGS_TMI, "Table of SubVI Patch Tags"),
        (
            dsinit::LOCAL_INPUT_CONN_IDX_TMI,
            "Tables of Connector Idx values (multiple consecutive tables)",
        ),
    ];
    for (slot, text) in slots {
        annotate_from_slot(table, tm, &ds_init_fill, slot, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typedesc::TdBody;

    fn scalar(kind: TdKind) -> TypeDesc {
        TypeDesc::new(kind, TdBody::Empty)
    }

    fn table_with(types: Vec<TypeDesc>, top: Vec<u32>) -> TypeTable {
        TypeTable {
            flat: types,
            top_level: top,
        }
    }

    #[test]
    fn roundtrip() {
        let table = table_with(
            vec![
                scalar(TdKind::Int32),
                scalar(TdKind::String),
                TypeDesc::new(TdKind::Cluster, TdBody::Cluster { fields: vec![0, 1] }),
            ],
            vec![2, 0],
        );
        let bytes = prepare(&table);
        let mut r = Reader::new(&bytes);
        let back = parse(&mut r).unwrap();
        assert_eq!(r.remaining(), 0);
        assert_eq!(back.flat, table.flat);
        assert_eq!(back.top_level, table.top_level);
        assert!(back.check_sanity());
    }

    #[test]
    fn top_index_is_one_based() {
        let table = table_with(vec![scalar(TdKind::Boolean)], vec![0]);
        assert!(table.top_type(0).is_none());
        assert_eq!(table.top_type(1).unwrap().kind(), TdKind::Boolean);
        assert!(table.top_type(2).is_none());
    }

    #[test]
    fn out_of_range_top_entry_fails_sanity_but_roundtrips() {
        let table = table_with(vec![scalar(TdKind::Void)], vec![5]);
        assert!(!table.check_sanity());
        let bytes = prepare(&table);
        let back = parse(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(back.top_level, vec![5]);
    }

    #[test]
    fn terminal_counts_classify_directly() {
        let table = table_with(
            vec![
                scalar(TdKind::Int32),
                scalar(TdKind::Float64),
                scalar(TdKind::String),
                scalar(TdKind::Path),
                TypeDesc::new(
                    TdKind::Function,
                    TdBody::Function {
                        terminals: vec![0, 1, 2, 3, 3],
                        pattern: 0,
                    },
                ),
            ],
            vec![4],
        );
        let iface = table.top_type(1).unwrap();
        assert_eq!(table.terminal_counts(iface), (2, 1, 2));
    }

    #[test]
    fn ds_init_annotation() {
        let mut table = table_with(
            vec![
                scalar(TdKind::Int32),
                TypeDesc::new(
                    TdKind::RepeatedBlock,
                    TdBody::RepeatedBlock {
                        num_repeats: dsinit::SLOT_COUNT,
                        elem: 0,
                    },
                ),
            ],
            vec![1],
        );
        integrate(&mut table, None, None);
        assert_eq!(
            table.flat[1].purpose.as_deref(),
            Some("DSInit settings array")
        );
    }

    #[test]
    fn dco_annotation() {
        let mut flat: Vec<TypeDesc> = Vec::new();
        // Field scalars in DCO order (prefix is enough to exercise matching).
        let mut fields = Vec::new();
        for kind in DCO_FIELD_KINDS.iter().flatten() {
            fields.push(flat.len() as u16);
            flat.push(scalar(*kind));
        }
        let clust_idx = flat.len() as u16;
        flat.push(TypeDesc::new(TdKind::Cluster, TdBody::Cluster { fields }));
        let list_idx = flat.len() as u16;
        flat.push(TypeDesc::new(
            TdKind::RepeatedBlock,
            TdBody::RepeatedBlock {
                num_repeats: 8,
                elem: clust_idx,
            },
        ));
        let mut table = table_with(flat, vec![u32::from(list_idx)]);
        integrate(&mut table, None, None);
        assert_eq!(
            table.flat[clust_idx as usize].purpose.as_deref(),
            Some("Front Panel DCO definition")
        );
        assert_eq!(
            table.flat[list_idx as usize].purpose.as_deref(),
            Some("Table of Front Panel DCOs")
        );
    }
}
