// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! `DFDS`: the default fill of the data space.
//!
//! The payload is nothing but fills, back to back, with no framing — the
//! only way to know where one ends is to walk the type it fills. Which
//! types contribute, and in what order, comes from the type map:
//!
//! * flag bits 3, 10 or 11 → the entry contributes nothing;
//! * else bits 0 or 13 → a plain fill of the entry's type;
//! * else a cluster type with bits 2, 4, 5 or 6 → a "special DSTM cluster"
//!   fill: a u16 selector, then the fill of the selected field;
//! * anything else → nothing.
//!
//! Because the walk needs both TM80 and VCTP, this block cannot parse in
//! the local phase; the container leaves it raw and calls
//! [`parse_with_peers`] during integration. Floats are carried as raw bits
//! and every length and dimension is re-emitted exactly, so
//! `prepare(parse(b)) == b` holds whenever the walk succeeds.

use log::warn;

use crate::codec::{Reader, Writer};
use crate::error::{LvError, Result};
use crate::typedesc::{TdBody, TdKind, TypeDesc};
use crate::version::Version;

use super::tm80::{TmFlags, TypeMap};
use super::vctp::TypeTable;

/// Cap on total array elements in one fill.
pub const ARRAY_DATA_LIMIT: u64 = (1 << 28) - 1;

/// One default value, tagged with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFill {
    /// 1-based top-level type id this fill instantiates.
    pub type_id: u32,
    pub flags: TmFlags,
    pub value: Fill,
}

/// A parsed fill tree. Scalars keep their exact wire width; floats are raw
/// bits so a re-save cannot drift through a float round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Fill {
    Void,
    Bool(u8),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(u32),
    F64(u64),
    FExt([u8; 16]),
    Raw(Vec<u8>),
    /// L-string content (strings, tags) or a serialized path object.
    Bytes(Vec<u8>),
    Array { dims: Vec<u32>, elems: Vec<Fill> },
    Cluster(Vec<Fill>),
    Repeated(Vec<Fill>),
    Variant { flat_idx: u32, value: Box<Fill> },
    Refnum(u32),
    Special { selector: u16, value: Box<Fill> },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFills {
    pub fills: Vec<DataFill>,
}

impl DataFills {
    /// Fill for the type at `flat_idx`, looking through one level of
    /// cluster nesting (DSInit sometimes sits inside a cluster).
    pub fn fill_for_flat_idx(&self, table: &TypeTable, flat_idx: u32) -> Option<&Fill> {
        for fill in &self.fills {
            let Some(top_flat) = table.top_flat_idx(fill.type_id) else {
                continue;
            };
            if top_flat == flat_idx {
                return Some(&fill.value);
            }
            if let Some(td) = table.flat_type(top_flat) {
                if td.kind() == TdKind::Cluster {
                    if let Fill::Cluster(fields) = &fill.value {
                        for (i, child) in td.child_indices().iter().enumerate() {
                            if u32::from(*child) == flat_idx {
                                return fields.get(i);
                            }
                        }
                    }
                }
            }
        }
        None
    }

    pub fn fill_for_type_id(&self, type_id: u32) -> Option<&DataFill> {
        self.fills.iter().find(|f| f.type_id == type_id)
    }
}

/// What kind of fill an entry contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FillKind {
    None,
    Plain,
    SpecialCluster,
}

fn fill_kind(flags: TmFlags, td: Option<&TypeDesc>) -> FillKind {
    if flags.skips_fill() {
        return FillKind::None;
    }
    if flags.has_plain_fill() {
        return FillKind::Plain;
    }
    if let Some(td) = td {
        if td.kind() == TdKind::Cluster && flags.special_cluster() {
            return FillKind::SpecialCluster;
        }
    }
    FillKind::None
}

fn read_fext(r: &mut Reader<'_>) -> Result<[u8; 16]> {
    let mut out = [0u8; 16];
    out.copy_from_slice(r.read_bytes(16)?);
    Ok(out)
}

fn parse_fill(r: &mut Reader<'_>, table: &TypeTable, td: &TypeDesc) -> Result<Fill> {
    let fill = match td.kind() {
        TdKind::Void | TdKind::VoidBlock | TdKind::AlignMarker => Fill::Void,
        TdKind::Boolean => Fill::Bool(r.read_u8()?),
        TdKind::BooleanU16 => Fill::U16(r.read_u16()?),
        TdKind::Int8 => Fill::I8(r.read_u8()? as i8),
        TdKind::Int16 => Fill::I16(r.read_i16()?),
        TdKind::Int32 => Fill::I32(r.read_i32()?),
        TdKind::Int64 => Fill::I64(r.read_u64()? as i64),
        TdKind::UInt8 | TdKind::UnitUInt8 => Fill::U8(r.read_u8()?),
        TdKind::UInt16 | TdKind::UnitUInt16 => Fill::U16(r.read_u16()?),
        TdKind::UInt32 | TdKind::UnitUInt32 => Fill::U32(r.read_u32()?),
        TdKind::UInt64 => Fill::U64(r.read_u64()?),
        TdKind::Float32 => Fill::F32(r.read_u32()?),
        TdKind::Float64 => Fill::F64(r.read_u64()?),
        TdKind::FloatExt => Fill::FExt(read_fext(r)?),
        TdKind::Complex64 => Fill::Raw(r.read_bytes(8)?.to_vec()),
        TdKind::Complex128 => Fill::Raw(r.read_bytes(16)?.to_vec()),
        TdKind::ComplexExt => Fill::Raw(r.read_bytes(32)?.to_vec()),
        TdKind::String | TdKind::CString | TdKind::PasString | TdKind::Tag => {
            Fill::Bytes(r.read_lstr()?)
        }
        TdKind::Path => {
            // Serialized path object: magic, u32 body length, body.
            let magic = r.read_bytes(4)?.to_vec();
            let body_len = r.read_u32()? as usize;
            let body = r.read_bytes(body_len)?;
            let mut whole = magic;
            whole.extend_from_slice(&(body_len as u32).to_be_bytes());
            whole.extend_from_slice(body);
            Fill::Bytes(whole)
        }
        TdKind::Array => {
            let TdBody::Array { dims, elem } = &td.body else {
                return Err(LvError::ContainerMalformed("array type without array body".into()));
            };
            let elem_td = table
                .flat_type(u32::from(*elem))
                .ok_or_else(|| LvError::CrossReferenceMissing(format!("array element type {}", elem)))?;
            let mut actual = Vec::with_capacity(dims.len());
            let mut total: u64 = 1;
            for _ in dims {
                let dim = r.read_u32()?;
                total = total.saturating_mul(u64::from(dim));
                actual.push(dim);
            }
            if total > ARRAY_DATA_LIMIT {
                return Err(LvError::ContainerMalformed(format!(
                    "array fill of {} elements over limit",
                    total
                )));
            }
            let mut elems = Vec::with_capacity(total as usize);
            for _ in 0..total {
                elems.push(parse_fill(r, table, elem_td)?);
            }
            Fill::Array { dims: actual, elems }
        }
        TdKind::Cluster => {
            let mut fields = Vec::new();
            for child in td.child_indices() {
                let child_td = table.flat_type(u32::from(child)).ok_or_else(|| {
                    LvError::CrossReferenceMissing(format!("cluster field type {}", child))
                })?;
                fields.push(parse_fill(r, table, child_td)?);
            }
            Fill::Cluster(fields)
        }
        TdKind::RepeatedBlock => {
            let TdBody::RepeatedBlock { num_repeats, elem } = &td.body else {
                return Err(LvError::ContainerMalformed(
                    "repeated block type without repeat body".into(),
                ));
            };
            let elem_td = table.flat_type(u32::from(*elem)).ok_or_else(|| {
                LvError::CrossReferenceMissing(format!("repeated element type {}", elem))
            })?;
            let mut elems = Vec::with_capacity(*num_repeats as usize);
            for _ in 0..*num_repeats {
                elems.push(parse_fill(r, table, elem_td)?);
            }
            Fill::Repeated(elems)
        }
        TdKind::LvVariant => {
            let flat_idx = r.read_u32()?;
            let inner_td = table.flat_type(flat_idx).ok_or_else(|| {
                LvError::CrossReferenceMissing(format!("variant stored type {}", flat_idx))
            })?;
            Fill::Variant {
                flat_idx,
                value: Box::new(parse_fill(r, table, inner_td)?),
            }
        }
        TdKind::Refnum => Fill::Refnum(r.read_u32()?),
        other => {
            return Err(LvError::ContainerMalformed(format!(
                "no default-fill rule for type kind {}",
                other.name()
            )))
        }
    };
    Ok(fill)
}

fn prepare_fill(w: &mut Writer, fill: &Fill) {
    match fill {
        Fill::Void => {}
        Fill::Bool(v) | Fill::U8(v) => w.write_u8(*v),
        Fill::I8(v) => w.write_u8(*v as u8),
        Fill::I16(v) => w.write_i16(*v),
        Fill::I32(v) => w.write_i32(*v),
        Fill::I64(v) => w.write_u64(*v as u64),
        Fill::U16(v) => w.write_u16(*v),
        Fill::U32(v) | Fill::F32(v) | Fill::Refnum(v) => w.write_u32(*v),
        Fill::U64(v) | Fill::F64(v) => w.write_u64(*v),
        Fill::FExt(v) => w.write_bytes(v),
        Fill::Raw(v) => w.write_bytes(v),
        Fill::Bytes(v) => {
            // Paths carry their own header; strings get the L prefix back.
            if v.len() >= 8 && &v[0..4] == crate::path::PATH_MAGIC {
                w.write_bytes(v);
            } else {
                w.write_lstr(v);
            }
        }
        Fill::Array { dims, elems } => {
            for dim in dims {
                w.write_u32(*dim);
            }
            for elem in elems {
                prepare_fill(w, elem);
            }
        }
        Fill::Cluster(fields) => {
            for field in fields {
                prepare_fill(w, field);
            }
        }
        Fill::Repeated(elems) => {
            for elem in elems {
                prepare_fill(w, elem);
            }
        }
        Fill::Variant { flat_idx, value } => {
            w.write_u32(*flat_idx);
            prepare_fill(w, value);
        }
        Fill::Special { selector, value } => {
            w.write_u16(*selector);
            prepare_fill(w, value);
        }
    }
}

fn fill_size(fill: &Fill) -> usize {
    match fill {
        Fill::Void => 0,
        Fill::Bool(_) | Fill::U8(_) | Fill::I8(_) => 1,
        Fill::I16(_) | Fill::U16(_) => 2,
        Fill::I32(_) | Fill::U32(_) | Fill::F32(_) | Fill::Refnum(_) => 4,
        Fill::I64(_) | Fill::U64(_) | Fill::F64(_) => 8,
        Fill::FExt(_) => 16,
        Fill::Raw(v) => v.len(),
        Fill::Bytes(v) => {
            if v.len() >= 8 && &v[0..4] == crate::path::PATH_MAGIC {
                v.len()
            } else {
                4 + v.len()
            }
        }
        Fill::Array { dims, elems } => {
            4 * dims.len() + elems.iter().map(fill_size).sum::<usize>()
        }
        Fill::Cluster(fields) => fields.iter().map(fill_size).sum(),
        Fill::Repeated(elems) => elems.iter().map(fill_size).sum(),
        Fill::Variant { value, .. } => 4 + fill_size(value),
        Fill::Special { value, .. } => 2 + fill_size(value),
    }
}

/// Walk the type map over the payload. This is the integration-phase parse:
/// it reads TM80 and VCTP but mutates neither.
pub fn parse_with_peers(
    plain: &[u8],
    table: &TypeTable,
    tm: &TypeMap,
    version: &Version,
) -> Result<DataFills> {
    if !version.at_least(8, 0, 0, 1) {
        return Err(LvError::ContainerMalformed(
            "default-fill payloads before 8.0.0.1 are not supported".into(),
        ));
    }
    let mut r = Reader::new(plain);
    let mut fills = Vec::new();
    for (type_id, flags) in tm.iter_entries() {
        let td = table.top_type(type_id);
        if td.is_none() && !flags.skips_fill() {
            warn!("type map references type {} which does not exist", type_id);
        }
        match fill_kind(flags, td) {
            FillKind::None => {}
            FillKind::Plain => {
                let td = td.ok_or_else(|| {
                    LvError::CrossReferenceMissing(format!("type {} for default fill", type_id))
                })?;
                let value = parse_fill(&mut r, table, td)
                    .map_err(|e| LvError::ContainerMalformed(format!(
                        "fill for type {} ({}): {}",
                        type_id,
                        td.kind().name(),
                        e
                    )))?;
                fills.push(DataFill { type_id, flags, value });
            }
            FillKind::SpecialCluster => {
                let td = td.expect("special cluster implies a type");
                let selector = r.read_u16()?;
                let field_tds = td.child_indices();
                let chosen = field_tds.get(selector as usize).ok_or_else(|| {
                    LvError::ContainerMalformed(format!(
                        "special cluster selector {} of {} fields",
                        selector,
                        field_tds.len()
                    ))
                })?;
                let chosen_td = table.flat_type(u32::from(*chosen)).ok_or_else(|| {
                    LvError::CrossReferenceMissing(format!("special cluster field {}", chosen))
                })?;
                let value = Fill::Special {
                    selector,
                    value: Box::new(parse_fill(&mut r, table, chosen_td)?),
                };
                fills.push(DataFill { type_id, flags, value });
            }
        }
    }
    if r.remaining() > 0 {
        return Err(LvError::ParseShort {
            ident: "DFDS".into(),
            section: 0,
            left: r.remaining(),
            have: plain.len(),
        });
    }
    Ok(DataFills { fills })
}

pub fn prepare(fills: &DataFills) -> Vec<u8> {
    let mut w = Writer::new();
    for fill in &fills.fills {
        prepare_fill(&mut w, &fill.value);
    }
    w.into_bytes()
}

pub fn expected_size(fills: &DataFills) -> usize {
    fills.fills.iter().map(|f| fill_size(&f.value)).sum()
}

/// Coding policy: plain in 7.1, zlib from 8.0.
pub fn default_coding(version: &Version) -> crate::coding::BlockCoding {
    if version.at_least(8, 0, 0, 0) {
        crate::coding::BlockCoding::Zlib
    } else {
        crate::coding::BlockCoding::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typedesc::{TdBody, TypeDesc};

    fn lv14() -> Version {
        Version::decode(0x1400_8000)
    }

    fn simple_table() -> TypeTable {
        TypeTable {
            flat: vec![
                TypeDesc::new(TdKind::Int32, TdBody::Empty),
                TypeDesc::new(TdKind::String, TdBody::Sized { prefix_size: 0xFFFF_FFFF }),
                TypeDesc::new(TdKind::Cluster, TdBody::Cluster { fields: vec![0, 1] }),
            ],
            top_level: vec![0, 1, 2],
        }
    }

    fn map(entries: Vec<TmFlags>) -> TypeMap {
        TypeMap {
            index_shift: 1,
            entries,
        }
    }

    #[test]
    fn three_entries_third_contributes_nothing() {
        // Spec scenario: flags {bit0, bit13, bit3}; payload is the sum of
        // the first two fills and the third adds zero bytes.
        let table = simple_table();
        let tm = map(vec![TmFlags::BIT0, TmFlags::BIT13, TmFlags::BIT3]);
        let mut payload = Vec::new();
        payload.extend(7i32.to_be_bytes()); // Int32 fill
        payload.extend(3u32.to_be_bytes()); // String length
        payload.extend(b"abc");
        let fills = parse_with_peers(&payload, &table, &tm, &lv14()).unwrap();
        assert_eq!(fills.fills.len(), 2);
        assert_eq!(fills.fills[0].value, Fill::I32(7));
        assert_eq!(fills.fills[1].value, Fill::Bytes(b"abc".to_vec()));
        assert_eq!(expected_size(&fills), payload.len());
        assert_eq!(prepare(&fills), payload);
    }

    #[test]
    fn cluster_fill_concatenates_fields() {
        let table = simple_table();
        let tm = TypeMap {
            index_shift: 3,
            entries: vec![TmFlags::BIT0],
        };
        let mut payload = Vec::new();
        payload.extend((-1i32).to_be_bytes());
        payload.extend(0u32.to_be_bytes());
        let fills = parse_with_peers(&payload, &table, &tm, &lv14()).unwrap();
        assert_eq!(
            fills.fills[0].value,
            Fill::Cluster(vec![Fill::I32(-1), Fill::Bytes(Vec::new())])
        );
        assert_eq!(prepare(&fills), payload);
    }

    #[test]
    fn special_cluster_selects_one_field() {
        let table = simple_table();
        let tm = TypeMap {
            index_shift: 3,
            entries: vec![TmFlags::BIT4],
        };
        let mut payload = Vec::new();
        payload.extend(1u16.to_be_bytes()); // selector: the string field
        payload.extend(2u32.to_be_bytes());
        payload.extend(b"hi");
        let fills = parse_with_peers(&payload, &table, &tm, &lv14()).unwrap();
        match &fills.fills[0].value {
            Fill::Special { selector, value } => {
                assert_eq!(*selector, 1);
                assert_eq!(**value, Fill::Bytes(b"hi".to_vec()));
            }
            other => panic!("unexpected fill {:?}", other),
        }
        assert_eq!(prepare(&fills), payload);
    }

    #[test]
    fn trailing_bytes_fail_the_walk() {
        let table = simple_table();
        let tm = map(vec![TmFlags::BIT0]);
        let mut payload = 5i32.to_be_bytes().to_vec();
        payload.push(0xEE);
        assert!(parse_with_peers(&payload, &table, &tm, &lv14()).is_err());
    }

    #[test]
    fn old_version_is_unsupported() {
        let table = simple_table();
        let tm = map(vec![]);
        assert!(parse_with_peers(&[], &table, &tm, &Version::decode(0x0710_8000)).is_err());
    }

    #[test]
    fn array_fill_reads_dims_then_elements() {
        let table = TypeTable {
            flat: vec![
                TypeDesc::new(TdKind::UInt8, TdBody::Empty),
                TypeDesc::new(
                    TdKind::Array,
                    TdBody::Array {
                        dims: vec![0xFFFF_FFFF],
                        elem: 0,
                    },
                ),
            ],
            top_level: vec![1],
        };
        let tm = map(vec![TmFlags::BIT0]);
        let mut payload = 3u32.to_be_bytes().to_vec();
        payload.extend([9, 8, 7]);
        let fills = parse_with_peers(&payload, &table, &tm, &lv14()).unwrap();
        assert_eq!(
            fills.fills[0].value,
            Fill::Array {
                dims: vec![3],
                elems: vec![Fill::U8(9), Fill::U8(8), Fill::U8(7)],
            }
        );
        assert_eq!(prepare(&fills), payload);
        assert_eq!(expected_size(&fills), payload.len());
    }
}
