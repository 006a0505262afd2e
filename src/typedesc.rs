// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Wire codec for type descriptors.
//!
//! A TypeDesc opens with a 4-byte header: u16 total length (header included),
//! u8 flags, u8 kind. Length 0x7FFF is a sentinel — the real length then
//! follows as a u32, and the same long form is selected by the 0x20 flag
//! bit. Whether the long form was used is remembered so re-serialization is
//! byte-identical even when the length would have fit inline.
//!
//! Compound kinds carry child references as u16 indices into the flat table
//! of the enclosing type list; the table is built bottom-up, so a child
//! index always points at an earlier entry. An optional P-string label
//! follows the kind payload when the 0x40 flag bit is set, and any bytes
//! between the parsed payload and the declared length are preserved
//! verbatim — several kinds have version-specific tails this codec does not
//! interpret, and losing them would break re-save.

use num_enum::FromPrimitive;

use crate::codec::{Reader, Writer};
use crate::error::{LvError, Result};

/// Flag bit selecting the 32-bit length form.
pub const TD_FLAG_LONG_LEN: u8 = 0x20;
/// Flag bit marking a trailing P-string label.
pub const TD_FLAG_HAS_LABEL: u8 = 0x40;
/// Length sentinel that also selects the 32-bit form.
pub const TD_LEN_SENTINEL: u16 = 0x7FFF;

/// Interpreted type kind. The raw byte is kept next to this on the
/// descriptor; unknown values fall through to `Unknown` without losing the
/// original byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum TdKind {
    Void = 0x00,
    Int8 = 0x01,
    Int16 = 0x02,
    Int32 = 0x03,
    Int64 = 0x04,
    UInt8 = 0x05,
    UInt16 = 0x06,
    UInt32 = 0x07,
    UInt64 = 0x08,
    Float32 = 0x09,
    Float64 = 0x0A,
    FloatExt = 0x0B,
    Complex64 = 0x0C,
    Complex128 = 0x0D,
    ComplexExt = 0x0E,
    UnitUInt8 = 0x15,
    UnitUInt16 = 0x16,
    UnitUInt32 = 0x17,
    BooleanU16 = 0x20,
    Boolean = 0x21,
    String = 0x30,
    Path = 0x32,
    Picture = 0x33,
    CString = 0x34,
    PasString = 0x35,
    Tag = 0x37,
    Array = 0x40,
    Cluster = 0x50,
    LvVariant = 0x53,
    Block = 0x60,
    TypeBlock = 0x61,
    VoidBlock = 0x62,
    AlignedBlock = 0x63,
    RepeatedBlock = 0x64,
    AlignMarker = 0x65,
    Refnum = 0x70,
    Function = 0xF0,
    #[num_enum(default)]
    Unknown = 0xFE,
}

impl TdKind {
    pub fn name(self) -> &'static str {
        match self {
            TdKind::Void => "Void",
            TdKind::Int8 => "NumInt8",
            TdKind::Int16 => "NumInt16",
            TdKind::Int32 => "NumInt32",
            TdKind::Int64 => "NumInt64",
            TdKind::UInt8 => "NumUInt8",
            TdKind::UInt16 => "NumUInt16",
            TdKind::UInt32 => "NumUInt32",
            TdKind::UInt64 => "NumUInt64",
            TdKind::Float32 => "NumFloat32",
            TdKind::Float64 => "NumFloat64",
            TdKind::FloatExt => "NumFloatExt",
            TdKind::Complex64 => "NumComplex64",
            TdKind::Complex128 => "NumComplex128",
            TdKind::ComplexExt => "NumComplexExt",
            TdKind::UnitUInt8 => "UnitUInt8",
            TdKind::UnitUInt16 => "UnitUInt16",
            TdKind::UnitUInt32 => "UnitUInt32",
            TdKind::BooleanU16 => "BooleanU16",
            TdKind::Boolean => "Boolean",
            TdKind::String => "String",
            TdKind::Path => "Path",
            TdKind::Picture => "Picture",
            TdKind::CString => "CString",
            TdKind::PasString => "PasString",
            TdKind::Tag => "Tag",
            TdKind::Array => "Array",
            TdKind::Cluster => "Cluster",
            TdKind::LvVariant => "LVVariant",
            TdKind::Block => "Block",
            TdKind::TypeBlock => "TypeBlock",
            TdKind::VoidBlock => "VoidBlock",
            TdKind::AlignedBlock => "AlignedBlock",
            TdKind::RepeatedBlock => "RepeatedBlock",
            TdKind::AlignMarker => "AlignMarker",
            TdKind::Refnum => "Refnum",
            TdKind::Function => "Function",
            TdKind::Unknown => "Unknown",
        }
    }

    pub fn from_name(name: &str) -> Option<u8> {
        for byte in 0x00..=0xF0u8 {
            let kind = TdKind::from(byte);
            if kind != TdKind::Unknown && kind.name() == name {
                return Some(byte);
            }
        }
        None
    }

    pub fn is_number(self) -> bool {
        matches!(
            self,
            TdKind::Int8
                | TdKind::Int16
                | TdKind::Int32
                | TdKind::Int64
                | TdKind::UInt8
                | TdKind::UInt16
                | TdKind::UInt32
                | TdKind::UInt64
                | TdKind::Float32
                | TdKind::Float64
                | TdKind::FloatExt
                | TdKind::Complex64
                | TdKind::Complex128
                | TdKind::ComplexExt
                | TdKind::UnitUInt8
                | TdKind::UnitUInt16
                | TdKind::UnitUInt32
        )
    }

    pub fn is_string(self) -> bool {
        matches!(self, TdKind::String | TdKind::CString | TdKind::PasString | TdKind::Tag)
    }
}

/// Classification used for the password salt terminal counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalClass {
    Number,
    String,
    Path,
    Compound,
    Other,
}

pub fn classify(kind: TdKind) -> TerminalClass {
    if kind.is_number() {
        TerminalClass::Number
    } else if kind.is_string() {
        TerminalClass::String
    } else if kind == TdKind::Path {
        TerminalClass::Path
    } else if matches!(
        kind,
        TdKind::Array | TdKind::Cluster | TdKind::RepeatedBlock | TdKind::Function
    ) {
        TerminalClass::Compound
    } else {
        TerminalClass::Other
    }
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TdBody {
    /// Scalars and other kinds with no interpreted payload.
    Empty,
    /// String-family prefix size; 0xFFFFFFFF means variable.
    Sized { prefix_size: u32 },
    Array {
        /// Dimension sizes; 0xFFFFFFFF means variable.
        dims: Vec<u32>,
        elem: u16,
    },
    Cluster {
        fields: Vec<u16>,
    },
    RepeatedBlock {
        num_repeats: u32,
        elem: u16,
    },
    Refnum {
        ref_kind: u16,
    },
    Function {
        terminals: Vec<u16>,
        pattern: u16,
    },
    /// Whole payload of a kind this codec does not interpret.
    Opaque(Vec<u8>),
}

/// One flat type descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDesc {
    pub flags: u8,
    pub kind_byte: u8,
    /// Header used the 32-bit length form on the wire.
    pub long_form: bool,
    pub body: TdBody,
    pub label: Option<Vec<u8>>,
    /// Bytes between parsed payload and declared length, kept verbatim.
    pub trailing: Vec<u8>,
    /// Integration-pass annotation (XML comment only, never on wire).
    pub purpose: Option<String>,
}

impl TypeDesc {
    pub fn kind(&self) -> TdKind {
        TdKind::from(self.kind_byte)
    }

    pub fn new(kind: TdKind, body: TdBody) -> Self {
        TypeDesc {
            flags: 0,
            kind_byte: kind as u8,
            long_form: false,
            body,
            label: None,
            trailing: Vec::new(),
            purpose: None,
        }
    }

    /// Flat indices of children referenced by this descriptor.
    pub fn child_indices(&self) -> Vec<u16> {
        match &self.body {
            TdBody::Array { elem, .. } | TdBody::RepeatedBlock { elem, .. } => vec![*elem],
            TdBody::Cluster { fields } => fields.clone(),
            TdBody::Function { terminals, .. } => terminals.clone(),
            _ => Vec::new(),
        }
    }

    pub fn num_repeats(&self) -> Option<u32> {
        match &self.body {
            TdBody::RepeatedBlock { num_repeats, .. } => Some(*num_repeats),
            _ => None,
        }
    }

    /// Parse one descriptor at the reader's position. The reader must sit at
    /// the u16 length field; on success it sits just past the declared
    /// length.
    pub fn parse(r: &mut Reader<'_>) -> Result<TypeDesc> {
        let start = r.pos();
        let len16 = r.read_u16()?;
        let flags = r.read_u8()?;
        let kind_byte = r.read_u8()?;
        let long_form = len16 == TD_LEN_SENTINEL || flags & TD_FLAG_LONG_LEN != 0;
        let total_len = if long_form {
            r.read_u32()? as usize
        } else {
            len16 as usize
        };
        let header_len = r.pos() - start;
        if total_len < header_len {
            return Err(LvError::ContainerMalformed(format!(
                "TypeDesc length {} smaller than its header",
                total_len
            )));
        }
        let end = start + total_len;
        if end > r.len() {
            return Err(LvError::UnexpectedEnd(format!(
                "TypeDesc of {} bytes at offset {}",
                total_len, start
            )));
        }

        let body = Self::parse_body(TdKind::from(kind_byte), r, end)?;

        let label = if flags & TD_FLAG_HAS_LABEL != 0 && r.pos() < end {
            Some(r.read_pstr()?)
        } else {
            None
        };
        if r.pos() > end {
            return Err(LvError::ContainerMalformed(
                "TypeDesc payload overran its declared length".into(),
            ));
        }
        let trailing = r.read_bytes(end - r.pos())?.to_vec();

        Ok(TypeDesc {
            flags,
            kind_byte,
            long_form,
            body,
            label,
            trailing,
            purpose: None,
        })
    }

    fn parse_body(kind: TdKind, r: &mut Reader<'_>, end: usize) -> Result<TdBody> {
        let body = match kind {
            TdKind::String | TdKind::CString | TdKind::PasString | TdKind::Path | TdKind::Tag => {
                TdBody::Sized {
                    prefix_size: r.read_u32()?,
                }
            }
            TdKind::Array => {
                let ndims = r.read_u16()? as usize;
                let mut dims = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    dims.push(r.read_u32()?);
                }
                TdBody::Array {
                    dims,
                    elem: r.read_u16()?,
                }
            }
            TdKind::Cluster => {
                let count = r.read_u16()? as usize;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    fields.push(r.read_u16()?);
                }
                TdBody::Cluster { fields }
            }
            TdKind::RepeatedBlock => TdBody::RepeatedBlock {
                num_repeats: r.read_u32()?,
                elem: r.read_u16()?,
            },
            TdKind::Refnum => TdBody::Refnum {
                ref_kind: r.read_u16()?,
            },
            TdKind::Function => {
                let count = r.read_u16()? as usize;
                let mut terminals = Vec::with_capacity(count);
                for _ in 0..count {
                    terminals.push(r.read_u16()?);
                }
                TdBody::Function {
                    terminals,
                    pattern: r.read_u16()?,
                }
            }
            TdKind::Unknown => TdBody::Opaque(r.read_bytes(end - r.pos())?.to_vec()),
            _ => TdBody::Empty,
        };
        Ok(body)
    }

    fn body_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match &self.body {
            TdBody::Empty => {}
            TdBody::Sized { prefix_size } => w.write_u32(*prefix_size),
            TdBody::Array { dims, elem } => {
                w.write_u16(dims.len() as u16);
                for dim in dims {
                    w.write_u32(*dim);
                }
                w.write_u16(*elem);
            }
            TdBody::Cluster { fields } => {
                w.write_u16(fields.len() as u16);
                for field in fields {
                    w.write_u16(*field);
                }
            }
            TdBody::RepeatedBlock { num_repeats, elem } => {
                w.write_u32(*num_repeats);
                w.write_u16(*elem);
            }
            TdBody::Refnum { ref_kind } => w.write_u16(*ref_kind),
            TdBody::Function { terminals, pattern } => {
                w.write_u16(terminals.len() as u16);
                for t in terminals {
                    w.write_u16(*t);
                }
                w.write_u16(*pattern);
            }
            TdBody::Opaque(bytes) => w.write_bytes(bytes),
        }
        if let Some(label) = &self.label {
            w.write_pstr(label);
        }
        w.write_bytes(&self.trailing);
        w.into_bytes()
    }

    /// Serialize to the wire form, preserving the header form seen at parse.
    pub fn prepare(&self, w: &mut Writer) {
        let body = self.body_bytes();
        let long = self.long_form || body.len() + 4 >= TD_LEN_SENTINEL as usize;
        if long {
            let total = body.len() + 8;
            w.write_u16(TD_LEN_SENTINEL);
            w.write_u8(self.flags);
            w.write_u8(self.kind_byte);
            w.write_u32(total as u32);
        } else {
            w.write_u16((body.len() + 4) as u16);
            w.write_u8(self.flags);
            w.write_u8(self.kind_byte);
        }
        w.write_bytes(&body);
    }

    /// Serialized size, matching `prepare` exactly.
    pub fn wire_size(&self) -> usize {
        let body_len = self.body_bytes().len();
        let long = self.long_form || body_len + 4 >= TD_LEN_SENTINEL as usize;
        body_len + if long { 8 } else { 4 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(td: &TypeDesc) -> TypeDesc {
        let mut w = Writer::new();
        td.prepare(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), td.wire_size());
        let mut r = Reader::new(&bytes);
        let back = TypeDesc::parse(&mut r).unwrap();
        assert_eq!(r.remaining(), 0);
        back
    }

    #[test]
    fn scalar_roundtrip() {
        let td = TypeDesc::new(TdKind::Int32, TdBody::Empty);
        assert_eq!(roundtrip(&td), td);
        assert_eq!(td.wire_size(), 4);
    }

    #[test]
    fn labeled_cluster_roundtrip() {
        let mut td = TypeDesc::new(TdKind::Cluster, TdBody::Cluster { fields: vec![0, 1, 2] });
        td.flags = TD_FLAG_HAS_LABEL;
        td.label = Some(b"coords".to_vec());
        let back = roundtrip(&td);
        assert_eq!(back, td);
        assert_eq!(back.child_indices(), vec![0, 1, 2]);
    }

    #[test]
    fn long_form_sticks_after_roundtrip() {
        let mut td = TypeDesc::new(TdKind::Int8, TdBody::Empty);
        td.long_form = true;
        let back = roundtrip(&td);
        assert!(back.long_form);
        assert_eq!(back.wire_size(), 8);
    }

    #[test]
    fn oversized_body_promotes_to_long_form() {
        let td = TypeDesc::new(TdKind::Unknown, TdBody::Opaque(vec![0xAB; 0x8000]));
        let back = roundtrip(&td);
        assert!(back.long_form);
        assert_eq!(back.body, td.body);
    }

    #[test]
    fn unparsed_tail_is_preserved() {
        let mut td = TypeDesc::new(TdKind::Boolean, TdBody::Empty);
        td.trailing = vec![0xDE, 0xAD];
        let back = roundtrip(&td);
        assert_eq!(back.trailing, vec![0xDE, 0xAD]);
    }

    #[test]
    fn declared_length_bounds_are_enforced() {
        // Length says 3, which cannot even hold the header.
        let bytes = [0x00, 0x03, 0x00, 0x00];
        assert!(TypeDesc::parse(&mut Reader::new(&bytes)).is_err());
        // Length runs past the buffer.
        let bytes = [0x00, 0x10, 0x00, 0x00];
        assert!(TypeDesc::parse(&mut Reader::new(&bytes)).is_err());
    }

    #[test]
    fn salt_classification() {
        assert_eq!(classify(TdKind::Float64), TerminalClass::Number);
        assert_eq!(classify(TdKind::String), TerminalClass::String);
        assert_eq!(classify(TdKind::Path), TerminalClass::Path);
        assert_eq!(classify(TdKind::Cluster), TerminalClass::Compound);
        assert_eq!(classify(TdKind::Refnum), TerminalClass::Other);
    }

    #[test]
    fn kind_names_roundtrip() {
        assert_eq!(TdKind::from_name("Cluster"), Some(0x50));
        assert_eq!(TdKind::from(0x50u8).name(), "Cluster");
        assert_eq!(TdKind::from_name("NoSuchKind"), None);
    }
}
