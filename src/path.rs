// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! The `PTH0` structured path object.
//!
//! Section names are usually short byte strings, but library members carry a
//! serialized path instead: the magic `PTH0`, a u32 total length covering
//! everything after it, a u32 path kind (absolute / relative / unc…), a u16
//! component count and that many P-string components. The same layout shows
//! up inside path-typed default fills, so the codec lives here rather than
//! in the container.

use crate::codec::{Reader, Writer};
use crate::error::{LvError, Result};

pub const PATH_MAGIC: &[u8; 4] = b"PTH0";

/// Minimum serialized size at which a name can be a path object at all:
/// magic + total length + kind.
pub const PATH_MIN_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathKind {
    #[default]
    Absolute,
    Relative,
    NotAPath,
    Unc,
    Other(u32),
}

impl PathKind {
    pub fn from_wire(v: u32) -> Self {
        match v {
            0 => PathKind::Absolute,
            1 => PathKind::Relative,
            2 => PathKind::NotAPath,
            3 => PathKind::Unc,
            other => PathKind::Other(other),
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            PathKind::Absolute => 0,
            PathKind::Relative => 1,
            PathKind::NotAPath => 2,
            PathKind::Unc => 3,
            PathKind::Other(v) => v,
        }
    }
}

/// Parsed path object. Components stay as raw bytes; text decoding happens
/// only at the XML boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathObject {
    pub kind: PathKind,
    pub components: Vec<Vec<u8>>,
}

impl PathObject {
    /// Whether a section name looks like a serialized path object.
    pub fn sniff(name: &[u8]) -> bool {
        if name.len() < PATH_MIN_LEN || &name[0..4] != PATH_MAGIC {
            return false;
        }
        let totlen = u32::from_be_bytes([name[4], name[5], name[6], name[7]]) as usize;
        name.len() >= totlen + 8
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let magic = r.read_bytes(4)?;
        if magic != PATH_MAGIC {
            return Err(LvError::ContainerMalformed(format!(
                "path object magic {:02x?}",
                magic
            )));
        }
        let totlen = r.read_u32()? as usize;
        let body_end = r.pos() + totlen;
        if body_end > bytes.len() {
            return Err(LvError::UnexpectedEnd("path object body".into()));
        }
        let kind = PathKind::from_wire(r.read_u32()?);
        let count = r.read_u16()? as usize;
        let mut components = Vec::with_capacity(count);
        for _ in 0..count {
            components.push(r.read_pstr()?);
        }
        if r.pos() != body_end {
            return Err(LvError::ContainerMalformed(format!(
                "path object length {} disagrees with content end {}",
                totlen,
                r.pos() - 8
            )));
        }
        Ok(PathObject { kind, components })
    }

    pub fn prepare(&self) -> Vec<u8> {
        let mut body = Writer::new();
        body.write_u32(self.kind.to_wire());
        body.write_u16(self.components.len() as u16);
        for comp in &self.components {
            body.write_pstr(comp);
        }
        let body = body.into_bytes();
        let mut out = Writer::with_capacity(body.len() + 8);
        out.write_bytes(PATH_MAGIC);
        out.write_u32(body.len() as u32);
        out.write_bytes(&body);
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let path = PathObject {
            kind: PathKind::Relative,
            components: vec![b"lib".to_vec(), b"util.vi".to_vec()],
        };
        let raw = path.prepare();
        assert!(PathObject::sniff(&raw));
        assert_eq!(PathObject::parse(&raw).unwrap(), path);
    }

    #[test]
    fn plain_name_does_not_sniff_as_path() {
        assert!(!PathObject::sniff(b"frontpanel"));
        assert!(!PathObject::sniff(b"PTH"));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let mut raw = PathObject::default().prepare();
        raw.truncate(raw.len() - 1);
        assert!(PathObject::parse(&raw).is_err());
    }
}
