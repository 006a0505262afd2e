// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! The `vers` record: the version tuple that gates parsing everywhere else.
//!
//! Wire form: u32 version word, version text P-string, one byte that must
//! be zero, version info P-string, comment P-string. From 8.6 the comment
//! is expected empty; a populated one is only worth a warning.

use log::warn;

use crate::codec::{Reader, Writer};
use crate::error::{LvError, Result};
use crate::version::Version;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersRecord {
    pub version: Version,
    pub version_text: Vec<u8>,
    pub version_info: Vec<u8>,
    pub comment: Vec<u8>,
}

pub fn parse(r: &mut Reader<'_>) -> Result<VersRecord> {
    let version = Version::decode(r.read_u32()?);
    let version_text = r.read_pstr()?;
    let zero = r.read_u8()?;
    if zero != 0 {
        return Err(LvError::ContainerMalformed(format!(
            "vers reserved byte is {} instead of 0",
            zero
        )));
    }
    let version_info = r.read_pstr()?;
    let comment = r.read_pstr()?;
    if version.at_least(8, 6, 0, 0) && !comment.is_empty() {
        warn!("vers comment has {} bytes; expected empty from 8.6", comment.len());
    }
    Ok(VersRecord {
        version,
        version_text,
        version_info,
        comment,
    })
}

pub fn prepare(rec: &VersRecord) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u32(rec.version.encode());
    w.write_pstr(&rec.version_text);
    w.write_u8(0);
    w.write_pstr(&rec.version_info);
    w.write_pstr(&rec.comment);
    w.into_bytes()
}

pub fn expected_size(rec: &VersRecord) -> usize {
    4 + 1 + rec.version_text.len() + 1 + 1 + rec.version_info.len() + 1 + rec.comment.len()
}
