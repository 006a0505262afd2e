// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! The front-panel and block-diagram heaps.
//!
//! Three generations share one shape here: a u32 content length and then
//! the tag-tree bytes, which this crate deliberately does not interpret.
//! `BDHP`/`FPHP` (7beta and older) store it plain; `BDHb`/`FPHb` and
//! `BDHc`/`FPHc` zlib-compress the section. What matters to the core is
//! `content_hash`: BDPW's `hash_2` binds the MD5 of the content body, so
//! the split between length prefix and body must match the authoring tool
//! exactly.

use crate::codec::{Reader, Writer};
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapContent {
    /// Opaque tag-tree bytes.
    pub content: Vec<u8>,
    /// Bytes past the declared content, kept verbatim (generation c keeps
    /// its trailing data table here).
    pub trailing: Vec<u8>,
}

impl HeapContent {
    /// MD5 over the content body only — the value `hash_2` chains on.
    pub fn content_hash(&self) -> [u8; 16] {
        md5::compute(&self.content).0
    }
}

pub fn parse(r: &mut Reader<'_>) -> Result<HeapContent> {
    let len = r.read_u32()? as usize;
    let content = r.read_bytes(len)?.to_vec();
    let trailing = r.read_rest().to_vec();
    Ok(HeapContent { content, trailing })
}

pub fn prepare(heap: &HeapContent) -> Vec<u8> {
    let mut w = Writer::with_capacity(4 + heap.content.len() + heap.trailing.len());
    w.write_u32(heap.content.len() as u32);
    w.write_bytes(&heap.content);
    w.write_bytes(&heap.trailing);
    w.into_bytes()
}

pub fn expected_size(heap: &HeapContent) -> usize {
    4 + heap.content.len() + heap.trailing.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_trailing() {
        let heap = HeapContent {
            content: b"heap bytes".to_vec(),
            trailing: vec![0, 0, 0, 2, 1, 2],
        };
        let bytes = prepare(&heap);
        assert_eq!(bytes.len(), expected_size(&heap));
        let mut r = Reader::new(&bytes);
        assert_eq!(parse(&mut r).unwrap(), heap);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn hash_covers_content_only() {
        let a = HeapContent {
            content: b"same".to_vec(),
            trailing: vec![1],
        };
        let b = HeapContent {
            content: b"same".to_vec(),
            trailing: vec![2, 3],
        };
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash(), md5::compute(b"same").0);
    }

    #[test]
    fn truncated_content_is_an_error() {
        let bytes = [0, 0, 0, 9, 1, 2];
        assert!(parse(&mut Reader::new(&bytes)).is_err());
    }
}
