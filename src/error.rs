// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the RSRC codec.
//!
//! The split matters more than usual here: container-level errors abort the
//! whole read, while per-section errors degrade that one section to raw
//! passthrough so the file still round-trips byte-for-byte. The framework in
//! `block` is the only place that catches `ParseExceeded`/`ParseShort`;
//! everything else propagates.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LvError>;

#[derive(Debug, Error)]
pub enum LvError {
    /// Bad magic, out-of-range offsets, impossible counts. Fatal; read aborts.
    #[error("malformed container: {0}")]
    ContainerMalformed(String),

    /// A section's declared payload exceeds the data region. Fatal.
    #[error("section {ident}/{section} payload overflows data region ({end} > {bound})")]
    SectionOverflow {
        ident: String,
        section: i32,
        end: u64,
        bound: u64,
    },

    /// Compressed/uncompressed size ratio outside the codec's legal range.
    #[error("coding bounds violated for {ident}/{section}: {detail}")]
    CodecBounds {
        ident: String,
        section: i32,
        detail: String,
    },

    /// A block parser consumed more bytes than the section holds.
    #[error("{ident}/{section}: parser consumed {consumed} of {have} bytes")]
    ParseExceeded {
        ident: String,
        section: i32,
        consumed: usize,
        have: usize,
    },

    /// A block parser left bytes unconsumed.
    #[error("{ident}/{section}: parser left {left} of {have} bytes unread")]
    ParseShort {
        ident: String,
        section: i32,
        left: usize,
        have: usize,
    },

    /// `prepare` produced a buffer whose length disagrees with `expected_size`.
    #[error("{ident}/{section}: prepared {got} bytes, expected {expected}")]
    PrepareSizeMismatch {
        ident: String,
        section: i32,
        got: usize,
        expected: usize,
    },

    /// Unexpected tag or attribute while importing XML. Fatal for that block.
    #[error("XML schema violation: {0}")]
    XmlSchemaViolation(String),

    /// A block needed a peer (e.g. DFDS needs TM80 and VCTP) that is absent.
    #[error("missing cross-reference: {0}")]
    CrossReferenceMissing(String),

    /// No salt candidate reproduced hash_1; hashes are carried verbatim.
    #[error("no password salt matches stored hash_1")]
    PasswordHashMismatch,

    /// Truncated read inside a section payload or header.
    #[error("unexpected end of data while reading {0}")]
    UnexpectedEnd(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl LvError {
    /// Whether this error degrades a single section instead of failing the file.
    pub fn is_section_local(&self) -> bool {
        matches!(
            self,
            LvError::ParseExceeded { .. }
                | LvError::ParseShort { .. }
                | LvError::UnexpectedEnd(_)
                | LvError::CodecBounds { .. }
        )
    }
}
