// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Offset map for debugging: who owns which bytes of the file.
//!
//! Parsers record `(end_offset, length, label)` entries as they go; after a
//! read the map prints as an indented tree, nesting entries inside any entry
//! that spans them. Recording must never influence the bytes a writer emits
//! — the map is observational only.

use std::fmt::Write as _;

/// What the map tracks, selected from the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MapTarget {
    #[default]
    Off,
    /// Whole-container map: headers, section data, names.
    Container,
    /// One block's internal layout, by pretty ident.
    Block(String),
}

impl MapTarget {
    pub fn wants_container(&self) -> bool {
        matches!(self, MapTarget::Container)
    }

    pub fn wants_block(&self, pretty_ident: &str) -> bool {
        match self {
            MapTarget::Block(ident) => ident == pretty_ident,
            _ => false,
        }
    }
}

/// One recorded span. `end` is the offset just past the span, matching the
/// cursor position at record time.
#[derive(Debug, Clone)]
pub struct MapEntry {
    pub end: u64,
    pub len: u64,
    pub label: String,
}

#[derive(Debug, Default)]
pub struct PrintMap {
    entries: Vec<MapEntry>,
}

impl PrintMap {
    pub fn new() -> Self {
        PrintMap::default()
    }

    pub fn record(&mut self, end: u64, len: u64, label: impl Into<String>) {
        self.entries.push(MapEntry {
            end,
            len,
            label: label.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wrap all entries whose label matches `pred` in one synthetic parent,
    /// so groups written next to each other (section starts, name strings)
    /// read as a unit.
    pub fn group(&mut self, parent_label: &str, pred: impl Fn(&str) -> bool) {
        let mut beg = u64::MAX;
        let mut end = 0u64;
        for e in &self.entries {
            if pred(&e.label) {
                beg = beg.min(e.end - e.len);
                end = end.max(e.end);
            }
        }
        if beg < end {
            self.record(end, end - beg, parent_label);
        }
    }

    /// Render the indented tree. Sorting is by (start, -len, label length),
    /// which puts a parent immediately before the entries it contains.
    pub fn render(&self) -> String {
        let mut sorted: Vec<&MapEntry> = self.entries.iter().collect();
        sorted.sort_by_key(|e| (e.end - e.len, std::cmp::Reverse(e.len), e.label.len()));
        let mut out = String::new();
        let mut parents: Vec<&MapEntry> = Vec::new();
        for entry in sorted {
            while let Some(par) = parents.last() {
                if par.end > entry.end - entry.len {
                    break;
                }
                parents.pop();
            }
            parents.push(entry);
            let _ = writeln!(
                out,
                "{:08X}: {:indent$}{} (size:{})",
                entry.end - entry.len,
                "",
                entry.label,
                entry.len,
                indent = 2 * (parents.len() - 1)
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nesting_by_span() {
        let mut map = PrintMap::new();
        map.record(32, 32, "RSRCHeader[0]");
        map.record(16, 16, "inner");
        let text = map.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "00000000: RSRCHeader[0] (size:32)");
        assert_eq!(lines[1], "00000000:   inner (size:16)");
    }

    #[test]
    fn grouping_spans_members() {
        let mut map = PrintMap::new();
        map.record(24, 4, "NameOfSection[vers]");
        map.record(30, 6, "NameOfSection[LVSR]");
        map.group("NameStrings", |l| l.starts_with("NameOfSection"));
        let text = map.render();
        assert!(text.contains("NameStrings (size:10)"));
    }

    #[test]
    fn target_selection() {
        let t = MapTarget::Block("VCTP".into());
        assert!(t.wants_block("VCTP"));
        assert!(!t.wants_block("DFDS"));
        assert!(!t.wants_container());
    }
}
