// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Text at the XML boundary.
//!
//! Inside the container every string is raw bytes; the authoring tool wrote
//! most of them as MacRoman regardless of platform. Decoding only happens
//! when text crosses into XML, and the chosen encoding is threaded through
//! explicitly as part of the config — no ambient state.

use std::fmt;

/// High half of the MacRoman table (0x80..=0xFF). The low half is ASCII.
const MAC_ROMAN_HIGH: [char; 128] = [
    'Ä', 'Å', 'Ç', 'É', 'Ñ', 'Ö', 'Ü', 'á', 'à', 'â', 'ä', 'ã', 'å', 'ç', 'é', 'è',
    'ê', 'ë', 'í', 'ì', 'î', 'ï', 'ñ', 'ó', 'ò', 'ô', 'ö', 'õ', 'ú', 'ù', 'û', 'ü',
    '†', '°', '¢', '£', '§', '•', '¶', 'ß', '®', '©', '™', '´', '¨', '≠', 'Æ', 'Ø',
    '∞', '±', '≤', '≥', '¥', 'µ', '∂', '∑', '∏', 'π', '∫', 'ª', 'º', 'Ω', 'æ', 'ø',
    '¿', '¡', '¬', '√', 'ƒ', '≈', '∆', '«', '»', '…', '\u{A0}', 'À', 'Ã', 'Õ', 'Œ', 'œ',
    '–', '—', '“', '”', '‘', '’', '÷', '◊', 'ÿ', 'Ÿ', '⁄', '€', '‹', '›', 'ﬁ', 'ﬂ',
    '‡', '·', '‚', '„', '‰', 'Â', 'Ê', 'Á', 'Ë', 'È', 'Í', 'Î', 'Ï', 'Ì', 'Ó', 'Ô',
    '\u{F8FF}', 'Ò', 'Ú', 'Û', 'Ù', 'ı', 'ˆ', '˜', '¯', '˘', '˙', '˚', '¸', '˝', '˛', 'ˇ',
];

/// Encoding used to move container bytes into and out of XML text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    MacRoman,
    Utf8,
}

impl TextEncoding {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "mac_roman" | "macintosh" | "mac-roman" => Some(TextEncoding::MacRoman),
            "utf-8" | "utf8" | "UTF-8" => Some(TextEncoding::Utf8),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TextEncoding::MacRoman => "mac_roman",
            TextEncoding::Utf8 => "utf-8",
        }
    }

    /// Bytes → text. MacRoman never fails; UTF-8 falls back to lossy so a
    /// stray byte in a label cannot abort an export.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::MacRoman => bytes
                .iter()
                .map(|&b| {
                    if b < 0x80 {
                        b as char
                    } else {
                        MAC_ROMAN_HIGH[(b - 0x80) as usize]
                    }
                })
                .collect(),
        }
    }

    /// Text → bytes. Characters with no MacRoman slot become `?`, matching
    /// the usual replacement convention.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::MacRoman => text
                .chars()
                .map(|c| {
                    if (c as u32) < 0x80 {
                        c as u8
                    } else {
                        MAC_ROMAN_HIGH
                            .iter()
                            .position(|&m| m == c)
                            .map_or(b'?', |i| (i + 0x80) as u8)
                    }
                })
                .collect(),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_identity_in_both() {
        for enc in [TextEncoding::MacRoman, TextEncoding::Utf8] {
            assert_eq!(enc.decode(b"Untitled 1.vi"), "Untitled 1.vi");
            assert_eq!(enc.encode("Untitled 1.vi"), b"Untitled 1.vi");
        }
    }

    #[test]
    fn mac_roman_high_half_roundtrips() {
        let bytes: Vec<u8> = (0x80..=0xFFu8).collect();
        let text = TextEncoding::MacRoman.decode(&bytes);
        assert_eq!(TextEncoding::MacRoman.encode(&text), bytes);
    }

    #[test]
    fn unmappable_char_becomes_question_mark() {
        assert_eq!(TextEncoding::MacRoman.encode("口"), b"?");
    }
}
