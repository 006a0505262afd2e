// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! The file version word and the comparisons that gate half the format.
//!
//! The authoring tool packs its version into one big-endian u32, mostly BCD:
//!
//! ```text
//! bits 31..24   major, two BCD digits
//! bits 23..20   minor
//! bits 19..16   bugfix
//! bits 15..13   stage (1 development, 2 alpha, 3 beta, 4 release)
//! bits 12..8    flags, carried verbatim
//! bits  7..0    build, two BCD digits
//! ```
//!
//! So LV 14.0.0 release build 0 is `0x1400_8000`. Parsers all over the crate
//! branch on `at_least`, which orders by (major, minor, bugfix, build) and
//! deliberately ignores stage except when a gate names one.

use std::fmt;

use num_enum::{FromPrimitive, IntoPrimitive};

/// Release stage encoded in bits 15..13 of the version word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Stage {
    #[num_enum(default)]
    Unknown = 0,
    Development = 1,
    Alpha = 2,
    Beta = 3,
    Release = 4,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Unknown => "unknown",
            Stage::Development => "development",
            Stage::Alpha => "alpha",
            Stage::Beta => "beta",
            Stage::Release => "release",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "development" => Stage::Development,
            "alpha" => Stage::Alpha,
            "beta" => Stage::Beta,
            "release" => Stage::Release,
            _ => Stage::Unknown,
        }
    }
}

/// Decoded version tuple. `flags` holds the 5 undecoded bits verbatim so the
/// word re-encodes bit-exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub bugfix: u8,
    pub stage: Stage,
    pub flags: u8,
    pub build: u8,
}

impl Default for Stage {
    fn default() -> Self {
        Stage::Unknown
    }
}

fn bcd2(v: u32) -> u8 {
    (((v >> 4) & 0x0F) * 10 + (v & 0x0F)) as u8
}

fn to_bcd2(v: u8) -> u32 {
    (u32::from(v / 10) << 4) | u32::from(v % 10)
}

impl Version {
    pub fn decode(word: u32) -> Self {
        Version {
            major: bcd2(word >> 24),
            minor: ((word >> 20) & 0x0F) as u8,
            bugfix: ((word >> 16) & 0x0F) as u8,
            stage: Stage::from((word >> 13) as u8 & 0x07),
            flags: ((word >> 8) & 0x1F) as u8,
            build: bcd2(word),
        }
    }

    pub fn encode(&self) -> u32 {
        (to_bcd2(self.major) << 24)
            | (u32::from(self.minor & 0x0F) << 20)
            | (u32::from(self.bugfix & 0x0F) << 16)
            | (u32::from(u8::from(self.stage) & 0x07) << 13)
            | (u32::from(self.flags & 0x1F) << 8)
            | to_bcd2(self.build)
    }

    /// Version gate: true when `self` is at or past the given point.
    pub fn at_least(&self, major: u8, minor: u8, bugfix: u8, build: u8) -> bool {
        (self.major, self.minor, self.bugfix, self.build) >= (major, minor, bugfix, build)
    }

    /// Gate that also requires a minimum stage at the boundary version.
    /// `10,0 release` is newer than `10,0 beta` even though the numeric
    /// tuples tie.
    pub fn at_least_stage(&self, major: u8, minor: u8, stage: Stage) -> bool {
        match (self.major, self.minor).cmp(&(major, minor)) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.stage >= stage,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}{}{}",
            self.major,
            self.minor,
            self.bugfix,
            match self.stage {
                Stage::Release => "f".to_string(),
                Stage::Beta => "b".to_string(),
                Stage::Alpha => "a".to_string(),
                Stage::Development => "d".to_string(),
                Stage::Unknown => "?".to_string(),
            },
            self.build
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lv14_release_word() {
        let v = Version::decode(0x1400_8000);
        assert_eq!(
            (v.major, v.minor, v.bugfix, v.stage, v.build),
            (14, 0, 0, Stage::Release, 0)
        );
        assert_eq!(v.encode(), 0x1400_8000);
    }

    #[test]
    fn bcd_major_and_build() {
        let v = Version::decode(0x0861_6007 | (to_bcd2(7) ));
        assert_eq!(v.major, 8);
        assert_eq!(v.minor, 6);
        assert_eq!(v.bugfix, 1);
        assert_eq!(v.stage, Stage::Beta);
        assert_eq!(v.build, 7);
    }

    #[test]
    fn ordering_gates() {
        let v = Version::decode(0x0800_8000); // 8.0 release
        assert!(v.at_least(7, 0, 0, 0));
        assert!(v.at_least(8, 0, 0, 0));
        assert!(!v.at_least(8, 0, 0, 1));
        assert!(!v.at_least(10, 0, 0, 0));
        assert!(v.at_least_stage(8, 0, Stage::Release));
        let beta = Version::decode(0x0A00_6000); // 10.0 beta
        assert!(!beta.at_least_stage(10, 0, Stage::Release));
        assert!(beta.at_least_stage(9, 0, Stage::Release));
    }

    #[test]
    fn zero_word_is_all_zero() {
        let v = Version::decode(0);
        assert_eq!(v, Version::default());
    }

    proptest! {
        #[test]
        fn word_roundtrips(major in 0u8..100, minor in 0u8..16, bugfix in 0u8..16,
                           stage in 0u8..5, flags in 0u8..32, build in 0u8..100) {
            let v = Version {
                major, minor, bugfix,
                stage: Stage::from(stage),
                flags, build,
            };
            prop_assert_eq!(Version::decode(v.encode()), v);
        }
    }
}
