//! Protocol version string and compatibility policy.
//!
//! Versions look like `MAJOR.MINOR.PATCH-SUFFIX`. Coordinator and agent
//! refuse to talk to each other when MAJOR or MINOR differ; PATCH and the
//! suffix are free.

use anyhow::{bail, Result};
use std::fmt;

/// Version string this build speaks on the wire.
pub const PROTOCOL_VERSION: &str = "0.1.0-dev";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub suffix: String,
}

impl Version {
    /// The version of the running binary.
    pub fn current() -> Self {
        Version {
            major: 0,
            minor: 1,
            patch: 0,
            suffix: "dev".to_string(),
        }
    }

    /// Parse `MAJOR.MINOR.PATCH` with an optional `-SUFFIX` tail.
    pub fn parse(s: &str) -> Result<Self> {
        let (numbers, suffix) = match s.split_once('-') {
            Some((n, suf)) => (n, suf.to_string()),
            None => (s, String::new()),
        };
        let mut parts = numbers.split('.');
        let (major, minor, patch) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), Some(c), None) => {
                (a.parse::<u32>(), b.parse::<u32>(), c.parse::<u32>())
            }
            _ => bail!("invalid version format: {s}"),
        };
        match (major, minor, patch) {
            (Ok(major), Ok(minor), Ok(patch)) => Ok(Version {
                major,
                minor,
                patch,
                suffix,
            }),
            _ => bail!("invalid version format: {s}"),
        }
    }

    /// Compatibility policy: MAJOR and MINOR must match.
    pub fn compatible_with(&self, other: &Version) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.suffix.is_empty() {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        } else {
            write!(f, "{}.{}.{}-{}", self.major, self.minor, self.patch, self.suffix)
        }
    }
}
