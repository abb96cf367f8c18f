//! Engine version reported by `GET /version`.
//!
//! Format: `<major>.<minor>[a]<bugfix>[.<qualifier>]`, e.g. `6.0.1`, `5.0a3`
//! or `6.1.0.dev2`. The comparison against the version this bridge was built
//! for is advisory only.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Engine release this bridge speaks the protocol of.
pub const SUPPORTED_ENGINE_VERSION: &str = "6.0.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub bugfix: u32,
    pub alpha: bool,
    pub qualifier: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid version `{raw}`: {reason}")]
pub struct VersionParseError {
    pub raw: String,
    pub reason: &'static str,
}

impl Version {
    pub fn new(major: u32, minor: u32, bugfix: u32) -> Self {
        Self {
            major,
            minor,
            bugfix,
            alpha: false,
            qualifier: None,
        }
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let err = |reason| VersionParseError {
            raw: raw.to_string(),
            reason,
        };
        let mut parts = raw.trim().splitn(4, '.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| err("missing major"))?
            .parse::<u32>()
            .map_err(|_| err("major is not a number"))?;
        let second = parts.next().ok_or_else(|| err("missing minor"))?;

        let (minor, alpha, inline_bugfix) = match second.split_once('a') {
            Some((minor, bugfix)) => (minor, true, Some(bugfix)),
            None => (second, false, None),
        };
        let minor = minor
            .parse::<u32>()
            .map_err(|_| err("minor is not a number"))?;

        let bugfix_text = match inline_bugfix {
            Some(text) => Some(text),
            None => parts.next(),
        };
        let bugfix = match bugfix_text {
            Some(text) => text
                .parse::<u32>()
                .map_err(|_| err("bugfix is not a number"))?,
            None => 0,
        };
        let qualifier: Vec<&str> = parts.collect();
        let qualifier = if qualifier.is_empty() {
            None
        } else {
            Some(qualifier.join("."))
        };

        Ok(Version {
            major,
            minor,
            bugfix,
            alpha,
            qualifier,
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.bugfix.cmp(&other.bugfix))
            // an alpha precedes its final release
            .then(other.alpha.cmp(&self.alpha))
            .then_with(|| match (&self.qualifier, &other.qualifier) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.alpha {
            write!(f, "{}.{}a{}", self.major, self.minor, self.bugfix)?;
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.bugfix)?;
        }
        if let Some(qualifier) = &self.qualifier {
            write!(f, ".{qualifier}")?;
        }
        Ok(())
    }
}

/// Outcome of comparing a running engine against the expected release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Match,
    /// Same major, newer engine; usually fine.
    Newer,
    /// Older engine or a different major release.
    Mismatch,
}

pub fn compatibility(expected: &Version, reported: &Version) -> Compatibility {
    if reported.major != expected.major || reported < expected {
        Compatibility::Mismatch
    } else if reported == expected {
        Compatibility::Match
    } else {
        Compatibility::Newer
    }
}

/// Log the advisory comparison; never blocks operation.
pub fn warn_if_incompatible(process: usize, expected: &Version, reported: &Version) {
    match compatibility(expected, reported) {
        Compatibility::Match => {
            tracing::debug!(process, version = %reported, "engine version matches");
        }
        Compatibility::Newer => {
            tracing::info!(
                process,
                expected = %expected,
                reported = %reported,
                "engine is newer than the protocol this bridge was built for"
            );
        }
        Compatibility::Mismatch => {
            tracing::warn!(
                process,
                expected = %expected,
                reported = %reported,
                "engine version differs from the supported protocol version"
            );
        }
    }
}
