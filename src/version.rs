//! Firmware version value type.
//!
//! The device reports its firmware version either as four raw bytes in the
//! offset-addressed config blob or as a string over the per-field protocol.
//! Both forms parse into [`FirmwareVersion`], which carries a total order:
//! `major.minor.patch` compare lexicographically, and for an equal triple a
//! stable build (alpha = 0) outranks every alpha build while larger alpha
//! wins among prereleases.
//!
//! # Example
//!
//! ```
//! use cronus_link::FirmwareVersion;
//!
//! let stable: FirmwareVersion = "0.1.3".parse().unwrap();
//! let alpha: FirmwareVersion = "0.1.3-alpha2".parse().unwrap();
//!
//! assert!(stable > alpha);
//! assert_eq!(alpha.to_string(), "0.1.3-alpha2");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A firmware version reported by the device.
///
/// Each component is one byte wide, matching the wire format of the
/// offset-addressed config blob. Values are immutable; a fresh instance
/// replaces the old one on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FirmwareVersion {
    /// Major version component.
    pub major: u8,
    /// Minor version component.
    pub minor: u8,
    /// Patch version component.
    pub patch: u8,
    /// Prerelease number; 0 denotes a stable build.
    pub alpha: u8,
}

impl FirmwareVersion {
    /// The `0.0.0` sentinel a device reports when it cannot identify itself.
    pub const UNKNOWN: Self = Self::new(0, 0, 0, 0);

    /// Create a version from raw components.
    pub const fn new(major: u8, minor: u8, patch: u8, alpha: u8) -> Self {
        Self {
            major,
            minor,
            patch,
            alpha,
        }
    }

    /// Whether this is the `0.0.0` "could not identify itself" sentinel.
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }

    /// Whether this is a prerelease (alpha) build.
    pub fn is_alpha(&self) -> bool {
        self.alpha != 0
    }

    fn triple(&self) -> (u8, u8, u8) {
        (self.major, self.minor, self.patch)
    }
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.triple()
            .cmp(&other.triple())
            .then_with(|| match (self.alpha, other.alpha) {
                (a, b) if a == b => Ordering::Equal,
                // Stable outranks any prerelease of the same triple.
                (0, _) => Ordering::Greater,
                (_, 0) => Ordering::Less,
                (a, b) => a.cmp(&b),
            })
    }
}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.alpha != 0 {
            write!(f, "-alpha{}", self.alpha)?;
        }
        Ok(())
    }
}

impl FromStr for FirmwareVersion {
    type Err = ParseError;

    /// Parse `major.minor.patch` with an optional prerelease marker.
    ///
    /// Accepted prerelease spellings: a `-alphaN` suffix (the canonical
    /// display form) or a fourth dot segment (`1.2.3.4` / `1.2.3.alpha4`,
    /// as older firmware emits).
    fn from_str(s: &str) -> Result<Self, ParseError> {
        let (triple, suffix) = match s.split_once('-') {
            Some((t, rest)) => (t, Some(rest)),
            None => (s, None),
        };

        let segments: Vec<&str> = triple.split('.').collect();
        if segments.len() < 3 || segments.len() > 4 || (segments.len() == 4 && suffix.is_some()) {
            return Err(ParseError::SegmentCount {
                found: segments.len(),
            });
        }

        let major = numeric(segments[0])?;
        let minor = numeric(segments[1])?;
        let patch = numeric(segments[2])?;

        let alpha = if let Some(suffix) = suffix {
            let digits = suffix
                .strip_prefix("alpha")
                .ok_or_else(|| ParseError::InvalidSegment(suffix.to_string()))?;
            numeric(digits)?
        } else if segments.len() == 4 {
            // Older firmware writes "alpha4" or bare "4" as a fourth segment.
            numeric(segments[3].strip_prefix("alpha").unwrap_or(segments[3]))?
        } else {
            0
        };

        Ok(Self::new(major, minor, patch, alpha))
    }
}

fn numeric(segment: &str) -> Result<u8, ParseError> {
    segment
        .parse()
        .map_err(|_| ParseError::InvalidSegment(segment.to_string()))
}

/// Errors raised when parsing a version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Fewer than 3 or more than 4 dot-separated segments.
    SegmentCount { found: usize },
    /// A segment was not a number (or did not fit in one byte).
    InvalidSegment(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SegmentCount { found } => write!(
                f,
                "expected major.minor.patch[.alphaN], got {} segments",
                found
            ),
            Self::InvalidSegment(s) => write!(f, "non-numeric version segment: {:?}", s),
        }
    }
}

impl std::error::Error for ParseError {}
