//! Protocol versioning for agora envelopes.
//!
//! Envelopes carry their version as a `"MAJOR.MINOR"` string. Compatibility
//! is decided on the major component alone: a server speaking 1.x accepts
//! any 1.y envelope and rejects everything else.

use std::fmt;
use std::str::FromStr;

/// Current protocol version.
pub const PROTOCOL_VERSION: Version = Version { major: 1, minor: 0 };

/// A parsed protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    /// Major version - breaking changes increment this.
    pub major: u8,
    /// Minor version - backwards-compatible changes increment this.
    pub minor: u8,
}

impl Version {
    /// Create a new version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Check if this version is compatible with another version.
    ///
    /// Versions are compatible if they share the same major version.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }

    /// Check whether this server accepts envelopes at this version.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.is_compatible_with(&PROTOCOL_VERSION)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}

/// Error returned when a version string does not parse as `"MAJOR.MINOR"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseVersionError;

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("version is not of the form MAJOR.MINOR")
    }
}

impl std::error::Error for ParseVersionError {}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.split_once('.').ok_or(ParseVersionError)?;
        if major.is_empty() || minor.is_empty() || minor.contains('.') {
            return Err(ParseVersionError);
        }
        Ok(Self {
            major: major.parse().map_err(|_| ParseVersionError)?,
            minor: minor.parse().map_err(|_| ParseVersionError)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        let v1_0 = Version::new(1, 0);
        let v1_1 = Version::new(1, 1);
        let v2_0 = Version::new(2, 0);

        assert!(v1_0.is_compatible_with(&v1_1));
        assert!(v1_1.is_compatible_with(&v1_0));
        assert!(!v1_0.is_compatible_with(&v2_0));
    }

    #[test]
    fn test_version_parse() {
        assert_eq!("1.0".parse::<Version>(), Ok(Version::new(1, 0)));
        assert_eq!("2.13".parse::<Version>(), Ok(Version::new(2, 13)));

        assert!("".parse::<Version>().is_err());
        assert!("1".parse::<Version>().is_err());
        assert!("1.".parse::<Version>().is_err());
        assert!("1.0.0".parse::<Version>().is_err());
        assert!("one.zero".parse::<Version>().is_err());
        assert!("-1.0".parse::<Version>().is_err());
    }

    #[test]
    fn test_version_display_roundtrip() {
        let v = Version::new(1, 2);
        assert_eq!(v.to_string(), "1.2");
        assert_eq!(v.to_string().parse::<Version>(), Ok(v));
    }

    #[test]
    fn test_supported() {
        assert!(Version::new(PROTOCOL_VERSION.major, 9).is_supported());
        assert!(!Version::new(PROTOCOL_VERSION.major + 1, 0).is_supported());
    }
}
