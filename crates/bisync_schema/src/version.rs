//! Server versions and gate policies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a version string cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid server version `{input}`: {reason}")]
pub struct VersionParseError {
    /// Input that failed to parse.
    pub input: String,
    /// Why it failed.
    pub reason: &'static str,
}

/// A dotted numeric server version such as `11.3.0800`.
///
/// Up to four components are kept. Missing components are zero, so
/// `11.3` == `11.3.0` == `11.3.0000.0` and ordering is component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerVersion {
    parts: [u32; 4],
}

impl ServerVersion {
    /// Creates a version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32, build: u32) -> Self {
        Self {
            parts: [major, minor, patch, build],
        }
    }

    /// Major component.
    pub const fn major(&self) -> u32 {
        self.parts[0]
    }

    /// Minor component.
    pub const fn minor(&self) -> u32 {
        self.parts[1]
    }

    /// Returns true if this version is at least `required`.
    pub fn satisfies(&self, required: &ServerVersion) -> bool {
        self >= required
    }
}

impl FromStr for ServerVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| VersionParseError {
            input: s.to_string(),
            reason,
        };
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(err("empty version"));
        }

        let mut parts = [0u32; 4];
        for (i, piece) in trimmed.split('.').enumerate() {
            if i >= parts.len() {
                return Err(err("more than four components"));
            }
            if piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()) {
                return Err(err("components must be decimal numbers"));
            }
            parts[i] = piece.parse().map_err(|_| err("component out of range"))?;
        }
        Ok(Self { parts })
    }
}

impl TryFrom<String> for ServerVersion {
    type Error = VersionParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ServerVersion> for String {
    fn from(version: ServerVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch, build] = self.parts;
        write!(f, "{major}.{minor}.{patch:04}")?;
        if build != 0 {
            write!(f, ".{build:04}")?;
        }
        Ok(())
    }
}

/// What to do when a feature requires a newer server than the one connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GatePolicy {
    /// Skip the feature without output.
    Silent,
    /// Skip the feature and log a warning.
    Warn,
    /// Fail with an unsupported-version error.
    #[default]
    Raise,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_compare() {
        let required: ServerVersion = "11.3.0800".parse().unwrap();
        assert_eq!(required, ServerVersion::new(11, 3, 800, 0));

        let older: ServerVersion = "11.3.0700".parse().unwrap();
        let newer: ServerVersion = "11.3.1000.0095".parse().unwrap();
        assert!(older < required);
        assert!(newer.satisfies(&required));
        assert!(!older.satisfies(&required));
    }

    #[test]
    fn missing_components_are_zero() {
        let short: ServerVersion = "11.3".parse().unwrap();
        assert_eq!(short, "11.3.0.0".parse().unwrap());
        assert!(short < "11.3.0.1".parse().unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<ServerVersion>().is_err());
        assert!("11.x".parse::<ServerVersion>().is_err());
        assert!("11..3".parse::<ServerVersion>().is_err());
        assert!("1.2.3.4.5".parse::<ServerVersion>().is_err());
    }

    #[test]
    fn display_pads_patch() {
        assert_eq!(ServerVersion::new(11, 3, 800, 0).to_string(), "11.3.0800");
        assert_eq!(ServerVersion::new(11, 2, 100, 95).to_string(), "11.2.0100.0095");
    }

    #[test]
    fn serializes_as_dotted_string() {
        let version = ServerVersion::new(11, 3, 800, 0);
        assert_eq!(serde_json::to_value(version).unwrap(), serde_json::json!("11.3.0800"));
        let parsed: ServerVersion = serde_json::from_value(serde_json::json!("11.3.0800")).unwrap();
        assert_eq!(parsed, version);
        assert!(serde_json::from_value::<ServerVersion>(serde_json::json!("eleven")).is_err());
    }

    #[test]
    fn default_policy_raises() {
        assert_eq!(GatePolicy::default(), GatePolicy::Raise);
    }
}
