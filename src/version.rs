//! Artifact versioning utilities

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The version stamped into every synthesized manifest
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactVersion {
    /// Semantic version (e.g., "1.2.3")
    pub version: Version,
}

impl ArtifactVersion {
    /// Create a new artifact version
    pub fn new(version: Version) -> Self {
        Self { version }
    }

    /// Create from a version string
    pub fn parse(version_str: &str) -> Result<Self, semver::Error> {
        let version_str = version_str.trim();
        let version_str = version_str.strip_prefix('v').unwrap_or(version_str);
        Ok(Self::new(Version::parse(version_str)?))
    }

    /// Get the version string (e.g., "1.2.3")
    pub fn version_string(&self) -> String {
        self.version.to_string()
    }

    /// Whether this is a pre-release (e.g., "1.0.0-rc.1")
    pub fn is_prerelease(&self) -> bool {
        !self.version.pre.is_empty()
    }
}

impl Default for ArtifactVersion {
    fn default() -> Self {
        Self::new(Version::new(0, 1, 0))
    }
}

impl fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version)
    }
}

impl TryFrom<String> for ArtifactVersion {
    type Error = semver::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ArtifactVersion> for String {
    fn from(value: ArtifactVersion) -> Self {
        value.version_string()
    }
}
