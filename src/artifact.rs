//! Artifact identity shared by every staged package of a run

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{PipelineError, Result};
use crate::version::ArtifactVersion;

/// Longest name npm accepts; PyPI has no lower bound that bites first
const MAX_NAME_LEN: usize = 214;

/// Name and version stamped into every manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Package name, valid for both PyPI and npm (e.g., "shared-proto")
    pub name: String,
    pub version: ArtifactVersion,
    /// Maven groupId for the Kotlin package
    pub group: String,
}

impl Artifact {
    /// Build an artifact, rejecting names a package index would refuse
    pub fn new(
        name: impl Into<String>,
        version: ArtifactVersion,
        group: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        let group = group.into();
        if group.is_empty() || group.split('.').any(|segment| segment.is_empty()) {
            return Err(PipelineError::InvalidArtifactName(format!(
                "group '{}' must be a dotted identifier",
                group
            )));
        }
        Ok(Self {
            name,
            version,
            group,
        })
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([a-z0-9._-]*[a-z0-9])?$").expect("artifact name pattern is valid")
    })
}

/// Lowercase alphanumerics separated by `-`, `_` or `.`; the intersection of
/// what PyPI and npm accept.
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(PipelineError::InvalidArtifactName(format!(
            "'{}' is longer than {} characters",
            name, MAX_NAME_LEN
        )));
    }
    if !name_pattern().is_match(name) {
        return Err(PipelineError::InvalidArtifactName(format!(
            "'{}' must be lowercase alphanumerics separated by '-', '_' or '.'",
            name
        )));
    }
    Ok(())
}
