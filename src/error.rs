//! Error types for the packaging pipeline

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::target::Target;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline errors
///
/// `InvalidSchema`, `CompilerTimeout` and `CompilerLaunch` are fatal for a run.
/// `StagingIo` is scoped to a single target and never cancels its siblings.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Schema source set is empty: no files matching {extensions:?} under {}", .root.display())]
    EmptySourceSet { root: PathBuf, extensions: Vec<String> },

    #[error("Invalid schema:\n{diagnostics}")]
    InvalidSchema { diagnostics: String },

    #[error("Schema compiler exceeded its time bound of {timeout:?}")]
    CompilerTimeout { timeout: Duration },

    #[error("Failed to launch schema compiler '{program}': {source}")]
    CompilerLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Staging failed for target {target} at {}: {source}", .path.display())]
    StagingIo {
        target: Target,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid artifact name: {0}")]
    InvalidArtifactName(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("Invalid output layout: {0}")]
    InvalidLayout(String),

    #[error("Task graph contains a cycle at {0}")]
    Cycle(String),

    #[error("Task {task} aborted: {reason}")]
    TaskAborted { task: String, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl PipelineError {
    /// Attach the target and path to a raw IO failure raised while staging
    pub fn staging(target: Target, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::StagingIo {
            target,
            path: path.into(),
            source,
        }
    }
}
