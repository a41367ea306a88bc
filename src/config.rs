//! Configuration management for the packaging pipeline
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (proto-pack.toml)
//! - Environment variables (PROTO_PACK__*)
//!
//! ## Example config file (proto-pack.toml):
//! ```toml
//! [artifact]
//! name = "shared-proto"
//! version = "0.1.0"
//! group = "com.example"
//!
//! [sources]
//! root = "src/main/proto"
//! extensions = ["proto"]
//!
//! [compiler]
//! program = "protoc"
//! timeout_secs = 120
//!
//! [output]
//! build_dir = "build"
//!
//! [pipeline]
//! workers = 4
//! targets = ["kotlin", "python", "js"]
//!
//! [targets.js]
//! generate = true
//! runtime_dependency = { name = "google-protobuf", requirement = "^3.21.2" }
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::artifact::Artifact;
use crate::compiler::GENERATED_ROOT;
use crate::error::{PipelineError, Result};
use crate::pipeline::STATE_FILE;
use crate::target::{RuntimeDependency, Target};
use crate::version::ArtifactVersion;

/// Main configuration for the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name and version stamped into manifests
    #[serde(default)]
    pub artifact: ArtifactConfig,

    /// Where the schema files live
    #[serde(default)]
    pub sources: SourcesConfig,

    /// External schema compiler
    #[serde(default)]
    pub compiler: CompilerConfig,

    /// Build output locations
    #[serde(default)]
    pub output: OutputConfig,

    /// Scheduling and target selection
    #[serde(default)]
    pub pipeline: SchedulingConfig,

    /// Per-target overrides
    #[serde(default)]
    pub targets: TargetsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_artifact_name")]
    pub name: String,

    /// Kept as text so env overrides like `1.0.0` are not coerced to numbers
    #[serde(default = "default_artifact_version")]
    pub version: String,

    /// Maven groupId for the Kotlin package
    #[serde(default = "default_group")]
    pub group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Root of the schema tree; also the compiler's primary include path
    #[serde(default = "default_sources_root")]
    pub root: PathBuf,

    /// File extensions treated as schema sources
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Additional include paths passed to the compiler
    #[serde(default)]
    pub include: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Compiler executable (looked up on PATH when not absolute)
    #[serde(default = "default_program")]
    pub program: String,

    /// Upper bound for one compiler invocation
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra arguments inserted before the source files
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Maximum number of staging tasks running at once
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Targets requested by `assemble`
    #[serde(default = "default_targets")]
    pub targets: Vec<Target>,
}

/// Overrides for each target
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetsConfig {
    #[serde(default)]
    pub kotlin: TargetConfig,
    #[serde(default)]
    pub python: TargetConfig,
    #[serde(default)]
    pub js: TargetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Whether the compiler is asked for this target. A staged target with
    /// generation disabled reports a missing generated tree.
    #[serde(default = "default_true")]
    pub generate: bool,

    /// Staging directory, relative to the build directory unless absolute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,

    /// Runtime library declared by the manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_dependency: Option<RuntimeDependency>,
}

// Default value functions
fn default_artifact_name() -> String {
    "shared-proto".to_string()
}

fn default_artifact_version() -> String {
    "0.1.0".to_string()
}

fn default_group() -> String {
    "com.example".to_string()
}

fn default_sources_root() -> PathBuf {
    PathBuf::from("src/main/proto")
}

fn default_extensions() -> Vec<String> {
    vec!["proto".to_string()]
}

fn default_program() -> String {
    "protoc".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_workers() -> usize {
    4
}

fn default_targets() -> Vec<Target> {
    Target::ALL.to_vec()
}

fn default_true() -> bool {
    true
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            name: default_artifact_name(),
            version: default_artifact_version(),
            group: default_group(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            root: default_sources_root(),
            extensions: default_extensions(),
            include: Vec::new(),
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            timeout_secs: default_timeout_secs(),
            extra_args: Vec::new(),
        }
    }
}

impl CompilerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            build_dir: default_build_dir(),
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            targets: default_targets(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            generate: true,
            staging_dir: None,
            runtime_dependency: None,
        }
    }
}

impl TargetsConfig {
    pub fn get(&self, target: Target) -> &TargetConfig {
        match target {
            Target::Kotlin => &self.kotlin,
            Target::Python => &self.python,
            Target::Js => &self.js,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["proto-pack.toml", ".proto-pack.toml", "config/proto-pack.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "proto-pack") {
            let xdg_config = config_dir.config_dir().join("proto-pack.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (PROTO_PACK__*)
        builder = builder.add_source(
            Environment::with_prefix("PROTO_PACK")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("pipeline.targets")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validated artifact identity
    pub fn artifact(&self) -> Result<Artifact> {
        let version = ArtifactVersion::parse(&self.artifact.version)?;
        Artifact::new(self.artifact.name.clone(), version, self.artifact.group.clone())
    }

    /// Check everything that can be checked without touching the filesystem
    pub fn validate(&self) -> Result<()> {
        self.artifact()?;
        self.check_layout(Path::new(""))
    }

    /// Where `target` is staged, given the resolved build directory
    pub fn staging_dir(&self, build_dir: &Path, target: Target) -> PathBuf {
        match &self.targets.get(target).staging_dir {
            Some(dir) => resolve(build_dir, dir),
            None => build_dir.join(target.default_staging_dir()),
        }
    }

    /// Every staging directory is wiped before use, so none may share a path
    /// with another target, the build directory, the generated sources, the
    /// state file or the schema sources.
    pub fn check_layout(&self, base_dir: &Path) -> Result<()> {
        let build_dir = normalize(&resolve(base_dir, &self.output.build_dir));
        let sources = normalize(&resolve(base_dir, &self.sources.root));
        let generated = match Path::new(GENERATED_ROOT).components().next() {
            Some(first) => build_dir.join(first),
            None => build_dir.clone(),
        };
        let state = build_dir.join(STATE_FILE);

        let staging: Vec<(Target, PathBuf)> = Target::ALL
            .iter()
            .map(|&t| (t, normalize(&self.staging_dir(&build_dir, t))))
            .collect();

        for (i, (target, dir)) in staging.iter().enumerate() {
            if build_dir.starts_with(dir) {
                return Err(layout_error(*target, dir, "contains the build directory"));
            }
            if overlaps(dir, &generated) {
                return Err(layout_error(*target, dir, "overlaps the generated sources"));
            }
            if state.starts_with(dir) {
                return Err(layout_error(*target, dir, "contains the build state file"));
            }
            if overlaps(dir, &sources) {
                return Err(layout_error(*target, dir, "overlaps the schema sources"));
            }
            if let Some((other, _)) = staging[i + 1..].iter().find(|(_, o)| overlaps(dir, o)) {
                return Err(layout_error(
                    *target,
                    dir,
                    &format!("overlaps the staging directory of {}", other),
                ));
            }
        }
        Ok(())
    }

    /// Requested targets, deduplicated, in declaration order
    pub fn requested_targets(&self) -> Vec<Target> {
        let mut seen = Vec::new();
        for target in &self.pipeline.targets {
            if !seen.contains(target) {
                seen.push(*target);
            }
        }
        seen
    }

    /// Staging workers, never zero
    pub fn workers(&self) -> usize {
        self.pipeline.workers.max(1)
    }

    pub fn runtime_dependency(&self, target: Target) -> RuntimeDependency {
        self.targets
            .get(target)
            .runtime_dependency
            .clone()
            .unwrap_or_else(|| target.default_runtime_dependency())
    }
}

fn layout_error(target: Target, dir: &Path, problem: &str) -> PipelineError {
    PipelineError::InvalidLayout(format!(
        "staging directory {} of {} {}",
        dir.display(),
        target,
        problem
    ))
}

/// Equal, or one inside the other
fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Lexically drop `.` and fold `..` so `build/x/../y` compares as `build/y`
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve `path` against `base` unless it is already absolute
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
