//! Target Stager
//!
//! Turns one target's generated tree into a self-contained package directory:
//!
//! ```text
//! build/python-package/
//! ├── pyproject.toml
//! └── src/
//!     ├── __init__.py
//!     └── com/example/{__init__.py, order_pb2.py}
//! ```
//!
//! Every staging starts from an empty directory. A stage that fails or is
//! cancelled part way removes what it wrote.

pub mod manifest;

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::artifact::Artifact;
use crate::cancel::CancellationToken;
use crate::compiler::remove_dir_if_exists;
use crate::error::{PipelineError, Result};
use crate::target::Target;

pub use manifest::{ManifestTemplate, JS_ENTRY_POINT};

/// Subdirectory of a staged package holding the copied sources
pub const SRC_DIR: &str = "src";

/// A finished staged package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedPackage {
    pub target: Target,
    pub dir: PathBuf,
    pub manifest: PathBuf,
    /// Files copied from the generated tree
    pub files_copied: usize,
    /// Namespace markers this run created (existing ones are left alone)
    pub markers_created: usize,
}

/// Non-fatal staging conditions surfaced in the run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageWarning {
    /// The compiler produced nothing for a target that was asked to be staged
    MissingGeneratedTree { target: Target, expected: PathBuf },
}

impl std::fmt::Display for StageWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageWarning::MissingGeneratedTree { target, expected } => write!(
                f,
                "no generated sources for {} at {}",
                target,
                expected.display()
            ),
        }
    }
}

/// What one staging attempt produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staging {
    Staged(StagedPackage),
    Skipped(StageWarning),
}

/// Stages one target. Instances share nothing, so different targets can be
/// staged concurrently.
#[derive(Debug, Clone)]
pub struct TargetStager {
    target: Target,
    staging_dir: PathBuf,
    template: ManifestTemplate,
}

impl TargetStager {
    pub fn new(target: Target, staging_dir: impl Into<PathBuf>, template: ManifestTemplate) -> Self {
        Self {
            target,
            staging_dir: staging_dir.into(),
            template,
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn template(&self) -> &ManifestTemplate {
        &self.template
    }

    /// Stage `generated` (the target's generated tree, if the compiler produced one).
    ///
    /// A missing tree is a warning, not an error: nothing is staged, and a
    /// package left over from an earlier run is removed so it cannot be
    /// mistaken for current output.
    pub fn stage(
        &self,
        generated: Option<&Path>,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<Staging> {
        let tree = match generated.filter(|p| p.is_dir()) {
            Some(tree) => tree,
            None => {
                let expected = generated.map(Path::to_path_buf).unwrap_or_default();
                return self.skip_missing(expected).map(Staging::Skipped);
            }
        };

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        match self.stage_tree(tree, artifact, cancel) {
            Ok(package) => {
                tracing::info!(
                    target = %self.target,
                    dir = %package.dir.display(),
                    files = package.files_copied,
                    markers = package.markers_created,
                    "Staged package"
                );
                Ok(Staging::Staged(package))
            }
            Err(err) => {
                if let Err(cleanup) = remove_dir_if_exists(&self.staging_dir) {
                    tracing::warn!(
                        target = %self.target,
                        error = %cleanup,
                        "Failed to remove partial staging directory"
                    );
                }
                Err(err)
            }
        }
    }

    /// Record that there is nothing to stage and drop any package left from an earlier run
    pub fn skip_missing(&self, expected: impl Into<PathBuf>) -> Result<StageWarning> {
        let expected = expected.into();
        tracing::warn!(
            target = %self.target,
            expected = %expected.display(),
            "Missing generated tree, skipping staging"
        );
        remove_dir_if_exists(&self.staging_dir)
            .map_err(|e| PipelineError::staging(self.target, &self.staging_dir, e))?;
        Ok(StageWarning::MissingGeneratedTree {
            target: self.target,
            expected,
        })
    }

    fn stage_tree(&self, tree: &Path, artifact: &Artifact, cancel: &CancellationToken) -> Result<StagedPackage> {
        let dir = &self.staging_dir;

        // clean slate
        remove_dir_if_exists(dir).map_err(|e| self.io_error(dir, e))?;
        fs::create_dir_all(dir).map_err(|e| self.io_error(dir, e))?;

        // copy
        let src = dir.join(SRC_DIR);
        let files_copied = self.copy_tree(tree, &src, cancel)?;

        // namespace markers
        let markers_created = match self.target.namespace_marker() {
            Some(marker) => self.create_markers(&src, marker, cancel)?,
            None => 0,
        };

        if self.target == Target::Js {
            self.write_js_entry_point(&src)?;
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        // manifest
        let manifest_path = dir.join(self.target.manifest_file());
        let manifest = self.template.render(artifact, &src).map_err(|e| match e {
            PipelineError::Io(io) => self.io_error(&src, io),
            other => other,
        })?;
        fs::write(&manifest_path, manifest).map_err(|e| self.io_error(&manifest_path, e))?;

        Ok(StagedPackage {
            target: self.target,
            dir: dir.clone(),
            manifest: manifest_path,
            files_copied,
            markers_created,
        })
    }

    /// Recursive copy preserving relative paths. Symlinks are followed so the
    /// staged package never points outside itself.
    fn copy_tree(&self, from: &Path, to: &Path, cancel: &CancellationToken) -> Result<usize> {
        fs::create_dir_all(to).map_err(|e| self.io_error(to, e))?;
        let mut copied = 0;
        for entry in WalkDir::new(from).min_depth(1).follow_links(true).sort_by_file_name() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let entry = entry.map_err(|e| self.walk_error(from, e))?;
            let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
            let dest = to.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest).map_err(|e| self.io_error(&dest, e))?;
            } else {
                fs::copy(entry.path(), &dest).map_err(|e| self.io_error(&dest, e))?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    /// Create `marker` in `src` and every directory below it, depth first.
    /// Existing markers are never overwritten.
    fn create_markers(&self, src: &Path, marker: &str, cancel: &CancellationToken) -> Result<usize> {
        let mut dirs = Vec::new();
        for entry in WalkDir::new(src).sort_by_file_name() {
            let entry = entry.map_err(|e| self.walk_error(src, e))?;
            if entry.file_type().is_dir() {
                dirs.push(entry.into_path());
            }
        }

        let mut created = 0;
        for dir in dirs {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let path = dir.join(marker);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => created += 1,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(self.io_error(&path, e)),
            }
        }
        Ok(created)
    }

    /// `package.json` points at `src/index.js`; when the compiler did not emit
    /// one, write an entry point re-exporting every generated module.
    fn write_js_entry_point(&self, src: &Path) -> Result<()> {
        let index = src.join("index.js");
        if index.exists() {
            return Ok(());
        }

        let mut modules = Vec::new();
        for entry in WalkDir::new(src).sort_by_file_name() {
            let entry = entry.map_err(|e| self.walk_error(src, e))?;
            if !entry.file_type().is_file() || !entry.file_name().to_string_lossy().ends_with("_pb.js") {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(src) else {
                continue;
            };
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            modules.push(format!("  require('./{}')", rel.replace('\'', "\\'")));
        }

        let body = if modules.is_empty() {
            "module.exports = {};\n".to_string()
        } else {
            format!("module.exports = Object.assign(\n  {{}},\n{}\n);\n", modules.join(",\n"))
        };
        fs::write(&index, body).map_err(|e| self.io_error(&index, e))
    }

    /// Walk failures are reported at the entry that failed when walkdir knows it
    fn walk_error(&self, root: &Path, err: walkdir::Error) -> PipelineError {
        let path = err.path().unwrap_or(root).to_path_buf();
        self.io_error(&path, io::Error::from(err))
    }

    fn io_error(&self, path: &Path, source: io::Error) -> PipelineError {
        PipelineError::staging(self.target, path, source)
    }
}
