//! Compiler Invoker
//!
//! Wraps the external schema compiler. One invocation per run requests every
//! target's builtins at once, so all generated trees come from the same schema
//! snapshot and the same compiler binary.
//!
//! Layout under the generated-source root:
//!
//! ```text
//! build/generated/source/proto/main/
//! ├── kotlin/   (java + kotlin builtins)
//! ├── python/
//! └── js/
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::cancel::CancellationToken;
use crate::config::CompilerConfig;
use crate::error::{PipelineError, Result};
use crate::source::SchemaSourceSet;
use crate::target::Target;

/// Generated-source root relative to the build directory
pub const GENERATED_ROOT: &str = "generated/source/proto/main";

/// Generated tree per target. Targets the compiler produced nothing for are absent.
pub type GeneratedTrees = BTreeMap<Target, PathBuf>;

/// Everything one compiler invocation needs
#[derive(Debug, Clone)]
pub struct Invocation {
    pub sources: SchemaSourceSet,
    /// Output directory per requested target; each exists and is empty
    pub outputs: BTreeMap<Target, PathBuf>,
}

/// The external schema compiler.
///
/// Implementations write each target's files into `invocation.outputs[target]`
/// and report parse or validation failures as `InvalidSchema`.
#[async_trait]
pub trait SchemaCompiler: Send + Sync {
    /// Stable description of the compiler and its flags, part of the
    /// generation task's staleness key
    fn fingerprint(&self) -> String;

    async fn compile(&self, invocation: &Invocation) -> Result<()>;
}

/// `protoc` driven through its builtin generators
#[derive(Debug, Clone)]
pub struct ProtocCompiler {
    program: String,
    include: Vec<PathBuf>,
    extra_args: Vec<String>,
}

impl ProtocCompiler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            include: Vec::new(),
            extra_args: Vec::new(),
        }
    }

    pub fn from_config(config: &CompilerConfig, include: Vec<PathBuf>) -> Self {
        Self {
            program: config.program.clone(),
            include,
            extra_args: config.extra_args.clone(),
        }
    }

    /// Arguments for one invocation, in the order protoc receives them
    pub fn arguments(&self, invocation: &Invocation) -> Vec<String> {
        let mut args = vec![format!("-I{}", invocation.sources.root().display())];
        args.extend(self.include.iter().map(|p| format!("-I{}", p.display())));

        for (target, out_dir) in &invocation.outputs {
            for builtin in target.builtins() {
                let value = match builtin.option {
                    Some(option) => format!("{}:{}", option, out_dir.display()),
                    None => out_dir.display().to_string(),
                };
                args.push(format!("--{}_out={}", builtin.id, value));
            }
        }

        args.extend(self.extra_args.iter().cloned());
        args.extend(
            invocation
                .sources
                .files()
                .iter()
                .map(|f| f.display().to_string()),
        );
        args
    }
}

#[async_trait]
impl SchemaCompiler for ProtocCompiler {
    fn fingerprint(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.include.iter().map(|p| format!("-I{}", p.display())));
        parts.extend(self.extra_args.iter().cloned());
        parts.join(" ")
    }

    async fn compile(&self, invocation: &Invocation) -> Result<()> {
        let args = self.arguments(invocation);
        tracing::debug!(program = %self.program, ?args, "Invoking schema compiler");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| PipelineError::CompilerLaunch {
                program: self.program.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            let diagnostics = if stderr.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                stderr
            };
            return Err(PipelineError::InvalidSchema { diagnostics });
        }
        if !stderr.is_empty() {
            tracing::warn!(program = %self.program, "{}", stderr);
        }
        Ok(())
    }
}

/// Runs the compiler once for a set of targets and maps its output back to targets
#[derive(Clone)]
pub struct CompilerInvoker {
    compiler: Arc<dyn SchemaCompiler>,
    generated_root: PathBuf,
    timeout: Duration,
}

impl CompilerInvoker {
    pub fn new(compiler: Arc<dyn SchemaCompiler>, generated_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            compiler,
            generated_root: generated_root.into(),
            timeout,
        }
    }

    pub fn generated_root(&self) -> &Path {
        &self.generated_root
    }

    pub fn fingerprint(&self) -> String {
        self.compiler.fingerprint()
    }

    /// Where `target`'s generated tree lives, whether or not it exists yet
    pub fn tree_path(&self, target: Target) -> PathBuf {
        self.generated_root.join(target.generated_subdir())
    }

    /// Compile `sources` for `targets` in a single pass.
    ///
    /// Each target's output directory is cleared first. On any failure every
    /// requested directory is removed again, so no partial tree survives.
    pub async fn invoke(
        &self,
        sources: &SchemaSourceSet,
        targets: &[Target],
        cancel: &CancellationToken,
    ) -> Result<GeneratedTrees> {
        if sources.is_empty() {
            return Err(PipelineError::EmptySourceSet {
                root: sources.root().to_path_buf(),
                extensions: Vec::new(),
            });
        }
        if targets.is_empty() {
            tracing::info!("No targets requested from the compiler");
            return Ok(GeneratedTrees::new());
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut outputs = BTreeMap::new();
        for &target in targets {
            let dir = self.tree_path(target);
            remove_dir_if_exists(&dir)?;
            fs::create_dir_all(&dir)?;
            outputs.insert(target, dir);
        }
        let invocation = Invocation {
            sources: sources.clone(),
            outputs,
        };

        tracing::info!(
            files = sources.len(),
            targets = ?targets,
            "Compiling schema sources"
        );
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, self.compiler.compile(&invocation)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::CompilerTimeout { timeout: self.timeout }),
                }
            }
        };

        if let Err(err) = result {
            for dir in invocation.outputs.values() {
                if let Err(cleanup) = remove_dir_if_exists(dir) {
                    tracing::warn!(path = %dir.display(), error = %cleanup, "Failed to remove partial generated tree");
                }
            }
            return Err(err);
        }

        let mut trees = GeneratedTrees::new();
        for (target, dir) in invocation.outputs {
            if fs::read_dir(&dir)?.next().is_some() {
                trees.insert(target, dir);
            } else {
                tracing::debug!(%target, "Compiler produced no output");
                fs::remove_dir(&dir)?;
            }
        }
        Ok(trees)
    }
}

pub(crate) fn remove_dir_if_exists(dir: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
