//! Pipeline Orchestrator
//!
//! Wires the compiler invoker and the target stagers into a task graph:
//!
//! ```text
//!               ┌──> stage:kotlin
//! generate ─────┼──> stage:python
//!               └──> stage:js
//! ```
//!
//! Generation runs first and alone. Staging tasks only depend on generation
//! and run concurrently. Every task is skipped when its inputs and outputs
//! match the fingerprints from the last successful run.

pub mod graph;
pub mod report;
pub mod state;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::artifact::Artifact;
use crate::cancel::CancellationToken;
use crate::checksum::Checksum;
use crate::compiler::{CompilerInvoker, GeneratedTrees, ProtocCompiler, SchemaCompiler, GENERATED_ROOT};
use crate::config::{resolve, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::source::SchemaSourceSet;
use crate::stage::{ManifestTemplate, Staging, TargetStager};
use crate::target::Target;

pub use graph::{TaskGraph, TaskNode, TaskState};
pub use report::{GenerationOutcome, RunReport, RunStatus, StageOutcome};
pub use state::{BuildState, OutputRecord, TaskRecord, STATE_FILE};

/// Output label of a staging task's record
const PACKAGE_OUTPUT: &str = "package";

/// Everything a run needs, resolved once and passed to every task
pub struct RunContext {
    config: PipelineConfig,
    artifact: Artifact,
    sources_root: PathBuf,
    build_dir: PathBuf,
    compiler: CompilerInvoker,
}

impl RunContext {
    /// Context using `protoc` as configured. Relative paths resolve against `base_dir`.
    pub fn new(config: PipelineConfig, base_dir: &Path) -> Result<Self> {
        let include = config
            .sources
            .include
            .iter()
            .map(|p| resolve(base_dir, p))
            .collect();
        let compiler = ProtocCompiler::from_config(&config.compiler, include);
        Self::with_compiler(config, base_dir, Arc::new(compiler))
    }

    /// Context with a caller-supplied compiler backend
    pub fn with_compiler(
        config: PipelineConfig,
        base_dir: &Path,
        compiler: Arc<dyn SchemaCompiler>,
    ) -> Result<Self> {
        let artifact = config.artifact()?;
        config.check_layout(base_dir)?;
        let sources_root = resolve(base_dir, &config.sources.root);
        let build_dir = resolve(base_dir, &config.output.build_dir);
        let compiler = CompilerInvoker::new(compiler, build_dir.join(GENERATED_ROOT), config.compiler.timeout());
        Ok(Self {
            config,
            artifact,
            sources_root,
            build_dir,
            compiler,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn sources_root(&self) -> &Path {
        &self.sources_root
    }

    pub fn state_path(&self) -> PathBuf {
        self.build_dir.join(STATE_FILE)
    }

    pub fn generated_tree(&self, target: Target) -> PathBuf {
        self.compiler.tree_path(target)
    }

    pub fn staging_dir(&self, target: Target) -> PathBuf {
        self.config.staging_dir(&self.build_dir, target)
    }

    pub fn stager(&self, target: Target) -> TargetStager {
        TargetStager::new(
            target,
            self.staging_dir(target),
            ManifestTemplate::new(target, self.config.runtime_dependency(target)),
        )
    }

    /// Targets the compiler is asked for: everything requested (by config or
    /// by the caller) whose generation is enabled
    fn generation_targets(&self, extra: &[Target]) -> Vec<Target> {
        let mut targets = self.config.requested_targets();
        for target in extra {
            if !targets.contains(target) {
                targets.push(*target);
            }
        }
        targets.retain(|t| self.config.targets.get(*t).generate);
        targets.sort();
        targets
    }

    fn generation_key(&self, sources: &Checksum, targets: &[Target]) -> Checksum {
        let mut parts = vec![
            sources.to_string(),
            self.sources_root.display().to_string(),
            self.compiler.generated_root().display().to_string(),
            self.compiler.fingerprint(),
        ];
        parts.extend(targets.iter().map(|t| t.to_string()));
        Checksum::from_parts(parts)
    }

    fn stage_key(&self, stager: &TargetStager, tree: &Checksum) -> Checksum {
        Checksum::from_parts([
            tree.to_string(),
            self.artifact.name.clone(),
            self.artifact.version.version_string(),
            self.artifact.group.clone(),
            stager.template().fingerprint().to_string(),
            stager.staging_dir().display().to_string(),
        ])
    }
}

/// What a finished task hands to its dependents and to the report
#[derive(Debug)]
enum TaskOutput {
    Generated {
        trees: GeneratedTrees,
        skipped: bool,
        record: TaskRecord,
    },
    Staged {
        outcome: StageOutcome,
        record: Option<TaskRecord>,
    },
}

/// Entry points for a configured pipeline
#[derive(Clone)]
pub struct Pipeline {
    ctx: Arc<RunContext>,
}

impl Pipeline {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Generate and stage every requested target.
    ///
    /// Each run takes its own `cancel` token; a cancelled token only affects
    /// the runs it was passed to.
    pub async fn assemble(&self, cancel: &CancellationToken) -> Result<RunReport> {
        self.run(&self.ctx.config.requested_targets(), cancel).await
    }

    /// Generate only
    pub async fn generate(&self, cancel: &CancellationToken) -> Result<RunReport> {
        self.run(&[], cancel).await
    }

    /// Generate (if stale) and stage a single target
    pub async fn stage(&self, target: Target, cancel: &CancellationToken) -> Result<RunReport> {
        self.run(&[target], cancel).await
    }

    async fn run(&self, stage_targets: &[Target], cancel: &CancellationToken) -> Result<RunReport> {
        let started_at = Utc::now();
        let state_path = self.ctx.state_path();
        let state = Arc::new(BuildState::load(&state_path));
        let graph = TaskGraph::for_targets(stage_targets);
        let generation_targets = self.ctx.generation_targets(stage_targets);

        tracing::info!(
            artifact = %self.ctx.artifact.name,
            version = %self.ctx.artifact.version,
            stage = ?stage_targets,
            "Starting pipeline run"
        );

        let states = graph
            .execute(self.ctx.config.workers(), cancel, |task, inputs| {
                let ctx = Arc::clone(&self.ctx);
                let state = Arc::clone(&state);
                let cancel = cancel.clone();
                let generation_targets = generation_targets.clone();
                async move {
                    match task {
                        TaskNode::Generate => generate_task(ctx, state, cancel, generation_targets).await,
                        TaskNode::Stage(target) => stage_task(ctx, state, cancel, target, inputs).await,
                    }
                }
            })
            .await?;

        let mut next_state = (*state).clone();
        let mut dirty = false;
        let mut generation = GenerationOutcome::Cancelled;
        let mut targets = BTreeMap::new();

        for (task, task_state) in states {
            let id = task.id();
            match (task, task_state) {
                (TaskNode::Generate, TaskState::Done(output)) => {
                    if let TaskOutput::Generated { trees, skipped, record } = output.as_ref() {
                        let produced = trees.keys().copied().collect();
                        generation = if *skipped {
                            GenerationOutcome::Skipped { targets: produced }
                        } else {
                            dirty |= next_state.record(&id, record.clone());
                            GenerationOutcome::Succeeded { targets: produced }
                        };
                    }
                }
                (TaskNode::Generate, TaskState::Failed(err)) => {
                    dirty |= next_state.forget(&id);
                    generation = match err {
                        PipelineError::Cancelled => GenerationOutcome::Cancelled,
                        other => {
                            tracing::error!(error = %other, "Generation failed");
                            GenerationOutcome::Failed { error: other.to_string() }
                        }
                    };
                }
                (TaskNode::Generate, TaskState::Cancelled) => {
                    generation = GenerationOutcome::Cancelled;
                }
                (TaskNode::Stage(target), TaskState::Done(output)) => {
                    if let TaskOutput::Staged { outcome, record } = output.as_ref() {
                        match record {
                            Some(record) => dirty |= next_state.record(&id, record.clone()),
                            None if !matches!(outcome, StageOutcome::Skipped { .. }) => {
                                dirty |= next_state.forget(&id)
                            }
                            None => {}
                        }
                        targets.insert(target, outcome.clone());
                    }
                }
                (TaskNode::Stage(target), TaskState::Failed(err)) => {
                    dirty |= next_state.forget(&id);
                    let outcome = match err {
                        PipelineError::Cancelled => StageOutcome::Cancelled,
                        other => StageOutcome::Failed { error: other.to_string() },
                    };
                    targets.insert(target, outcome);
                }
                (TaskNode::Stage(target), TaskState::Cancelled) => {
                    dirty |= next_state.forget(&id);
                    targets.insert(target, StageOutcome::Cancelled);
                }
            }
        }

        if dirty {
            if let Err(e) = next_state.save(&state_path) {
                tracing::warn!(path = %state_path.display(), error = %e, "Failed to persist build state");
            }
        }

        let report = RunReport::new(started_at, generation, targets);
        tracing::info!(status = %report.status, duration_ms = report.duration_ms(), "Pipeline run finished");
        Ok(report)
    }
}

/// Run blocking filesystem work off the async workers
async fn blocking<T, F>(task: String, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::TaskAborted {
            task,
            reason: e.to_string(),
        })?
}

async fn generate_task(
    ctx: Arc<RunContext>,
    state: Arc<BuildState>,
    cancel: CancellationToken,
    targets: Vec<Target>,
) -> Result<TaskOutput> {
    let id = TaskNode::Generate.id();

    let inputs = {
        let ctx = Arc::clone(&ctx);
        let targets = targets.clone();
        let task = id.clone();
        blocking(id.clone(), move || {
            let sources = SchemaSourceSet::discover(&ctx.sources_root, &ctx.config.sources.extensions)?;
            let key = ctx.generation_key(&sources.checksum()?, &targets);
            let previous = state.up_to_date(&task, &key).cloned();
            Ok((sources, key, previous))
        })
        .await?
    };
    let (sources, key, previous) = inputs;

    if let Some(record) = previous {
        let trees: GeneratedTrees = record
            .outputs
            .iter()
            .filter_map(|(label, output)| label.parse::<Target>().ok().map(|t| (t, output.path.clone())))
            .collect();
        tracing::info!(trees = trees.len(), "Generated sources up to date");
        return Ok(TaskOutput::Generated {
            trees,
            skipped: true,
            record,
        });
    }

    let trees = ctx.compiler.invoke(&sources, &targets, &cancel).await?;

    let captured = trees.clone();
    let record = blocking(id, move || {
        let mut record = TaskRecord::new(key);
        for (target, path) in captured {
            record = record.with_output(target.name(), OutputRecord::capture(path)?);
        }
        Ok(record)
    })
    .await?;

    Ok(TaskOutput::Generated {
        trees,
        skipped: false,
        record,
    })
}

async fn stage_task(
    ctx: Arc<RunContext>,
    state: Arc<BuildState>,
    cancel: CancellationToken,
    target: Target,
    inputs: Vec<Arc<TaskOutput>>,
) -> Result<TaskOutput> {
    let id = TaskNode::Stage(target).id();
    let tree = inputs.iter().find_map(|input| match input.as_ref() {
        TaskOutput::Generated { trees, .. } => trees.get(&target).cloned(),
        TaskOutput::Staged { .. } => None,
    });

    let task = id.clone();
    blocking(id, move || {
        let stager = ctx.stager(target);

        let Some(tree) = tree else {
            let warning = stager.skip_missing(ctx.generated_tree(target))?;
            return Ok(TaskOutput::Staged {
                outcome: StageOutcome::Warning { warning },
                record: None,
            });
        };

        let tree_sum = Checksum::of_tree(&tree).map_err(|e| PipelineError::staging(target, &tree, e))?;
        let key = ctx.stage_key(&stager, &tree_sum);
        if state.up_to_date(&task, &key).is_some() {
            tracing::info!(%target, "Staged package up to date");
            return Ok(TaskOutput::Staged {
                outcome: StageOutcome::Skipped {
                    dir: stager.staging_dir().to_path_buf(),
                },
                record: None,
            });
        }

        match stager.stage(Some(&tree), &ctx.artifact, &cancel)? {
            Staging::Staged(package) => {
                let output = OutputRecord::capture(&package.dir)
                    .map_err(|e| PipelineError::staging(target, &package.dir, e))?;
                Ok(TaskOutput::Staged {
                    outcome: StageOutcome::Succeeded { package },
                    record: Some(TaskRecord::new(key).with_output(PACKAGE_OUTPUT, output)),
                })
            }
            Staging::Skipped(warning) => Ok(TaskOutput::Staged {
                outcome: StageOutcome::Warning { warning },
                record: None,
            }),
        }
    })
    .await
}
