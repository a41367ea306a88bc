//! Run reports
//!
//! Per-target outcomes are collected for the whole run and reported together,
//! so a caller always sees which targets made it even when others failed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::stage::{StageWarning, StagedPackage};
use crate::target::Target;

/// Outcome of the generation task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationOutcome {
    /// Compiler ran; these targets produced a generated tree
    Succeeded { targets: Vec<Target> },
    /// Sources and trees unchanged since the last successful run
    Skipped { targets: Vec<Target> },
    Failed { error: String },
    Cancelled,
}

/// Outcome of one target's staging task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded { package: StagedPackage },
    /// Staged package already matches its inputs
    Skipped { dir: PathBuf },
    Warning { warning: StageWarning },
    Failed { error: String },
    /// Not run: generation failed or the run was cancelled
    Cancelled,
}

impl StageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Succeeded { .. } => "success",
            StageOutcome::Skipped { .. } => "up-to-date",
            StageOutcome::Warning { .. } => "warning",
            StageOutcome::Failed { .. } => "failed",
            StageOutcome::Cancelled => "cancelled",
        }
    }

    /// Success, up-to-date and warnings all count towards a successful run
    pub fn is_acceptable(&self) -> bool {
        matches!(
            self,
            StageOutcome::Succeeded { .. } | StageOutcome::Skipped { .. } | StageOutcome::Warning { .. }
        )
    }

    fn detail(&self) -> String {
        match self {
            StageOutcome::Succeeded { package } => format!(
                "{} ({} files, {} markers)",
                package.dir.display(),
                package.files_copied,
                package.markers_created
            ),
            StageOutcome::Skipped { dir } => dir.display().to_string(),
            StageOutcome::Warning { warning } => warning.to_string(),
            StageOutcome::Failed { error } => error.clone(),
            StageOutcome::Cancelled => "not run".to_string(),
        }
    }
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    /// Cancelled before every task settled
    Incomplete,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Incomplete => "incomplete",
        })
    }
}

/// Everything a single run did
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub generation: GenerationOutcome,
    pub targets: BTreeMap<Target, StageOutcome>,
    pub status: RunStatus,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Utc>,
        generation: GenerationOutcome,
        targets: BTreeMap<Target, StageOutcome>,
    ) -> Self {
        let status = Self::status_of(&generation, &targets);
        Self {
            started_at,
            finished_at: Utc::now(),
            generation,
            targets,
            status,
        }
    }

    /// Failed if anything failed; otherwise incomplete if anything was cancelled
    fn status_of(generation: &GenerationOutcome, targets: &BTreeMap<Target, StageOutcome>) -> RunStatus {
        let failed = matches!(generation, GenerationOutcome::Failed { .. })
            || targets.values().any(|o| matches!(o, StageOutcome::Failed { .. }));
        if failed {
            return RunStatus::Failed;
        }
        let cancelled = matches!(generation, GenerationOutcome::Cancelled)
            || targets.values().any(|o| matches!(o, StageOutcome::Cancelled));
        if cancelled {
            RunStatus::Incomplete
        } else {
            RunStatus::Succeeded
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn outcome(&self, target: Target) -> Option<&StageOutcome> {
        self.targets.get(&target)
    }

    pub fn warnings(&self) -> Vec<&StageWarning> {
        self.targets
            .values()
            .filter_map(|o| match o {
                StageOutcome::Warning { warning } => Some(warning),
                _ => None,
            })
            .collect()
    }

    /// True when no task did any work
    pub fn all_skipped(&self) -> bool {
        matches!(self.generation, GenerationOutcome::Skipped { .. })
            && self
                .targets
                .values()
                .all(|o| matches!(o, StageOutcome::Skipped { .. } | StageOutcome::Warning { .. }))
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let generation = match &self.generation {
            GenerationOutcome::Succeeded { targets } => format!("success ({} trees)", targets.len()),
            GenerationOutcome::Skipped { targets } => format!("up-to-date ({} trees)", targets.len()),
            GenerationOutcome::Failed { error } => format!("failed: {}", error),
            GenerationOutcome::Cancelled => "cancelled".to_string(),
        };
        writeln!(f, "generation: {}", generation)?;

        if !self.targets.is_empty() {
            writeln!(f)?;
            writeln!(f, "{:<8} {:<11} {}", "TARGET", "STATUS", "DETAIL")?;
            for (target, outcome) in &self.targets {
                writeln!(f, "{:<8} {:<11} {}", target.name(), outcome.label(), outcome.detail())?;
            }
        }

        writeln!(f)?;
        write!(f, "run {} in {} ms", self.status, self.duration_ms())
    }
}
