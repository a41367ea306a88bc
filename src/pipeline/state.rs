//! Task fingerprints
//!
//! Remembers, per task, the key its inputs hashed to and the checksum of every
//! output it wrote. A task whose key is unchanged and whose outputs still match
//! is skipped. Only fingerprints are kept; there is no run history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::checksum::Checksum;

/// File name of the fingerprint store inside the build directory
pub const STATE_FILE: &str = ".proto-pack-state.json";

/// One output directory and its checksum when the task last succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub path: PathBuf,
    pub checksum: Checksum,
}

impl OutputRecord {
    pub fn capture(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let checksum = Checksum::of_tree(&path)?;
        Ok(Self { path, checksum })
    }

    /// Whether the directory still exists with the recorded content
    pub fn is_intact(&self) -> bool {
        self.path.is_dir()
            && Checksum::of_tree(&self.path)
                .map(|current| current == self.checksum)
                .unwrap_or(false)
    }
}

/// What a task looked like after its last successful execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Checksum of the task's declared inputs
    pub key: Checksum,
    /// Outputs by label (a target name for generation, `package` for staging)
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputRecord>,
}

impl TaskRecord {
    pub fn new(key: Checksum) -> Self {
        Self {
            key,
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_output(mut self, label: impl Into<String>, output: OutputRecord) -> Self {
        self.outputs.insert(label.into(), output);
        self
    }
}

/// Fingerprints for every task, persisted as JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    #[serde(default)]
    tasks: BTreeMap<String, TaskRecord>,
}

impl BuildState {
    /// Load from `path`. A missing or unreadable file means nothing is up to date.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read build state, rebuilding everything");
                return Self::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Corrupt build state, rebuilding everything");
            Self::default()
        })
    }

    /// Write to `path` through a temporary file so a crash never leaves half a file
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.get(task_id)
    }

    /// The record for `task_id` if its key matches and every output is intact
    pub fn up_to_date(&self, task_id: &str, key: &Checksum) -> Option<&TaskRecord> {
        let record = self.tasks.get(task_id)?;
        if &record.key != key {
            tracing::debug!(task = task_id, "Inputs changed");
            return None;
        }
        if let Some((label, _)) = record.outputs.iter().find(|(_, o)| !o.is_intact()) {
            tracing::debug!(task = task_id, output = %label, "Output missing or modified");
            return None;
        }
        Some(record)
    }

    /// Store a record; returns whether anything changed
    pub fn record(&mut self, task_id: &str, record: TaskRecord) -> bool {
        match self.tasks.get(task_id) {
            Some(existing) if existing == &record => false,
            _ => {
                self.tasks.insert(task_id.to_string(), record);
                true
            }
        }
    }

    /// Drop a record; returns whether one existed
    pub fn forget(&mut self, task_id: &str) -> bool {
        self.tasks.remove(task_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
