//! Schema Source Set
//!
//! The ordered, read-only set of schema files a run compiles. Its content
//! checksum is the staleness signal for the generation task.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::checksum::Checksum;
use crate::error::{PipelineError, Result};

/// Ordered set of schema files under a common root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSourceSet {
    root: PathBuf,
    /// Absolute paths, sorted and deduplicated
    files: Vec<PathBuf>,
}

impl SchemaSourceSet {
    /// Collect every file under `root` whose extension is in `extensions`.
    ///
    /// Hidden directories (`.git`, `.idea`, ...) are not descended into.
    pub fn discover(root: impl AsRef<Path>, extensions: &[String]) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut files = BTreeSet::new();

        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));
        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let matches = entry
                .path()
                .extension()
                .map(|ext| extensions.iter().any(|e| ext == e.trim_start_matches('.')))
                .unwrap_or(false);
            if matches {
                files.insert(entry.into_path());
            }
        }

        if files.is_empty() {
            return Err(PipelineError::EmptySourceSet {
                root,
                extensions: extensions.to_vec(),
            });
        }

        tracing::debug!(root = %root.display(), count = files.len(), "Discovered schema sources");
        Ok(Self {
            root,
            files: files.into_iter().collect(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Always false for a constructed set; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths relative to the root, as the compiler expects them
    pub fn relative_paths(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .map(|f| f.strip_prefix(&self.root).unwrap_or(f).to_path_buf())
            .collect()
    }

    /// Content checksum of every file, keyed by relative path
    pub fn checksum(&self) -> io::Result<Checksum> {
        Checksum::of_files(&self.root, &self.files)
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}
