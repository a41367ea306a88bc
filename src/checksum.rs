//! Checksum utilities for staleness detection
//!
//! Every fingerprint the pipeline records (schema sources, generated trees,
//! staged packages, task keys) is a SHA256 digest produced here.

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// SHA256 checksum, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from a string
    pub fn from_str(content: &str) -> Self {
        Self::from_bytes(content.as_bytes())
    }

    /// Compute a checksum over an ordered list of parts.
    ///
    /// Each part is length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
    pub fn from_parts<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let mut hasher = Sha256::new();
        for part in parts {
            let part = part.as_ref();
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Compute checksum over a set of files, keyed by their path relative to `root`.
    ///
    /// The caller controls ordering; the same files in a different order hash differently.
    pub fn of_files(root: &Path, files: &[impl AsRef<Path>]) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        for file in files {
            let file = file.as_ref();
            let relative = file.strip_prefix(root).unwrap_or(file);
            hash_file_entry(&mut hasher, &portable(relative), &fs::read(file)?);
        }
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    /// Compute checksum of a whole directory tree: every directory and file name
    /// plus every file's content, visited in sorted order.
    pub fn of_tree(root: &Path) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            let relative = portable(entry.path().strip_prefix(root).unwrap_or(entry.path()));
            if entry.file_type().is_dir() {
                hasher.update(b"d\0");
                hasher.update(relative.as_bytes());
                hasher.update(b"\0");
            } else {
                hash_file_entry(&mut hasher, &relative, &fs::read(entry.path())?);
            }
        }
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn hash_file_entry(hasher: &mut Sha256, relative: &str, content: &[u8]) {
    hasher.update(b"f\0");
    hasher.update(relative.as_bytes());
    hasher.update(b"\0");
    hasher.update((content.len() as u64).to_le_bytes());
    hasher.update(content);
}

/// Relative path with `/` separators regardless of platform
fn portable(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Checksum {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Checksum {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
