//! Shared fixtures for pipeline tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proto_pack::{Invocation, PipelineConfig, PipelineError, Result, SchemaCompiler, Target};
use tempfile::TempDir;

pub const ORDER_PROTO: &str = r#"syntax = "proto3";

package shop;

message Order {
  string id = 1;
  int64 amount_cents = 2;
}
"#;

/// How the fake compiler behaves when invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Writes one file per source and target, like protoc would
    Emit,
    /// Reports a syntax error
    Reject,
    /// Never finishes
    Hang,
}

/// Stands in for protoc so tests do not need it installed
pub struct FakeCompiler {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl FakeCompiler {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaCompiler for FakeCompiler {
    fn fingerprint(&self) -> String {
        "fake-protoc".to_string()
    }

    async fn compile(&self, invocation: &Invocation) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Reject => {
                return Err(PipelineError::InvalidSchema {
                    diagnostics: "order.proto:5:3: Expected \";\".".to_string(),
                })
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }
            Behavior::Emit => {}
        }

        for relative in invocation.sources.relative_paths() {
            let stem = relative
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("schema")
                .to_string();
            let parent = relative.parent().map(Path::to_path_buf).unwrap_or_default();
            for (target, dir) in &invocation.outputs {
                let file = match target {
                    Target::Python => dir.join(&parent).join(format!("{}_pb2.py", stem)),
                    Target::Js => dir.join(&parent).join(format!("{}_pb.js", stem)),
                    Target::Kotlin => dir.join("shop").join(format!("{}Kt.kt", capitalize(&stem))),
                };
                if let Some(parent) = file.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&file, format!("// generated from {}\n", relative.display()))?;
            }
        }
        Ok(())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A project directory with one schema under the default source root
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let project = Self { dir };
        project.write_schema("order.proto", ORDER_PROTO);
        project
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_schema(&self, relative: &str, content: &str) {
        let path = self.root().join("src/main/proto").join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn build(&self, relative: &str) -> PathBuf {
        self.root().join("build").join(relative)
    }

    /// Default configuration staging the given targets
    pub fn config(&self, targets: &[Target]) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.pipeline.targets = targets.to_vec();
        config.compiler.timeout_secs = 30;
        config
    }
}
