//! Proto Pack
//!
//! Compiles one set of protobuf schemas for several languages and stages each
//! language's output as an installable package.
//!
//! ## Features
//!
//! - **Single Compiler Pass**: `protoc` runs once for every target, under a time bound
//! - **Clean-Slate Staging**: every package is rebuilt from an empty directory
//! - **Failure Isolation**: one target failing to stage never affects the others
//! - **Idempotent Runs**: tasks whose inputs and outputs are unchanged are skipped
//!
//! ## Layout
//!
//! ```text
//! build/
//! ├── generated/source/proto/main/
//! │   ├── kotlin/
//! │   ├── python/
//! │   └── js/
//! ├── kotlin-package/{pom.xml, src/}
//! ├── python-package/{pyproject.toml, src/}
//! ├── js-package/{package.json, src/}
//! └── .proto-pack-state.json
//! ```

pub mod artifact;
pub mod cancel;
pub mod checksum;
pub mod compiler;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod source;
pub mod stage;
pub mod target;
pub mod version;

pub use artifact::Artifact;
pub use cancel::CancellationToken;
pub use checksum::Checksum;
pub use compiler::{CompilerInvoker, GeneratedTrees, Invocation, ProtocCompiler, SchemaCompiler};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{GenerationOutcome, Pipeline, RunContext, RunReport, RunStatus, StageOutcome};
pub use source::SchemaSourceSet;
pub use stage::{StageWarning, StagedPackage, Staging, TargetStager};
pub use target::{RuntimeDependency, Target};
pub use version::ArtifactVersion;
