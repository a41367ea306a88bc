//! Output ecosystems and their conventions

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An output ecosystem requested from the schema compiler
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Kotlin bindings (Kotlin DSL over the Java message classes)
    Kotlin,
    /// Python bindings (`*_pb2.py`)
    Python,
    /// CommonJS bindings (`*_pb.js`)
    Js,
}

/// One compiler builtin, e.g. `--js_out=import_style=commonjs,binary:<dir>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    pub id: &'static str,
    pub option: Option<&'static str>,
}

/// A runtime library the staged package declares as a dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    /// Package coordinate in the target ecosystem
    pub name: String,
    /// Version requirement in the ecosystem's own syntax
    pub requirement: String,
}

impl RuntimeDependency {
    pub fn new(name: impl Into<String>, requirement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirement: requirement.into(),
        }
    }
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Kotlin, Target::Python, Target::Js];

    /// Lowercase identifier used in config keys, task names and directories
    pub fn name(&self) -> &'static str {
        match self {
            Target::Kotlin => "kotlin",
            Target::Python => "python",
            Target::Js => "js",
        }
    }

    /// Compiler builtins requested for this target. All of them write into the
    /// same generated tree.
    pub fn builtins(&self) -> &'static [Builtin] {
        match self {
            Target::Kotlin => &[
                Builtin { id: "java", option: None },
                Builtin { id: "kotlin", option: None },
            ],
            Target::Python => &[Builtin { id: "python", option: None }],
            Target::Js => &[Builtin {
                id: "js",
                option: Some("import_style=commonjs,binary"),
            }],
        }
    }

    /// Subdirectory of the generated-source root holding this target's tree
    pub fn generated_subdir(&self) -> &'static str {
        self.name()
    }

    /// Default staging directory name under the build directory
    pub fn default_staging_dir(&self) -> &'static str {
        match self {
            Target::Kotlin => "kotlin-package",
            Target::Python => "python-package",
            Target::Js => "js-package",
        }
    }

    /// File marking a directory as an importable package, if the ecosystem needs one
    pub fn namespace_marker(&self) -> Option<&'static str> {
        match self {
            Target::Python => Some("__init__.py"),
            Target::Kotlin | Target::Js => None,
        }
    }

    /// File name of the synthesized package descriptor
    pub fn manifest_file(&self) -> &'static str {
        match self {
            Target::Kotlin => "pom.xml",
            Target::Python => "pyproject.toml",
            Target::Js => "package.json",
        }
    }

    pub fn default_runtime_dependency(&self) -> RuntimeDependency {
        match self {
            Target::Kotlin => RuntimeDependency::new("com.google.protobuf:protobuf-kotlin", "3.25.3"),
            Target::Python => RuntimeDependency::new("protobuf", ">=4.0.0"),
            Target::Js => RuntimeDependency::new("google-protobuf", "^3.21.2"),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kotlin" => Ok(Target::Kotlin),
            "python" => Ok(Target::Python),
            "js" | "javascript" => Ok(Target::Js),
            other => Err(format!("unknown target '{}' (expected kotlin, python or js)", other)),
        }
    }
}
