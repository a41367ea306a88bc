//! Manifest synthesis
//!
//! Renders the package descriptor each ecosystem's packaging tool reads:
//! `pyproject.toml` (hatchling), `package.json` (npm) and `pom.xml` (Maven).
//! TOML and JSON go through their serializers so the output always parses.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::artifact::Artifact;
use crate::checksum::Checksum;
use crate::error::{PipelineError, Result};
use crate::target::{RuntimeDependency, Target};

/// Entry point declared by `package.json`, relative to the staged package
pub const JS_ENTRY_POINT: &str = "src/index.js";

/// Bumped whenever rendered output changes shape, so staged packages are rebuilt
const TEMPLATE_REVISION: &str = "2";

const KOTLIN_PLUGIN_VERSION: &str = "1.9.24";

/// Marker at the root of a staged `src/`; never shipped as a top-level module
const ROOT_MARKER: &str = "src/__init__.py";

/// Manifest template for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTemplate {
    pub target: Target,
    pub runtime_dependency: RuntimeDependency,
}

impl ManifestTemplate {
    pub fn new(target: Target, runtime_dependency: RuntimeDependency) -> Self {
        Self {
            target,
            runtime_dependency,
        }
    }

    /// Template with the target's default runtime dependency
    pub fn for_target(target: Target) -> Self {
        Self::new(target, target.default_runtime_dependency())
    }

    /// Identifies everything besides the artifact that shapes the rendered manifest
    pub fn fingerprint(&self) -> Checksum {
        Checksum::from_parts([
            TEMPLATE_REVISION,
            self.target.name(),
            self.runtime_dependency.name.as_str(),
            self.runtime_dependency.requirement.as_str(),
        ])
    }

    /// Render the manifest for a staged package whose sources live in `src_dir`
    pub fn render(&self, artifact: &Artifact, src_dir: &Path) -> Result<String> {
        match self.target {
            Target::Python => self.render_pyproject(artifact, src_dir),
            Target::Js => self.render_package_json(artifact),
            Target::Kotlin => self.render_pom(artifact),
        }
    }

    fn render_pyproject(&self, artifact: &Artifact, src_dir: &Path) -> Result<String> {
        let layout = PythonLayout::scan(src_dir)?;
        let wheel = if layout.top_level_modules || layout.packages.is_empty() {
            Wheel {
                packages: Vec::new(),
                only_include: vec!["src".to_string()],
                sources: vec!["src".to_string()],
                exclude: vec![ROOT_MARKER.to_string()],
            }
        } else {
            Wheel {
                packages: layout.packages.iter().map(|p| format!("src/{}", p)).collect(),
                only_include: Vec::new(),
                sources: Vec::new(),
                exclude: Vec::new(),
            }
        };

        let manifest = PyProject {
            project: PyProjectMeta {
                name: artifact.name.clone(),
                version: artifact.version.version_string(),
                dependencies: vec![format!(
                    "{}{}",
                    self.runtime_dependency.name, self.runtime_dependency.requirement
                )],
            },
            build_system: BuildSystem {
                requires: vec!["hatchling".to_string()],
                build_backend: "hatchling.build".to_string(),
            },
            tool: Tool {
                hatch: Hatch {
                    build: HatchBuild {
                        targets: HatchTargets { wheel },
                    },
                },
            },
        };
        Ok(toml::to_string_pretty(&manifest)?)
    }

    fn render_package_json(&self, artifact: &Artifact) -> Result<String> {
        let mut dependencies = BTreeMap::new();
        dependencies.insert(
            self.runtime_dependency.name.clone(),
            self.runtime_dependency.requirement.clone(),
        );
        let manifest = PackageJson {
            name: artifact.name.clone(),
            version: artifact.version.version_string(),
            main: JS_ENTRY_POINT.to_string(),
            files: vec!["src".to_string()],
            dependencies,
        };
        let mut rendered = serde_json::to_string_pretty(&manifest)?;
        rendered.push('\n');
        Ok(rendered)
    }

    fn render_pom(&self, artifact: &Artifact) -> Result<String> {
        let (dep_group, dep_artifact) = self
            .runtime_dependency
            .name
            .split_once(':')
            .filter(|(g, a)| !g.is_empty() && !a.is_empty())
            .ok_or_else(|| {
                PipelineError::InvalidArtifactName(format!(
                    "runtime dependency '{}' must be groupId:artifactId",
                    self.runtime_dependency.name
                ))
            })?;

        Ok(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xsi:schemaLocation="http://maven.apache.org/POM/4.0.0 https://maven.apache.org/xsd/maven-4.0.0.xsd">
  <modelVersion>4.0.0</modelVersion>
  <groupId>{group}</groupId>
  <artifactId>{name}</artifactId>
  <version>{version}</version>
  <packaging>jar</packaging>
  <dependencies>
    <dependency>
      <groupId>{dep_group}</groupId>
      <artifactId>{dep_artifact}</artifactId>
      <version>{dep_version}</version>
    </dependency>
  </dependencies>
  <build>
    <sourceDirectory>src</sourceDirectory>
    <plugins>
      <plugin>
        <groupId>org.jetbrains.kotlin</groupId>
        <artifactId>kotlin-maven-plugin</artifactId>
        <version>{kotlin}</version>
        <executions>
          <execution>
            <id>compile</id>
            <goals>
              <goal>compile</goal>
            </goals>
            <configuration>
              <sourceDirs>
                <sourceDir>src</sourceDir>
              </sourceDirs>
            </configuration>
          </execution>
        </executions>
      </plugin>
    </plugins>
  </build>
</project>
"#,
            group = xml_escape(&artifact.group),
            name = xml_escape(&artifact.name),
            version = xml_escape(&artifact.version.version_string()),
            dep_group = xml_escape(dep_group),
            dep_artifact = xml_escape(dep_artifact),
            dep_version = xml_escape(&self.runtime_dependency.requirement),
            kotlin = KOTLIN_PLUGIN_VERSION,
        ))
    }
}

/// Top-level shape of a staged Python `src/` directory
#[derive(Debug, Default)]
struct PythonLayout {
    /// Top-level package directories, sorted
    packages: Vec<String>,
    /// Whether `src/` also holds modules outside any package
    top_level_modules: bool,
}

impl PythonLayout {
    fn scan(src_dir: &Path) -> Result<Self> {
        let mut layout = PythonLayout::default();
        for entry in fs::read_dir(src_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() {
                layout.packages.push(name);
            } else if name.ends_with(".py") && name != "__init__.py" {
                layout.top_level_modules = true;
            }
        }
        layout.packages.sort();
        Ok(layout)
    }
}

#[derive(Serialize)]
struct PyProject {
    project: PyProjectMeta,
    #[serde(rename = "build-system")]
    build_system: BuildSystem,
    tool: Tool,
}

#[derive(Serialize)]
struct PyProjectMeta {
    name: String,
    version: String,
    dependencies: Vec<String>,
}

#[derive(Serialize)]
struct BuildSystem {
    requires: Vec<String>,
    #[serde(rename = "build-backend")]
    build_backend: String,
}

#[derive(Serialize)]
struct Tool {
    hatch: Hatch,
}

#[derive(Serialize)]
struct Hatch {
    build: HatchBuild,
}

#[derive(Serialize)]
struct HatchBuild {
    targets: HatchTargets,
}

#[derive(Serialize)]
struct HatchTargets {
    wheel: Wheel,
}

#[derive(Serialize)]
struct Wheel {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    packages: Vec<String>,
    #[serde(rename = "only-include", skip_serializing_if = "Vec::is_empty")]
    only_include: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sources: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    exclude: Vec<String>,
}

#[derive(Serialize)]
struct PackageJson {
    name: String,
    version: String,
    main: String,
    files: Vec<String>,
    dependencies: BTreeMap<String, String>,
}

fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
