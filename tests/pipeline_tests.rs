//! End-to-end pipeline runs against a fake schema compiler

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use common::{Behavior, FakeCompiler, Project};
use proto_pack::pipeline::STATE_FILE;
use proto_pack::{
    CancellationToken, GenerationOutcome, Pipeline, PipelineConfig, PipelineError, RunContext, RunStatus,
    StageOutcome, StageWarning, Target,
};

fn pipeline(project: &Project, config: PipelineConfig, compiler: Arc<FakeCompiler>) -> Pipeline {
    let ctx = RunContext::with_compiler(config, project.root(), compiler).unwrap();
    Pipeline::new(ctx)
}

// =============================================================================
// Assemble
// =============================================================================

#[tokio::test]
async fn test_assemble_stages_python_and_js() {
    let project = Project::new();
    let compiler = FakeCompiler::new(Behavior::Emit);
    let pipeline = pipeline(&project, project.config(&[Target::Python, Target::Js]), compiler.clone());

    let report = pipeline.assemble(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded, "{}", report);
    assert_eq!(compiler.calls(), 1);
    assert!(matches!(report.generation, GenerationOutcome::Succeeded { .. }));

    let python = project.build("python-package");
    assert!(python.join("src/order_pb2.py").is_file());
    assert!(python.join("src/__init__.py").is_file());
    let pyproject = fs::read_to_string(python.join("pyproject.toml")).unwrap();
    assert!(pyproject.contains("name = \"shared-proto\""));
    assert!(pyproject.contains("hatchling"));
    let parsed: toml::Value = toml::from_str(&pyproject).unwrap();
    let wheel = &parsed["tool"]["hatch"]["build"]["targets"]["wheel"];
    assert_eq!(wheel["exclude"][0].as_str(), Some("src/__init__.py"));

    let js = project.build("js-package");
    assert!(js.join("src/order_pb.js").is_file());
    assert!(js.join("src/index.js").is_file());
    let package: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(js.join("package.json")).unwrap()).unwrap();
    assert_eq!(package["name"], "shared-proto");
    assert_eq!(package["main"], "src/index.js");

    assert!(!project.build("kotlin-package").exists());
}

#[tokio::test]
async fn test_assemble_stages_kotlin_with_pom() {
    let project = Project::new();
    let pipeline = pipeline(&project, project.config(&[Target::Kotlin]), FakeCompiler::new(Behavior::Emit));

    let report = pipeline.assemble(&CancellationToken::new()).await.unwrap();

    assert!(report.is_success(), "{}", report);
    let kotlin = project.build("kotlin-package");
    assert!(kotlin.join("src/shop/OrderKt.kt").is_file());
    let pom = fs::read_to_string(kotlin.join("pom.xml")).unwrap();
    assert!(pom.contains("<artifactId>shared-proto</artifactId>"));
    assert!(pom.contains("<groupId>com.example</groupId>"));
}

#[tokio::test]
async fn test_nested_schemas_get_namespace_markers() {
    let project = Project::new();
    project.write_schema("shop/v1/cart.proto", common::ORDER_PROTO);
    let pipeline = pipeline(&project, project.config(&[Target::Python]), FakeCompiler::new(Behavior::Emit));

    pipeline.assemble(&CancellationToken::new()).await.unwrap();

    let src = project.build("python-package/src");
    assert!(src.join("shop/v1/cart_pb2.py").is_file());
    assert!(src.join("shop/__init__.py").is_file());
    assert!(src.join("shop/v1/__init__.py").is_file());
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn test_second_run_does_no_work() {
    let project = Project::new();
    let compiler = FakeCompiler::new(Behavior::Emit);
    let pipeline = pipeline(&project, project.config(&[Target::Python, Target::Js]), compiler.clone());

    pipeline.assemble(&CancellationToken::new()).await.unwrap();
    let state_path = project.build(STATE_FILE);
    let manifest = project.build("python-package/pyproject.toml");
    let state_modified = fs::metadata(&state_path).unwrap().modified().unwrap();
    let manifest_modified = fs::metadata(&manifest).unwrap().modified().unwrap();

    let report = pipeline.assemble(&CancellationToken::new()).await.unwrap();

    assert!(report.is_success());
    assert!(report.all_skipped(), "{}", report);
    assert_eq!(compiler.calls(), 1);
    assert_eq!(fs::metadata(&state_path).unwrap().modified().unwrap(), state_modified);
    assert_eq!(fs::metadata(&manifest).unwrap().modified().unwrap(), manifest_modified);
}

#[tokio::test]
async fn test_schema_change_regenerates() {
    let project = Project::new();
    let compiler = FakeCompiler::new(Behavior::Emit);
    let pipeline = pipeline(&project, project.config(&[Target::Python]), compiler.clone());

    pipeline.assemble(&CancellationToken::new()).await.unwrap();
    project.write_schema("refund.proto", common::ORDER_PROTO);
    let report = pipeline.assemble(&CancellationToken::new()).await.unwrap();

    assert_eq!(compiler.calls(), 2);
    assert!(matches!(report.generation, GenerationOutcome::Succeeded { .. }));
    assert!(matches!(report.outcome(Target::Python), Some(StageOutcome::Succeeded { .. })));
    assert!(project.build("python-package/src/refund_pb2.py").is_file());
}

#[tokio::test]
async fn test_stale_files_are_removed_on_restage() {
    let project = Project::new();
    let compiler = FakeCompiler::new(Behavior::Emit);
    let pipeline = pipeline(&project, project.config(&[Target::Python]), compiler.clone());

    pipeline.assemble(&CancellationToken::new()).await.unwrap();
    let stale = project.build("python-package/src/removed_pb2.py");
    fs::write(&stale, "# left over").unwrap();

    let report = pipeline.assemble(&CancellationToken::new()).await.unwrap();

    assert_eq!(compiler.calls(), 1);
    assert!(matches!(report.outcome(Target::Python), Some(StageOutcome::Succeeded { .. })));
    assert!(!stale.exists());
    assert!(project.build("python-package/src/order_pb2.py").is_file());
}

// =============================================================================
// Failures and warnings
// =============================================================================

#[tokio::test]
async fn test_staging_failure_is_isolated() {
    let project = Project::new();
    let mut config = project.config(&[Target::Python, Target::Js]);
    config.targets.python.staging_dir = Some("blocker/python-package".into());
    fs::create_dir_all(project.build("")).unwrap();
    fs::write(project.build("blocker"), "not a directory").unwrap();
    let pipeline = pipeline(&project, config, FakeCompiler::new(Behavior::Emit));

    let report = pipeline.assemble(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(matches!(report.outcome(Target::Python), Some(StageOutcome::Failed { .. })));
    assert!(matches!(report.outcome(Target::Js), Some(StageOutcome::Succeeded { .. })));
    assert!(project.build("js-package/package.json").is_file());
}

#[tokio::test]
async fn test_missing_tree_is_a_warning() {
    let project = Project::new();
    let mut config = project.config(&[Target::Python, Target::Js]);
    config.targets.js.generate = false;
    fs::create_dir_all(project.build("js-package/src")).unwrap();
    let pipeline = pipeline(&project, config, FakeCompiler::new(Behavior::Emit));

    let report = pipeline.assemble(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded, "{}", report);
    match report.outcome(Target::Js) {
        Some(StageOutcome::Warning {
            warning: StageWarning::MissingGeneratedTree { target, .. },
        }) => assert_eq!(*target, Target::Js),
        other => panic!("expected a missing tree warning, got {:?}", other),
    }
    assert!(!project.build("js-package").exists());
    assert!(project.build("python-package/pyproject.toml").is_file());
}

#[tokio::test]
async fn test_invalid_schema_cancels_staging() {
    let project = Project::new();
    let pipeline = pipeline(&project, project.config(&[Target::Python, Target::Js]), FakeCompiler::new(Behavior::Reject));

    let report = pipeline.assemble(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    match &report.generation {
        GenerationOutcome::Failed { error } => assert!(error.contains("Invalid schema")),
        other => panic!("expected failed generation, got {:?}", other),
    }
    assert!(report.targets.values().all(|o| matches!(o, StageOutcome::Cancelled)));
    assert!(!project.build("python-package").exists());
    assert!(!project.build("generated/source/proto/main/python").exists());
}

#[tokio::test]
async fn test_compiler_timeout() {
    let project = Project::new();
    let mut config = project.config(&[Target::Python]);
    config.compiler.timeout_secs = 1;
    let pipeline = pipeline(&project, config, FakeCompiler::new(Behavior::Hang));

    let report = pipeline.assemble(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    match &report.generation {
        GenerationOutcome::Failed { error } => assert!(error.contains("time bound")),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(matches!(report.outcome(Target::Python), Some(StageOutcome::Cancelled)));
}

#[tokio::test]
async fn test_empty_source_set_fails_generation() {
    let project = Project::new();
    fs::remove_file(project.root().join("src/main/proto/order.proto")).unwrap();
    let compiler = FakeCompiler::new(Behavior::Emit);
    let pipeline = pipeline(&project, project.config(&[Target::Python]), compiler.clone());

    let report = pipeline.assemble(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(compiler.calls(), 0);
}

#[tokio::test]
async fn test_cancellation_leaves_run_incomplete() {
    let project = Project::new();
    let pipeline = pipeline(&project, project.config(&[Target::Python, Target::Js]), FakeCompiler::new(Behavior::Hang));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let report = pipeline.assemble(&cancel).await.unwrap();

    assert_eq!(report.status, RunStatus::Incomplete);
    assert_eq!(report.generation, GenerationOutcome::Cancelled);
    assert!(report.targets.values().all(|o| matches!(o, StageOutcome::Cancelled)));
    assert!(!project.build("generated/source/proto/main/python").exists());
}

#[tokio::test]
async fn test_cancelled_run_does_not_poison_the_next() {
    let project = Project::new();
    let compiler = FakeCompiler::new(Behavior::Emit);
    let pipeline = pipeline(&project, project.config(&[Target::Python]), compiler.clone());
    let cancelled = CancellationToken::new();
    cancelled.cancel();

    let first = pipeline.assemble(&cancelled).await.unwrap();
    assert_eq!(first.status, RunStatus::Incomplete);
    assert_eq!(compiler.calls(), 0);

    let second = pipeline.assemble(&CancellationToken::new()).await.unwrap();
    assert!(second.is_success(), "{}", second);
    assert_eq!(compiler.calls(), 1);
    assert!(project.build("python-package/pyproject.toml").is_file());
}

#[test]
fn test_overlapping_staging_dirs_are_rejected_up_front() {
    let project = Project::new();

    let mut shared = project.config(&[Target::Python, Target::Js]);
    shared.targets.python.staging_dir = Some("pkg".into());
    shared.targets.js.staging_dir = Some("pkg".into());
    let err = RunContext::with_compiler(shared, project.root(), FakeCompiler::new(Behavior::Emit)).err();
    assert!(matches!(err, Some(PipelineError::InvalidLayout(_))));

    let mut generated = project.config(&[Target::Python]);
    generated.targets.python.staging_dir = Some("generated".into());
    let err = RunContext::with_compiler(generated, project.root(), FakeCompiler::new(Behavior::Emit)).err();
    assert!(matches!(err, Some(PipelineError::InvalidLayout(_))));
}

// =============================================================================
// Entry points
// =============================================================================

#[tokio::test]
async fn test_generate_only() {
    let project = Project::new();
    let pipeline = pipeline(&project, project.config(&[Target::Python, Target::Js]), FakeCompiler::new(Behavior::Emit));

    let report = pipeline.generate(&CancellationToken::new()).await.unwrap();

    assert!(report.is_success());
    assert!(report.targets.is_empty());
    assert!(project.build("generated/source/proto/main/python/order_pb2.py").is_file());
    assert!(project.build("generated/source/proto/main/js/order_pb.js").is_file());
    assert!(!project.build("python-package").exists());
}

#[tokio::test]
async fn test_stage_single_target_reuses_generation() {
    let project = Project::new();
    let compiler = FakeCompiler::new(Behavior::Emit);
    let pipeline = pipeline(&project, project.config(&[Target::Python, Target::Js]), compiler.clone());

    pipeline.generate(&CancellationToken::new()).await.unwrap();
    let report = pipeline.stage(Target::Js, &CancellationToken::new()).await.unwrap();

    assert!(report.is_success(), "{}", report);
    assert_eq!(compiler.calls(), 1);
    assert!(matches!(report.generation, GenerationOutcome::Skipped { .. }));
    assert_eq!(report.targets.keys().copied().collect::<Vec<_>>(), vec![Target::Js]);
    assert!(project.build("js-package/package.json").is_file());
    assert!(!project.build("python-package").exists());
}
