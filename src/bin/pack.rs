//! Proto Pack CLI
//!
//! Generates protobuf bindings and stages them as per-language packages.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use proto_pack::{CancellationToken, Pipeline, PipelineConfig, RunContext, RunReport, RunStatus, Target};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proto-pack")]
#[command(about = "Compile protobuf schemas and stage per-language packages")]
struct Cli {
    /// Config file to load (optional)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Directory relative paths in the config resolve against
    #[arg(short, long, global = true, default_value = ".")]
    base_dir: PathBuf,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate and stage every configured target
    Assemble {
        /// Override the configured targets
        #[arg(short, long, value_delimiter = ',')]
        targets: Vec<Target>,
    },

    /// Only run the schema compiler
    Generate,

    /// Generate if stale, then stage a single target
    Stage {
        #[arg(value_enum)]
        target: Target,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(RunStatus::Succeeded) => {}
        Ok(RunStatus::Failed) => std::process::exit(1),
        Ok(RunStatus::Incomplete) => std::process::exit(130),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<RunStatus> {
    let mut config = PipelineConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    if let Commands::Assemble { targets } = &cli.command {
        if !targets.is_empty() {
            config.pipeline.targets = targets.clone();
        }
    }

    let ctx = RunContext::new(config, &cli.base_dir)?;
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("⏹  Interrupted, cancelling run...");
            interrupt.cancel();
        }
    });

    let pipeline = Pipeline::new(ctx);
    let report = match cli.command {
        Commands::Assemble { .. } => {
            let artifact = pipeline.context().artifact();
            let channel = if artifact.version.is_prerelease() { " (pre-release)" } else { "" };
            println!("📦 Assembling {} v{}{}", artifact.name, artifact.version, channel);
            pipeline.assemble(&cancel).await?
        }
        Commands::Generate => {
            println!("⚙️  Generating sources");
            pipeline.generate(&cancel).await?
        }
        Commands::Stage { target } => {
            println!("📦 Staging {}", target);
            pipeline.stage(target, &cancel).await?
        }
    };

    print_report(&report, cli.json)?;
    Ok(report.status)
}

fn print_report(report: &RunReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!();
    println!("{}", report);
    println!();
    match report.status {
        RunStatus::Succeeded if report.all_skipped() => println!("✅ Everything up to date"),
        RunStatus::Succeeded => println!("✅ Done"),
        RunStatus::Failed => println!("❌ Run failed"),
        RunStatus::Incomplete => println!("⚠️  Run cancelled before completion"),
    }
    for warning in report.warnings() {
        println!("   ⚠️  {}", warning);
    }
    Ok(())
}
