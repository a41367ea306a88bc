//! Proto Pack Config CLI
//!
//! View and manage pipeline configuration.

use clap::{Parser, Subcommand};
use proto_pack::{PipelineConfig, Target};

#[derive(Parser)]
#[command(name = "proto-pack-config")]
#[command(about = "View and manage proto-pack configuration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Show {
        /// Config file to load (optional)
        #[arg(short, long)]
        config: Option<String>,

        /// Output as TOML
        #[arg(long)]
        toml: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Initialize a new config file
    Init {
        /// Output path (default: proto-pack.toml)
        #[arg(short, long, default_value = "proto-pack.toml")]
        output: String,
    },

    /// Validate configuration
    Validate {
        /// Config file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Show { config, toml, json } => {
            let cfg = PipelineConfig::load_from(config.as_deref())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else if toml {
                println!("{}", ::toml::to_string_pretty(&cfg)?);
            } else {
                println!("📋 Proto Pack Configuration\n");
                println!("Artifact:");
                println!("  Name: {}", cfg.artifact.name);
                println!("  Version: {}", cfg.artifact.version);
                println!("  Group: {}", cfg.artifact.group);

                println!("\nSources:");
                println!("  Root: {:?}", cfg.sources.root);
                println!("  Extensions: {:?}", cfg.sources.extensions);
                for include in &cfg.sources.include {
                    println!("  Include: {:?}", include);
                }

                println!("\nCompiler:");
                println!("  Program: {}", cfg.compiler.program);
                println!("  Timeout: {}s", cfg.compiler.timeout_secs);

                println!("\nPipeline:");
                println!("  Build dir: {:?}", cfg.output.build_dir);
                println!("  Workers: {}", cfg.workers());

                println!("\nTargets:");
                for target in Target::ALL {
                    let requested = cfg.requested_targets().contains(&target);
                    let t = cfg.targets.get(target);
                    let dep = cfg.runtime_dependency(target);
                    println!(
                        "  {} {} (generate: {}, dir: {}, runtime: {} {})",
                        if requested { "✓" } else { "-" },
                        target,
                        t.generate,
                        t.staging_dir
                            .as_ref()
                            .map(|d| d.display().to_string())
                            .unwrap_or_else(|| target.default_staging_dir().to_string()),
                        dep.name,
                        dep.requirement
                    );
                }
            }
        }

        Commands::Init { output } => {
            let cfg = PipelineConfig::default();
            cfg.save(&output)?;
            println!("✅ Created config file: {}", output);
        }

        Commands::Validate { config } => {
            match PipelineConfig::load_from(config.as_deref()) {
                Ok(cfg) => match cfg.validate() {
                    Ok(()) => {
                        println!("✅ Configuration is valid");
                        println!("   Artifact: {} v{}", cfg.artifact.name, cfg.artifact.version);
                        println!("   Sources: {:?}", cfg.sources.root);
                        println!("   Targets: {:?}", cfg.requested_targets());
                    }
                    Err(e) => {
                        eprintln!("❌ Configuration error: {}", e);
                        std::process::exit(1);
                    }
                },
                Err(e) => {
                    eprintln!("❌ Configuration error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
