// src/main.rs
//! galley - CLI entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use galley::{Builder, HostExecutor, OciExecutor};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "galley")]
#[command(version)]
#[command(about = "Cook shell recipes into reproducible ipk packages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build all packages of a recipe
    Build {
        /// Directory containing the recipe definition
        recipe_dir: PathBuf,

        /// Directory where packages are built
        #[arg(short, long, default_value = "work")]
        work_dir: PathBuf,

        /// Directory where built packages are stored
        #[arg(short, long, default_value = "dist")]
        dist_dir: PathBuf,

        /// Only build the given architectures (default: all declared)
        #[arg(short, long)]
        arch: Vec<String>,

        /// Container runtime binary used for isolated builds
        #[arg(long, default_value = "docker")]
        runtime: String,

        /// Registry prefix prepended to recipe image identifiers
        #[arg(long, default_value = "")]
        image_prefix: String,

        /// Run build scripts directly on the host instead of in a
        /// container (builds are no longer reproducible)
        #[arg(long)]
        no_container: bool,
    },

    /// Parse and validate a recipe without building it
    Check {
        /// Directory containing the recipe definition
        recipe_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            recipe_dir,
            work_dir,
            dist_dir,
            arch,
            runtime,
            image_prefix,
            no_container,
        } => {
            let mut recipe = galley::parse(&recipe_dir)?;

            let mut builder = Builder::new(work_dir, dist_dir);
            builder = if no_container {
                builder.with_executor(Box::new(HostExecutor))
            } else {
                builder.with_executor(Box::new(
                    OciExecutor::new(runtime).with_image_prefix(image_prefix),
                ))
            };

            let outputs = if arch.is_empty() {
                builder.make(&mut recipe)?
            } else {
                let mut outputs = Vec::new();
                for arch in &arch {
                    outputs.extend(builder.make_arch(&mut recipe, arch)?);
                }
                outputs
            };

            for path in outputs {
                println!("{}", path.display());
            }
            Ok(())
        }

        Commands::Check { recipe_dir } => {
            let recipe = galley::parse(&recipe_dir)?;
            for (arch, variant) in &recipe.variants {
                for package in &variant.packages {
                    println!("{} {} ({})", package.name, package.version, arch);
                }
            }
            Ok(())
        }
    }
}
