//! Bootseq - bootstrap sequencer CLI.
//!
//! Builds a service image in a fixed order:
//! - base image, dependency tool, manifest and lock
//! - locked install without development groups
//! - application source
//! - non-root identity owning the working directory
//! - entry point run through the tool, never as root

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use bootseq::commands;
use bootseq::config::Config;
use bootseq::logging;

#[derive(Parser)]
#[command(name = "bootseq")]
#[command(about = "Bootstrap sequencer for locked, least-privilege service images")]
#[command(
    after_help = "QUICK START:\n  bootseq preflight  Check recipe, lock and host inputs\n  bootseq render     Write the Containerfile\n  bootseq build      Build the image locally\n  bootseq verify     Check the built image"
)]
struct Cli {
    /// Project directory (default: current directory)
    #[arg(short = 'C', long, global = true)]
    project: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the ordered build steps
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write Containerfile and .containerignore
    Render {
        /// Output directory (default: project directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Build the image locally into <output>/image
    Build {
        /// Ignore and do not record cached layers
        #[arg(long)]
        no_cache: bool,
    },

    /// Verify the built image: tool, ownership and closure digest
    Verify,

    /// Check the dependency lock against the manifest
    Lock {
        #[command(subcommand)]
        what: LockTarget,
    },

    /// Run the service as the execution identity (container entry)
    Exec {
        /// Filesystem root the image paths are resolved against
        #[arg(long, default_value = "/")]
        root: PathBuf,
    },

    /// Print the effective identity; fails when running as root
    Whoami,

    /// Run preflight checks
    Preflight {
        /// Fail if any check fails
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Clean build artifacts
    Clean {
        #[command(subcommand)]
        what: Option<CleanTarget>,
    },
}

#[derive(Subcommand)]
enum LockTarget {
    /// Full consistency report
    Check,
    /// Print the runtime closure digest
    Digest,
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show effective configuration
    Config,
    /// Show cached layers and the built image
    Status,
}

#[derive(Subcommand)]
enum CleanTarget {
    /// Remove the output directory (default)
    Outputs,
    /// Remove cached layers
    Cache,
    /// Remove outputs and cached layers
    All,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logger(cli.verbose);

    let project = match cli.project {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let config = Config::load(&project)?;

    match cli.command {
        Commands::Plan { json } => commands::cmd_plan(&config, json)?,
        Commands::Render { out } => commands::cmd_render(&config, out)?,
        Commands::Build { no_cache } => {
            commands::cmd_build(&config, no_cache)?;
        }
        Commands::Verify => commands::cmd_verify(&config)?,
        Commands::Lock { what } => {
            let target = match what {
                LockTarget::Check => commands::lock::LockTarget::Check,
                LockTarget::Digest => commands::lock::LockTarget::Digest,
            };
            commands::cmd_lock(&config, target)?;
        }
        Commands::Exec { root } => commands::cmd_exec(&config, &root)?,
        Commands::Whoami => commands::cmd_whoami()?,
        Commands::Preflight { strict } => commands::cmd_preflight(&config, strict)?,
        Commands::Show { what } => {
            let target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Status => commands::show::ShowTarget::Status,
            };
            commands::cmd_show(target, &config)?;
        }
        Commands::Clean { what } => {
            let target = match what {
                None | Some(CleanTarget::Outputs) => commands::clean::CleanTarget::Outputs,
                Some(CleanTarget::Cache) => commands::clean::CleanTarget::Cache,
                Some(CleanTarget::All) => commands::clean::CleanTarget::All,
            };
            commands::cmd_clean(&config, target)?;
        }
    }

    Ok(())
}
