//! minidistro - builds a minimal bootable Linux root filesystem from source.
//!
//! Kernel headers, C library, terminal library, shell and core utilities are
//! built in a fixed order into a target rootfs, which is then finished with
//! device nodes, mountpoints and an init program.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use minidistro::commands;
use minidistro::config::Config;

#[derive(Parser)]
#[command(name = "minidistro")]
#[command(about = "Minimal Linux rootfs builder")]
#[command(
    after_help = "QUICK START:\n  minidistro preflight  Check host tools and inputs\n  minidistro download   Fetch all source archives\n  minidistro build      Build every stage and finish the rootfs\n  minidistro clean      Remove build directories"
)]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every stage in order, then finish the rootfs
    Build {
        /// Never download; uncached archives are treated as missing
        #[arg(long)]
        offline: bool,

        /// Skip the preflight checks
        #[arg(long)]
        skip_preflight: bool,

        /// Write a JSON run report to this file
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Provision every stage's source without building
    Download {
        /// Only verify the cache, never fetch
        #[arg(long)]
        offline: bool,
    },

    /// Clean build artifacts (sources and boot images are preserved)
    Clean {
        #[command(subcommand)]
        what: Option<CleanTarget>,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Run preflight checks (verify host tools and inputs before build)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum CleanTarget {
    /// Clean the target rootfs only
    Rootfs,
    /// Clean build directories and rootfs
    All,
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show the resolved configuration
    Config,
    /// Show the stages in build order
    Stages,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .init();

    let config = Config::load();

    match cli.command {
        Commands::Build {
            offline,
            skip_preflight,
            report,
        } => {
            commands::cmd_build(
                &config,
                commands::build::BuildOptions {
                    offline,
                    skip_preflight,
                    report: report.as_deref(),
                },
            )?;
        }

        Commands::Download { offline } => {
            commands::cmd_download(&config, offline)?;
        }

        Commands::Clean { what } => {
            let clean_target = match what {
                None => commands::clean::CleanTarget::Build,
                Some(CleanTarget::Rootfs) => commands::clean::CleanTarget::Rootfs,
                Some(CleanTarget::All) => commands::clean::CleanTarget::All,
            };
            commands::cmd_clean(&config, clean_target)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Stages => commands::show::ShowTarget::Stages,
            };
            commands::cmd_show(&config, show_target)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }
    }

    Ok(())
}
