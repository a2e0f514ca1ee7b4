//! Show command - displays information.

use anyhow::Result;

use crate::config::Config;
use crate::stage::{BuildSystem, Source, STAGES};

/// Show target for the show command.
pub enum ShowTarget {
    /// Resolved environment manifest
    Config,
    /// Declared stage order
    Stages,
}

/// Execute the show command.
pub fn cmd_show(config: &Config, target: ShowTarget) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Stages => print_stages(),
    }
    Ok(())
}

fn print_stages() {
    println!("Stages (build order):");
    for (i, stage) in STAGES.iter().enumerate() {
        let source = match stage.source {
            Source::KernelTree => "KERNEL_SOURCE tree".to_string(),
            Source::Local { file } => format!("{} (local only)", file),
            Source::Remote { file, .. } => file.to_string(),
        };
        let build = match stage.build {
            BuildSystem::Kernel => "kbuild",
            BuildSystem::Autotools { out_of_tree: true, .. } => "autotools, out of tree",
            BuildSystem::Autotools { .. } => "autotools",
        };
        println!("  {}. {:<10} {} [{}]", i + 1, stage.name, source, build);
        for expect in stage.verify {
            println!("       verify: {}", expect);
        }
    }
    println!("  then: rootfs finisher (links, /dev nodes, mountpoints, /init)");
}
