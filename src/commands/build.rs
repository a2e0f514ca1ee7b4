//! Build command - assembles the rootfs.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::download::HttpFetcher;
use crate::pipeline::{write_report, Pipeline, PipelineRun, RunState};
use crate::preflight;
use crate::process::HostRunner;
use crate::timing::format_duration;

/// Options for the build command.
#[derive(Debug, Default)]
pub struct BuildOptions<'a> {
    pub offline: bool,
    pub skip_preflight: bool,
    pub report: Option<&'a Path>,
}

/// Execute the build command.
pub fn cmd_build(config: &Config, options: BuildOptions<'_>) -> Result<()> {
    println!("=== minidistro rootfs build ===\n");
    let build_start = Instant::now();

    if !options.skip_preflight {
        preflight::run_preflight_or_fail(config)?;
    }

    let runner = HostRunner;
    let fetcher = HttpFetcher::default();
    let pipeline = Pipeline::new(config, &runner, &fetcher).offline(options.offline);

    let mut run = PipelineRun::new();
    let result = pipeline.assemble(&mut run);

    if let Some(path) = options.report {
        write_report(&run, path)
            .with_context(|| format!("Failed to write run report {}", path.display()))?;
        println!("Run report written to {}", path.display());
    }

    print_summary(&run);
    let report = result?;

    println!("\n=== Build Complete ({}) ===", format_duration(build_start.elapsed()));
    println!("  Rootfs: {}", config.rootfs.display());
    println!("  Init:   {} ({:?})", report.init.display(), report.linkage);
    if let Some(image) = run.stages.iter().find_map(|s| s.boot_image.as_ref()) {
        println!("  Kernel: {}", image.display());
    }
    Ok(())
}

fn print_summary(run: &PipelineRun) {
    println!();
    for record in &run.stages {
        println!("  ✓ {:<10} {:>8.1}s", record.name, record.duration_secs);
    }
    if let RunState::Aborted { stage, cause } = &run.state {
        match stage {
            Some(stage) => println!("  ✗ {:<10} {}", stage, cause),
            None => println!("  ✗ {}", cause),
        }
    }
}
