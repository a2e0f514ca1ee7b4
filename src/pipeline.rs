//! Sequencer: runs the stages in declared order.
//!
//! ```text
//! NotStarted → Running(0) → Running(1) → … → Completed
//!                   │            │
//!                   └────────────┴──→ Aborted { stage, cause }
//! ```
//!
//! `Running(i)` advances only after the provisioner, executor and gate for
//! stage `i` have all succeeded. A run always starts at stage 0; nothing is
//! resumed from a previous invocation.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info};

use crate::config::Config;
use crate::download::Fetcher;
use crate::error::Result;
use crate::finish::{FinishReport, Finisher};
use crate::process::Runner;
use crate::provision::Provisioner;
use crate::stage::{Stage, StageExecutor, StageOutput, STAGES};
use crate::timing::Timer;
use crate::verify::verify_stage;

/// Where a pipeline run stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    /// Index into the stage list.
    Running { stage: usize },
    Completed,
    /// `stage` is `None` when the failure happened outside any stage
    /// (manifest preparation or the finisher).
    Aborted { stage: Option<String>, cause: String },
}

/// A stage that passed its gate.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub name: String,
    #[serde(skip)]
    pub started: Instant,
    #[serde(skip)]
    pub verified: Instant,
    pub duration_secs: f64,
    pub paths_verified: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_image: Option<PathBuf>,
    #[serde(skip_serializing_if = "is_zero")]
    pub headers_sanitized: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// State of one invocation of the pipeline. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub state: RunState,
    pub stages: Vec<StageRecord>,
    pub log: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish: Option<FinishReport>,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            state: RunState::NotStarted,
            stages: Vec::new(),
            log: Vec::new(),
            finish: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }

    fn abort(&mut self, stage: Option<&str>, cause: &dyn std::fmt::Display) {
        let cause = cause.to_string();
        error!("{}", cause);
        self.log.push(format!("aborted: {}", cause));
        self.state = RunState::Aborted {
            stage: stage.map(str::to_string),
            cause,
        };
    }

    /// JSON export of the run.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Drives provisioner, executor and gate over an ordered stage list.
pub struct Pipeline<'a> {
    config: &'a Config,
    stages: &'a [Stage],
    runner: &'a dyn Runner,
    fetcher: &'a dyn Fetcher,
    offline: bool,
}

impl<'a> Pipeline<'a> {
    /// Pipeline over the built-in stage list.
    pub fn new(config: &'a Config, runner: &'a dyn Runner, fetcher: &'a dyn Fetcher) -> Self {
        Self {
            config,
            stages: STAGES,
            runner,
            fetcher,
            offline: false,
        }
    }

    /// Replace the stage list.
    pub fn with_stages(mut self, stages: &'a [Stage]) -> Self {
        self.stages = stages;
        self
    }

    /// Never fetch; uncached remote sources fail as missing.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn stages(&self) -> &[Stage] {
        self.stages
    }

    /// Run every stage in order, stopping at the first failure.
    pub fn run(&self, run: &mut PipelineRun) -> Result<()> {
        *run = PipelineRun::new();

        if let Err(e) = self.config.prepare() {
            run.abort(None, &e);
            return Err(e);
        }

        let provisioner = Provisioner::new(self.config, self.fetcher).offline(self.offline);
        let executor = StageExecutor::new(self.config, self.runner);
        let total = self.stages.len();

        for (i, stage) in self.stages.iter().enumerate() {
            run.state = RunState::Running { stage: i };
            info!("[{}/{}] {}", i + 1, total, stage.name);

            let timer = Timer::start(stage.name);
            let started = Instant::now();
            match self.run_stage(stage, &provisioner, &executor, &mut run.log) {
                Ok((output, paths_verified)) => {
                    let verified = Instant::now();
                    let duration = timer.finish();
                    run.stages.push(StageRecord {
                        name: stage.name.to_string(),
                        started,
                        verified,
                        duration_secs: duration.as_secs_f64(),
                        paths_verified,
                        boot_image: output.boot_image,
                        headers_sanitized: output.sanitized,
                    });
                }
                Err(e) => {
                    run.abort(Some(stage.name), &e);
                    return Err(e);
                }
            }
        }

        run.state = RunState::Completed;
        info!("All {} stages completed", total);
        Ok(())
    }

    fn run_stage(
        &self,
        stage: &Stage,
        provisioner: &Provisioner<'_>,
        executor: &StageExecutor<'_>,
        log: &mut Vec<String>,
    ) -> Result<(StageOutput, usize)> {
        let source = provisioner.provision(stage)?;
        let output = executor.execute(stage, &source, log)?;
        let checked = verify_stage(stage, &self.config.rootfs)?;
        log.push(format!("[{}] verified {} paths", stage.name, checked));
        Ok((output, checked))
    }

    /// Run the stages and, once all have completed, finish the rootfs.
    pub fn assemble(&self, run: &mut PipelineRun) -> Result<FinishReport> {
        self.run(run)?;

        let timer = Timer::start("finish rootfs");
        let result = Finisher::new(self.config, self.runner).finish();
        timer.finish();

        match result {
            Ok(report) => {
                run.log.push(format!(
                    "finished rootfs: init at {} ({:?})",
                    report.init.display(),
                    report.linkage
                ));
                run.finish = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                run.abort(None, &e);
                Err(e)
            }
        }
    }
}

/// Write a run's JSON export to `path`.
pub fn write_report(run: &PipelineRun, path: &Path) -> std::io::Result<()> {
    let json = run.to_json().map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}
