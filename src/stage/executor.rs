//! Stage executor - runs one stage's lifecycle as an isolated unit.
//!
//! clean → extract → configure → compile → install, each step depending on
//! the previous one. A failing step stops the stage immediately and the
//! build directory is left exactly as the failure left it.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{kernel, BuildSystem, Stage, Step};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::process::{Invocation, Outcome, Runner};

/// Name of the per-stage log kept inside the build directory.
pub const BUILD_LOG: &str = "build.log";

/// Where `config.guess` lives in the packages this pipeline builds.
const CONFIG_GUESS_CANDIDATES: &[&str] = &[
    "config.guess",
    "build-aux/config.guess",
    "scripts/config.guess",
    "support/config.guess",
];

/// Artifacts a stage produces besides its rootfs install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    /// Archived copy of the boot image (kernel stage only).
    pub boot_image: Option<PathBuf>,
    /// Build-system metadata files removed from exported headers.
    pub sanitized: usize,
}

/// Drives a stage's build steps through a [`Runner`].
pub struct StageExecutor<'a> {
    pub(crate) config: &'a Config,
    runner: &'a dyn Runner,
}

impl<'a> StageExecutor<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn Runner) -> Self {
        Self { config, runner }
    }

    /// Run the full lifecycle of `stage` from the provisioned `source`.
    ///
    /// Every invocation is appended to `log` and to the stage's `build.log`.
    pub fn execute(
        &self,
        stage: &Stage,
        source: &Path,
        log: &mut Vec<String>,
    ) -> Result<StageOutput> {
        let build_dir = self.config.stage_dir(stage.name);

        self.clean(stage, &build_dir)?;
        let mut journal = Journal::create(stage.name, &build_dir, log)?;

        match stage.build {
            BuildSystem::Kernel => kernel::build(self, stage, source, &build_dir, &mut journal),
            BuildSystem::Autotools {
                out_of_tree,
                dest_var,
            } => self.autotools(stage, source, &build_dir, out_of_tree, dest_var, &mut journal),
        }
    }

    /// Remove any previous build directory and start from an empty one.
    fn clean(&self, stage: &Stage, build_dir: &Path) -> Result<()> {
        if build_dir.exists() {
            debug!(stage = stage.name, "removing {}", build_dir.display());
            fs::remove_dir_all(build_dir).map_err(|e| {
                PipelineError::io(stage.name, "failed to remove previous build directory", e)
            })?;
        }
        fs::create_dir_all(build_dir)
            .map_err(|e| PipelineError::io(stage.name, "failed to create build directory", e))
    }

    fn autotools(
        &self,
        stage: &Stage,
        archive: &Path,
        build_dir: &Path,
        out_of_tree: bool,
        dest_var: &str,
        journal: &mut Journal<'_>,
    ) -> Result<StageOutput> {
        let extract = self
            .invocation(stage, "tar", build_dir)
            .arg("-xf")
            .arg_path(archive)
            .arg("-C")
            .arg_path(build_dir);
        self.step(stage, Step::Extract, &extract, journal)?;

        let src = build_dir.join(stage.src_dir);
        if !src.is_dir() {
            return Err(PipelineError::io(
                stage.name,
                format!("archive {} did not unpack to {}", archive.display(), stage.src_dir),
                io::Error::from(io::ErrorKind::NotFound),
            ));
        }

        let work = if out_of_tree {
            let work = build_dir.join("build");
            fs::create_dir_all(&work)
                .map_err(|e| PipelineError::io(stage.name, "failed to create build subdirectory", e))?;
            work
        } else {
            src.clone()
        };

        let mut configure = self
            .invocation(stage, src.join("configure").to_string_lossy(), &work)
            .arg(format!("--prefix={}", stage.prefix));
        if let Some(triple) = self.detect_build_triple(stage, &src, journal)? {
            configure = configure.arg(format!("--build={}", triple));
        }
        configure = configure.args(expand_options(stage.options, &self.config.rootfs));
        self.step(stage, Step::Configure, &configure, journal)?;

        let compile = self
            .invocation(stage, "make", &work)
            .arg(format!("-j{}", self.config.jobs));
        self.step(stage, Step::Compile, &compile, journal)?;

        let install = self
            .invocation(stage, "make", &work)
            .arg("install")
            .arg(format!("{}={}", dest_var, self.config.rootfs.display()));
        self.step(stage, Step::Install, &install, journal)?;

        Ok(StageOutput::default())
    }

    /// Ask the package's own `config.guess` for the host triple.
    ///
    /// Returns `None` when the package ships no `config.guess`; configure
    /// then falls back to its own detection.
    fn detect_build_triple(
        &self,
        stage: &Stage,
        src: &Path,
        journal: &mut Journal<'_>,
    ) -> Result<Option<String>> {
        let Some(guess) = CONFIG_GUESS_CANDIDATES
            .iter()
            .map(|c| src.join(c))
            .find(|p| p.is_file())
        else {
            debug!(stage = stage.name, "no config.guess, leaving --build to configure");
            return Ok(None);
        };

        let inv = self.invocation(stage, guess.to_string_lossy(), src);
        let outcome = self.step(stage, Step::Configure, &inv, journal)?;
        let triple = outcome.stdout_trimmed();
        if triple.is_empty() {
            Ok(None)
        } else {
            debug!(stage = stage.name, triple, "detected build triple");
            Ok(Some(triple.to_string()))
        }
    }

    /// Invocation carrying the stage's environment.
    pub(crate) fn invocation(&self, stage: &Stage, program: impl AsRef<str>, dir: &Path) -> Invocation {
        stage
            .env
            .iter()
            .fold(Invocation::new(program, dir), |inv, (k, v)| inv.env(k, v))
    }

    /// Run one build-system invocation; non-zero exit fails the stage.
    pub(crate) fn step(
        &self,
        stage: &Stage,
        step: Step,
        inv: &Invocation,
        journal: &mut Journal<'_>,
    ) -> Result<Outcome> {
        info!(stage = stage.name, %step, "{}", inv);
        journal.begin(inv)?;
        let outcome = self
            .runner
            .run_streamed(inv, journal.output())
            .map_err(|source| PipelineError::Launch {
                stage: stage.name.to_string(),
                step,
                program: inv.program.clone(),
                source,
            })?;
        journal.end(step, inv, &outcome)?;

        if !outcome.success() {
            return Err(PipelineError::StageFailure {
                stage: stage.name.to_string(),
                step,
                status: outcome.code,
            });
        }
        Ok(outcome)
    }
}

/// Expand `{rootfs}` in configure options.
pub fn expand_options(options: &[&str], rootfs: &Path) -> Vec<String> {
    let rootfs = rootfs.to_string_lossy();
    options
        .iter()
        .map(|opt| opt.replace("{rootfs}", &rootfs))
        .collect()
}

/// Per-stage record of every invocation and its output.
///
/// Written to `<build>/<stage>/build.log` while the step runs: the `$`
/// header before the program starts, then its output as it arrives, then
/// the exit line. A one-line summary of each finished invocation also goes
/// into the run-wide log.
pub(crate) struct Journal<'l> {
    stage: &'static str,
    file: File,
    run_log: &'l mut Vec<String>,
}

impl<'l> Journal<'l> {
    fn create(stage: &'static str, build_dir: &Path, run_log: &'l mut Vec<String>) -> Result<Self> {
        let file = File::create(build_dir.join(BUILD_LOG))
            .map_err(|e| PipelineError::io(stage, "failed to create build log", e))?;
        Ok(Self {
            stage,
            file,
            run_log,
        })
    }

    /// Note an in-process action that has no invocation.
    pub(crate) fn note(&mut self, step: Step, message: &str) -> Result<()> {
        self.run_log
            .push(format!("[{}] {}: {}", self.stage, step, message));
        writeln!(self.file, "# {}: {}", step, message)
            .map_err(|e| PipelineError::io(self.stage, "failed to write build log", e))
    }

    /// Write the invocation header before the program starts.
    fn begin(&mut self, inv: &Invocation) -> Result<()> {
        writeln!(self.file, "$ {}", inv)
            .and_then(|()| self.file.flush())
            .map_err(|e| PipelineError::io(self.stage, "failed to write build log", e))
    }

    /// Sink for the running program's output.
    fn output(&mut self) -> &mut dyn Write {
        &mut self.file
    }

    fn end(&mut self, step: Step, inv: &Invocation, outcome: &Outcome) -> Result<()> {
        self.run_log.push(format!(
            "[{}] {}: {} (exit {})",
            self.stage, step, inv, outcome.code
        ));
        writeln!(self.file, "[{}: exit {}]", step, outcome.code)
            .map_err(|e| PipelineError::io(self.stage, "failed to write build log", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::HostRunner;
    use crate::stage::definitions::BASH;
    use std::cell::RefCell;
    use std::path::PathBuf;

    fn config(home: &Path) -> Config {
        Config::from_vars(Vec::new(), home, home)
    }

    /// Copies `build.log` as it stands while the step is running.
    struct LogReadingRunner {
        log: PathBuf,
        seen: RefCell<Option<String>>,
    }

    impl Runner for LogReadingRunner {
        fn run(&self, _inv: &Invocation) -> io::Result<Outcome> {
            *self.seen.borrow_mut() = Some(fs::read_to_string(&self.log)?);
            Ok(Outcome {
                code: 0,
                stdout: "compiled\n".into(),
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn expands_rootfs_placeholder() {
        let opts = expand_options(
            &["--with-headers={rootfs}/usr/include", "--disable-werror"],
            Path::new("/srv/rootfs"),
        );
        assert_eq!(
            opts,
            vec![
                "--with-headers=/srv/rootfs/usr/include".to_string(),
                "--disable-werror".to_string()
            ]
        );
    }

    #[test]
    fn journal_writes_invocations_and_summaries() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = Vec::new();
        {
            let mut journal = Journal::create("bash", dir.path(), &mut log).unwrap();
            let inv = Invocation::new("make", &PathBuf::from("/b")).arg("-j4");
            let outcome = Outcome {
                code: 0,
                stdout: "compiled\n".into(),
                stderr: String::new(),
            };
            journal.begin(&inv).unwrap();
            journal.output().write_all(outcome.stdout.as_bytes()).unwrap();
            journal.end(Step::Compile, &inv, &outcome).unwrap();
            journal.note(Step::Install, "headers sanitized").unwrap();
        }

        let written = fs::read_to_string(dir.path().join(BUILD_LOG)).unwrap();
        assert!(written.contains("$ make -j4"));
        assert!(written.contains("compiled"));
        assert!(written.contains("[compile: exit 0]"));
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], "[bash] compile: make -j4 (exit 0)");
    }

    #[test]
    fn header_is_logged_before_the_step_runs() {
        let home = tempfile::tempdir().unwrap();
        let config = config(home.path());
        let build_dir = config.stage_dir(BASH.name);
        fs::create_dir_all(&build_dir).unwrap();

        let runner = LogReadingRunner {
            log: build_dir.join(BUILD_LOG),
            seen: RefCell::new(None),
        };
        let executor = StageExecutor::new(&config, &runner);
        let mut log = Vec::new();
        let mut journal = Journal::create(BASH.name, &build_dir, &mut log).unwrap();
        let inv = Invocation::new("make", &build_dir).arg("-j4");
        executor.step(&BASH, Step::Compile, &inv, &mut journal).unwrap();
        drop(journal);

        let during = runner.seen.borrow().clone().unwrap();
        assert!(during.contains("$ make -j4"), "{}", during);
        assert!(!during.contains("[compile: exit"), "{}", during);

        let after = fs::read_to_string(build_dir.join(BUILD_LOG)).unwrap();
        assert!(after.contains("compiled\n[compile: exit 0]"), "{}", after);
    }

    #[test]
    fn host_step_sees_its_own_header() {
        let home = tempfile::tempdir().unwrap();
        let config = config(home.path());
        let build_dir = config.stage_dir(BASH.name);
        fs::create_dir_all(&build_dir).unwrap();

        let executor = StageExecutor::new(&config, &HostRunner);
        let mut log = Vec::new();
        let mut journal = Journal::create(BASH.name, &build_dir, &mut log).unwrap();
        let inv = Invocation::new("sh", &build_dir).args(["-c", "cat build.log"]);
        let outcome = executor.step(&BASH, Step::Compile, &inv, &mut journal).unwrap();

        assert!(
            outcome.stdout.contains("$ sh -c cat build.log"),
            "{}",
            outcome.stdout
        );
    }
}
