//! External build-step execution.
//!
//! Every package tool the pipeline drives (`tar`, `configure`, `make`,
//! `mknod`, the C compiler) goes through the [`Runner`] trait: an
//! [`Invocation`] with an explicit working directory goes in, an
//! [`Outcome`] with the exit status and captured output comes out. Nothing
//! here ever changes the process-wide current directory.
//!
//! Long steps (`make -jN` on glibc runs for many minutes) go through
//! [`Runner::run_streamed`], which hands each output line to a sink as the
//! child produces it instead of after it exits.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

/// Bytes of each stream an [`Outcome`] keeps from a streamed run.
/// The full output only goes to the sink.
pub const CAPTURE_LIMIT: usize = 64 * 1024;

/// One external command with its arguments, working directory and
/// extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Create an invocation of `program` running in `dir`.
    pub fn new(program: impl AsRef<str>, dir: &Path) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            dir: dir.to_path_buf(),
            env: Vec::new(),
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set an environment variable for this invocation only.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// True if any argument equals `arg`.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Value of the first `KEY=value` argument for `key`.
    pub fn var_arg(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find_map(|a| a.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')))
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{}={} ", key, value)?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Result of an invocation that ran to completion.
///
/// After a streamed run, `stdout` and `stderr` hold at most the last
/// [`CAPTURE_LIMIT`] bytes of each stream.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    /// Exit code, or -1 if terminated by signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Outcome {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Capability to run an external build step.
///
/// Returns `Err` only when the program could not be started. A program that
/// runs and exits non-zero is an `Ok` outcome; the caller decides what a
/// failure means.
pub trait Runner {
    fn run(&self, invocation: &Invocation) -> io::Result<Outcome>;

    /// Run `invocation`, copying its stdout and stderr into `sink`.
    ///
    /// The default writes the captured output once the program exits.
    /// Runners that spawn real processes override it to copy each line as
    /// it arrives.
    fn run_streamed(&self, invocation: &Invocation, sink: &mut dyn Write) -> io::Result<Outcome> {
        let outcome = self.run(invocation)?;
        let copied = sink
            .write_all(outcome.stdout.as_bytes())
            .and_then(|()| sink.write_all(outcome.stderr.as_bytes()));
        if let Err(e) = copied {
            warn!("failed to copy output of {}: {}", invocation.program, e);
        }
        Ok(outcome)
    }
}

/// Runs invocations as host processes with piped stdout and stderr.
///
/// Output lines are also logged at debug level, so `-v` shows a build as
/// it happens.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRunner;

impl Runner for HostRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<Outcome> {
        self.run_streamed(invocation, &mut io::sink())
    }

    fn run_streamed(&self, invocation: &Invocation, sink: &mut dyn Write) -> io::Result<Outcome> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.dir)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (tx, rx) = mpsc::channel();
        let readers = [
            child.stdout.take().map(|out| forward(out, Stream::Stdout, tx.clone())),
            child.stderr.take().map(|err| forward(err, Stream::Stderr, tx.clone())),
        ];
        drop(tx);

        // A log that stops accepting writes must not abort a running build.
        let mut sink_ok = true;
        let mut outcome = Outcome::default();
        for (stream, line) in rx {
            debug!("{}", line.trim_end());
            if sink_ok {
                if let Err(e) = sink.write_all(line.as_bytes()).and_then(|()| sink.flush()) {
                    warn!("failed to copy output of {}: {}", invocation.program, e);
                    sink_ok = false;
                }
            }
            match stream {
                Stream::Stdout => keep_tail(&mut outcome.stdout, &line),
                Stream::Stderr => keep_tail(&mut outcome.stderr, &line),
            }
        }

        for reader in readers.into_iter().flatten() {
            let _ = reader.join();
        }
        outcome.code = child.wait()?.code().unwrap_or(-1);
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Send each line read from `pipe` to `tx` until EOF.
fn forward<R>(pipe: R, stream: Stream, tx: Sender<(Stream, String)>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Append `line` to `buf`, dropping the oldest bytes past [`CAPTURE_LIMIT`].
fn keep_tail(buf: &mut String, line: &str) {
    buf.push_str(line);
    if buf.len() > CAPTURE_LIMIT {
        let mut cut = buf.len() - CAPTURE_LIMIT;
        while !buf.is_char_boundary(cut) {
            cut += 1;
        }
        buf.drain(..cut);
    }
}

/// Find a program in PATH.
pub fn which(program: &str) -> Option<String> {
    which::which(program)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}
