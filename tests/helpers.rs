//! Shared test utilities for minidistro tests.
//!
//! `ScriptedRunner` stands in for the host toolchain: each tool the pipeline
//! invokes is simulated by writing the files the real tool would produce,
//! so the full pipeline runs in a temp directory in milliseconds.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::fs;
use std::io;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::bail;
use tempfile::TempDir;

use minidistro::config::Config;
use minidistro::download::Fetcher;
use minidistro::process::{Invocation, Outcome, Runner};
use minidistro::stage::kernel::boot_image_path;
use minidistro::stage::STAGES;

/// Host triple reported by the simulated `config.guess`.
pub const TRIPLE: &str = "x86_64-pc-linux-gnu";

/// Test environment: a complete manifest under one temporary directory.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub root: PathBuf,
    pub config: Config,
}

impl TestEnv {
    /// Manifest with a kernel tree but an empty sources cache.
    pub fn new() -> Self {
        Self::with_vars(&[])
    }

    /// Like [`TestEnv::new`] with extra configuration variables.
    pub fn with_vars(extra: &[(&str, &str)]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();

        let mut vars: Vec<(String, String)> = [
            ("SOURCES_DIR", "sources"),
            ("BUILD_DIR", "build"),
            ("KERNEL_SOURCE", "linux"),
            ("ROOTFS_DIR", "rootfs"),
            ("BOOT_ARCHIVE_DIR", "boot-images"),
            ("CC", "cc"),
            ("JOBS", "2"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));

        let config = Config::from_vars(vars, &root, &root);

        fs::create_dir_all(&config.kernel_source).expect("Failed to create kernel tree");
        fs::write(config.kernel_source.join("Makefile"), "# kbuild\n")
            .expect("Failed to create kernel Makefile");

        Self {
            _temp_dir: temp_dir,
            root,
            config,
        }
    }

    /// Put every stage archive into the sources cache.
    pub fn populate_cache(&self) {
        fs::create_dir_all(&self.config.sources).expect("Failed to create sources dir");
        for stage in STAGES {
            if let Some(file) = stage.source.file() {
                fs::write(self.config.sources.join(file), format!("archive {}", file))
                    .expect("Failed to create archive");
            }
        }
    }

    /// Remove one archive from the cache.
    pub fn remove_archive(&self, file: &str) {
        let _ = fs::remove_file(self.config.sources.join(file));
    }

    pub fn runner(&self) -> ScriptedRunner {
        ScriptedRunner::new(&self.config)
    }
}

type Predicate = Box<dyn Fn(&Invocation) -> bool>;

/// Simulated host toolchain.
pub struct ScriptedRunner {
    build_root: PathBuf,
    cc: String,
    calls: RefCell<Vec<Invocation>>,
    fail_when: Option<Predicate>,
    missing: Vec<String>,
    /// `cc -static` fails as if no static libc were installed.
    pub static_link_fails: bool,
    /// `headers_install` leaves `.install`, `..install.cmd` and (before
    /// 5.3) `.check`, `..check.cmd` behind.
    pub header_metadata: bool,
}

impl ScriptedRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            build_root: config.build_root.clone(),
            cc: config.cc.clone(),
            calls: RefCell::new(Vec::new()),
            fail_when: None,
            missing: Vec::new(),
            static_link_fails: false,
            header_metadata: false,
        }
    }

    /// Any invocation matching `predicate` exits with status 2.
    pub fn fail_when(mut self, predicate: impl Fn(&Invocation) -> bool + 'static) -> Self {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    /// Behave as if `program` were not installed.
    pub fn without(mut self, program: &str) -> Self {
        self.missing.push(program.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    /// Stage owning an invocation, from its working directory.
    pub fn stage_of(&self, inv: &Invocation) -> Option<String> {
        inv.dir
            .strip_prefix(&self.build_root)
            .ok()
            .and_then(|rel| rel.components().next())
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
    }

    /// Stages in the order their first invocation happened.
    pub fn stage_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for inv in self.calls.borrow().iter() {
            if let Some(stage) = self.stage_of(inv) {
                if order.last() != Some(&stage) {
                    order.push(stage);
                }
            }
        }
        order
    }

    fn simulate(&self, inv: &Invocation) -> io::Result<Outcome> {
        let program = Path::new(&inv.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.missing.contains(&program) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: command not found", inv.program),
            ));
        }

        match program.as_str() {
            "tar" => self.tar(inv),
            "config.guess" => Ok(ok_with(&format!("{}\n", TRIPLE))),
            "configure" => {
                fs::write(inv.dir.join("config.status"), "configured\n")?;
                Ok(ok())
            }
            "make" => self.make(inv),
            "mknod" => {
                fs::write(&inv.args[2], "")?;
                Ok(ok())
            }
            p if p == self.cc => self.cc(inv),
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: command not found", inv.program),
            )),
        }
    }

    fn tar(&self, inv: &Invocation) -> io::Result<Outcome> {
        let archive = Path::new(&inv.args[1]);
        let dest = Path::new(&inv.args[3]);
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name
            .trim_end_matches(".tar.gz")
            .trim_end_matches(".tar.xz");

        let src = dest.join(stem);
        fs::create_dir_all(&src)?;
        write_executable(&src.join("configure"), "#!/bin/sh\n")?;
        fs::create_dir_all(src.join("build-aux"))?;
        write_executable(&src.join("build-aux/config.guess"), "#!/bin/sh\n")?;
        Ok(ok())
    }

    fn make(&self, inv: &Invocation) -> io::Result<Outcome> {
        if let Some(obj) = inv.var_arg("O") {
            return self.kbuild(inv, Path::new(obj));
        }

        if inv.has_arg("install") {
            let stage = self.stage_of(inv).unwrap_or_default();
            let dest = inv
                .var_arg("DESTDIR")
                .or_else(|| inv.var_arg("install_root"))
                .map(PathBuf::from)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no install root"))?;
            install_stage(&stage, &dest)?;
            return Ok(ok());
        }

        fs::write(inv.dir.join("compiled"), "ok\n")?;
        Ok(ok())
    }

    fn kbuild(&self, inv: &Invocation, obj: &Path) -> io::Result<Outcome> {
        if inv.has_arg("defconfig") || inv.has_arg("olddefconfig") {
            let config = obj.join(".config");
            if !config.exists() {
                fs::write(config, "CONFIG_DEFAULT=y\n")?;
            }
        } else if inv.has_arg("headers_install") {
            let hdr = inv
                .var_arg("INSTALL_HDR_PATH")
                .map(PathBuf::from)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no INSTALL_HDR_PATH"))?;
            let include = hdr.join("include");
            fs::create_dir_all(include.join("linux"))?;
            fs::create_dir_all(include.join("asm"))?;
            fs::write(include.join("linux/version.h"), "#define LINUX_VERSION_CODE 0\n")?;
            fs::write(include.join("asm/unistd.h"), "\n")?;
            if self.header_metadata {
                fs::write(include.join(".install"), "")?;
                fs::write(include.join("linux/.install"), "")?;
                fs::write(include.join("linux/..install.cmd"), "cmd\n")?;
                fs::write(include.join("asm/.check"), "")?;
                fs::write(include.join("asm/..check.cmd"), "cmd\n")?;
            }
        } else {
            let image = boot_image_path(obj);
            fs::create_dir_all(image.parent().unwrap_or(obj))?;
            fs::write(image, "kernel image\n")?;
        }
        Ok(ok())
    }

    fn cc(&self, inv: &Invocation) -> io::Result<Outcome> {
        if self.static_link_fails && inv.has_arg("-static") {
            return Ok(Outcome {
                code: 1,
                stdout: String::new(),
                stderr: "ld: cannot find -lc\n".to_string(),
            });
        }
        let out = inv
            .args
            .iter()
            .position(|a| a == "-o")
            .and_then(|i| inv.args.get(i + 1))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no -o"))?;
        fs::write(out, "\x7fELF init\n")?;
        Ok(ok())
    }
}

impl Runner for ScriptedRunner {
    fn run(&self, inv: &Invocation) -> io::Result<Outcome> {
        self.calls.borrow_mut().push(inv.clone());
        if self.fail_when.as_ref().is_some_and(|f| f(inv)) {
            return Ok(Outcome {
                code: 2,
                stdout: String::new(),
                stderr: "injected failure\n".to_string(),
            });
        }
        self.simulate(inv)
    }
}

/// Files each package installs.
fn install_stage(stage: &str, dest: &Path) -> io::Result<()> {
    let files: &[&str] = match stage {
        "glibc" => &["lib64/libc.so.6", "usr/include/stdio.h"],
        "ncurses" => &[
            "usr/lib/libncursesw.so.6",
            "usr/lib/libformw.so.6",
            "usr/include/curses.h",
        ],
        "bash" => &["bin/bash"],
        "coreutils" => &["bin/ls", "bin/cat", "bin/mkdir"],
        _ => &[],
    };
    for file in files {
        let path = dest.join(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, format!("{} from {}\n", file, stage))?;
    }
    if stage == "ncurses" {
        let link = dest.join("usr/lib/libncursesw.so");
        if link.symlink_metadata().is_err() {
            symlink("libncursesw.so.6", link)?;
        }
    }
    Ok(())
}

fn ok() -> Outcome {
    ok_with("")
}

fn ok_with(stdout: &str) -> Outcome {
    Outcome {
        code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn write_executable(path: &Path, content: &str) -> io::Result<()> {
    fs::write(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

/// Fetcher that "downloads" by writing a small file, counting every call.
#[derive(Default)]
pub struct CountingFetcher {
    calls: RefCell<Vec<String>>,
    fail: Cell<bool>,
}

impl CountingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent transfer writes part of the file, then fails.
    pub fn failing() -> Self {
        let fetcher = Self::default();
        fetcher.fail.set(true);
        fetcher
    }

    pub fn count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Fetcher for CountingFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> anyhow::Result<()> {
        self.calls.borrow_mut().push(url.to_string());
        if self.fail.get() {
            fs::write(dest, "trunc")?;
            bail!("connection reset by peer");
        }
        fs::write(dest, format!("archive from {}", url))?;
        Ok(())
    }
}

/// Sorted (relative path, contents) listing of a directory tree.
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, Option<Vec<u8>>)> {
    let mut entries: Vec<(PathBuf, Option<Vec<u8>>)> = walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .map(|e| e.expect("Failed to walk directory"))
        .map(|e| {
            let rel = e.path().strip_prefix(dir).unwrap_or(e.path()).to_path_buf();
            let content = if e.file_type().is_file() {
                Some(fs::read(e.path()).expect("Failed to read file"))
            } else {
                None
            };
            (rel, content)
        })
        .collect();
    entries.sort();
    entries
}

/// Assert that a symlink exists and points to the expected target.
pub fn assert_symlink(path: &Path, expected_target: &str) {
    assert!(
        path.is_symlink(),
        "Expected symlink at {}, but it's not a symlink",
        path.display()
    );
    let target = fs::read_link(path).expect("Failed to read symlink");
    assert_eq!(
        target.to_string_lossy(),
        expected_target,
        "Symlink {} points to {:?}, expected {}",
        path.display(),
        target,
        expected_target
    );
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

/// Assert that a directory exists.
pub fn assert_dir_exists(path: &Path) {
    assert!(path.is_dir(), "Expected directory to exist: {}", path.display());
}

/// Assert that nothing named `name` exists anywhere under `dir`.
pub fn assert_no_file_named(dir: &Path, name: &str) {
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.expect("Failed to walk directory");
        assert!(
            entry.file_name() != name,
            "Unexpected {} at {}",
            name,
            entry.path().display()
        );
    }
}
