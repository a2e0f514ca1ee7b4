//! Rootfs finisher.
//!
//! Runs once after every stage has passed its gate. Turns the installed
//! tree into something a kernel can boot: mountpoints, device nodes,
//! library and shell compatibility links, and `/init`.
//!
//! Every step skips work that is already done, so finishing the same rootfs
//! twice succeeds and changes nothing.

use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::process::{Invocation, Runner};

/// Empty directories the init program mounts over.
pub const MOUNTPOINTS: &[&str] = &["dev", "proc", "sys", "tmp", "run"];

/// Library directories searched for wide-character libraries.
pub const LIB_DIRS: &[&str] = &["lib", "lib64", "usr/lib", "usr/lib64"];

/// Libraries built only in their wide-character (`w`) flavour.
pub const WIDE_LIBS: &[&str] = &["ncurses", "form", "panel", "menu"];

const LIB_SUFFIXES: &[&str] = &[".so.6", ".so"];

/// Source of the init program shipped with the crate.
pub const BUILTIN_INIT: &str = include_str!("../profile/init.c");

/// A character device created with `mknod`.
#[derive(Debug, Clone, Copy)]
pub struct DeviceNode {
    pub path: &'static str,
    pub mode: &'static str,
    pub major: u32,
    pub minor: u32,
}

/// Nodes the kernel needs before devtmpfs is mounted.
pub const DEVICE_NODES: &[DeviceNode] = &[
    DeviceNode {
        path: "dev/console",
        mode: "600",
        major: 5,
        minor: 1,
    },
    DeviceNode {
        path: "dev/null",
        mode: "666",
        major: 1,
        minor: 3,
    },
];

/// How the init program ended up linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    Static,
    Dynamic,
}

/// What a finisher pass created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinishReport {
    pub device_nodes: Vec<String>,
    pub links: Vec<PathBuf>,
    pub init: PathBuf,
    pub linkage: Linkage,
}

/// Post-processes the assembled rootfs.
pub struct Finisher<'a> {
    config: &'a Config,
    runner: &'a dyn Runner,
}

impl<'a> Finisher<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn Runner) -> Self {
        Self { config, runner }
    }

    pub fn finish(&self) -> Result<FinishReport> {
        let rootfs = &self.config.rootfs;
        info!("Finishing rootfs at {}", rootfs.display());

        create_mountpoints(rootfs)?;
        let device_nodes = self.create_device_nodes(rootfs)?;

        let mut links = Vec::new();
        for dir in LIB_DIRS {
            links.extend(link_wide_libraries(&rootfs.join(dir))?);
        }
        if let Some(sh) = link_shell(rootfs)? {
            links.push(sh);
        }

        let (init, linkage) = self.install_init()?;

        info!(
            nodes = device_nodes.len(),
            links = links.len(),
            ?linkage,
            "Rootfs finished"
        );
        Ok(FinishReport {
            device_nodes,
            links,
            init,
            linkage,
        })
    }

    fn create_device_nodes(&self, rootfs: &Path) -> Result<Vec<String>> {
        let mut created = Vec::new();
        for node in DEVICE_NODES {
            let path = rootfs.join(node.path);
            if path.symlink_metadata().is_ok() {
                debug!("{} already present", node.path);
                continue;
            }

            let inv = Invocation::new("mknod", rootfs)
                .arg("-m")
                .arg(node.mode)
                .arg_path(&path)
                .arg("c")
                .arg(node.major.to_string())
                .arg(node.minor.to_string());
            let outcome = self
                .runner
                .run(&inv)
                .map_err(|e| PipelineError::Finisher(format!("could not run mknod: {}", e)))?;
            if !outcome.success() {
                return Err(PipelineError::Finisher(format!(
                    "mknod {} failed (exit {}): {}",
                    node.path,
                    outcome.code,
                    outcome.stderr_trimmed()
                )));
            }
            created.push(node.path.to_string());
        }
        Ok(created)
    }

    /// Compile the init program and install it as `<rootfs>/init`.
    ///
    /// Static linking is tried first; a dynamic build is the fallback. Both
    /// failures are reported if neither works.
    fn install_init(&self) -> Result<(PathBuf, Linkage)> {
        let work = self.config.build_root.join("init");
        fs::create_dir_all(&work)
            .map_err(|e| finisher_io("failed to create init build directory", &work, e))?;

        let source = match &self.config.init_source {
            Some(path) => {
                if !path.is_file() {
                    return Err(PipelineError::Finisher(format!(
                        "init source {} does not exist",
                        path.display()
                    )));
                }
                path.clone()
            }
            None => {
                let path = work.join("init.c");
                fs::write(&path, BUILTIN_INIT)
                    .map_err(|e| finisher_io("failed to write init source", &path, e))?;
                path
            }
        };

        let output = work.join("init");
        if output.exists() {
            fs::remove_file(&output)
                .map_err(|e| finisher_io("failed to remove previous init", &output, e))?;
        }

        let linkage = match self.compile_init(&source, &output, &work, true) {
            Ok(()) => Linkage::Static,
            Err(static_err) => {
                warn!("Static init link failed, trying dynamic: {}", static_err);
                self.compile_init(&source, &output, &work, false)
                    .map_err(|dynamic_err| {
                        PipelineError::Finisher(format!(
                            "init compile failed; static: {}; dynamic: {}",
                            static_err, dynamic_err
                        ))
                    })?;
                Linkage::Dynamic
            }
        };

        let dest = self.config.rootfs.join("init");
        fs::copy(&output, &dest).map_err(|e| finisher_io("failed to install init", &dest, e))?;
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))
            .map_err(|e| finisher_io("failed to set init permissions", &dest, e))?;

        info!(?linkage, "Installed {}", dest.display());
        Ok((dest, linkage))
    }

    /// One compile attempt; the error string carries the compiler's stderr.
    fn compile_init(
        &self,
        source: &Path,
        output: &Path,
        work: &Path,
        link_static: bool,
    ) -> std::result::Result<(), String> {
        let mut inv = Invocation::new(&self.config.cc, work);
        if link_static {
            inv = inv.arg("-static");
        }
        let inv = inv.arg("-O2").arg("-o").arg_path(output).arg_path(source);

        debug!("{}", inv);
        let outcome = self
            .runner
            .run(&inv)
            .map_err(|e| format!("could not run {}: {}", self.config.cc, e))?;
        if !outcome.success() {
            return Err(format!("exit {}: {}", outcome.code, outcome.stderr_trimmed()));
        }
        if !output.is_file() {
            return Err(format!("{} produced no output", self.config.cc));
        }
        Ok(())
    }
}

fn create_mountpoints(rootfs: &Path) -> Result<()> {
    for dir in MOUNTPOINTS {
        let path = rootfs.join(dir);
        fs::create_dir_all(&path).map_err(|e| finisher_io("failed to create mountpoint", &path, e))?;
    }
    Ok(())
}

/// Link `libX.so*` to `libXw.so*` in `dir` for each wide-only library.
///
/// A link is created only when its target exists and nothing occupies the
/// link name. Returns the links created.
pub fn link_wide_libraries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    if !dir.is_dir() {
        return Ok(created);
    }

    for lib in WIDE_LIBS {
        for suffix in LIB_SUFFIXES {
            let target = format!("lib{}w{}", lib, suffix);
            let link = dir.join(format!("lib{}{}", lib, suffix));
            if dir.join(&target).symlink_metadata().is_err() || link.symlink_metadata().is_ok() {
                continue;
            }
            symlink(&target, &link).map_err(|e| finisher_io("failed to create library link", &link, e))?;
            debug!("{} -> {}", link.display(), target);
            created.push(link);
        }
    }
    Ok(created)
}

/// Point `bin/sh` at bash when bash is installed and `sh` is not.
pub fn link_shell(rootfs: &Path) -> Result<Option<PathBuf>> {
    let bash = rootfs.join("bin/bash");
    let sh = rootfs.join("bin/sh");
    if bash.symlink_metadata().is_err() || sh.symlink_metadata().is_ok() {
        return Ok(None);
    }
    symlink("bash", &sh).map_err(|e| finisher_io("failed to create shell link", &sh, e))?;
    Ok(Some(sh))
}

fn finisher_io(context: &str, path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::Finisher(format!("{} {}: {}", context, path.display(), e))
}
