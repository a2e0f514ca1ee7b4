//! Environment manifest: the fixed set of paths every component works in.
//!
//! Reads configuration from a `.env` file and environment variables.
//! Environment variables take precedence over the `.env` file. Anything not
//! set falls back to a conventional layout under `~/minidistro/`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Directory under the home directory holding the default layout.
pub const DEFAULT_ROOT: &str = "minidistro";

/// Resolved build environment. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Config {
    /// Package archive cache (`SOURCES_DIR`)
    pub sources: PathBuf,
    /// Parent of the per-stage build directories (`BUILD_DIR`)
    pub build_root: PathBuf,
    /// Pre-existing kernel source tree (`KERNEL_SOURCE`)
    pub kernel_source: PathBuf,
    /// Target root filesystem (`ROOTFS_DIR`)
    pub rootfs: PathBuf,
    /// Timestamped boot images (`BOOT_ARCHIVE_DIR`)
    pub boot_archive: PathBuf,
    /// Saved kernel configuration, restored when present (`KERNEL_CONFIG`)
    pub kernel_config: PathBuf,
    /// Init program source; the built-in one is used when unset (`INIT_SOURCE`)
    pub init_source: Option<PathBuf>,
    /// C compiler for the init program (`CC`)
    pub cc: String,
    /// Compile concurrency (`JOBS`, default: host processing units)
    pub jobs: usize,
}

impl Config {
    /// Load configuration from `.env` (current directory) and the environment.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self::from_vars(std::env::vars(), &cwd, &home)
    }

    /// Build a configuration from explicit variables.
    ///
    /// Relative path overrides resolve against `cwd`; defaults live under
    /// `home/minidistro`.
    pub fn from_vars<I>(vars: I, cwd: &Path, home: &Path) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let root = home.join(DEFAULT_ROOT);

        let path_var = |key: &str, default: PathBuf| -> PathBuf {
            match vars.get(key).filter(|v| !v.is_empty()) {
                Some(s) => {
                    let path = PathBuf::from(s);
                    if path.is_absolute() {
                        path
                    } else {
                        cwd.join(path)
                    }
                }
                None => default,
            }
        };

        let sources = path_var("SOURCES_DIR", root.join("sources"));
        let build_root = path_var("BUILD_DIR", root.join("build"));
        let kernel_source = path_var("KERNEL_SOURCE", root.join("linux"));
        let rootfs = path_var("ROOTFS_DIR", root.join("rootfs"));
        let boot_archive = path_var("BOOT_ARCHIVE_DIR", root.join("boot-images"));
        let kernel_config = path_var("KERNEL_CONFIG", sources.join("kernel.config"));
        let init_source = vars
            .get("INIT_SOURCE")
            .filter(|v| !v.is_empty())
            .map(|_| path_var("INIT_SOURCE", PathBuf::new()));

        let cc = vars
            .get("CC")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| "cc".to_string());

        let jobs = match vars.get("JOBS").map(|j| j.parse::<usize>()) {
            Some(Ok(n)) if n > 0 => n,
            Some(_) => {
                warn!("Ignoring invalid JOBS value, using host CPU count");
                host_jobs()
            }
            None => host_jobs(),
        };

        Self {
            sources,
            build_root,
            kernel_source,
            rootfs,
            boot_archive,
            kernel_config,
            init_source,
            cc,
            jobs,
        }
    }

    /// Create every directory the pipeline writes into.
    ///
    /// The kernel source tree is consumed, not created; its absence is
    /// reported by the source provisioner for the kernel stage.
    pub fn prepare(&self) -> Result<()> {
        let dirs = [
            ("sources", &self.sources),
            ("build", &self.build_root),
            ("rootfs", &self.rootfs),
            ("boot archive", &self.boot_archive),
        ];
        for (role, path) in dirs {
            fs::create_dir_all(path).map_err(|source| PipelineError::Manifest {
                role,
                path: path.clone(),
                source,
            })?;
            debug!(role, path = %path.display(), "manifest directory ready");
        }
        Ok(())
    }

    /// Build directory owned by one stage.
    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.build_root.join(stage)
    }

    /// Check if the kernel source tree is available.
    pub fn has_kernel_source(&self) -> bool {
        self.kernel_source.join("Makefile").exists()
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  SOURCES_DIR:      {}", self.sources.display());
        println!("  BUILD_DIR:        {}", self.build_root.display());
        println!("  KERNEL_SOURCE:    {}", self.kernel_source.display());
        println!("  ROOTFS_DIR:       {}", self.rootfs.display());
        println!("  BOOT_ARCHIVE_DIR: {}", self.boot_archive.display());
        println!("  KERNEL_CONFIG:    {}", self.kernel_config.display());
        match &self.init_source {
            Some(p) => println!("  INIT_SOURCE:      {}", p.display()),
            None => println!("  INIT_SOURCE:      (built-in)"),
        }
        println!("  CC:               {}", self.cc);
        println!("  JOBS:             {}", self.jobs);
        if self.has_kernel_source() {
            println!("  Kernel source: FOUND");
        } else {
            println!("  Kernel source: NOT FOUND (set KERNEL_SOURCE to a Linux tree)");
        }
        if self.kernel_config.exists() {
            println!("  Kernel config: saved config will be restored");
        } else {
            println!("  Kernel config: none saved, defconfig will be generated");
        }
    }
}

fn host_jobs() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
            warn!("Could not detect CPU count ({}), using 4 jobs", e);
            4
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_live_under_home() {
        let config = Config::from_vars(vars(&[]), Path::new("/work"), Path::new("/home/op"));
        assert_eq!(config.sources, PathBuf::from("/home/op/minidistro/sources"));
        assert_eq!(config.build_root, PathBuf::from("/home/op/minidistro/build"));
        assert_eq!(config.kernel_source, PathBuf::from("/home/op/minidistro/linux"));
        assert_eq!(config.rootfs, PathBuf::from("/home/op/minidistro/rootfs"));
        assert_eq!(
            config.kernel_config,
            PathBuf::from("/home/op/minidistro/sources/kernel.config")
        );
        assert!(config.init_source.is_none());
        assert_eq!(config.cc, "cc");
        assert!(config.jobs >= 1);
    }

    #[test]
    fn overrides_resolve_relative_paths() {
        let config = Config::from_vars(
            vars(&[
                ("SOURCES_DIR", "cache"),
                ("ROOTFS_DIR", "/srv/rootfs"),
                ("INIT_SOURCE", "init/init.c"),
                ("JOBS", "3"),
                ("CC", "musl-gcc"),
            ]),
            Path::new("/work"),
            Path::new("/home/op"),
        );
        assert_eq!(config.sources, PathBuf::from("/work/cache"));
        assert_eq!(config.rootfs, PathBuf::from("/srv/rootfs"));
        // kernel config default follows the sources override
        assert_eq!(config.kernel_config, PathBuf::from("/work/cache/kernel.config"));
        assert_eq!(config.init_source, Some(PathBuf::from("/work/init/init.c")));
        assert_eq!(config.jobs, 3);
        assert_eq!(config.cc, "musl-gcc");
    }

    #[test]
    fn invalid_jobs_falls_back_to_host() {
        let config = Config::from_vars(
            vars(&[("JOBS", "zero")]),
            Path::new("/work"),
            Path::new("/home/op"),
        );
        assert!(config.jobs >= 1);
    }

    #[test]
    fn prepare_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::from_vars(vars(&[]), tmp.path(), tmp.path());
        config.prepare().unwrap();
        assert!(config.sources.is_dir());
        assert!(config.build_root.is_dir());
        assert!(config.rootfs.is_dir());
        assert!(config.boot_archive.is_dir());
        // consumed, never created
        assert!(!config.kernel_source.exists());
    }

    #[test]
    fn prepare_fails_when_path_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let config = Config::from_vars(
            vars(&[("BUILD_DIR", blocker.to_str().unwrap())]),
            tmp.path(),
            tmp.path(),
        );
        let err = config.prepare().unwrap_err();
        assert!(matches!(err, PipelineError::Manifest { role: "build", .. }));
    }
}
