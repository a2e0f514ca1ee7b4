//! Build artifact cleaning.
//!
//! The sources cache and the boot image archive are never touched: the
//! first is expensive to refill, the second is a history of builds.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Config;

/// Remove every stage build directory.
pub fn clean_build(config: &Config) -> Result<bool> {
    remove_tree("build root", &config.build_root)
}

/// Remove the target rootfs.
pub fn clean_rootfs(config: &Config) -> Result<bool> {
    remove_tree("rootfs", &config.rootfs)
}

/// Clean build root and rootfs (sources and boot images preserved).
pub fn clean_all(config: &Config) -> Result<bool> {
    let build = clean_build(config)?;
    let rootfs = clean_rootfs(config)?;
    Ok(build || rootfs)
}

fn remove_tree(what: &str, dir: &Path) -> Result<bool> {
    if !dir.exists() {
        println!("No {} to clean.", what);
        return Ok(false);
    }
    println!("Removing {} {}...", what, dir.display());
    fs::remove_dir_all(dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
    Ok(true)
}
