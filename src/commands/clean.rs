//! Clean command - removes build artifacts.

use anyhow::Result;

use crate::clean;
use crate::config::Config;

/// Clean target for the clean command.
pub enum CleanTarget {
    /// Stage build directories (default)
    Build,
    /// Target rootfs
    Rootfs,
    /// Build directories and rootfs
    All,
}

/// Execute the clean command.
pub fn cmd_clean(config: &Config, target: CleanTarget) -> Result<()> {
    let cleaned = match target {
        CleanTarget::Build => clean::clean_build(config)?,
        CleanTarget::Rootfs => clean::clean_rootfs(config)?,
        CleanTarget::All => clean::clean_all(config)?,
    };
    if cleaned {
        println!("Clean complete (sources and boot images preserved).");
    }
    Ok(())
}
