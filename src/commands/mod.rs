//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Run the stage pipeline and finish the rootfs
//! - `clean` - Remove build directories and/or the rootfs
//! - `show` - Display configuration or stages
//! - `download` - Provision sources without building
//! - `preflight` - Run preflight checks

pub mod build;
pub mod clean;
pub mod download;
mod preflight;
pub mod show;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use download::cmd_download;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
