//! Verification gate.
//!
//! A stage counts as complete only after every path it declares exists in
//! the rootfs. Exit status alone is not trusted: a package that installs
//! into the wrong place still exits zero.

use std::path::Path;

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::stage::{Expect, Stage};

/// Whether `expect` is satisfied under `rootfs`.
///
/// Symlinks count as present even when dangling; the finisher creates
/// relative links whose targets only resolve from inside the image.
pub fn satisfied(expect: &Expect, rootfs: &Path) -> bool {
    let present = |p: &str| rootfs.join(p).symlink_metadata().is_ok();
    match *expect {
        Expect::Path(p) => present(p),
        Expect::AnyOf(paths) => paths.iter().any(|&p| present(p)),
    }
}

/// Check every expected path of `stage`. Returns the number checked.
pub fn verify_stage(stage: &Stage, rootfs: &Path) -> Result<usize> {
    for expect in stage.verify {
        if !satisfied(expect, rootfs) {
            return Err(PipelineError::Verification {
                stage: stage.name.to_string(),
                missing: expect.to_string(),
            });
        }
        debug!(stage = stage.name, "verified {}", expect);
    }
    Ok(stage.verify.len())
}
