//! Kernel stage.
//!
//! The kernel is built out-of-tree from the pre-existing source tree in the
//! manifest; the tree itself is never written. Besides the header export
//! into the rootfs, the stage produces a timestamped copy of the boot image
//! that is kept across builds.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{info, warn};

use super::executor::{Journal, StageExecutor, StageOutput};
use super::{Stage, Step};
use crate::error::{PipelineError, Result};

/// Files `headers_install` leaves behind that confuse other build systems.
/// Kernels before 5.3 also run `headers_check`, which leaves the `.check`
/// pair.
pub const HEADER_METADATA: &[&str] = &[".install", "..install.cmd", ".check", "..check.cmd"];

pub(super) fn build(
    exec: &StageExecutor<'_>,
    stage: &Stage,
    tree: &Path,
    build_dir: &Path,
    journal: &mut Journal<'_>,
) -> Result<StageOutput> {
    let config = exec.config;

    // Out-of-tree object directory stands in for extraction.
    let obj = build_dir.join("obj");
    fs::create_dir_all(&obj)
        .map_err(|e| PipelineError::io(stage.name, "failed to create kernel object directory", e))?;
    journal.note(Step::Extract, &format!("object directory {}", obj.display()))?;

    let make = || {
        exec.invocation(stage, "make", build_dir)
            .arg("-C")
            .arg_path(tree)
            .arg(format!("O={}", obj.display()))
    };

    if config.kernel_config.is_file() {
        info!(stage = stage.name, "Restoring saved config {}", config.kernel_config.display());
        fs::copy(&config.kernel_config, obj.join(".config"))
            .map_err(|e| PipelineError::io(stage.name, "failed to restore saved kernel config", e))?;
        journal.note(
            Step::Configure,
            &format!("restored {}", config.kernel_config.display()),
        )?;
        exec.step(stage, Step::Configure, &make().arg("olddefconfig"), journal)?;
    } else {
        info!(stage = stage.name, "No saved config, generating defconfig");
        exec.step(stage, Step::Configure, &make().arg("defconfig"), journal)?;
    }

    exec.step(
        stage,
        Step::Compile,
        &make().arg(format!("-j{}", config.jobs)),
        journal,
    )?;

    let image = boot_image_path(&obj);
    if !image.is_file() {
        return Err(PipelineError::io(
            stage.name,
            format!("compile produced no boot image at {}", image.display()),
            io::Error::from(io::ErrorKind::NotFound),
        ));
    }
    let archived = archive_boot_image(&image, &config.boot_archive, Local::now())
        .map_err(|e| PipelineError::io(stage.name, "failed to archive boot image", e))?;
    info!(stage = stage.name, "Boot image archived as {}", archived.display());
    journal.note(Step::Compile, &format!("boot image archived as {}", archived.display()))?;

    let hdr_path = config.rootfs.join(stage.prefix.trim_start_matches('/'));
    exec.step(
        stage,
        Step::Install,
        &make()
            .arg("headers_install")
            .arg(format!("INSTALL_HDR_PATH={}", hdr_path.display())),
        journal,
    )?;

    let include = hdr_path.join("include");
    let removed = sanitize_headers(&include)
        .map_err(|e| PipelineError::io(stage.name, "failed to sanitize exported headers", e))?;
    if removed > 0 {
        journal.note(
            Step::Install,
            &format!("removed {} header metadata files", removed),
        )?;
    }

    Ok(StageOutput {
        boot_image: Some(archived),
        sanitized: removed,
    })
}

/// Location of the compiled boot image inside the object directory.
pub fn boot_image_path(obj: &Path) -> PathBuf {
    match std::env::consts::ARCH {
        "aarch64" => obj.join("arch/arm64/boot/Image"),
        "riscv64" => obj.join("arch/riscv/boot/Image"),
        _ => obj.join("arch/x86/boot/bzImage"),
    }
}

/// Copy `image` into `archive_dir` under a timestamped name.
///
/// Never overwrites: a second build within the same second gets a numeric
/// suffix.
pub fn archive_boot_image(image: &Path, archive_dir: &Path, now: DateTime<Local>) -> io::Result<PathBuf> {
    let stem = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bzImage".to_string());
    let stamp = now.format("%Y%m%d-%H%M%S").to_string();

    fs::create_dir_all(archive_dir)?;
    let mut dest = archive_dir.join(format!("{}-{}", stem, stamp));
    let mut n = 1;
    while dest.exists() {
        dest = archive_dir.join(format!("{}-{}-{}", stem, stamp, n));
        n += 1;
    }
    fs::copy(image, &dest)?;
    Ok(dest)
}

/// Delete build-system metadata from an exported header tree.
///
/// Returns the number of files removed. A missing tree is not an error
/// here; the verification gate reports it.
pub fn sanitize_headers(include: &Path) -> io::Result<usize> {
    if !include.exists() {
        warn!("No exported headers at {}", include.display());
        return Ok(0);
    }

    let mut removed = 0;
    for entry in walkdir::WalkDir::new(include) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if HEADER_METADATA.iter().any(|m| name == *m) {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
