//! Build environment checks (privileges, manifest paths, inputs).

use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::provision::source_path;
use crate::stage::{Source, STAGES};

use super::types::CheckResult;

/// Device nodes can only be created by root.
pub fn check_privileges() -> CheckResult {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        CheckResult::pass("root privileges")
    } else {
        CheckResult::fail(
            "root privileges",
            format!("running as uid {}; mknod for /dev nodes requires root", euid),
        )
    }
}

/// Check manifest directories and build inputs.
pub fn check_build_environment(config: &Config) -> Vec<CheckResult> {
    let mut results = vec![
        check_writable("SOURCES_DIR", &config.sources),
        check_writable("BUILD_DIR", &config.build_root),
        check_writable("ROOTFS_DIR", &config.rootfs),
        check_writable("BOOT_ARCHIVE_DIR", &config.boot_archive),
    ];

    if config.has_kernel_source() {
        results.push(CheckResult::pass_with(
            "kernel source",
            config.kernel_source.display().to_string(),
        ));
    } else {
        results.push(CheckResult::fail(
            "kernel source",
            format!(
                "No Makefile in {} - set KERNEL_SOURCE to a Linux tree",
                config.kernel_source.display()
            ),
        ));
    }

    if config.kernel_config.is_file() {
        results.push(CheckResult::pass_with(
            "kernel config",
            config.kernel_config.display().to_string(),
        ));
    } else {
        results.push(CheckResult::warn(
            "kernel config",
            "No saved config - defconfig will be generated",
        ));
    }

    match &config.init_source {
        Some(path) if path.is_file() => {
            results.push(CheckResult::pass_with("init source", path.display().to_string()))
        }
        Some(path) => results.push(CheckResult::fail(
            "init source",
            format!("INIT_SOURCE {} does not exist", path.display()),
        )),
        None => results.push(CheckResult::pass_with("init source", "built-in")),
    }

    for stage in STAGES.iter().filter(|s| s.source != Source::KernelTree) {
        let name = format!("{} source", stage.name);
        let path = source_path(config, stage);
        if path.is_file() {
            results.push(CheckResult::pass_with(name, "cached"));
        } else if let Some(url) = stage.source.url() {
            results.push(CheckResult::warn(name, format!("not cached, will fetch {}", url)));
        } else {
            results.push(CheckResult::fail(
                name,
                format!("{} missing and no download location", path.display()),
            ));
        }
    }

    results
}

/// A directory is usable if it exists (or can be created) and accepts writes.
fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::fail(name, format!("Cannot create {}: {}", dir.display(), e));
    }
    let marker = dir.join(".preflight-test");
    match fs::write(&marker, "test") {
        Ok(()) => {
            let _ = fs::remove_file(&marker);
            CheckResult::pass_with(name, dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, format!("Cannot write to {}: {}", dir.display(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::types::CheckStatus;

    #[test]
    fn writable_dir_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a/b");
        assert_eq!(check_writable("X", &dir).status, CheckStatus::Pass);
        assert!(dir.is_dir());
        assert!(!dir.join(".preflight-test").exists());
    }

    #[test]
    fn file_in_the_way_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        fs::write(&file, "").unwrap();
        assert_eq!(check_writable("X", &file).status, CheckStatus::Fail);
    }
}
