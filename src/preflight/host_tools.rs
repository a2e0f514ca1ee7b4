//! Host tool availability checks.

use crate::config::Config;
use crate::process;

use super::types::CheckResult;

/// Tools every stage or the finisher invokes, with the package that ships them.
const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("make", "make", "Drives every stage's build system"),
    ("tar", "tar", "Unpacks source archives"),
    ("xz", "xz", "Decompresses .tar.xz archives"),
    ("mknod", "coreutils", "Creates /dev/console and /dev/null"),
];

/// Needed by the kernel build only.
const KERNEL_TOOLS: &[(&str, &str, &str)] = &[
    ("bc", "bc", "Used by the kernel build"),
    ("flex", "flex", "Used by the kernel config parser"),
    ("bison", "bison", "Used by the kernel config parser"),
];

/// Check host tools are installed.
pub fn check_host_tools(config: &Config) -> Vec<CheckResult> {
    let mut results: Vec<CheckResult> = REQUIRED_TOOLS
        .iter()
        .map(|(tool, package, purpose)| check_tool(tool, package, purpose, true))
        .collect();

    results.push(check_tool(
        &config.cc,
        "gcc",
        "Compiles the init program (set CC to override)",
        true,
    ));

    results.extend(
        KERNEL_TOOLS
            .iter()
            .map(|(tool, package, purpose)| check_tool(tool, package, purpose, false)),
    );

    results
}

/// Check if a tool exists in PATH.
fn check_tool(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, path),
        None => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, msg)
            } else {
                CheckResult::warn(tool, msg)
            }
        }
    }
}
