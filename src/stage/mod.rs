//! Declarative stage system.
//!
//! Each package build is described as static data: where its source comes
//! from, how its build system is driven, and which installed paths prove
//! that it worked. The executor interprets these definitions.
//!
//! ```text
//! Stage Definition (DATA)            →     Executor (LOGIC)
//! ───────────────────────────              ─────────────────
//! BASH = Stage {                           clean(build_dir)
//!   source: remote(url, file),             tar -xf archive
//!   options: ["--bindir=/bin", ...],       ./configure --prefix=/usr ...
//!   verify: [path("bin/bash")],            make -jN
//! }                                        make install DESTDIR=rootfs
//! ```
//!
//! The order of [`definitions::STAGES`] is the build order. It is never
//! computed, sorted or reordered.

pub mod definitions;
pub mod executor;
pub mod kernel;

pub use definitions::STAGES;
pub use executor::{StageExecutor, StageOutput};

use std::fmt;

use serde::Serialize;

/// Where a stage's source comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The pre-existing kernel source tree from the manifest, used in place.
    KernelTree,
    /// Archive in the sources cache, pre-staged by the operator.
    Local { file: &'static str },
    /// Archive fetched from `url` into the sources cache when absent.
    Remote {
        url: &'static str,
        file: &'static str,
    },
}

impl Source {
    /// Cache filename for archive sources.
    pub fn file(&self) -> Option<&'static str> {
        match self {
            Source::KernelTree => None,
            Source::Local { file } | Source::Remote { file, .. } => Some(*file),
        }
    }

    /// Download location, if one is declared.
    pub fn url(&self) -> Option<&'static str> {
        match self {
            Source::Remote { url, .. } => Some(*url),
            _ => None,
        }
    }
}

/// How a stage's own build system is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSystem {
    /// Kbuild: out-of-tree object directory, header export, boot image.
    Kernel,
    /// `configure && make && make install`.
    Autotools {
        /// Configure from a separate `build/` directory instead of the source tree.
        out_of_tree: bool,
        /// Make variable that redirects the install into the rootfs.
        dest_var: &'static str,
    },
}

/// One expected install artifact, relative to the target rootfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// This path must exist.
    Path(&'static str),
    /// At least one of these paths must exist.
    AnyOf(&'static [&'static str]),
}

impl fmt::Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expect::Path(p) => write!(f, "{}", p),
            Expect::AnyOf(paths) => write!(f, "{}", paths.join(" | ")),
        }
    }
}

/// One package build within the pipeline.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Unique identifier; also the build subdirectory name.
    pub name: &'static str,
    pub source: Source,
    /// Top-level directory the archive extracts to.
    pub src_dir: &'static str,
    pub build: BuildSystem,
    /// Passed to the package's configure step, in order.
    /// `{rootfs}` expands to the target rootfs path.
    pub options: &'static [&'static str],
    /// Install prefix inside the rootfs.
    pub prefix: &'static str,
    /// Extra environment for every step of this stage.
    pub env: &'static [(&'static str, &'static str)],
    /// Paths that must exist in the rootfs after install.
    pub verify: &'static [Expect],
}

/// Steps of a stage's lifecycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Step {
    Clean = 1,
    Extract = 2,
    Configure = 3,
    Compile = 4,
    Install = 5,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Clean => write!(f, "clean"),
            Step::Extract => write!(f, "extract"),
            Step::Configure => write!(f, "configure"),
            Step::Compile => write!(f, "compile"),
            Step::Install => write!(f, "install"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper functions for readable stage definitions
// ─────────────────────────────────────────────────────────────────────────────

/// Archive fetched from `url` when not cached as `file`.
pub const fn remote(url: &'static str, file: &'static str) -> Source {
    Source::Remote { url, file }
}

/// Archive that must already be in the cache.
pub const fn local(file: &'static str) -> Source {
    Source::Local { file }
}

/// A required path.
pub const fn path(p: &'static str) -> Expect {
    Expect::Path(p)
}

/// A path with alternatives.
pub const fn any_of(paths: &'static [&'static str]) -> Expect {
    Expect::AnyOf(paths)
}

/// In-tree autotools build installed with `DESTDIR`.
pub const fn autotools() -> BuildSystem {
    BuildSystem::Autotools {
        out_of_tree: false,
        dest_var: "DESTDIR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_ordering_matches_lifecycle() {
        let steps = [
            Step::Clean,
            Step::Extract,
            Step::Configure,
            Step::Compile,
            Step::Install,
        ];
        for pair in steps.windows(2) {
            assert!(pair[0] < pair[1], "{} must come before {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn step_size() {
        assert_eq!(std::mem::size_of::<Step>(), 1, "Step should be 1 byte (repr(u8))");
    }

    #[test]
    fn expect_display_lists_alternatives() {
        assert_eq!(path("bin/bash").to_string(), "bin/bash");
        assert_eq!(
            any_of(&["lib/libc.so.6", "lib64/libc.so.6"]).to_string(),
            "lib/libc.so.6 | lib64/libc.so.6"
        );
    }

    #[test]
    fn source_accessors() {
        let s = remote("https://example.org/a.tar.gz", "a.tar.gz");
        assert_eq!(s.file(), Some("a.tar.gz"));
        assert_eq!(s.url(), Some("https://example.org/a.tar.gz"));
        assert_eq!(local("b.tar.xz").url(), None);
        assert_eq!(Source::KernelTree.file(), None);
    }
}
