//! Stage definitions - the fixed build order of the system.
//!
//! Later stages compile against what earlier stages installed:
//! 1. linux     - exports kernel headers (`usr/include/linux`)
//! 2. glibc     - built against those headers
//! 3. ncurses   - terminal capability library (wide-character build)
//! 4. bash      - links the terminal library
//! 5. coreutils - core userland
//!
//! The init program is built by the rootfs finisher, not as a stage.

use super::{any_of, autotools, path, remote, BuildSystem, Source, Stage};

pub const LINUX: Stage = Stage {
    name: "linux",
    source: Source::KernelTree,
    src_dir: "",
    build: BuildSystem::Kernel,
    options: &[],
    prefix: "/usr",
    env: &[],
    verify: &[path("usr/include/linux"), path("usr/include/asm")],
};

pub const GLIBC: Stage = Stage {
    name: "glibc",
    source: remote(
        "https://ftp.gnu.org/gnu/glibc/glibc-2.39.tar.xz",
        "glibc-2.39.tar.xz",
    ),
    src_dir: "glibc-2.39",
    // glibc refuses to configure inside its own source tree
    build: BuildSystem::Autotools {
        out_of_tree: true,
        dest_var: "install_root",
    },
    options: &[
        "--disable-werror",
        "--enable-kernel=4.19",
        "--with-headers={rootfs}/usr/include",
        "libc_cv_slibdir=/lib64",
    ],
    prefix: "/usr",
    env: &[],
    verify: &[
        any_of(&["lib64/libc.so.6", "lib/libc.so.6"]),
        path("usr/include/stdio.h"),
    ],
};

pub const NCURSES: Stage = Stage {
    name: "ncurses",
    source: remote(
        "https://ftp.gnu.org/gnu/ncurses/ncurses-6.4.tar.gz",
        "ncurses-6.4.tar.gz",
    ),
    src_dir: "ncurses-6.4",
    build: autotools(),
    options: &[
        "--with-shared",
        "--without-debug",
        "--without-normal",
        "--without-ada",
        "--enable-widec",
        "--enable-pc-files",
    ],
    prefix: "/usr",
    env: &[],
    verify: &[
        any_of(&["usr/lib/libncursesw.so.6", "usr/lib64/libncursesw.so.6"]),
        path("usr/include/curses.h"),
    ],
};

pub const BASH: Stage = Stage {
    name: "bash",
    source: remote(
        "https://ftp.gnu.org/gnu/bash/bash-5.2.21.tar.gz",
        "bash-5.2.21.tar.gz",
    ),
    src_dir: "bash-5.2.21",
    build: autotools(),
    options: &["--bindir=/bin", "--without-bash-malloc", "--with-curses"],
    prefix: "/usr",
    env: &[],
    verify: &[path("bin/bash")],
};

pub const COREUTILS: Stage = Stage {
    name: "coreutils",
    source: remote(
        "https://ftp.gnu.org/gnu/coreutils/coreutils-9.4.tar.xz",
        "coreutils-9.4.tar.xz",
    ),
    src_dir: "coreutils-9.4",
    build: autotools(),
    options: &["--bindir=/bin", "--enable-no-install-program=kill,uptime"],
    prefix: "/usr",
    // configure refuses to run as root otherwise
    env: &[("FORCE_UNSAFE_CONFIGURE", "1")],
    verify: &[path("bin/ls"), path("bin/cat"), path("bin/mkdir")],
};

/// The pipeline, in build order.
pub static STAGES: &[Stage] = &[LINUX, GLIBC, NCURSES, BASH, COREUTILS];
