//! Source provisioner.
//!
//! Guarantees a stage's source is on local disk before the executor runs.
//! A cached archive is never fetched again, which is what makes repeated
//! pipeline runs cheap.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::Config;
use crate::download::Fetcher;
use crate::error::{PipelineError, Result};
use crate::stage::{Source, Stage};

/// Ensures stage sources exist in the sources cache.
pub struct Provisioner<'a> {
    config: &'a Config,
    fetcher: &'a dyn Fetcher,
    offline: bool,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a Config, fetcher: &'a dyn Fetcher) -> Self {
        Self {
            config,
            fetcher,
            offline: false,
        }
    }

    /// Treat every source as pre-staged: never fetch.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Return the local source path, fetching it first if needed.
    pub fn provision(&self, stage: &Stage) -> Result<PathBuf> {
        let path = source_path(self.config, stage);

        match stage.source {
            Source::KernelTree => {
                if path.join("Makefile").is_file() {
                    debug!(stage = stage.name, "kernel tree at {}", path.display());
                    Ok(path)
                } else {
                    Err(PipelineError::MissingSource {
                        stage: stage.name.to_string(),
                        path,
                    })
                }
            }
            Source::Local { .. } | Source::Remote { .. } if path.is_file() => {
                debug!(stage = stage.name, "cached {}", path.display());
                Ok(path)
            }
            Source::Remote { url, .. } if !self.offline => {
                self.fetch(stage, url, &path)?;
                Ok(path)
            }
            Source::Local { .. } | Source::Remote { .. } => Err(PipelineError::MissingSource {
                stage: stage.name.to_string(),
                path,
            }),
        }
    }

    fn fetch(&self, stage: &Stage, url: &str, path: &Path) -> Result<()> {
        let partial = partial_path(path);
        let fetch_error = |reason: String| PipelineError::Fetch {
            stage: stage.name.to_string(),
            url: url.to_string(),
            reason,
        };

        if partial.exists() {
            fs::remove_file(&partial).map_err(|e| fetch_error(format!("stale partial download: {}", e)))?;
        }

        info!(stage = stage.name, "Downloading {}", url);
        if let Err(e) = self.fetcher.fetch(url, &partial) {
            let _ = fs::remove_file(&partial);
            return Err(fetch_error(format!("{:#}", e)));
        }
        if !partial.is_file() {
            return Err(fetch_error("transfer produced no file".to_string()));
        }

        fs::rename(&partial, path).map_err(|e| fetch_error(format!("failed to move into cache: {}", e)))?;
        match sha256_file(path) {
            Ok(digest) => info!(stage = stage.name, sha256 = %digest, "Cached {}", path.display()),
            Err(e) => debug!(stage = stage.name, "could not hash {}: {}", path.display(), e),
        }
        Ok(())
    }
}

/// Local path a stage's source is expected at.
pub fn source_path(config: &Config, stage: &Stage) -> PathBuf {
    match stage.source {
        Source::KernelTree => config.kernel_source.clone(),
        Source::Local { file } | Source::Remote { file, .. } => config.sources.join(file),
    }
}

/// Download target used until the transfer completes.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// SHA-256 of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
