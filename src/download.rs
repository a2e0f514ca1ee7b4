//! Archive downloads.
//!
//! A failed transfer is reported once and never retried: the pipeline is
//! fail-fast and the operator re-runs it. Callers download into a
//! temporary path and rename on success.

use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

/// Capability to transfer a remote archive to a local path.
pub trait Fetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Download configuration options.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Connect timeout (the transfer itself is unbounded; archives are large)
    pub connect_timeout: Duration,
    /// Whether to show progress on stdout
    pub show_progress: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            show_progress: true,
        }
    }
}

/// Fetches over HTTP(S) with reqwest, on a private tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    pub options: DownloadOptions,
}

impl HttpFetcher {
    pub fn new(options: DownloadOptions) -> Self {
        Self { options }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let rt = tokio::runtime::Runtime::new().context("Failed to start download runtime")?;
        rt.block_on(http(url, dest, &self.options))
    }
}

/// Progress information for display.
#[derive(Debug, Clone)]
pub struct Progress {
    pub downloaded: u64,
    pub total: Option<u64>,
    pub percent: Option<u8>,
}

impl Progress {
    fn new(downloaded: u64, total: Option<u64>) -> Self {
        let percent = total.map(|t| {
            if t > 0 {
                ((downloaded * 100) / t).min(100) as u8
            } else {
                0
            }
        });
        Self {
            downloaded,
            total,
            percent,
        }
    }

    /// Format as human-readable string
    pub fn display(&self) -> String {
        let downloaded_mb = self.downloaded as f64 / (1024.0 * 1024.0);
        match (self.total, self.percent) {
            (Some(total), Some(pct)) => {
                let total_mb = total as f64 / (1024.0 * 1024.0);
                format!("{:.1}/{:.1} MB ({}%)", downloaded_mb, total_mb, pct)
            }
            _ => format!("{:.1} MB", downloaded_mb),
        }
    }
}

/// Download `url` to `dest` in a single attempt.
pub async fn http(url: &str, dest: &Path, options: &DownloadOptions) -> Result<()> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("minidistro/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(options.connect_timeout)
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("HTTP request failed: {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!(
            "HTTP {} for {}: {}",
            status.as_u16(),
            url,
            status.canonical_reason().unwrap_or("Unknown error")
        );
    }

    let total_size = response.content_length();

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut writer = tokio::io::BufWriter::new(file);

    let mut downloaded = 0u64;
    let mut last_percent = 0u8;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("Failed to read chunk from {}", url))?;
        writer
            .write_all(&chunk)
            .await
            .with_context(|| format!("Failed to write to {}", dest.display()))?;
        downloaded += chunk.len() as u64;

        if options.show_progress {
            let progress = Progress::new(downloaded, total_size);
            if let Some(pct) = progress.percent {
                if pct > last_percent {
                    print!("\r    {}", progress.display());
                    std::io::stdout().flush().ok();
                    last_percent = pct;
                }
            }
        }
    }

    writer
        .flush()
        .await
        .with_context(|| format!("Failed to flush {}", dest.display()))?;

    if options.show_progress {
        println!();
    }

    if let Some(expected) = total_size {
        if downloaded != expected {
            bail!(
                "Download incomplete for {}: expected {} bytes, got {} bytes",
                url,
                expected,
                downloaded
            );
        }
    }

    Ok(())
}
