//! Streams report files to disk and makes sure what lands there is a PDF.

use crate::config::DownloadConfig;
use crate::scraper::http_client::{FetchError, HttpClient, RetryPolicy, pause};
use crate::utils::fmt_bytes;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use super::{has_magic, is_valid_pdf};

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// A valid PDF was already on disk; no request was made.
    Skipped,
    Downloaded { bytes: u64 },
    /// The server sent a ZIP; `entry` was extracted in its place.
    Unwrapped { bytes: u64, entry: String },
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("{url} served an HTML page instead of a document (blocked?)")]
    HtmlResponse { url: String },

    #[error("{} is not a PDF, kept as {}", path.display(), quarantined.display())]
    NotPdf { path: PathBuf, quarantined: PathBuf },

    #[error("archive from {url} holds no PDF")]
    ZipWithoutPdf { url: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unreadable archive {}: {source}", path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> DownloadError + '_ {
    move |source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Why a body stream stopped early.
enum StreamFailure {
    Network(reqwest::Error),
    Disk(std::io::Error),
}

pub struct Downloader {
    policy: RetryPolicy,
    timeout: Duration,
    chunk_log_bytes: u64,
}

impl Downloader {
    pub fn new(config: &DownloadConfig, policy: RetryPolicy) -> Self {
        Self {
            policy: policy.with_max_attempts(config.max_attempts),
            timeout: Duration::from_secs(config.timeout_secs),
            chunk_log_bytes: config.chunk_log_bytes.max(1),
        }
    }

    /// Fetch `url` into `folder/filename` with `http` (so the source's cookies
    /// and headers go along).
    ///
    /// A valid PDF already at the destination is left alone. An invalid one is
    /// replaced. HTML content types and bodies that turn out not to be PDFs are
    /// not retried; the latter are renamed to `<stem>.debug.html`.
    pub async fn download(
        &self,
        http: &HttpClient,
        url: &str,
        folder: &Path,
        filename: &str,
    ) -> Result<DownloadOutcome, DownloadError> {
        tokio::fs::create_dir_all(folder).await.map_err(io_err(folder))?;
        let path = folder.join(filename);

        if path.exists() {
            if is_valid_pdf(&path) {
                info!("Skipping {} (already exists & valid)", filename);
                return Ok(DownloadOutcome::Skipped);
            }
            warn!("Re-downloading {} (invalid/corrupt)", filename);
            tokio::fs::remove_file(&path).await.map_err(io_err(&path))?;
        }

        info!("Downloading {}", filename);
        let bytes = self.fetch_to(http, url, &path, filename).await?;

        let mut outcome = DownloadOutcome::Downloaded { bytes };
        if has_magic(&path, ZIP_MAGIC) {
            debug!("{} is a ZIP archive, unwrapping", filename);
            let (entry, bytes) = unwrap_zip(&path, url)?;
            info!("Extracted {} from archive", entry);
            outcome = DownloadOutcome::Unwrapped { bytes, entry };
        }

        if !is_valid_pdf(&path) {
            let quarantined = path.with_extension("debug.html");
            tokio::fs::rename(&path, &quarantined).await.map_err(io_err(&path))?;
            warn!("{} is not a PDF, saved as {:?}", filename, quarantined);
            return Err(DownloadError::NotPdf { path, quarantined });
        }

        info!("Done: {} ({})", filename, fmt_bytes(outcome_bytes(&outcome)));
        Ok(outcome)
    }

    /// Request and stream the body to `path`, restarting when the stream breaks.
    ///
    /// HTTP retries and stream restarts draw on the same attempt budget.
    async fn fetch_to(
        &self,
        http: &HttpClient,
        url: &str,
        path: &Path,
        filename: &str,
    ) -> Result<u64, DownloadError> {
        let timeout = self.timeout;
        let mut last = String::new();
        let mut attempt = 0;

        while attempt < self.policy.max_attempts {
            let (mut resp, used) = http
                .execute_from(&self.policy, attempt, url, |c| c.get(url).timeout(timeout))
                .await?;
            attempt = used + 1;

            let status = resp.status();
            if !status.is_success() {
                return Err(DownloadError::Status {
                    url: url.to_string(),
                    status,
                });
            }

            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_lowercase();
            if content_type.contains("text/html") {
                return Err(DownloadError::HtmlResponse { url: url.to_string() });
            }

            match self.stream(&mut resp, path, filename).await {
                Ok(bytes) => return Ok(bytes),
                Err(failure) => {
                    // Never leave a partial file behind
                    let _ = tokio::fs::remove_file(path).await;
                    match failure {
                        StreamFailure::Disk(source) => {
                            return Err(DownloadError::Io {
                                path: path.to_path_buf(),
                                source,
                            });
                        }
                        StreamFailure::Network(e) => {
                            warn!("Stream of {} broke on attempt {}: {}", filename, attempt, e);
                            last = e.to_string();
                            if attempt < self.policy.max_attempts {
                                pause(self.policy.network_error_delay).await;
                            }
                        }
                    }
                }
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: self.policy.max_attempts,
            last,
        }
        .into())
    }

    async fn stream(
        &self,
        resp: &mut reqwest::Response,
        path: &Path,
        filename: &str,
    ) -> Result<u64, StreamFailure> {
        let mut file = tokio::fs::File::create(path).await.map_err(StreamFailure::Disk)?;
        let mut written = 0u64;
        let mut logged_marks = 0u64;

        while let Some(chunk) = resp.chunk().await.map_err(StreamFailure::Network)? {
            file.write_all(&chunk).await.map_err(StreamFailure::Disk)?;
            written += chunk.len() as u64;

            let marks = written / self.chunk_log_bytes;
            if marks > logged_marks {
                logged_marks = marks;
                debug!("{} - {}", filename, fmt_bytes(written));
            }
        }

        file.flush().await.map_err(StreamFailure::Disk)?;
        Ok(written)
    }
}

fn outcome_bytes(outcome: &DownloadOutcome) -> u64 {
    match outcome {
        DownloadOutcome::Skipped => 0,
        DownloadOutcome::Downloaded { bytes } | DownloadOutcome::Unwrapped { bytes, .. } => *bytes,
    }
}

/// Replace the archive at `path` with its first `.pdf` entry.
fn unwrap_zip(path: &Path, url: &str) -> Result<(String, u64), DownloadError> {
    let zip_err = |source| DownloadError::Zip {
        path: path.to_path_buf(),
        source,
    };

    let file = std::fs::File::open(path).map_err(io_err(path))?;
    let mut archive = ZipArchive::new(file).map_err(zip_err)?;

    let Some(name) = archive
        .file_names()
        .find(|n| n.to_lowercase().ends_with(".pdf"))
        .map(str::to_string)
    else {
        drop(archive);
        std::fs::remove_file(path).map_err(io_err(path))?;
        return Err(DownloadError::ZipWithoutPdf { url: url.to_string() });
    };

    let mut contents = Vec::new();
    archive
        .by_name(&name)
        .map_err(zip_err)?
        .read_to_end(&mut contents)
        .map_err(io_err(path))?;
    drop(archive);

    std::fs::write(path, &contents).map_err(io_err(path))?;
    Ok((name, contents.len() as u64))
}
