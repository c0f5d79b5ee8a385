//! On-disk layout of everything the pipeline writes.
//!
//! ```text
//! <root>/<source host>/<company>/<year>_<description>.pdf
//!                               /BRSR/ Sustainability/ Benchmarks/
//!                               /News/<prefix>_<YYYYMMDD>.json
//!                               /Social/<prefix>_<YYYYMMDD>.json
//! ```
//!
//! The company component is the sanitized user query, so a later `analyze`
//! run finds the same folders without repeating the search.

pub mod downloader;

use crate::scraper::cleaner::sanitize_filename;
use anyhow::{Context, Result, bail};
use chrono::Local;
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub use downloader::{DownloadOutcome, Downloader};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Sub-folder of a company directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Reports,
    Brsr,
    Sustainability,
    Benchmarks,
    News,
    Social,
}

impl Section {
    fn dir_name(self) -> Option<&'static str> {
        match self {
            Section::Reports => None,
            Section::Brsr => Some("BRSR"),
            Section::Sustainability => Some("Sustainability"),
            Section::Benchmarks => Some("Benchmarks"),
            Section::News => Some("News"),
            Section::Social => Some("Social"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn company_dir(&self, source: &str, company: &str) -> PathBuf {
        self.root.join(source).join(sanitize_filename(company))
    }

    pub fn section_dir(&self, source: &str, company: &str, section: Section) -> PathBuf {
        let dir = self.company_dir(source, company);
        match section.dir_name() {
            Some(name) => dir.join(name),
            None => dir,
        }
    }

    /// Every `<root>/<source>/<company>` directory that exists, sorted.
    pub fn existing_company_dirs(&self, company: &str) -> Result<Vec<PathBuf>> {
        let folder = company_folder(company)?;
        if !self.root.exists() {
            return Ok(vec![]);
        }
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("Could not list {:?}", self.root))?
        {
            let candidate = entry?.path().join(&folder);
            if candidate.is_dir() {
                dirs.push(candidate);
            }
        }
        dirs.sort();
        Ok(dirs)
    }
}

/// Folder name for `company`. A name with nothing left after sanitizing is
/// rejected, since it would address the source folder itself.
pub fn company_folder(company: &str) -> Result<String> {
    let folder = sanitize_filename(company);
    if folder.is_empty() {
        bail!("Company name {:?} has no usable characters", company);
    }
    Ok(folder)
}

/// True iff the file starts with `%PDF`. Missing or short files are not PDFs.
pub fn is_valid_pdf(path: &Path) -> bool {
    has_magic(path, PDF_MAGIC)
}

pub(crate) fn has_magic(path: &Path, magic: &[u8; 4]) -> bool {
    let mut header = [0u8; 4];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut header))
        .map(|_| &header == magic)
        .unwrap_or(false)
}

/// Write `items` as pretty JSON to `<dir>/<prefix>_<YYYYMMDD>.json`.
///
/// Nothing is written for an empty list; returns the path when a file was written.
pub fn write_snapshot<T: Serialize>(
    dir: &Path,
    prefix: &str,
    items: &[T],
) -> Result<Option<PathBuf>> {
    if items.is_empty() {
        debug!("No {} items, snapshot skipped", prefix);
        return Ok(None);
    }

    std::fs::create_dir_all(dir).with_context(|| format!("Could not create dir {:?}", dir))?;
    let path = dir.join(format!("{}_{}.json", prefix, Local::now().format("%Y%m%d")));
    let json = serde_json::to_string_pretty(items).context("Snapshot did not serialize")?;
    std::fs::write(&path, json).with_context(|| format!("Could not write {:?}", path))?;

    info!("Saved {} items to {:?}", items.len(), path);
    Ok(Some(path))
}
