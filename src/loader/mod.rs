//! PDF text loader: one string per page, plus discovery of downloaded reports.

use anyhow::Result;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Text of every page of `path`, index-aligned with the document's pages.
///
/// Unreadable or corrupt files yield an empty list: "nothing to analyze".
pub fn extract_pages(path: &Path) -> Vec<String> {
    debug!("Extracting text from {:?}", path);

    // The PDF parser panics on some malformed inputs
    let result = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_by_pages(path)));

    match result {
        Ok(Ok(pages)) => {
            info!("{:?}: {} pages", path.file_name().unwrap_or_default(), pages.len());
            pages
        }
        Ok(Err(e)) => {
            warn!("Could not read {:?}: {}", path, e);
            Vec::new()
        }
        Err(_) => {
            warn!("PDF parser crashed on {:?}", path);
            Vec::new()
        }
    }
}

/// All `.pdf` files under `dir`, recursively, sorted by path.
pub fn discover_pdf_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
            {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_has_no_pages() {
        let dir = tempfile::tempdir().unwrap();
        assert!(extract_pages(&dir.path().join("nope.pdf")).is_empty());
    }

    #[test]
    fn garbage_file_has_no_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.pdf");
        std::fs::write(&path, b"%PDF-1.4 this is not really a pdf").unwrap();
        assert!(extract_pages(&path).is_empty());
    }

    #[test]
    fn discovers_pdfs_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("BRSR")).unwrap();
        std::fs::write(root.join("2022_Annual Report.pdf"), b"%PDF").unwrap();
        std::fs::write(root.join("BRSR/2023_BRSR.PDF"), b"%PDF").unwrap();
        std::fs::write(root.join("2022_Annual Report_BRSR_Extracted.json"), b"{}").unwrap();
        std::fs::write(root.join("2021_Report.debug.html"), b"<html>").unwrap();

        let files = discover_pdf_files(root).unwrap();
        assert_eq!(
            files,
            vec![root.join("2022_Annual Report.pdf"), root.join("BRSR/2023_BRSR.PDF")]
        );
        assert!(discover_pdf_files(&root.join("missing")).unwrap().is_empty());
    }
}
