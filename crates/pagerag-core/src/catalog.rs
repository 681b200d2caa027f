//! Source document listing and first-page previews.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::rasterizer::document_stem;
use crate::traits::Rasterizer;
use crate::types::SourceDocument;

/// PDFs directly under `data_dir`, sorted by path.
pub fn list_pdf_files(data_dir: &Path) -> Result<Vec<SourceDocument>> {
    if !data_dir.is_dir() {
        return Err(Error::NotFound(format!("data directory does not exist: {}", data_dir.display())));
    }
    let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(data_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|s| s.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")))
        .collect();
    paths.sort();
    paths.iter().map(|p| SourceDocument::from_path(p).map_err(Error::from)).collect()
}

/// Path of the cached preview for `pdf_path` inside `output_dir`.
pub fn preview_path(pdf_path: &Path, output_dir: &Path) -> PathBuf {
    output_dir.join(format!("preview_{}.png", document_stem(pdf_path)))
}

/// First-page preview, rendered once and reused afterwards.
///
/// Only page 1 is rasterized, into a scratch directory that is removed
/// afterwards; the result is copied to `preview_<stem>.png`.
pub fn render_preview(rasterizer: &dyn Rasterizer, pdf_path: &Path, output_dir: &Path) -> Result<PathBuf> {
    if !pdf_path.exists() {
        return Err(Error::NotFound(format!("PDF file does not exist: {}", pdf_path.display())));
    }
    fs::create_dir_all(output_dir)?;
    let target = preview_path(pdf_path, output_dir);
    if target.exists() {
        debug!(path = %target.display(), "reusing cached preview");
        return Ok(target);
    }

    let scratch = tempfile::tempdir()?;
    let pages = rasterizer.rasterize(pdf_path, scratch.path(), Some(1))?;
    let first = pages
        .first()
        .ok_or_else(|| Error::Operation(format!("no pages rendered from {}", pdf_path.display())))?;
    fs::copy(&first.path, &target)?;
    Ok(target)
}
