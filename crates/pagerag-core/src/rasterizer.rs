use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, RgbImage};
use pdfium_render::prelude::*;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::traits::Rasterizer;
use crate::types::PageImage;

pub const DEFAULT_DPI: u16 = 350;
const PDF_POINTS_PER_INCH: f32 = 72.0;

/// Renders PDF pages to PNG files with PDFium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u16,
    library_dir: Option<PathBuf>,
}

impl Default for PdfiumRasterizer {
    fn default() -> Self { Self::new(DEFAULT_DPI) }
}

impl PdfiumRasterizer {
    pub fn new(dpi: u16) -> Self {
        let library_dir = std::env::var("PDFIUM_DYNAMIC_LIB_PATH").ok().map(PathBuf::from);
        Self { dpi, library_dir }
    }

    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dir = Some(dir.into());
        self
    }

    pub fn dpi(&self) -> u16 { self.dpi }

    fn bind(&self) -> Result<Pdfium> {
        let bundled = self.library_dir.as_ref().and_then(|dir| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)).ok()
        });
        let bindings = match bundled {
            Some(b) => b,
            None => Pdfium::bind_to_system_library().map_err(|e| {
                Error::InvalidConfig(format!(
                    "Failed to load PDFium library (searched {:?} and system paths): {}",
                    self.library_dir, e
                ))
            })?,
        };
        Ok(Pdfium::new(bindings))
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(&self, document: &Path, output_dir: &Path, max_pages: Option<usize>) -> Result<Vec<PageImage>> {
        fs::create_dir_all(output_dir)?;
        let pdfium = self.bind()?;
        let pdf = pdfium
            .load_pdf_from_file(document, None)
            .map_err(|e| Error::DocumentOpen { path: document.to_path_buf(), reason: e.to_string() })?;

        let total = usize::from(pdf.pages().len());
        let count = max_pages.map_or(total, |m| m.min(total));
        let document_id = document_name(document);
        let scale = f32::from(self.dpi) / PDF_POINTS_PER_INCH;
        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
        info!(pdf = %document_id, pages = count, dpi = self.dpi, "rasterizing document");

        let mut pages = Vec::with_capacity(count);
        for index in 0..count {
            let page_number = index + 1;
            let render_err = |reason: String| Error::Render { page: page_number, reason };
            let page_index = u16::try_from(index).map_err(|e| render_err(e.to_string()))?;
            let page = pdf.pages().get(page_index).map_err(|e| render_err(e.to_string()))?;
            let bitmap = page.render_with_config(&render_config).map_err(|e| render_err(e.to_string()))?;

            let width = bitmap.width() as u32;
            let height = bitmap.height() as u32;
            let rgb = bgra_to_rgb(&bitmap.as_raw_bytes());
            let image: RgbImage = ImageBuffer::from_raw(width, height, rgb)
                .ok_or_else(|| render_err("bitmap size does not match its dimensions".into()))?;

            let path = output_dir.join(page_file_name(page_number, count));
            image.save(&path).map_err(|e| render_err(e.to_string()))?;
            debug!(page = page_number, path = %path.display(), "page rendered");
            pages.push(PageImage { document_id: document_id.clone(), page_number, path, dpi: self.dpi });
        }
        Ok(pages)
    }
}

fn bgra_to_rgb(bgra: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(bgra.len() / 4 * 3);
    for px in bgra.chunks_exact(4) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    rgb
}

/// `page_01.png` … zero padded to at least two digits, wider for long documents,
/// so lexicographic order equals page order.
pub fn page_file_name(page_number: usize, total_pages: usize) -> String {
    let width = total_pages.to_string().len().max(2);
    format!("page_{:0width$}.png", page_number, width = width)
}

/// File name of a document (`A.pdf`), used as its id in payloads.
pub fn document_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

/// Name of the per-document artifact directory (`A` for `A.pdf`).
pub fn document_stem(path: &Path) -> String {
    let name = document_name(path);
    match name.strip_suffix(".pdf") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}
