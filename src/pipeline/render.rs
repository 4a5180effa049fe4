//! Document rasterisation: a [`Document`] → ordered [`PageImage`]s.
//!
//! The pipeline only sees the [`Rasterizer`] trait. [`PdfiumRasterizer`] is
//! the production implementation: single images become one page (BMP and
//! TIFF re-encoded as PNG), PDFs are rendered page by page with pdfium at
//! a fixed scale factor.
//!
//! ## Why spawn_blocking?
//!
//! pdfium uses thread-local state and is CPU-bound. Rendering runs on the
//! blocking pool so Tokio worker threads never stall.

use crate::config::PipelineConfig;
use crate::error::SchematicError;
use crate::model::PageImage;
use crate::pipeline::encode;
use crate::pipeline::input::{Document, MediaKind};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Converts a document into page images, keeping at most `page_cap` pages.
///
/// Pages past the cap are dropped silently. A single-image document always
/// yields exactly one page.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(
        &self,
        document: &Document,
        page_cap: usize,
    ) -> Result<Vec<PageImage>, SchematicError>;
}

/// pdfium-backed rasteriser.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    scale: f32,
    max_pixels: u32,
}

impl PdfiumRasterizer {
    pub fn new(scale: f32, max_pixels: u32) -> Self {
        Self { scale, max_pixels }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.render_scale, config.max_rendered_pixels)
    }
}

impl Default for PdfiumRasterizer {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(
        &self,
        document: &Document,
        page_cap: usize,
    ) -> Result<Vec<PageImage>, SchematicError> {
        match document.kind {
            MediaKind::Image(format) => Ok(vec![encode::single_image(&document.bytes, format)?]),
            MediaKind::Pdf => {
                let bytes = document.bytes.clone();
                let name = document.name.clone();
                let scale = self.scale;
                let max_pixels = self.max_pixels;

                tokio::task::spawn_blocking(move || {
                    render_pdf_blocking(&name, &bytes, scale, max_pixels, page_cap)
                })
                .await
                .map_err(|e| SchematicError::Internal(format!("Render task panicked: {}", e)))?
            }
        }
    }
}

/// Bind pdfium: `PDFIUM_LIB_PATH` directory first, then the system library.
fn bind_pdfium() -> Result<Pdfium, SchematicError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(dir) if !dir.is_empty() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| SchematicError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn render_pdf_blocking(
    name: &str,
    bytes: &[u8],
    scale: f32,
    max_pixels: u32,
    page_cap: usize,
) -> Result<Vec<PageImage>, SchematicError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            SchematicError::PasswordRequired {
                name: name.to_string(),
            }
        } else {
            SchematicError::CorruptPdf {
                name: name.to_string(),
                detail: err_str,
            }
        }
    })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let kept = total_pages.min(page_cap);
    if kept < total_pages {
        info!(
            "PDF '{}' has {} pages; rendering the first {}",
            name, total_pages, kept
        );
    } else {
        info!("PDF '{}' loaded: {} pages", name, total_pages);
    }

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(scale)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(kept);

    for idx in 0..kept {
        let page = pages
            .get(idx as u16)
            .map_err(|e| SchematicError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            SchematicError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );

        let encoded = encode::encode_page(idx, &image).map_err(|e| {
            SchematicError::RasterisationFailed {
                page: idx + 1,
                detail: format!("Image encoding failed: {}", e),
            }
        })?;
        results.push(encoded);
    }

    Ok(results)
}
