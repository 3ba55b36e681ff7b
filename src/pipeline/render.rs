//! Rasterisation: turn an upload into one image per page.
//!
//! Image uploads are a single page decoded with `image`. PDFs are rendered
//! through pdfium at the configured DPI, capped at `max_rendered_pixels` on
//! the longest edge; the effective DPI of each bitmap is recorded so the
//! exporter can map pixel boxes back to PDF points.
//!
//! Both paths run in `spawn_blocking`: decoding and pdfium rendering are
//! CPU-bound, and pdfium is not safe to call from async contexts.

use crate::config::DetectionConfig;
use crate::error::FormScanError;
use crate::geometry::SourceKind;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// One rasterised page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub index: usize,
    pub image: DynamicImage,
    pub dpi: f32,
}

/// Rasterise every page of the upload.
pub async fn render_document(
    path: &Path,
    kind: SourceKind,
    config: &DetectionConfig,
) -> Result<Vec<RenderedPage>, FormScanError> {
    let path = path.to_path_buf();
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;

    tokio::task::spawn_blocking(move || match kind {
        SourceKind::Image => load_image(&path, dpi).map(|p| vec![p]),
        SourceKind::Pdf => render_pdf_blocking(&path, dpi, max_pixels),
    })
    .await
    .map_err(|e| FormScanError::Internal(format!("Render task panicked: {}", e)))?
}

/// Decode an image upload. Its DPI is unknown, so the configured DPI is
/// assumed.
fn load_image(path: &Path, dpi: u32) -> Result<RenderedPage, FormScanError> {
    let image = image::open(path).map_err(|e| FormScanError::RasterisationFailed {
        page: 1,
        detail: e.to_string(),
    })?;
    debug!("Loaded image {}x{} px", image.width(), image.height());
    Ok(RenderedPage {
        index: 0,
        image,
        dpi: dpi as f32,
    })
}

fn render_pdf_blocking(
    path: &Path,
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<RenderedPage>, FormScanError> {
    let pdfium = pdfium_auto::bind_pdfium_silent()
        .map_err(|e| FormScanError::PdfiumBindingFailed(e.to_string()))?;

    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| FormScanError::RasterisationFailed {
            page: 0,
            detail: format!("cannot open PDF: {:?}", e),
        })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    info!("PDF loaded: {} pages", total);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut rendered = Vec::with_capacity(total);
    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| FormScanError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;
        let image = bitmap.as_image();
        let width_pt = page.width().value;
        let effective_dpi = if width_pt > 0.0 {
            image.width() as f32 * 72.0 / width_pt
        } else {
            dpi as f32
        };
        debug!(
            "Rendered page {} → {}x{} px ({:.0} dpi)",
            idx + 1,
            image.width(),
            image.height(),
            effective_dpi
        );
        rendered.push(RenderedPage {
            index: idx,
            image,
            dpi: effective_dpi,
        });
    }

    Ok(rendered)
}
