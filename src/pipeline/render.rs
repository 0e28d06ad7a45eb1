//! Document rasterisation: render every page to a `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! ## Why a temp file?
//!
//! Documents arrive as in-memory bytes (uploads, mail attachments, message
//! bots). They are staged to a managed [`tempfile`] because pdfium's file
//! loader is the stable entry point across pdfium builds; the temp file is
//! deleted when rendering returns or panics.

use crate::error::{Po2LedgerError, Result};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Write;
use tracing::{debug, info};

/// One rasterised page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-indexed page number.
    pub page_num: usize,

    /// Rendered pixels at `scale` times the page's natural width.
    pub image: DynamicImage,
}

/// Rasterise every page of a document into images.
///
/// Scanned order forms are usually faxed or photographed; rendering at
/// `scale` times the natural page width (2.0 by default) keeps phone numbers
/// and spec columns legible to the vision model.
///
/// # Arguments
/// * `bytes`    — raw PDF bytes
/// * `filename` — source name, used in error messages only
/// * `scale`    — upscaling factor, already clamped by the config builder
///
/// # Errors
/// * [`Po2LedgerError::DocumentUnreadable`] when pdfium rejects the bytes
/// * [`Po2LedgerError::EmptyDocument`] when the document has zero pages
/// * [`Po2LedgerError::RasterisationFailed`] when a single page fails to render
pub async fn render_pages(bytes: Vec<u8>, filename: &str, scale: f32) -> Result<Vec<RenderedPage>> {
    let name = filename.to_string();

    tokio::task::spawn_blocking(move || render_pages_blocking(&bytes, &name, scale))
        .await
        .map_err(|e| Po2LedgerError::Internal(format!("Render task panicked: {}", e)))?
}

/// Blocking implementation of page rendering.
fn render_pages_blocking(bytes: &[u8], filename: &str, scale: f32) -> Result<Vec<RenderedPage>> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| Po2LedgerError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| Po2LedgerError::Internal(format!("tempfile write: {e}")))?;

    let pdfium = Pdfium::default();

    let document = pdfium.load_pdf_from_file(tmp.path(), None).map_err(|e| {
        Po2LedgerError::DocumentUnreadable {
            filename: filename.to_string(),
            detail: format!("{:?}", e),
        }
    })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(Po2LedgerError::EmptyDocument {
            filename: filename.to_string(),
        });
    }
    info!("'{}' loaded: {} pages", filename, total_pages);

    let mut results = Vec::with_capacity(total_pages);

    for idx in 0..total_pages {
        let page = pages
            .get(idx as u16)
            .map_err(|e| Po2LedgerError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        // Target width in pixels: page width is in points (1/72 inch), so
        // scale 2.0 renders at roughly 144 DPI.
        let target_width = (page.width().value * scale) as i32;
        let render_config = PdfRenderConfig::new().set_target_width(target_width);

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            Po2LedgerError::RasterisationFailed {
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

        results.push(RenderedPage {
            page_num: idx + 1,
            image,
        });
    }

    Ok(results)
}
