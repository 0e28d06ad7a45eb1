//! Image encoding: `DynamicImage` → base64 PNG.
//!
//! Vision APIs accept images as base64 data embedded in the JSON request
//! body. PNG is chosen over JPEG because it is lossless — text crispness
//! matters far more than file size when the model has to read faxed Korean
//! order forms with small print.

use crate::error::{Po2LedgerError, Result};
use crate::pipeline::render::RenderedPage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Cursor;
use tracing::debug;

/// One page ready for the multimodal request body.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    /// 1-indexed page number.
    pub page_num: usize,

    /// Base64 of the PNG bytes, no data-URI prefix.
    pub png_base64: String,
}

/// Encode every rasterised page as a base64 PNG.
///
/// ## Why PNG?
/// Lossless compression preserves text crispness. JPEG artefacts on rendered
/// text confuse vision models and degrade reading accuracy on scans that are
/// already second-generation copies.
pub fn encode_pages(pages: &[RenderedPage]) -> Result<Vec<EncodedPage>> {
    pages
        .iter()
        .map(|page| {
            let mut buf = Vec::new();
            page.image
                .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
                .map_err(|e| Po2LedgerError::PageEncodeFailed {
                    page: page.page_num,
                    detail: e.to_string(),
                })?;

            let b64 = STANDARD.encode(&buf);
            debug!("Encoded page {} → {} bytes base64", page.page_num, b64.len());

            Ok(EncodedPage {
                page_num: page.page_num,
                png_base64: b64,
            })
        })
        .collect()
}
