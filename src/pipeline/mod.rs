//! Pipeline stages for document-to-ledger extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. switch the inference backend) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! bytes ──▶ render ──▶ encode ──▶ extract ──▶ flatten
//! (PDF)     (pdfium)   (base64)   (vision)    (rows)
//! ```
//!
//! 1. [`render`]  — rasterise every page at 2x scale; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 2. [`encode`]  — PNG-encode and base64-wrap each `DynamicImage` for the
//!    multimodal API request body
//! 3. [`extract`] — drive the vision-model call with the model-fallback and
//!    retry state machine; the only stage with network I/O
//! 4. [`flatten`] — explode the structured record into per-line-item ledger
//!    rows

pub mod encode;
pub mod extract;
pub mod flatten;
pub mod render;

pub use encode::{encode_pages, EncodedPage};
pub use extract::{ExtractionClient, ModelTransport};
pub use flatten::flatten_record;
pub use render::{render_pages, RenderedPage};
