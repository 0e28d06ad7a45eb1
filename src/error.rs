//! Error types for the po2ledger library.
//!
//! Three layers reflect three distinct failure scopes:
//!
//! * [`Po2LedgerError`] — **Fatal**: the operation cannot proceed at all
//!   (invalid configuration, an append no backend accepted, workbook
//!   assembly failure). Returned as `Err(Po2LedgerError)` from the
//!   top-level entry points.
//!
//! * [`DocumentError`] — **Non-fatal**: a single document failed (unreadable
//!   scan, extraction exhausted its attempt budget) but the rest of the
//!   batch is fine. Stored inside [`crate::output::DocumentResult`] so
//!   callers can inspect partial success rather than losing a whole batch
//!   to one bad scan.
//!
//! * [`StorageError`] — backend-level: one ledger backend could not complete
//!   an operation. The dual-write ledger converts these into receipt
//!   statuses; only the all-backends-failed case escalates to
//!   [`Po2LedgerError::AppendLost`].

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Po2LedgerError>;

/// All fatal errors returned by the po2ledger library.
///
/// Document-level failures use [`DocumentError`] and are stored in
/// [`crate::output::DocumentResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Po2LedgerError {
    // ── Document errors ───────────────────────────────────────────────────
    /// The byte stream could not be opened as a document.
    #[error("Document '{filename}' is unreadable: {detail}\nCheck that the file is a valid PDF scan.")]
    DocumentUnreadable { filename: String, detail: String },

    /// The document opened but contains no pages.
    #[error("Document '{filename}' contains no pages")]
    EmptyDocument { filename: String },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// A rendered page could not be encoded for the inference request.
    #[error("Failed to encode page {page} as PNG: {detail}")]
    PageEncodeFailed { page: usize, detail: String },

    // ── Ledger errors ─────────────────────────────────────────────────────
    /// No backend accepted an append; the rows were NOT saved anywhere.
    #[error(
        "Append lost: no ledger backend accepted the write, {rows} row(s) were not saved.\n\
Remote store: {remote}\n\
Local store: {local}\n\
Fix at least one backend (credentials, path, permissions) and re-run the ingest."
    )]
    AppendLost {
        rows: usize,
        remote: String,
        local: String,
    },

    /// A single-backend operation failed outside the dual-write path.
    #[error("Ledger backend error: {0}")]
    Storage(#[from] StorageError),

    // ── Report errors ─────────────────────────────────────────────────────
    /// Workbook assembly failed.
    #[error("Failed to build workbook: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    /// Could not write the exported workbook to disk.
    #[error("Failed to write report file {path:?}: {source}")]
    ReportWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Classification of a failed extraction attempt.
///
/// Drives the model-fallback/retry state machine: `NotFound` triggers the
/// one-time model switch, `RateLimited` and `ServerError` are retried with
/// backoff, `ParseError` and `Unknown` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExtractionErrorKind {
    /// The requested model variant does not exist or is not served.
    NotFound,
    /// The service throttled the request (HTTP 429 / quota messages).
    RateLimited,
    /// The service failed internally (HTTP 5xx).
    ServerError,
    /// The model replied, but the reply is not the expected JSON shape.
    ParseError,
    /// Anything that could not be classified; never retried.
    Unknown,
}

impl fmt::Display for ExtractionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractionErrorKind::NotFound => "model not found",
            ExtractionErrorKind::RateLimited => "rate limited",
            ExtractionErrorKind::ServerError => "server error",
            ExtractionErrorKind::ParseError => "unparseable model output",
            ExtractionErrorKind::Unknown => "unknown error",
        };
        f.write_str(s)
    }
}

/// A non-fatal error for a single document.
///
/// Stored in [`crate::output::DocumentResult`] when a document fails.
/// The batch continues with the remaining documents.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum DocumentError {
    /// The scan could not be rasterised at all.
    #[error("'{filename}': rendering failed: {detail}")]
    RenderFailed { filename: String, detail: String },

    /// A rendered page could not be encoded for the request.
    #[error("'{filename}': page encoding failed: {detail}")]
    EncodeFailed { filename: String, detail: String },

    /// Extraction ended in the FAILED state.
    #[error("'{filename}': extraction failed on model '{model}' after {attempts} attempt(s): {kind}: {detail}")]
    ExtractionFailed {
        filename: String,
        model: String,
        kind: ExtractionErrorKind,
        attempts: u32,
        detail: String,
    },
}

/// A failure inside one ledger backend.
///
/// `NotConfigured` is the degraded-mode signal: the backend was not even
/// attempted and the other one carries the operation alone.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend has no usable configuration (for example, no token).
    #[error("not configured: {reason}")]
    NotConfigured { reason: String },

    /// The remote service rejected or failed the request.
    ///
    /// `status` is present when the failure carried an HTTP status; the
    /// message already includes it for display.
    #[error("service error: {message}")]
    Service {
        status: Option<u16>,
        message: String,
    },

    /// Stored content exists but could not be decoded as ledger rows.
    #[error("malformed store content: {message}")]
    Malformed { message: String },

    /// Filesystem-level failure on the local store.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
