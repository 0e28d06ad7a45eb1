//! # po2ledger
//!
//! Extract structured purchase-order data from scanned documents with a
//! vision model and keep it in a dual-backend ledger.
//!
//! ## Why this crate?
//!
//! Purchase orders arrive as faxes, phone photos, and second-generation
//! scans. Classic OCR plus regex breaks on every new supplier's layout and
//! on handwritten quantities; this crate rasterises each page and lets a
//! vision model read the form as a clerk would, returning one structured
//! record per document. Rows land in two places at once — a hosted
//! spreadsheet the back office watches and a local CSV that works with no
//! network — and export as a month-tabbed xlsx workbook.
//!
//! ## Pipeline Overview
//!
//! ```text
//! scanned PDF
//!  │
//!  ├─ 1. Render   rasterise pages at 2x via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 2. Encode   PNG → base64 request parts
//!  ├─ 3. Extract  vision-model call with model fallback + bounded retry
//!  ├─ 4. Flatten  one ledger row per line item
//!  ├─ 5. Ledger   dual write: hosted sheet + local CSV
//!  └─ 6. Report   xlsx export, one tab per month
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use po2ledger::{ingest_batch, DualWriteLedger, LedgerConfig, PipelineConfig, SourceDocument};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .api_key(std::env::var("GEMINI_API_KEY")?)
//!         .build()?;
//!
//!     let documents = vec![SourceDocument::from_path("order_0520.pdf")?];
//!     let outcome = ingest_batch(&documents, &config).await?;
//!
//!     // Ledger I/O is blocking; keep it off the async workers.
//!     let ledger_config = LedgerConfig::default();
//!     let rows = outcome.rows.clone();
//!     let receipt = tokio::task::spawn_blocking(move || {
//!         let ledger = DualWriteLedger::open(&ledger_config)?;
//!         ledger.append(&rows)
//!     })
//!     .await??;
//!
//!     println!(
//!         "saved {} row(s) — remote: {}, local: {}",
//!         receipt.appended, receipt.remote, receipt.local
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `po2ledger` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! po2ledger = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod report;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{LedgerConfig, LedgerConfigBuilder, PipelineConfig, PipelineConfigBuilder};
pub use error::{DocumentError, ExtractionErrorKind, Po2LedgerError, Result, StorageError};
pub use ingest::ingest_batch;
pub use ledger::{
    AppendReceipt, BackendStatus, DualWriteLedger, LedgerSnapshot, LoadSource, LocalLedger,
    RemoteLedger, ResetReceipt, Storage,
};
pub use output::{BatchOutcome, BatchStats, DocumentResult};
pub use pipeline::{EncodedPage, ExtractionClient, ModelTransport};
pub use progress::{BatchCallback, BatchProgressCallback, NoopBatchCallback};
pub use record::{
    parse_order_day, DateRange, FlatRow, LedgerEntry, LineItem, SourceDocument, StructuredRecord,
    COLUMNS,
};
pub use report::{build_workbook, write_workbook, FULL_SHEET_NAME};
