//! Result types returned by the ingestion pipeline.
//!
//! A batch returns one [`BatchOutcome`]: per-document results (including
//! per-document failures, which never abort a batch), the flattened rows
//! ready for the ledger, and aggregate statistics.

use crate::error::DocumentError;
use crate::record::FlatRow;

/// Outcome of one document inside a batch.
///
/// A document either produced rows (`error` is `None`) or failed with a
/// [`DocumentError`] after its attempt budget ran out. Both shapes carry
/// enough context to report without re-reading the source file.
#[derive(Debug, Clone)]
pub struct DocumentResult {
    /// Source filename, as given in the input.
    pub filename: String,

    /// Flattened ledger rows, one per line item (one blank-item row when the
    /// record had no line items). Empty only on failure.
    pub rows: Vec<FlatRow>,

    /// Model that produced the accepted reply. `None` on failure.
    pub used_model: Option<String>,

    /// Inference attempts consumed, across both models.
    pub attempts: u32,

    /// Wall time for this document, milliseconds.
    pub duration_ms: u64,

    /// Why the document failed, if it did.
    pub error: Option<DocumentError>,
}

impl DocumentResult {
    /// True when the document made it through the whole pipeline.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate statistics for a batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    /// Documents in the batch.
    pub total_documents: usize,

    /// Documents that produced rows without error.
    pub succeeded: usize,

    /// Documents that failed after exhausting their attempt budget.
    pub failed: usize,

    /// Ledger rows produced across all documents.
    pub total_rows: usize,

    /// Wall time for the whole batch, milliseconds, pacing included.
    pub total_duration_ms: u64,
}

/// Everything a batch run produced.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Per-document results, in input order.
    pub documents: Vec<DocumentResult>,

    /// All rows from successful documents, in input order, ready for
    /// [`crate::ledger::DualWriteLedger::append`].
    pub rows: Vec<FlatRow>,

    /// Aggregate counts and timing.
    pub stats: BatchStats,
}

impl BatchOutcome {
    /// True when at least one document produced rows.
    pub fn any_succeeded(&self) -> bool {
        self.stats.succeeded > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionErrorKind;

    #[test]
    fn document_result_success_flag_follows_error() {
        let ok = DocumentResult {
            filename: "a.pdf".into(),
            rows: vec![],
            used_model: Some("models/gemini-flash-latest".into()),
            attempts: 1,
            duration_ms: 10,
            error: None,
        };
        assert!(ok.is_success());

        let failed = DocumentResult {
            error: Some(DocumentError::ExtractionFailed {
                filename: "a.pdf".into(),
                model: "models/gemini-flash-latest".into(),
                kind: ExtractionErrorKind::RateLimited,
                attempts: 3,
                detail: "HTTP 429".into(),
            }),
            used_model: None,
            ..ok
        };
        assert!(!failed.is_success());
    }
}
