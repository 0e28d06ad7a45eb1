//! Batch ingestion entry point.
//!
//! ## Why strictly sequential?
//!
//! Documents are processed one at a time with a fixed pause between them.
//! The inference service meters requests per minute, and a clerk's batch is
//! small (tens of documents, not thousands); pacing below the throttle
//! threshold finishes sooner than racing into 429s and burning the retry
//! budget. It also keeps ledger row order equal to upload order, which is
//! how the back office expects to read the sheet.

use crate::config::PipelineConfig;
use crate::error::{DocumentError, Result};
use crate::output::{BatchOutcome, BatchStats, DocumentResult};
use crate::pipeline::{encode_pages, flatten_record, render_pages, ExtractionClient};
use crate::progress::{BatchCallback, NoopBatchCallback};
use crate::record::{FlatRow, SourceDocument};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Run the full pipeline over a batch of documents.
///
/// Per-document failures never abort the batch; they are captured in the
/// returned [`BatchOutcome`] and reported through the progress callback.
///
/// # Errors
/// Returns `Err` only when the pipeline itself cannot be constructed
/// (HTTP client build failure). Everything that can go wrong with an
/// individual document lands in `outcome.documents[i].error`.
pub async fn ingest_batch(
    documents: &[SourceDocument],
    config: &PipelineConfig,
) -> Result<BatchOutcome> {
    let total_start = Instant::now();
    let total = documents.len();
    info!("Starting batch: {} document(s)", total);

    let callback: BatchCallback = config
        .progress_callback
        .clone()
        .unwrap_or_else(|| Arc::new(NoopBatchCallback));
    let client = ExtractionClient::new(config)?;

    callback.on_batch_start(total);

    let mut results: Vec<DocumentResult> = Vec::with_capacity(total);
    let mut all_rows: Vec<FlatRow> = Vec::new();

    for (idx, document) in documents.iter().enumerate() {
        // Pacing goes between documents, never before the first.
        if idx > 0 && config.document_pacing_secs > 0 {
            debug!("Pacing {}s before the next document", config.document_pacing_secs);
            sleep(Duration::from_secs(config.document_pacing_secs)).await;
        }

        let position = idx + 1;
        callback.on_document_start(position, total, &document.filename);
        let start = Instant::now();

        let outcome = process_document(&client, document, config).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok((rows, used_model, attempts)) => {
                info!(
                    "[{}/{}] '{}': {} row(s) in {}ms",
                    position,
                    total,
                    document.filename,
                    rows.len(),
                    duration_ms
                );
                callback.on_document_complete(position, total, &document.filename, rows.len());
                all_rows.extend(rows.iter().cloned());
                results.push(DocumentResult {
                    filename: document.filename.clone(),
                    rows,
                    used_model: Some(used_model),
                    attempts,
                    duration_ms,
                    error: None,
                });
            }
            Err(error) => {
                warn!("[{}/{}] {}", position, total, error);
                callback.on_document_error(position, total, &document.filename, &error.to_string());
                let attempts = match &error {
                    DocumentError::ExtractionFailed { attempts, .. } => *attempts,
                    _ => 0,
                };
                results.push(DocumentResult {
                    filename: document.filename.clone(),
                    rows: Vec::new(),
                    used_model: None,
                    attempts,
                    duration_ms,
                    error: Some(error),
                });
            }
        }
    }

    let succeeded = results.iter().filter(|r| r.is_success()).count();
    let stats = BatchStats {
        total_documents: total,
        succeeded,
        failed: total - succeeded,
        total_rows: all_rows.len(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Batch complete: {}/{} document(s), {} row(s), {}ms",
        succeeded, total, stats.total_rows, stats.total_duration_ms
    );
    callback.on_batch_complete(total, succeeded);

    Ok(BatchOutcome {
        documents: results,
        rows: all_rows,
        stats,
    })
}

/// One document through the whole pipeline.
async fn process_document(
    client: &ExtractionClient,
    document: &SourceDocument,
    config: &PipelineConfig,
) -> std::result::Result<(Vec<FlatRow>, String, u32), DocumentError> {
    // ── Step 1: Rasterise pages ──────────────────────────────────────────
    let render_start = Instant::now();
    let rendered = render_pages(
        document.bytes.clone(),
        &document.filename,
        config.render_scale,
    )
    .await
    .map_err(|e| DocumentError::RenderFailed {
        filename: document.filename.clone(),
        detail: e.to_string(),
    })?;
    debug!(
        "'{}': rendered {} page(s) in {}ms",
        document.filename,
        rendered.len(),
        render_start.elapsed().as_millis()
    );

    // ── Step 2: Encode images to base64 ──────────────────────────────────
    let encoded = encode_pages(&rendered).map_err(|e| DocumentError::EncodeFailed {
        filename: document.filename.clone(),
        detail: e.to_string(),
    })?;

    // ── Step 3: Extract the structured record ────────────────────────────
    let extract_start = Instant::now();
    let extraction = client
        .extract(&encoded)
        .await
        .map_err(|e| DocumentError::ExtractionFailed {
            filename: document.filename.clone(),
            model: e.model,
            kind: e.kind,
            attempts: e.attempts,
            detail: e.detail,
        })?;
    debug!(
        "'{}': extracted in {}ms on '{}'",
        document.filename,
        extract_start.elapsed().as_millis(),
        extraction.record.used_model
    );

    // ── Step 4: Flatten to ledger rows ───────────────────────────────────
    let rows = flatten_record(&extraction.record, &document.filename);
    let used_model = extraction.record.used_model.clone();
    Ok((rows, used_model, extraction.attempts))
}
