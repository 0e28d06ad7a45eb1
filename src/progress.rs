//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! real-time events as the batch works through each document.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a terminal progress bar, a Tokio channel, a WebSocket, or
//! a database record — without the library knowing anything about how the host
//! application communicates. The trait is `Send + Sync` so the config can be
//! shared across tasks and moved into `tokio::spawn`.
//!
//! # Example
//!
//! ```rust
//! use po2ledger::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, index: usize, total: usize, filename: &str, rows: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("[{}/{}] {} -> {} row(s)", index, total, filename, rows);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = PipelineConfig::builder()
//!     .api_key("AIza...")
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch pipeline as it processes each document.
///
/// Implementations must be `Send + Sync`. All methods have default no-op
/// implementations so callers only override what they care about.
///
/// Documents in a batch are processed strictly one at a time, so events for
/// different documents never interleave; implementations still need interior
/// mutability (`Mutex`, `AtomicUsize`) because they are called through `&self`.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any document is processed.
    ///
    /// # Arguments
    /// * `total` — number of documents in the batch
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called just before a document enters the pipeline.
    ///
    /// # Arguments
    /// * `index`    — 1-indexed position in the batch
    /// * `total`    — total documents in the batch
    /// * `filename` — source filename of the document
    fn on_document_start(&self, index: usize, total: usize, filename: &str) {
        let _ = (index, total, filename);
    }

    /// Called when a document's rows have been extracted and flattened.
    ///
    /// # Arguments
    /// * `index`    — 1-indexed position in the batch
    /// * `total`    — total documents
    /// * `filename` — source filename
    /// * `rows`     — number of ledger rows produced (one per line item)
    fn on_document_complete(&self, index: usize, total: usize, filename: &str, rows: usize) {
        let _ = (index, total, filename, rows);
    }

    /// Called when a document fails after its attempt budget is exhausted.
    ///
    /// A failed document never aborts the batch; processing continues with
    /// the next document.
    ///
    /// # Arguments
    /// * `index`    — 1-indexed position in the batch
    /// * `total`    — total documents
    /// * `filename` — source filename
    /// * `error`    — human-readable error description
    fn on_document_error(&self, index: usize, total: usize, filename: &str, error: &str) {
        let _ = (index, total, filename, error);
    }

    /// Called once after every document has been attempted.
    ///
    /// # Arguments
    /// * `total`     — total documents in the batch
    /// * `succeeded` — documents that produced rows without error
    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        let _ = (total, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopBatchCallback;

impl BatchProgressCallback for NoopBatchCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type BatchCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        starts: Arc<AtomicUsize>,
        completes: Arc<AtomicUsize>,
        errors: Arc<AtomicUsize>,
        batch_total: Arc<AtomicUsize>,
        batch_succeeded: Arc<AtomicUsize>,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_batch_start(&self, total: usize) {
            self.batch_total.store(total, Ordering::SeqCst);
        }

        fn on_document_start(&self, _index: usize, _total: usize, _filename: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _index: usize, _total: usize, _filename: &str, _rows: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_error(&self, _index: usize, _total: usize, _filename: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, succeeded: usize) {
            self.batch_succeeded.store(succeeded, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopBatchCallback;
        cb.on_batch_start(3);
        cb.on_document_start(1, 3, "a.pdf");
        cb.on_document_complete(1, 3, "a.pdf", 4);
        cb.on_document_error(2, 3, "b.pdf", "some error");
        cb.on_batch_complete(3, 2);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            starts: Arc::new(AtomicUsize::new(0)),
            completes: Arc::new(AtomicUsize::new(0)),
            errors: Arc::new(AtomicUsize::new(0)),
            batch_total: Arc::new(AtomicUsize::new(0)),
            batch_succeeded: Arc::new(AtomicUsize::new(0)),
        };

        tracker.on_batch_start(3);
        assert_eq!(tracker.batch_total.load(Ordering::SeqCst), 3);

        tracker.on_document_start(1, 3, "a.pdf");
        tracker.on_document_complete(1, 3, "a.pdf", 2);
        tracker.on_document_start(2, 3, "b.pdf");
        tracker.on_document_complete(2, 3, "b.pdf", 5);
        tracker.on_document_start(3, 3, "c.pdf");
        tracker.on_document_error(3, 3, "c.pdf", "extraction timeout");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);

        tracker.on_batch_complete(3, 2);
        assert_eq!(tracker.batch_succeeded.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn BatchProgressCallback> = Arc::new(NoopBatchCallback);
        cb.on_batch_start(10);
        cb.on_document_start(1, 10, "doc.pdf");
        cb.on_document_complete(1, 10, "doc.pdf", 3);
    }
}
