//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as a run moves through rendering, classification and extraction.
//! The same information is available as [`crate::PipelineStatus`] values
//! through [`crate::Pipeline::subscribe`]; the callback suits terminal
//! progress bars, the watch channel suits UIs that only render the latest
//! state.
//!
//! # Example
//!
//! ```rust
//! use edgequake_schematic::{PipelineProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     analyzed: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_number: usize, position: usize, total: usize, components: usize) {
//!         self.analyzed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_number} ({position}/{total}): {components} components");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { analyzed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline at each stage boundary.
///
/// Extraction is strictly sequential, so page events arrive in ascending
/// page order and never concurrently. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once rasterisation finished.
    ///
    /// # Arguments
    /// * `total_pages` — number of page images produced (after the page cap)
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when classification finished.
    ///
    /// # Arguments
    /// * `selected`    — 1-based page numbers chosen for extraction
    /// * `total_pages` — number of pages that were classified
    fn on_classified(&self, selected: &[usize], total_pages: usize) {
        let _ = (selected, total_pages);
    }

    /// Called just before the extraction request for a page is sent.
    ///
    /// # Arguments
    /// * `page_number` — 1-based page number in the document
    /// * `position`    — 1-based position among the selected pages
    /// * `total`       — number of selected pages
    fn on_page_start(&self, page_number: usize, position: usize, total: usize) {
        let _ = (page_number, position, total);
    }

    /// Called when a page has been extracted.
    ///
    /// # Arguments
    /// * `components` — number of components found on the page
    fn on_page_complete(&self, page_number: usize, position: usize, total: usize, components: usize) {
        let _ = (page_number, position, total, components);
    }

    /// Called once after every selected page was analysed.
    fn on_run_complete(&self, pages: usize) {
        let _ = pages;
    }

    /// Called when the run ends in the error state.
    fn on_run_error(&self, message: &str) {
        let _ = message;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        selected: Mutex<Vec<usize>>,
        last_error: Mutex<Option<String>>,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_classified(&self, selected: &[usize], _total_pages: usize) {
            *self.selected.lock().unwrap() = selected.to_vec();
        }

        fn on_page_start(&self, _page_number: usize, _position: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_number: usize, _position: usize, _total: usize, _components: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_run_error(&self, message: &str) {
            *self.last_error.lock().unwrap() = Some(message.to_string());
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(5);
        cb.on_classified(&[2, 5], 5);
        cb.on_page_start(2, 1, 2);
        cb.on_page_complete(2, 1, 2, 7);
        cb.on_run_error("boom");
        cb.on_run_complete(2);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_classified(&[2, 5], 8);
        tracker.on_page_start(2, 1, 2);
        tracker.on_page_complete(2, 1, 2, 4);
        tracker.on_page_start(5, 2, 2);
        tracker.on_run_error("Failed to analyze page 5");

        assert_eq!(*tracker.selected.lock().unwrap(), vec![2, 5]);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert!(tracker.last_error.lock().unwrap().is_some());
    }
}
