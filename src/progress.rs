//! Progress-callback trait for detection events.
//!
//! Inject an [`Arc<dyn DetectionProgressCallback>`] via
//! [`crate::config::DetectionConfigBuilder::progress_callback`] to receive
//! events as the pipeline recognises pages and runs the detectors.
//!
//! # Example
//!
//! ```rust
//! use formscan::{DetectionConfig, DetectionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     done: AtomicUsize,
//! }
//!
//! impl DetectionProgressCallback for PageCounter {
//!     fn on_page_recognized(&self, page_num: usize, total_pages: usize, tokens: usize) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("OCR {n}/{total_pages} (page {page_num}: {tokens} tokens)");
//!     }
//! }
//!
//! let config = DetectionConfig::builder()
//!     .progress_callback(Arc::new(PageCounter { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the detection pipeline.
///
/// `on_page_recognized` may fire concurrently from several OCR workers and
/// in any page order. All methods default to no-ops.
pub trait DetectionProgressCallback: Send + Sync {
    /// Called once after the input is rasterised, before OCR starts.
    fn on_detection_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when OCR finishes a page.
    ///
    /// # Arguments
    /// * `page_num`    : 1-indexed page number
    /// * `total_pages` : total pages
    /// * `tokens`      : tokens recognised on the page
    fn on_page_recognized(&self, page_num: usize, total_pages: usize, tokens: usize) {
        let _ = (page_num, total_pages, tokens);
    }

    /// Called when the LLM extractor yields nothing usable and the run
    /// continues on heuristic candidates only.
    fn on_llm_unavailable(&self, reason: &str) {
        let _ = reason;
    }

    /// Called once with the final field count.
    fn on_detection_complete(&self, field_count: usize, heuristic_only: bool) {
        let _ = (field_count, heuristic_only);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl DetectionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DetectionConfig`].
pub type ProgressCallback = Arc<dyn DetectionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        total: AtomicUsize,
        pages: AtomicUsize,
        tokens: AtomicUsize,
        degraded: AtomicBool,
        fields: AtomicUsize,
    }

    impl DetectionProgressCallback for Tracking {
        fn on_detection_start(&self, total_pages: usize) {
            self.total.store(total_pages, Ordering::SeqCst);
        }

        fn on_page_recognized(&self, _page_num: usize, _total: usize, tokens: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
            self.tokens.fetch_add(tokens, Ordering::SeqCst);
        }

        fn on_llm_unavailable(&self, _reason: &str) {
            self.degraded.store(true, Ordering::SeqCst);
        }

        fn on_detection_complete(&self, field_count: usize, _heuristic_only: bool) {
            self.fields.store(field_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_detection_start(2);
        cb.on_page_recognized(1, 2, 40);
        cb.on_llm_unavailable("timeout");
        cb.on_detection_complete(7, true);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let cb = Tracking::default();
        cb.on_detection_start(2);
        cb.on_page_recognized(2, 2, 10);
        cb.on_page_recognized(1, 2, 15);
        cb.on_llm_unavailable("provider not configured");
        cb.on_detection_complete(4, true);

        assert_eq!(cb.total.load(Ordering::SeqCst), 2);
        assert_eq!(cb.pages.load(Ordering::SeqCst), 2);
        assert_eq!(cb.tokens.load(Ordering::SeqCst), 25);
        assert!(cb.degraded.load(Ordering::SeqCst));
        assert_eq!(cb.fields.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_detection_start(1);
        cb.on_page_recognized(1, 1, 0);
    }
}
