//! Page classification: cheap batched triage of which pages to analyse.
//!
//! ## Batching
//!
//! Pages are sent in contiguous batches of `classify_batch_size` images so
//! each request body stays bounded. The backend answers with batch-local
//! positions; adding the batch's start offset turns them into global page
//! indices.
//!
//! ## Partial failure
//!
//! A batch whose request fails or whose answer cannot be parsed contributes
//! nothing and the remaining batches still run. Losing one batch of pages
//! is preferred over losing the whole document.
//!
//! Batches run one after another, never concurrently.

use crate::backend::{RequestKind, VisionBackend, VisionRequest};
use crate::error::SchematicError;
use crate::model::{PageImage, PageIndexSet};
use crate::pipeline::postprocess::json_payload;
use crate::prompts::{classification_message, classification_prompt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A contiguous slice of the page sequence submitted in one request.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationBatch<'a> {
    /// Global index of `images[0]`.
    pub start: usize,
    pub images: &'a [PageImage],
}

/// Split `images` into contiguous batches of at most `width` pages.
pub fn batches(images: &[PageImage], width: usize) -> Vec<ClassificationBatch<'_>> {
    images
        .chunks(width.max(1))
        .enumerate()
        .map(|(i, chunk)| ClassificationBatch {
            start: i * width.max(1),
            images: chunk,
        })
        .collect()
}

/// Accepted answer shapes: `{"indices": [..]}` or a bare `[..]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassificationResponse {
    Object { indices: Vec<i64> },
    Bare(Vec<i64>),
}

impl ClassificationResponse {
    fn into_indices(self) -> Vec<i64> {
        match self {
            ClassificationResponse::Object { indices } => indices,
            ClassificationResponse::Bare(indices) => indices,
        }
    }
}

/// Parse a classification answer into batch-local indices.
///
/// Positions outside `0..batch_len` are dropped with a warning rather than
/// failing the batch.
pub fn parse_classification(content: &str, batch_len: usize) -> Result<Vec<usize>, SchematicError> {
    let response: ClassificationResponse = serde_json::from_str(json_payload(content))
        .map_err(|e| SchematicError::MalformedResponse {
            what: "classification",
            detail: e.to_string(),
        })?;

    Ok(response
        .into_indices()
        .into_iter()
        .filter_map(|i| match usize::try_from(i) {
            Ok(local) if local < batch_len => Some(local),
            _ => {
                warn!("Ignoring out-of-range batch index {} (batch size {})", i, batch_len);
                None
            }
        })
        .collect())
}

/// Flags the pages of a document that look like schematics.
pub struct PageClassifier {
    backend: Arc<dyn VisionBackend>,
    batch_size: usize,
    max_tokens: usize,
    temperature: f32,
}

impl PageClassifier {
    pub fn new(backend: Arc<dyn VisionBackend>, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            max_tokens: 256,
            temperature: 0.0,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Return the global indices of schematic pages, ascending and unique.
    ///
    /// A single page is always selected without calling the backend. An
    /// empty result is valid; the caller turns it into
    /// [`SchematicError::NoSchematicsFound`].
    pub async fn classify(&self, images: &[PageImage]) -> PageIndexSet {
        if images.len() == 1 {
            debug!("Single page: selected without classification");
            return PageIndexSet::from_unsorted([0]);
        }

        let mut found = Vec::new();
        let all = batches(images, self.batch_size);
        let batch_count = all.len();

        for (n, batch) in all.into_iter().enumerate() {
            match self.classify_batch(batch).await {
                Ok(local) => {
                    debug!(
                        "Batch {}/{} (pages {}–{}): {} schematic page(s)",
                        n + 1,
                        batch_count,
                        batch.start + 1,
                        batch.start + batch.images.len(),
                        local.len()
                    );
                    found.extend(local.into_iter().map(|i| batch.start + i));
                }
                Err(e) => {
                    warn!(
                        "Batch {}/{} (pages {}–{}) skipped: {}",
                        n + 1,
                        batch_count,
                        batch.start + 1,
                        batch.start + batch.images.len(),
                        e
                    );
                }
            }
        }

        let set = PageIndexSet::from_unsorted(found);
        info!(
            "Classification selected {} of {} page(s)",
            set.len(),
            images.len()
        );
        set
    }

    /// One backend call for one batch; returns batch-local indices.
    async fn classify_batch(&self, batch: ClassificationBatch<'_>) -> Result<Vec<usize>, SchematicError> {
        let request = VisionRequest {
            kind: RequestKind::Classify,
            instruction: classification_prompt(batch.images.len()),
            images: batch.images.to_vec(),
            history: Vec::new(),
            message: classification_message(batch.images.len()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let response = self.backend.generate(request).await?;
        debug!(
            "Batch at page {}: {} input / {} output tokens",
            batch.start + 1,
            response.input_tokens,
            response.output_tokens
        );
        parse_classification(&response.content, batch.images.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VisionResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn pages(n: usize) -> Vec<PageImage> {
        (0..n)
            .map(|index| PageImage {
                index,
                mime_type: "image/png".into(),
                data: format!("page{index}"),
            })
            .collect()
    }

    /// Answers each batch from a queue of canned replies.
    struct ScriptedBackend {
        replies: Mutex<Vec<Result<String, String>>>,
        calls: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
        messages: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| r.map(String::from).map_err(String::from))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
                batch_sizes: Mutex::new(Vec::new()),
                messages: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl VisionBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: VisionRequest) -> Result<VisionResponse, SchematicError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(request.images.len());
            self.messages.lock().unwrap().push(request.message);
            let reply = self.replies.lock().unwrap().pop().unwrap_or(Ok("[]".into()));
            reply
                .map(|content| VisionResponse {
                    content,
                    ..Default::default()
                })
                .map_err(|message| SchematicError::LlmApiError { message })
        }
    }

    #[tokio::test]
    async fn single_page_short_circuits() {
        let backend = ScriptedBackend::new(vec![]);
        let classifier = PageClassifier::new(backend.clone(), 5);
        let set = classifier.classify(&pages(1)).await;
        assert_eq!(set.as_slice(), &[0]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn local_indices_are_remapped_to_global() {
        let backend = ScriptedBackend::new(vec![Ok(r#"{"indices":[1]}"#), Ok(r#"{"indices":[0,2]}"#)]);
        let classifier = PageClassifier::new(backend.clone(), 3);
        let set = classifier.classify(&pages(6)).await;
        assert_eq!(set.as_slice(), &[1, 3, 5]);
        assert_eq!(*backend.batch_sizes.lock().unwrap(), vec![3, 3]);
    }

    #[tokio::test]
    async fn batch_request_names_local_numbering() {
        let backend = ScriptedBackend::new(vec![Ok("[]"), Ok("[]")]);
        let classifier = PageClassifier::new(backend.clone(), 5);
        classifier.classify(&pages(7)).await;
        let messages = backend.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("Image 0 is the first attachment and image 4 the last"));
        assert!(messages[1].starts_with("2 page image(s) attached."));
        assert!(messages[1].contains("image 1 the last"));
    }

    #[tokio::test]
    async fn failed_batch_is_skipped_not_fatal() {
        let backend = ScriptedBackend::new(vec![
            Ok(r#"{"indices":[4]}"#),
            Err("HTTP 503"),
            Ok("```json\n[0]\n```"),
        ]);
        let classifier = PageClassifier::new(backend.clone(), 5);
        let set = classifier.classify(&pages(12)).await;
        assert_eq!(set.as_slice(), &[4, 10]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(*backend.batch_sizes.lock().unwrap(), vec![5, 5, 2]);
    }

    #[tokio::test]
    async fn malformed_batch_is_skipped() {
        let backend = ScriptedBackend::new(vec![Ok("I think page two"), Ok(r#"{"indices":[1]}"#)]);
        let classifier = PageClassifier::new(backend, 2);
        let set = classifier.classify(&pages(4)).await;
        assert_eq!(set.as_slice(), &[3]);
    }

    #[tokio::test]
    async fn indices_stay_in_range_sorted_and_unique() {
        let backend = ScriptedBackend::new(vec![Ok("[2, 0, 2, 7, -1]"), Ok("[1, 1]")]);
        let classifier = PageClassifier::new(backend, 3);
        let images = pages(5);
        let set = classifier.classify(&images).await;
        assert_eq!(set.as_slice(), &[0, 2, 4]);
        assert!(set.iter().all(|i| i < images.len()));
    }

    #[tokio::test]
    async fn nothing_found_is_empty_set() {
        let backend = ScriptedBackend::new(vec![Ok(r#"{"indices":[]}"#)]);
        let set = PageClassifier::new(backend, 5).classify(&pages(3)).await;
        assert!(set.is_empty());
    }

    #[test]
    fn batches_cover_sequence_contiguously() {
        let images = pages(7);
        let b = batches(&images, 3);
        assert_eq!(b.len(), 3);
        assert_eq!(b[0].start, 0);
        assert_eq!(b[1].start, 3);
        assert_eq!(b[2].start, 6);
        assert_eq!(b[2].images.len(), 1);
    }

    #[test]
    fn parse_accepts_object_and_bare_array() {
        assert_eq!(parse_classification(r#"{"indices":[0,1]}"#, 2).unwrap(), vec![0, 1]);
        assert_eq!(parse_classification("[1]", 2).unwrap(), vec![1]);
        assert!(parse_classification(r#"{"pages":"none"}"#, 2).is_err());
    }
}
