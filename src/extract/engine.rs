//! Concurrent extraction engine.
//!
//! Text chunks are independent once planned, so extraction calls run
//! concurrently under a semaphore, unlike GPU-bound transcription. Results
//! funnel into the order-insensitive [`KnowledgeBuilder`], so completion
//! order never changes the canonical set.

use crate::config::ExtractionConfig;
use crate::error::LongwaveError;
use crate::extract::dedup::{CanonicalKnowledgeSet, KnowledgeBuilder};
use crate::extract::schema::{self, ChunkExtraction};
use crate::extract::service::Extractor;
use crate::types::{ChunkFailure, FailureStage, ProgressEvent, QualityFlag, TextChunk};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Everything the engine produced for one run.
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub knowledge: CanonicalKnowledgeSet,
    /// Text chunks that failed permanently after their retry budget.
    pub failures: Vec<ChunkFailure>,
    pub flags: Vec<QualityFlag>,
}

/// Runs extraction calls for the text chunks of one run.
pub struct ExtractionEngine {
    extractor: Arc<dyn Extractor>,
    config: ExtractionConfig,
}

impl ExtractionEngine {
    pub fn new(extractor: Arc<dyn Extractor>, config: ExtractionConfig) -> Self {
        Self { extractor, config }
    }

    /// Extract knowledge from every text chunk concurrently and merge the
    /// results into one canonical set.
    ///
    /// Whole-document fields (topics, key moments, sentiment) are requested
    /// only when the transcript fit a single chunk; otherwise their absence
    /// is flagged. Cancellation stops spawning new calls; a chunk already
    /// in flight abandons its remaining retries and is discarded.
    pub async fn extract_all(
        &self,
        chunks: &[TextChunk],
        cancel: &Arc<AtomicBool>,
        progress: Option<&crossbeam_channel::Sender<ProgressEvent>>,
    ) -> ExtractionOutcome {
        let mut outcome = ExtractionOutcome::default();
        let mut builder = KnowledgeBuilder::new(
            self.config.entity_confidence_floor,
            self.config.relationship_confidence_floor,
        );

        if chunks.is_empty() {
            outcome.knowledge = builder.finalize();
            return outcome;
        }

        let include_document_fields = chunks.len() == 1;
        if !include_document_fields {
            outcome.flags.push(QualityFlag::DocumentFieldsSkipped {
                text_chunks: chunks.len(),
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut calls: JoinSet<(usize, Result<Option<ChunkExtraction>, ChunkFailure>)> =
            JoinSet::new();

        for chunk in chunks {
            if cancel.load(Ordering::SeqCst) {
                info!(
                    chunk = chunk.index,
                    "cancellation observed, not spawning further extraction calls"
                );
                break;
            }

            let extractor = self.extractor.clone();
            let config = self.config.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let index = chunk.index;
            let text = chunk.text.clone();

            calls.spawn(async move {
                // The semaphore is never closed; a failed acquire cannot occur
                let _permit = semaphore.acquire().await.ok();
                let result = extract_one(
                    extractor,
                    &config,
                    index,
                    &text,
                    include_document_fields,
                    &cancel,
                )
                .await;
                (index, result)
            });
        }

        while let Some(joined) = calls.join_next().await {
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(join_err) => {
                    warn!("extraction task panicked: {join_err}");
                    continue;
                }
            };

            match result {
                Ok(None) => {
                    info!(chunk = index, "cancellation observed mid-chunk, abandoning retries");
                }
                Ok(Some(extraction)) => {
                    builder.merge(extraction.entities, extraction.relationships);
                    if include_document_fields {
                        builder.set_document_fields(
                            extraction.topics,
                            extraction.key_moments,
                            extraction.sentiment,
                        );
                    }
                    if let Some(tx) = progress {
                        let _ = tx.try_send(ProgressEvent::ChunkExtracted { index });
                    }
                }
                Err(failure) => {
                    warn!(
                        chunk = failure.chunk_index,
                        attempts = failure.attempts,
                        "text chunk failed permanently: {}",
                        failure.message
                    );
                    outcome.failures.push(failure);
                    if let Some(tx) = progress {
                        let _ = tx.try_send(ProgressEvent::ExtractionFailed { index });
                    }
                }
            }
        }

        outcome.failures.sort_by_key(|f| f.chunk_index);
        outcome.knowledge = builder.finalize();
        outcome
    }
}

/// Run one text chunk through the retry loop.
///
/// Call failures, timeouts, and schema violations all count against the
/// same attempt cap; the service is stateless per call, so a clean retry
/// is the only recourse for any of them. Returns `Ok(None)` when the run
/// was cancelled between attempts; the chunk is then discarded, not
/// recorded as a failure.
async fn extract_one(
    extractor: Arc<dyn Extractor>,
    config: &ExtractionConfig,
    index: usize,
    text: &str,
    include_document_fields: bool,
    cancel: &Arc<AtomicBool>,
) -> Result<Option<ChunkExtraction>, ChunkFailure> {
    let call_timeout = Duration::from_secs(config.call_timeout_secs);
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if cancel.load(Ordering::SeqCst) {
            return Ok(None);
        }
        debug!(chunk = index, attempt, "extracting text chunk");

        let result = match timeout(
            call_timeout,
            extractor.extract(index, text, include_document_fields),
        )
        .await
        {
            Err(_) => Err(LongwaveError::ExtractionCall {
                message: format!("call exceeded {}s timeout", call_timeout.as_secs()),
            }),
            Ok(result) => result,
        };

        match result.and_then(|payload| schema::validate(&payload, index)) {
            Ok(extraction) => return Ok(Some(extraction)),
            Err(err) => {
                last_error = err.to_string();
                if attempt < max_attempts {
                    warn!(chunk = index, attempt, "extraction attempt failed, retrying: {last_error}");
                }
            }
        }
    }

    Err(ChunkFailure {
        chunk_index: index,
        stage: FailureStage::Extraction,
        attempts: max_attempts,
        message: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::service::{MockExtraction, MockExtractor};
    use serde_json::json;

    fn text_chunk(index: usize, text: &str) -> TextChunk {
        TextChunk {
            index,
            first_segment: index * 40,
            segment_count: 40,
            text: text.to_string(),
        }
    }

    fn config() -> ExtractionConfig {
        ExtractionConfig {
            max_attempts: 3,
            call_timeout_secs: 5,
            concurrency: 4,
            ..ExtractionConfig::default()
        }
    }

    fn no_cancel() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    fn entity_payload(name: &str, confidence: f64) -> serde_json::Value {
        json!({
            "entities": [{"name": name, "type": "PERSON", "confidence": confidence}],
            "relationships": []
        })
    }

    #[tokio::test]
    async fn test_concurrent_chunks_merge_into_one_set() {
        let mock = Arc::new(MockExtractor::new());
        mock.push_outcome(0, MockExtraction::Payload(entity_payload("Brad", 0.9)));
        mock.push_outcome(1, MockExtraction::Payload(entity_payload("brad", 0.8)));
        mock.push_outcome(2, MockExtraction::Payload(entity_payload("Dana", 0.75)));

        let engine = ExtractionEngine::new(mock.clone(), config());
        let chunks = vec![
            text_chunk(0, "a"),
            text_chunk(1, "b"),
            text_chunk(2, "c"),
        ];
        let outcome = engine.extract_all(&chunks, &no_cancel(), None).await;

        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.knowledge.entities.len(), 2);
        let brad = outcome
            .knowledge
            .entities
            .iter()
            .find(|e| e.name == "Brad")
            .unwrap();
        assert_eq!(brad.confidence, 0.9);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_chunk_retried_then_marked_permanent() {
        let mock = Arc::new(MockExtractor::new());
        for _ in 0..3 {
            mock.push_outcome(1, MockExtraction::Fail("service unavailable".to_string()));
        }
        mock.push_outcome(0, MockExtraction::Payload(entity_payload("Brad", 0.9)));

        let engine = ExtractionEngine::new(mock.clone(), config());
        let chunks = vec![text_chunk(0, "a"), text_chunk(1, "b")];
        let outcome = engine.extract_all(&chunks, &no_cancel(), None).await;

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].chunk_index, 1);
        assert_eq!(outcome.failures[0].stage, FailureStage::Extraction);
        assert_eq!(outcome.failures[0].attempts, 3);
        // Chunk 0 was unaffected
        assert_eq!(outcome.knowledge.entities.len(), 1);
    }

    #[tokio::test]
    async fn test_schema_violation_burns_an_attempt() {
        let mock = Arc::new(MockExtractor::new());
        mock.push_outcome(0, MockExtraction::Payload(json!({"entities": "garbage"})));
        mock.push_outcome(0, MockExtraction::Payload(entity_payload("Brad", 0.9)));

        let engine = ExtractionEngine::new(mock.clone(), config());
        let outcome = engine
            .extract_all(&[text_chunk(0, "a")], &no_cancel(), None)
            .await;

        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.knowledge.entities.len(), 1);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_document_fields_only_for_single_chunk() {
        let mock = Arc::new(MockExtractor::new().with_default_payload(json!({
            "entities": [],
            "relationships": [],
            "topics": ["hiring"],
            "sentiment": "positive"
        })));

        let engine = ExtractionEngine::new(mock.clone(), config());
        let outcome = engine
            .extract_all(&[text_chunk(0, "whole transcript")], &no_cancel(), None)
            .await;

        assert_eq!(mock.document_field_request_count(), 1);
        assert_eq!(outcome.knowledge.topics, vec!["hiring"]);
        assert_eq!(outcome.knowledge.sentiment.as_deref(), Some("positive"));
        assert!(outcome.flags.is_empty());
    }

    #[tokio::test]
    async fn test_multi_chunk_skips_document_fields_and_flags() {
        let mock = Arc::new(MockExtractor::new().with_default_payload(json!({
            "entities": [],
            "relationships": [],
            "topics": ["should be ignored"],
            "sentiment": "positive"
        })));

        let engine = ExtractionEngine::new(mock.clone(), config());
        let chunks = vec![text_chunk(0, "a"), text_chunk(1, "b")];
        let outcome = engine.extract_all(&chunks, &no_cancel(), None).await;

        assert_eq!(mock.document_field_request_count(), 0);
        assert!(outcome.knowledge.topics.is_empty());
        assert!(outcome.knowledge.sentiment.is_none());
        assert_eq!(
            outcome.flags,
            vec![QualityFlag::DocumentFieldsSkipped { text_chunks: 2 }]
        );
    }

    #[tokio::test]
    async fn test_cancellation_spawns_no_calls() {
        let mock = Arc::new(MockExtractor::new());
        let engine = ExtractionEngine::new(mock.clone(), config());
        let cancel = Arc::new(AtomicBool::new(true));

        let outcome = engine
            .extract_all(&[text_chunk(0, "a"), text_chunk(1, "b")], &cancel, None)
            .await;

        assert_eq!(mock.call_count(), 0);
        assert!(outcome.knowledge.entities.is_empty());
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_mid_chunk_abandons_retries() {
        struct CancelOnCallExtractor {
            cancel: Arc<AtomicBool>,
            calls: std::sync::atomic::AtomicU32,
        }

        #[async_trait::async_trait]
        impl Extractor for CancelOnCallExtractor {
            async fn extract(
                &self,
                _chunk_index: usize,
                _chunk_text: &str,
                _include_document_fields: bool,
            ) -> crate::error::Result<serde_json::Value> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                // Simulates the run being cancelled while this call is active
                self.cancel.store(true, Ordering::SeqCst);
                Err(LongwaveError::ExtractionCall {
                    message: "service unavailable".to_string(),
                })
            }
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let extractor = Arc::new(CancelOnCallExtractor {
            cancel: cancel.clone(),
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let engine = ExtractionEngine::new(extractor.clone(), config());

        let outcome = engine.extract_all(&[text_chunk(0, "a")], &cancel, None).await;

        // One call, not the full attempt budget, and no permanent failure
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert!(outcome.failures.is_empty());
        assert!(outcome.knowledge.entities.is_empty());
    }

    #[tokio::test]
    async fn test_empty_chunk_list_yields_empty_set() {
        let mock = Arc::new(MockExtractor::new());
        let engine = ExtractionEngine::new(mock.clone(), config());
        let outcome = engine.extract_all(&[], &no_cancel(), None).await;

        assert_eq!(outcome.knowledge, CanonicalKnowledgeSet::default());
        assert!(outcome.flags.is_empty());
        assert_eq!(mock.call_count(), 0);
    }
}
