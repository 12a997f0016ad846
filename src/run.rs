//! The end-to-end pipeline for one recording.
//!
//! Plan audio chunks, transcribe and diarize, refine speaker attribution,
//! plan text chunks, extract knowledge, and store the canonical artifact.
//! Per-chunk failures recover locally and are reported in the output; only
//! run-level fatal conditions (bad input, unsplittable utterances, storage
//! of the artifact) propagate as errors.

use crate::audio::{Recording, detect_pauses};
use crate::chunk::{plan_audio_chunks, plan_text_chunks};
use crate::config::Config;
use crate::error::Result;
use crate::extract::dedup::CanonicalKnowledgeSet;
use crate::extract::engine::ExtractionEngine;
use crate::extract::service::Extractor;
use crate::orchestrator::Orchestrator;
use crate::refine::refine;
use crate::storage::{ObjectStorage, knowledge_reference};
use crate::stt::model::ModelHandle;
use crate::types::{ChunkFailure, ProgressEvent, QualityFlag, RetryEvent, Segment, SpeakerProfile};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Everything one run produced.
#[derive(Debug)]
pub struct RunOutput {
    /// Refined segments in recording order.
    pub segments: Vec<Segment>,
    pub speaker_profiles: Vec<SpeakerProfile>,
    /// Majority language across the sampled chunks, when detected.
    pub language: Option<String>,
    pub knowledge: CanonicalKnowledgeSet,
    /// Storage reference of the persisted knowledge artifact.
    pub knowledge_reference: String,
    /// Chunks (audio or text) that failed permanently.
    pub chunk_failures: Vec<ChunkFailure>,
    pub retry_events: Vec<RetryEvent>,
    pub quality_flags: Vec<QualityFlag>,
}

/// Processes recordings end to end.
///
/// One pipeline serves many runs; the speech model loads lazily on the
/// first run and stays resident. Run state never leaks between calls.
pub struct Pipeline {
    config: Config,
    model: ModelHandle,
    extractor: Arc<dyn Extractor>,
    storage: Arc<dyn ObjectStorage>,
    progress: Option<crossbeam_channel::Sender<ProgressEvent>>,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        model: ModelHandle,
        extractor: Arc<dyn Extractor>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            config,
            model,
            extractor,
            storage,
            progress: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach a progress channel; events are dropped, never blocked on,
    /// when the receiver lags.
    pub fn with_progress(mut self, sender: crossbeam_channel::Sender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Handle for cooperative cancellation. Setting it stops the run at the
    /// next chunk boundary; completed chunks' results are preserved.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(event);
        }
    }

    /// Process one recording by storage reference.
    pub async fn process(&self, audio_reference: &str) -> Result<RunOutput> {
        let bytes = self.storage.get(audio_reference).await?;
        let recording = Arc::new(Recording::from_wav_bytes(&bytes)?);
        let duration = recording.duration_secs();
        info!(audio_reference, duration_secs = duration, "run started");

        let model = self.model.get()?;

        // The effective ceiling is whichever is stricter: the configured
        // budget or the model's documented hard limit.
        let mut chunking = self.config.chunking.clone();
        chunking.speech_ceiling_secs = chunking
            .speech_ceiling_secs
            .min(model.duration_ceiling_secs());

        let pauses = if duration > chunking.speech_ceiling_secs {
            detect_pauses(
                &recording,
                chunking.pause_rms_threshold,
                chunking.pause_min_ms,
                crate::defaults::PAUSE_WINDOW_MS,
            )
        } else {
            Vec::new()
        };

        let audio_chunks = plan_audio_chunks(duration, &pauses, &chunking);
        self.emit(ProgressEvent::AudioChunksPlanned {
            total: audio_chunks.len(),
        });

        let orchestrator = Orchestrator::new(model, self.config.orchestrator.clone());
        let transcription = orchestrator
            .transcribe_chunks(
                recording.clone(),
                &audio_chunks,
                &self.cancel,
                self.progress.as_ref(),
            )
            .await;

        let mut chunk_failures = transcription.failures;
        let refined = refine(transcription.segments, &self.config.refinement);
        let mut quality_flags = refined.flags;

        let text_chunks = plan_text_chunks(&refined.segments, &chunking)?;
        self.emit(ProgressEvent::TextChunksPlanned {
            total: text_chunks.len(),
        });

        let engine = ExtractionEngine::new(self.extractor.clone(), self.config.extraction.clone());
        let extraction = engine
            .extract_all(&text_chunks, &self.cancel, self.progress.as_ref())
            .await;

        chunk_failures.extend(extraction.failures);
        quality_flags.extend(extraction.flags);
        if self.cancel.load(Ordering::SeqCst) {
            quality_flags.push(QualityFlag::Cancelled);
        }

        // The canonical set is the run's sole durable artifact.
        let artifact_reference = knowledge_reference(audio_reference);
        let artifact =
            serde_json::to_vec_pretty(&extraction.knowledge).map_err(|e| {
                crate::error::LongwaveError::Storage {
                    path: artifact_reference.clone(),
                    message: format!("artifact serialization failed: {e}"),
                }
            })?;
        self.storage.put(&artifact_reference, &artifact).await?;

        info!(
            audio_reference,
            segments = refined.segments.len(),
            entities = extraction.knowledge.entities.len(),
            relationships = extraction.knowledge.relationships.len(),
            failures = chunk_failures.len(),
            "run completed"
        );
        self.emit(ProgressEvent::RunCompleted);

        Ok(RunOutput {
            segments: refined.segments,
            speaker_profiles: refined.profiles,
            language: transcription.language,
            knowledge: extraction.knowledge,
            knowledge_reference: artifact_reference,
            chunk_failures,
            retry_events: transcription.retry_events,
            quality_flags,
        })
    }
}
