//! Transcription/diarization orchestrator.
//!
//! Processes the planned audio chunks of one recording sequentially (the
//! GPU is the bottleneck, not assumed parallel within a run), bridging the
//! blocking speech model onto the async runtime. Resource exhaustion
//! triggers a cascading-fallback retry at strictly decreasing batch size;
//! after the attempt cap, the chunk is marked permanently failed and the
//! run continues.

use crate::audio::Recording;
use crate::config::OrchestratorConfig;
use crate::defaults;
use crate::error::LongwaveError;
use crate::stt::model::{SpeechModel, TranscribeOptions};
use crate::types::{
    AudioChunk, ChunkFailure, FailureStage, ProgressEvent, RetryEvent, Segment, TimeSpan,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Everything the orchestrator produced for one recording.
#[derive(Debug, Default)]
pub struct TranscriptionOutcome {
    /// Raw segments in recording order, spans absolute.
    pub segments: Vec<Segment>,
    /// Chunks that failed permanently after their retry budget.
    pub failures: Vec<ChunkFailure>,
    /// Every cascading-fallback retry that occurred.
    pub retry_events: Vec<RetryEvent>,
    /// Majority language across the sampled chunks, when detected.
    pub language: Option<String>,
}

/// Outcome of one chunk's retry loop, short of permanent failure.
enum ChunkAttempt {
    /// Chunk transcribed; carries the backend-reported language.
    Completed(Option<String>),
    /// Cancellation observed before an attempt; chunk abandoned.
    Cancelled,
}

/// Orchestrates speech-model calls for the audio chunks of one recording.
pub struct Orchestrator {
    model: Arc<dyn SpeechModel>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(model: Arc<dyn SpeechModel>, config: OrchestratorConfig) -> Self {
        Self { model, config }
    }

    /// Transcribe all chunks sequentially.
    ///
    /// Language detection samples the first `language_sample_chunks`
    /// successful chunks and applies the majority result to every later
    /// call; a documented simplifying assumption, not a hidden one.
    ///
    /// Cancellation stops before the next chunk; completed chunks' segments
    /// are preserved in the outcome.
    pub async fn transcribe_chunks(
        &self,
        recording: Arc<Recording>,
        chunks: &[AudioChunk],
        cancel: &Arc<AtomicBool>,
        progress: Option<&crossbeam_channel::Sender<ProgressEvent>>,
    ) -> TranscriptionOutcome {
        let mut outcome = TranscriptionOutcome::default();

        let configured_language = if self.config.language == defaults::AUTO_LANGUAGE {
            None
        } else {
            Some(self.config.language.clone())
        };
        let mut language_votes: Vec<String> = Vec::new();
        let mut majority_language: Option<String> = configured_language.clone();

        for chunk in chunks {
            if cancel.load(Ordering::SeqCst) {
                info!(chunk = chunk.index, "cancellation observed, stopping transcription");
                break;
            }

            let hint = majority_language.clone();
            match self
                .transcribe_one(&recording, *chunk, hint, cancel, &mut outcome)
                .await
            {
                Ok(ChunkAttempt::Cancelled) => {
                    info!(
                        chunk = chunk.index,
                        "cancellation observed mid-chunk, abandoning retries"
                    );
                    break;
                }
                Ok(ChunkAttempt::Completed(response_language)) => {
                    // Collect language votes until the sample is complete
                    if configured_language.is_none()
                        && majority_language.is_none()
                        && let Some(lang) = response_language
                    {
                        language_votes.push(lang);
                        if language_votes.len() >= self.config.language_sample_chunks {
                            majority_language = Some(majority(&language_votes));
                            info!(
                                language = majority_language.as_deref().unwrap_or(""),
                                samples = language_votes.len(),
                                "majority language applied pipeline-wide"
                            );
                        }
                    }
                    if let Some(tx) = progress {
                        let _ = tx.try_send(ProgressEvent::ChunkTranscribed { index: chunk.index });
                    }
                }
                Err(failure) => {
                    warn!(
                        chunk = failure.chunk_index,
                        attempts = failure.attempts,
                        "audio chunk failed permanently: {}",
                        failure.message
                    );
                    outcome.failures.push(failure);
                    if let Some(tx) = progress {
                        let _ = tx.try_send(ProgressEvent::TranscriptionFailed { index: chunk.index });
                    }
                }
            }
        }

        outcome.language = majority_language.or_else(|| {
            if language_votes.is_empty() {
                None
            } else {
                Some(majority(&language_votes))
            }
        });
        outcome
    }

    /// Run one chunk through the cascading-fallback retry loop.
    ///
    /// Returns the backend-reported language on success, or the permanent
    /// failure record once the attempt cap is reached. Cancellation is
    /// checked before every attempt, so an in-flight chunk stops retrying
    /// as soon as the flag is observed.
    async fn transcribe_one(
        &self,
        recording: &Arc<Recording>,
        chunk: AudioChunk,
        language_hint: Option<String>,
        cancel: &Arc<AtomicBool>,
        outcome: &mut TranscriptionOutcome,
    ) -> std::result::Result<ChunkAttempt, ChunkFailure> {
        let mut batch_size = self.config.batch_size.max(1);
        let call_timeout = Duration::from_secs(self.config.call_timeout_secs);
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if cancel.load(Ordering::SeqCst) {
                return Ok(ChunkAttempt::Cancelled);
            }

            let model = self.model.clone();
            let recording = recording.clone();
            let options = TranscribeOptions {
                language_hint: language_hint.clone(),
                batch_size,
            };

            debug!(chunk = chunk.index, attempt, batch_size, "transcribing audio chunk");

            let call = task::spawn_blocking(move || {
                let samples = recording.slice(chunk.span);
                model.transcribe(samples, recording.sample_rate, &options)
            });

            // A timed-out spawn_blocking call cannot be aborted; the backend
            // call keeps running on the blocking pool until it returns on
            // its own, so the retry below may briefly overlap with it.
            let result = match timeout(call_timeout, call).await {
                Err(_) => Err(LongwaveError::ResourceExhausted {
                    message: format!("inference exceeded {}s timeout", call_timeout.as_secs()),
                }),
                Ok(Err(join_err)) => Err(LongwaveError::Inference {
                    message: format!("inference task panicked: {}", join_err),
                }),
                Ok(Ok(result)) => result,
            };

            match result {
                Ok(response) => {
                    let mut segments: Vec<Segment> = response
                        .segments
                        .into_iter()
                        .map(|raw| Segment {
                            span: TimeSpan::new(
                                chunk.span.start + raw.span.start,
                                chunk.span.start + raw.span.end,
                            ),
                            text: raw.text,
                            speaker_id: raw.speaker_label,
                            word_confidence: raw.confidence,
                            source_chunk: chunk.index,
                        })
                        .collect();
                    segments.sort_by(|a, b| {
                        a.span
                            .start
                            .partial_cmp(&b.span.start)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                    outcome.segments.extend(segments);
                    return Ok(ChunkAttempt::Completed(response.language));
                }
                Err(err) if err.is_resource_exhaustion() => {
                    if attempt == max_attempts {
                        return Err(ChunkFailure {
                            chunk_index: chunk.index,
                            stage: FailureStage::Transcription,
                            attempts: attempt,
                            message: err.to_string(),
                        });
                    }
                    // Cancellation during the call abandons the chunk; no
                    // retry happens, so none is recorded
                    if cancel.load(Ordering::SeqCst) {
                        return Ok(ChunkAttempt::Cancelled);
                    }
                    // Strictly decreasing demand between attempts
                    batch_size = (batch_size / 2).max(1);
                    let event = RetryEvent {
                        chunk_index: chunk.index,
                        attempt: attempt + 1,
                        batch_size,
                        reason: err.to_string(),
                    };
                    warn!(
                        chunk = event.chunk_index,
                        attempt = event.attempt,
                        batch_size = event.batch_size,
                        "resource exhaustion, retrying at reduced batch size: {}",
                        event.reason
                    );
                    outcome.retry_events.push(event);
                }
                Err(err) => {
                    // Ordinary inference failures are not helped by shrinking
                    // the batch; fail the chunk without burning retries.
                    return Err(ChunkFailure {
                        chunk_index: chunk.index,
                        stage: FailureStage::Transcription,
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
            }
        }

        unreachable!("retry loop returns on final attempt")
    }
}

/// Most frequent vote; ties resolve to the earliest-seen language.
fn majority(votes: &[String]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for vote in votes {
        *counts.entry(vote.as_str()).or_insert(0) += 1;
    }

    // Walk in vote order so an equal count never displaces an earlier vote
    let mut best: Option<(&str, usize)> = None;
    for vote in votes {
        let count = counts[vote.as_str()];
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((vote.as_str(), count));
        }
    }
    best.map(|(vote, _)| vote.to_string()).unwrap_or_default()
}
