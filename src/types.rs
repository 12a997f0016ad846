//! Core data model: time spans, segments, chunks, and per-run bookkeeping.
//!
//! Segments and chunks are transient, scoped to one run. Ordering by span
//! start is an invariant through every pipeline stage.

use serde::{Deserialize, Serialize};

/// A half-open stretch of recording time in seconds, `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: f64,
    pub end: f64,
}

impl TimeSpan {
    /// Creates a span. Callers must uphold `end > start`; violated spans are
    /// rejected where they enter the pipeline (decoder, speech model boundary).
    pub fn new(start: f64, end: f64) -> Self {
        debug_assert!(end > start, "TimeSpan requires end > start");
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }
}

/// One transcribed utterance with time span, text, and speaker attribution.
///
/// Produced raw by the orchestrator; mutated only by speaker refinement,
/// which may reassign the speaker or merge the segment into its neighbor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub span: TimeSpan,
    pub text: String,
    /// `None` when the backend could not attribute the utterance.
    pub speaker_id: Option<String>,
    /// Mean word-level confidence in `[0, 1]`.
    pub word_confidence: f32,
    /// Index of the audio chunk this segment came from.
    pub source_chunk: usize,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.span.duration()
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Derived view over the current segment list for one speaker.
/// Never persisted independently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeakerProfile {
    pub speaker_id: String,
    pub segment_count: usize,
    pub total_duration: f64,
    pub share_of_total: f64,
}

/// A contiguous, non-overlapping slice of audio time under the speech
/// model's per-call ceiling. Index order equals temporal order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioChunk {
    pub index: usize,
    pub span: TimeSpan,
}

/// A batch of whole, consecutive segments under the extraction service's
/// context budget. Index order equals temporal order.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub index: usize,
    /// Index of the first segment in this chunk within the refined list.
    pub first_segment: usize,
    pub segment_count: usize,
    /// Speaker-prefixed transcript text for the batch.
    pub text: String,
}

/// The pipeline stage a chunk permanently failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureStage {
    Transcription,
    Extraction,
}

/// Record of a chunk that failed permanently after its retry budget.
///
/// Failures recover locally; the run continues, and every gap is recorded
/// so consumers can distinguish "verified absent" from "not analyzed".
#[derive(Debug, Clone, Serialize)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub stage: FailureStage,
    pub attempts: u32,
    pub message: String,
}

/// One cascading-fallback retry of a speech-model call at reduced batch size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryEvent {
    pub chunk_index: usize,
    pub attempt: u32,
    pub batch_size: u32,
    pub reason: String,
}

/// Non-fatal quality signals surfaced with the run output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QualityFlag {
    /// Speaker refinement finished with minor speakers still present.
    /// Output passes through unmodified beyond the four stages; forcing a
    /// numeric speaker target would fabricate attributions.
    SpeakerRefinementNonConverged { distinct_speakers: usize },
    /// Topics, key moments, and sentiment were skipped because the
    /// transcript required more than one extraction chunk.
    DocumentFieldsSkipped { text_chunks: usize },
    /// The run was cancelled; completed chunks' results are preserved.
    Cancelled,
}

/// Progress events emitted over the optional progress channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    AudioChunksPlanned { total: usize },
    ChunkTranscribed { index: usize },
    TranscriptionFailed { index: usize },
    TextChunksPlanned { total: usize },
    ChunkExtracted { index: usize },
    ExtractionFailed { index: usize },
    RunCompleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timespan_duration_and_midpoint() {
        let span = TimeSpan::new(2.0, 5.0);
        assert_eq!(span.duration(), 3.0);
        assert_eq!(span.midpoint(), 3.5);
    }

    #[test]
    fn test_segment_word_count() {
        let segment = Segment {
            span: TimeSpan::new(0.0, 1.5),
            text: "well,  I think so".to_string(),
            speaker_id: Some("SPEAKER_00".to_string()),
            word_confidence: 0.9,
            source_chunk: 0,
        };
        assert_eq!(segment.word_count(), 4);
        assert_eq!(segment.duration(), 1.5);
    }

    #[test]
    fn test_segment_serializes_roundtrip() {
        let segment = Segment {
            span: TimeSpan::new(1.0, 2.0),
            text: "hello".to_string(),
            speaker_id: None,
            word_confidence: 0.8,
            source_chunk: 3,
        };
        let json = serde_json::to_string(&segment).unwrap();
        let back: Segment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, segment);
    }

    #[test]
    fn test_quality_flag_serializes() {
        let flag = QualityFlag::SpeakerRefinementNonConverged {
            distinct_speakers: 5,
        };
        let json = serde_json::to_string(&flag).unwrap();
        assert!(json.contains("SpeakerRefinementNonConverged"));
    }
}
