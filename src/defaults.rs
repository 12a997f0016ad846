//! Default configuration constants for longwave.
//!
//! Shared across the configuration types so thresholds are defined exactly
//! once and stay tunable per domain/dataset.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and what every supported
/// speech backend expects.
pub const SAMPLE_RATE: u32 = 16000;

/// Hard per-call duration ceiling of the speech model, in seconds.
///
/// Audio-side chunking activates only when a recording exceeds this.
/// 600s (10 minutes) is a conservative default under the ceilings of the
/// backends we target.
pub const SPEECH_CEILING_SECS: f64 = 600.0;

/// Tolerance for snapping an audio split point to a detected pause, in seconds.
///
/// A split lands at the nearest pause within this distance of the budget
/// boundary; if no pause qualifies, a hard cut is used instead.
pub const PAUSE_TOLERANCE_SECS: f64 = 30.0;

/// RMS threshold below which an analysis window counts as a pause.
///
/// Tuned against the same energy model used for speech detection; 0.02 is
/// calibrated for typical recorded-interview levels.
pub const PAUSE_RMS_THRESHOLD: f32 = 0.02;

/// Minimum duration for a low-energy stretch to count as a pause, in milliseconds.
pub const PAUSE_MIN_MS: u32 = 400;

/// Analysis window for pause detection, in milliseconds.
pub const PAUSE_WINDOW_MS: u32 = 100;

/// Segments per text chunk handed to the extraction service.
///
/// Text-side chunking batches whole utterances by count, not raw characters,
/// so no utterance is ever split mid-sentence.
pub const SEGMENTS_PER_TEXT_CHUNK: usize = 40;

/// Maximum length of a single utterance's text, in characters.
///
/// A lone utterance longer than this cannot fit the extraction service's
/// context and is a fatal configuration error, never silently truncated.
pub const MAX_UTTERANCE_CHARS: usize = 8000;

/// Initial speech-model batch size.
pub const BATCH_SIZE: u32 = 16;

/// Maximum transcription attempts per audio chunk (initial call + retries).
pub const MAX_TRANSCRIBE_ATTEMPTS: u32 = 3;

/// Maximum extraction attempts per text chunk (initial call + retries).
pub const MAX_EXTRACTION_ATTEMPTS: u32 = 3;

/// Per-call timeout for speech-model inference, in seconds.
pub const TRANSCRIBE_TIMEOUT_SECS: u64 = 900;

/// Per-call timeout for extraction-service requests, in seconds.
pub const EXTRACTION_TIMEOUT_SECS: u64 = 120;

/// Maximum concurrent extraction requests in flight.
pub const EXTRACTION_CONCURRENCY: usize = 4;

/// Number of audio chunks sampled for language detection.
///
/// The majority language across the sample is applied pipeline-wide, a
/// documented simplifying assumption.
pub const LANGUAGE_SAMPLE_CHUNKS: usize = 3;

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// Minimum segment duration before it is merged into its predecessor, in seconds.
pub const MIN_SEGMENT_SECS: f64 = 0.5;

/// Share of total speech above which a speaker counts as "major".
pub const MAJOR_SHARE: f64 = 0.10;

/// Share of total speech below which a residual speaker is absorbed into
/// the nearest-in-time major speaker.
pub const RESIDUAL_SHARE: f64 = 0.01;

/// Maximum duration of a reattributable interjection, in seconds.
pub const INTERJECTION_MAX_SECS: f64 = 2.0;

/// Maximum word count of a reattributable interjection.
pub const INTERJECTION_MAX_WORDS: usize = 4;

/// Minimum confidence for an extracted entity to enter the knowledge set.
pub const ENTITY_CONFIDENCE_FLOOR: f64 = 0.70;

/// Minimum confidence for an extracted relationship to enter the knowledge set.
/// Always stricter than the entity floor.
pub const RELATIONSHIP_CONFIDENCE_FLOOR: f64 = 0.80;

/// Report the GPU backend compiled into this build.
///
/// Returns a human-readable name based on the compile-time feature flags.
/// Only one GPU backend can be active at a time; if none is enabled, returns "CPU".
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else if cfg!(feature = "hipblas") {
        "HipBLAS (AMD)"
    } else if cfg!(feature = "openblas") {
        "OpenBLAS"
    } else {
        "CPU"
    }
}
