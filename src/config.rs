//! Pipeline configuration.
//!
//! Every heuristic threshold lives here in a named section rather than as a
//! hard-coded literal, so each stage stays independently tunable per
//! domain/dataset.

use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub orchestrator: OrchestratorConfig,
    pub refinement: RefinementConfig,
    pub extraction: ExtractionConfig,
}

/// Chunk planner budgets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Hard per-call duration ceiling of the speech model, seconds.
    pub speech_ceiling_secs: f64,
    /// How far a split may move to land on a detected pause, seconds.
    pub pause_tolerance_secs: f64,
    /// RMS threshold below which a window counts as a pause.
    pub pause_rms_threshold: f32,
    /// Minimum low-energy duration to count as a pause, milliseconds.
    pub pause_min_ms: u32,
    /// Segments grouped into one extraction chunk.
    pub segments_per_text_chunk: usize,
    /// Fatal ceiling for a single utterance's text length, characters.
    pub max_utterance_chars: usize,
}

/// Transcription/diarization orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Initial inference batch size; halved on each resource-exhaustion retry.
    pub batch_size: u32,
    /// Attempt cap per audio chunk (initial call + retries).
    pub max_attempts: u32,
    /// Per-call inference timeout, seconds.
    pub call_timeout_secs: u64,
    /// Language code, or "auto" for majority detection over sampled chunks.
    pub language: String,
    /// Number of chunks sampled for language detection.
    pub language_sample_chunks: usize,
}

/// Speaker refinement thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefinementConfig {
    /// Segments shorter than this merge into the preceding segment, seconds.
    pub min_segment_secs: f64,
    /// Share of total speech above which a speaker is "major".
    pub major_share: f64,
    /// Share below which a residual speaker is absorbed, after all other stages.
    pub residual_share: f64,
    /// Maximum duration of a reattributable interjection, seconds.
    pub interjection_max_secs: f64,
    /// Maximum word count of a reattributable interjection.
    pub interjection_max_words: usize,
}

/// Extraction/deduplication settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Extraction service endpoint (OpenAI-compatible chat completions).
    pub endpoint: String,
    /// Model identifier sent to the service.
    pub model: String,
    /// Attempt cap per text chunk.
    pub max_attempts: u32,
    /// Per-call timeout, seconds.
    pub call_timeout_secs: u64,
    /// Maximum concurrent extraction requests.
    pub concurrency: usize,
    /// Minimum confidence for entities.
    pub entity_confidence_floor: f64,
    /// Minimum confidence for relationships.
    pub relationship_confidence_floor: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            speech_ceiling_secs: defaults::SPEECH_CEILING_SECS,
            pause_tolerance_secs: defaults::PAUSE_TOLERANCE_SECS,
            pause_rms_threshold: defaults::PAUSE_RMS_THRESHOLD,
            pause_min_ms: defaults::PAUSE_MIN_MS,
            segments_per_text_chunk: defaults::SEGMENTS_PER_TEXT_CHUNK,
            max_utterance_chars: defaults::MAX_UTTERANCE_CHARS,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            max_attempts: defaults::MAX_TRANSCRIBE_ATTEMPTS,
            call_timeout_secs: defaults::TRANSCRIBE_TIMEOUT_SECS,
            language: defaults::AUTO_LANGUAGE.to_string(),
            language_sample_chunks: defaults::LANGUAGE_SAMPLE_CHUNKS,
        }
    }
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            min_segment_secs: defaults::MIN_SEGMENT_SECS,
            major_share: defaults::MAJOR_SHARE,
            residual_share: defaults::RESIDUAL_SHARE,
            interjection_max_secs: defaults::INTERJECTION_MAX_SECS,
            interjection_max_words: defaults::INTERJECTION_MAX_WORDS,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/v1/chat/completions".to_string(),
            model: "extraction-default".to_string(),
            max_attempts: defaults::MAX_EXTRACTION_ATTEMPTS,
            call_timeout_secs: defaults::EXTRACTION_TIMEOUT_SECS,
            concurrency: defaults::EXTRACTION_CONCURRENCY,
            entity_confidence_floor: defaults::ENTITY_CONFIDENCE_FLOOR,
            relationship_confidence_floor: defaults::RELATIONSHIP_CONFIDENCE_FLOOR,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make chunk planning degenerate.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunking.speech_ceiling_secs <= 0.0 {
            anyhow::bail!("chunking.speech_ceiling_secs must be positive");
        }
        if self.chunking.segments_per_text_chunk == 0 {
            anyhow::bail!("chunking.segments_per_text_chunk must be at least 1");
        }
        if self.orchestrator.max_attempts == 0 || self.extraction.max_attempts == 0 {
            anyhow::bail!("attempt caps must be at least 1");
        }
        if self.refinement.residual_share >= self.refinement.major_share {
            anyhow::bail!("refinement.residual_share must be below refinement.major_share");
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - LONGWAVE_LANGUAGE → orchestrator.language
    /// - LONGWAVE_EXTRACTION_ENDPOINT → extraction.endpoint
    /// - LONGWAVE_EXTRACTION_MODEL → extraction.model
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(language) = std::env::var("LONGWAVE_LANGUAGE") {
            if !language.is_empty() {
                self.orchestrator.language = language;
            }
        }

        if let Ok(endpoint) = std::env::var("LONGWAVE_EXTRACTION_ENDPOINT") {
            if !endpoint.is_empty() {
                self.extraction.endpoint = endpoint;
            }
        }

        if let Ok(model) = std::env::var("LONGWAVE_EXTRACTION_MODEL") {
            if !model.is_empty() {
                self.extraction.model = model;
            }
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/longwave/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("longwave").join("config.toml"))
    }
}
