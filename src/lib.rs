//! longwave - Long-form audio intelligence
//!
//! Chunked transcription and diarization, speaker refinement, and
//! LLM-based knowledge extraction for recordings of unbounded length.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod chunk;
pub mod config;
pub mod defaults;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod refine;
pub mod run;
pub mod storage;
pub mod stt;
pub mod types;

// Core traits (audio in → knowledge out)
pub use extract::service::{Extractor, HttpExtractor};
pub use storage::{LocalStorage, MemoryStorage, ObjectStorage};
pub use stt::model::{ModelHandle, SpeechModel};

// Pipeline
pub use run::{Pipeline, RunOutput};

// Error handling
pub use error::{LongwaveError, Result};

// Config
pub use config::Config;

// Run data model
pub use extract::dedup::CanonicalKnowledgeSet;
pub use types::{
    ChunkFailure, ProgressEvent, QualityFlag, RetryEvent, Segment, SpeakerProfile, TimeSpan,
};
