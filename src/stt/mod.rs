//! Speech model boundary: transcription + diarization backends.

pub mod model;
#[cfg(feature = "whisper")]
pub mod whisper;

pub use model::{MockSpeechModel, ModelHandle, RawSegment, SpeechModel, TranscribeOptions};
