//! Speech model trait and the per-worker model handle.
//!
//! The GPU-resident weights are an explicit, ownership-scoped resource:
//! created lazily once per worker through [`ModelHandle`] and injected into
//! the orchestrator, never a hidden singleton. The trait seam allows
//! swapping implementations (real backend vs mock).

use crate::error::{LongwaveError, Result};
use crate::types::TimeSpan;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// One utterance as returned by the backend, span relative to the call's audio.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSegment {
    pub span: TimeSpan,
    pub text: String,
    /// Backend speaker label (e.g. "SPEAKER_00"); `None` when the backend
    /// does not diarize.
    pub speaker_label: Option<String>,
    /// Mean word-level confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Per-call inference options.
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    /// Language hint, or `None` for backend auto-detection.
    pub language_hint: Option<String>,
    /// Inference batch size; the orchestrator halves this on
    /// resource-exhaustion retries.
    pub batch_size: u32,
}

/// Backend response for one audio chunk.
#[derive(Debug, Clone, Default)]
pub struct TranscribeResponse {
    pub segments: Vec<RawSegment>,
    /// Detected language, when the backend reports one.
    pub language: Option<String>,
}

/// Trait for transcription + diarization backends.
///
/// Implementations must surface GPU memory pressure as
/// [`LongwaveError::ResourceExhausted`] so the orchestrator can distinguish
/// it from ordinary inference failures and retry at reduced batch size.
pub trait SpeechModel: Send + Sync {
    /// Transcribe and diarize one chunk of 16kHz mono PCM audio.
    ///
    /// Blocking; the orchestrator bridges this onto the async runtime.
    fn transcribe(
        &self,
        samples: &[i16],
        sample_rate: u32,
        options: &TranscribeOptions,
    ) -> Result<TranscribeResponse>;

    /// Documented hard per-call duration ceiling, seconds.
    fn duration_ceiling_secs(&self) -> f64;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;

    /// Check if the backend is ready
    fn is_ready(&self) -> bool;
}

impl<T: SpeechModel + ?Sized> SpeechModel for Arc<T> {
    fn transcribe(
        &self,
        samples: &[i16],
        sample_rate: u32,
        options: &TranscribeOptions,
    ) -> Result<TranscribeResponse> {
        (**self).transcribe(samples, sample_rate, options)
    }

    fn duration_ceiling_secs(&self) -> f64 {
        (**self).duration_ceiling_secs()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

type Loader = dyn Fn() -> Result<Arc<dyn SpeechModel>> + Send + Sync;

/// Lazily-loaded, worker-scoped handle to the speech model.
///
/// The loader runs at most once per handle lifetime; every subsequent `get`
/// returns the same `Arc`. Run data never flows back into the handle; the
/// loaded model is read-only with respect to runs.
pub struct ModelHandle {
    loader: Box<Loader>,
    loaded: Mutex<Option<Arc<dyn SpeechModel>>>,
}

impl ModelHandle {
    /// Create a handle that defers model loading until first use.
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn SpeechModel>> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            loaded: Mutex::new(None),
        }
    }

    /// Create a handle around an already-loaded model (tests, warm workers).
    pub fn preloaded(model: Arc<dyn SpeechModel>) -> Self {
        Self {
            loader: Box::new(|| {
                Err(LongwaveError::ModelLoad {
                    message: "preloaded handle has no loader".to_string(),
                })
            }),
            loaded: Mutex::new(Some(model)),
        }
    }

    /// Get the model, loading it on first call.
    pub fn get(&self) -> Result<Arc<dyn SpeechModel>> {
        let mut guard = self
            .loaded
            .lock()
            .map_err(|_| LongwaveError::ModelLoad {
                message: "model handle lock poisoned".to_string(),
            })?;

        if let Some(model) = guard.as_ref() {
            return Ok(model.clone());
        }

        let model = (self.loader)()?;
        tracing::info!(model = model.model_name(), "speech model loaded");
        *guard = Some(model.clone());
        Ok(model)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

/// Scripted per-call outcome for [`MockSpeechModel`].
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Segments(Vec<RawSegment>),
    /// Resource exhaustion, retryable at reduced batch size.
    Exhausted,
    /// Ordinary inference failure.
    Fail(String),
}

/// Mock speech model for testing.
///
/// Calls consume scripted outcomes in order; once the script is exhausted,
/// every call returns `default_segments`.
pub struct MockSpeechModel {
    model_name: String,
    ceiling_secs: f64,
    language: Option<String>,
    script: Mutex<VecDeque<MockOutcome>>,
    default_segments: Vec<RawSegment>,
    calls: AtomicU32,
    batch_sizes: Mutex<Vec<u32>>,
    language_hints: Mutex<Vec<Option<String>>>,
}

impl MockSpeechModel {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            ceiling_secs: 600.0,
            language: Some("en".to_string()),
            script: Mutex::new(VecDeque::new()),
            default_segments: Vec::new(),
            calls: AtomicU32::new(0),
            batch_sizes: Mutex::new(Vec::new()),
            language_hints: Mutex::new(Vec::new()),
        }
    }

    pub fn with_ceiling_secs(mut self, secs: f64) -> Self {
        self.ceiling_secs = secs;
        self
    }

    pub fn with_language(mut self, language: Option<&str>) -> Self {
        self.language = language.map(|s| s.to_string());
        self
    }

    /// Segments returned for every unscripted call.
    pub fn with_default_segments(mut self, segments: Vec<RawSegment>) -> Self {
        self.default_segments = segments;
        self
    }

    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Batch sizes observed across all calls, in order.
    pub fn observed_batch_sizes(&self) -> Vec<u32> {
        self.batch_sizes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Language hints observed across all calls, in order.
    pub fn observed_language_hints(&self) -> Vec<Option<String>> {
        self.language_hints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SpeechModel for MockSpeechModel {
    fn transcribe(
        &self,
        _samples: &[i16],
        _sample_rate: u32,
        options: &TranscribeOptions,
    ) -> Result<TranscribeResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(options.batch_size);
        self.language_hints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(options.language_hint.clone());

        let outcome = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match outcome {
            Some(MockOutcome::Exhausted) => Err(LongwaveError::ResourceExhausted {
                message: "mock GPU out of memory".to_string(),
            }),
            Some(MockOutcome::Fail(message)) => Err(LongwaveError::Inference { message }),
            Some(MockOutcome::Segments(segments)) => Ok(TranscribeResponse {
                segments,
                language: self.language.clone(),
            }),
            None => Ok(TranscribeResponse {
                segments: self.default_segments.clone(),
                language: self.language.clone(),
            }),
        }
    }

    fn duration_ceiling_secs(&self) -> f64 {
        self.ceiling_secs
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(start: f64, end: f64, text: &str) -> RawSegment {
        RawSegment {
            span: TimeSpan::new(start, end),
            text: text.to_string(),
            speaker_label: Some("SPEAKER_00".to_string()),
            confidence: 0.9,
        }
    }

    fn options(batch_size: u32) -> TranscribeOptions {
        TranscribeOptions {
            language_hint: None,
            batch_size,
        }
    }

    #[test]
    fn test_mock_returns_default_segments() {
        let model = MockSpeechModel::new("mock").with_default_segments(vec![raw(0.0, 1.0, "hi")]);

        let response = model.transcribe(&[0i16; 100], 16000, &options(16)).unwrap();
        assert_eq!(response.segments.len(), 1);
        assert_eq!(response.segments[0].text, "hi");
        assert_eq!(response.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_mock_script_consumed_in_order() {
        let model = MockSpeechModel::new("mock").with_default_segments(vec![raw(0.0, 1.0, "ok")]);
        model.push_outcome(MockOutcome::Exhausted);
        model.push_outcome(MockOutcome::Segments(vec![raw(0.0, 1.0, "retry worked")]));

        let err = model
            .transcribe(&[0i16; 100], 16000, &options(16))
            .unwrap_err();
        assert!(err.is_resource_exhaustion());

        let response = model.transcribe(&[0i16; 100], 16000, &options(8)).unwrap();
        assert_eq!(response.segments[0].text, "retry worked");

        assert_eq!(model.call_count(), 2);
        assert_eq!(model.observed_batch_sizes(), vec![16, 8]);
    }

    #[test]
    fn test_model_handle_loads_once() {
        use std::sync::atomic::AtomicUsize;

        static LOADS: AtomicUsize = AtomicUsize::new(0);

        let handle = ModelHandle::new(|| {
            LOADS.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockSpeechModel::new("lazy")) as Arc<dyn SpeechModel>)
        });

        assert!(!handle.is_loaded());
        let first = handle.get().unwrap();
        let second = handle.get().unwrap();
        assert!(handle.is_loaded());
        assert_eq!(LOADS.load(Ordering::SeqCst), 1);
        assert_eq!(first.model_name(), second.model_name());
    }

    #[test]
    fn test_model_handle_propagates_load_failure() {
        let handle = ModelHandle::new(|| {
            Err(LongwaveError::ModelNotFound {
                path: "/missing/model.bin".to_string(),
            })
        });

        assert!(handle.get().is_err());
        assert!(!handle.is_loaded());
    }

    #[test]
    fn test_preloaded_handle() {
        let model: Arc<dyn SpeechModel> = Arc::new(MockSpeechModel::new("warm"));
        let handle = ModelHandle::preloaded(model);
        assert!(handle.is_loaded());
        assert_eq!(handle.get().unwrap().model_name(), "warm");
    }

    #[test]
    fn test_speech_model_trait_is_object_safe() {
        let model: Box<dyn SpeechModel> = Box::new(MockSpeechModel::new("boxed"));
        assert!(model.is_ready());
        assert_eq!(model.model_name(), "boxed");
    }
}
