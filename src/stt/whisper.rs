//! Whisper-based speech backend.
//!
//! Implements [`SpeechModel`] over whisper-rs. Whisper does not diarize, so
//! `speaker_label` is always `None` here; diarizing backends fill it in.
//!
//! # Feature Gate
//!
//! Requires the `whisper` feature and cmake:
//!
//! ```bash
//! cargo build --features whisper
//! ```

use crate::defaults;
use crate::error::{LongwaveError, Result};
use crate::stt::model::{RawSegment, SpeechModel, TranscribeOptions, TranscribeResponse};
use crate::types::TimeSpan;
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Configuration for the whisper backend.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Path to the Whisper model file
    pub model_path: PathBuf,
    /// Number of threads for inference (None = auto-detect)
    pub threads: Option<usize>,
    /// Hard per-call duration ceiling reported to the chunk planner, seconds.
    pub duration_ceiling_secs: f64,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-base.bin"),
            threads: None,
            duration_ceiling_secs: defaults::SPEECH_CEILING_SECS,
        }
    }
}

/// Whisper implementation of [`SpeechModel`].
///
/// The WhisperContext is wrapped in a Mutex to ensure thread safety; one
/// instance is loaded per worker through the model handle.
pub struct WhisperSpeechModel {
    context: Mutex<WhisperContext>,
    config: WhisperConfig,
    model_name: String,
}

impl std::fmt::Debug for WhisperSpeechModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperSpeechModel")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

impl WhisperSpeechModel {
    /// Load the model from disk.
    ///
    /// # Errors
    /// Returns `LongwaveError::ModelNotFound` if the model file doesn't exist,
    /// `LongwaveError::ModelLoad` if loading fails.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        // Install logging hooks to suppress whisper.cpp output (only once)
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(LongwaveError::ModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = config
            .model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let mut context_params = WhisperContextParameters::default();
        // Fused attention kernels; avoids the standalone softmax CUDA kernel
        // that crashes on Blackwell GPUs with older ggml.
        context_params.flash_attn(true);
        let context = WhisperContext::new_with_params(
            config
                .model_path
                .to_str()
                .ok_or_else(|| LongwaveError::ModelLoad {
                    message: "Invalid UTF-8 in model path".to_string(),
                })?,
            context_params,
        )
        .map_err(|e| LongwaveError::ModelLoad {
            message: format!("Failed to load Whisper model: {}", e),
        })?;

        Ok(Self {
            context: Mutex::new(context),
            config,
            model_name,
        })
    }

    /// Convert i16 PCM to f32 normalized to [-1.0, 1.0], as whisper expects.
    fn convert_audio(samples: &[i16]) -> Vec<f32> {
        samples
            .iter()
            .map(|&sample| sample as f32 / 32768.0)
            .collect()
    }

    /// Classify a whisper.cpp error message: allocation failures are
    /// resource exhaustion and retryable at reduced batch size.
    fn classify_inference_error(message: String) -> LongwaveError {
        let lower = message.to_lowercase();
        if lower.contains("out of memory") || lower.contains("alloc") || lower.contains("cuda") {
            LongwaveError::ResourceExhausted { message }
        } else {
            LongwaveError::Inference { message }
        }
    }
}

impl SpeechModel for WhisperSpeechModel {
    fn transcribe(
        &self,
        samples: &[i16],
        _sample_rate: u32,
        options: &TranscribeOptions,
    ) -> Result<TranscribeResponse> {
        let audio_f32 = Self::convert_audio(samples);

        let context = self.context.lock().map_err(|e| LongwaveError::Inference {
            message: format!("Failed to acquire context lock: {}", e),
        })?;

        let mut state = context.create_state().map_err(|e| {
            Self::classify_inference_error(format!("Failed to create Whisper state: {}", e))
        })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(options.language_hint.as_deref());
        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }

        // Disable printing to stdout/stderr
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio_f32)
            .map_err(|e| Self::classify_inference_error(format!("Whisper inference failed: {}", e)))?;

        let lang_id = state.full_lang_id_from_state();
        let language = match whisper_rs::get_lang_str(lang_id) {
            Some(code) if !code.is_empty() => Some(code.to_string()),
            _ => None,
        };

        // Whisper timestamps are centiseconds relative to the call's audio.
        let mut segments = Vec::new();
        for segment in state.as_iter() {
            let start = segment.start_timestamp() as f64 / 100.0;
            let end = segment.end_timestamp() as f64 / 100.0;
            if end <= start {
                continue;
            }
            let text = segment.to_string().trim().to_string();
            if text.is_empty() {
                continue;
            }
            segments.push(RawSegment {
                span: TimeSpan::new(start, end),
                text,
                speaker_label: None,
                confidence: (1.0 - segment.no_speech_probability()).clamp(0.0, 1.0),
            });
        }

        Ok(TranscribeResponse { segments, language })
    }

    fn duration_ceiling_secs(&self) -> f64 {
        self.config.duration_ceiling_secs
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

    #[test]
    fn test_whisper_config_default() {
        let config = WhisperConfig::default();
        assert_eq!(config.model_path, PathBuf::from("models/ggml-base.bin"));
        assert_eq!(config.threads, None);
        assert_eq!(config.duration_ceiling_secs, defaults::SPEECH_CEILING_SECS);
    }

    #[test]
    fn test_new_fails_for_missing_model() {
        let config = WhisperConfig {
            model_path: PathBuf::from("/nonexistent/model.bin"),
            ..WhisperConfig::default()
        };

        let result = WhisperSpeechModel::new(config);
        match result {
            Err(LongwaveError::ModelNotFound { path }) => {
                assert_eq!(path, "/nonexistent/model.bin");
            }
            _ => panic!("Expected ModelNotFound error"),
        }
    }

    #[test]
    fn test_convert_audio_i16_to_f32() {
        let samples = vec![0i16, 16384, -16384, 32767, -32768];
        let converted = WhisperSpeechModel::convert_audio(&samples);

        assert_eq!(converted.len(), samples.len());
        assert_eq!(converted[0], 0.0);
        assert!((converted[1] - 0.5).abs() < 0.01);
        assert!((converted[2] + 0.5).abs() < 0.01);
        assert_eq!(converted[4], -1.0);
    }

    #[test]
    fn test_oom_errors_classified_as_resource_exhaustion() {
        let err =
            WhisperSpeechModel::classify_inference_error("CUDA out of memory".to_string());
        assert!(err.is_resource_exhaustion());

        let err = WhisperSpeechModel::classify_inference_error("bad state".to_string());
        assert!(!err.is_resource_exhaustion());
    }
}
