//! Error types for longwave.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LongwaveError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Fatal chunking errors
    #[error("Unsplittable input: {message}")]
    UnsplittableInput { message: String },

    // Audio decoding errors
    #[error("Audio decode failed: {message}")]
    AudioDecode { message: String },

    // Speech model errors
    #[error("Speech model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Speech model load failed: {message}")]
    ModelLoad { message: String },

    #[error("Resource exhausted: {message}")]
    ResourceExhausted { message: String },

    #[error("Transcription inference failed: {message}")]
    Inference { message: String },

    // Extraction service errors
    #[error("Extraction call failed: {message}")]
    ExtractionCall { message: String },

    #[error("Extraction response violated schema: {message}")]
    SchemaViolation { message: String },

    // Object storage errors
    #[error("Object not found: {path}")]
    ObjectNotFound { path: String },

    #[error("Storage operation failed for {path}: {message}")]
    Storage { path: String, message: String },

    // Run control
    #[error("Run cancelled")]
    Cancelled,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl LongwaveError {
    /// True for errors that warrant a cascading-fallback retry at reduced
    /// batch size (GPU memory pressure, per-call timeouts).
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, LongwaveError::ResourceExhausted { .. })
    }

    /// True for run-level fatal errors that must propagate immediately
    /// instead of being recorded as a per-chunk failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LongwaveError::UnsplittableInput { .. }
                | LongwaveError::ConfigInvalidValue { .. }
                | LongwaveError::ConfigFileNotFound { .. }
                | LongwaveError::Config(_)
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, LongwaveError>;
