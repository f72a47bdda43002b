//! Error types for narrate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NarrateError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Job input errors
    #[error("Source text not found at {path}")]
    SourceNotFound { path: String },

    #[error("Invalid job option {field}: {message}")]
    InvalidJob { field: String, message: String },

    // Synthesis errors
    #[error("Synthesis engine '{program}' not found")]
    EngineNotFound { program: String },

    #[error("Synthesis engine failed: {message}")]
    Engine { message: String },

    #[error("Synthesis engine killed after {timeout_ms}ms")]
    EngineTimeout { timeout_ms: u64 },

    #[error("Synthesis of unit {index} failed: {message}")]
    Synthesis { index: usize, message: String },

    #[error("Synthesis of unit {index} timed out after {timeout_ms}ms")]
    SynthesisTimeout { index: usize, timeout_ms: u64 },

    #[error("Unit {index} could not be synthesized after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        index: usize,
        attempts: u32,
        last_error: String,
    },

    #[error("Fragments missing after synthesis: {indices:?}")]
    MissingFragments { indices: Vec<usize> },

    // Assembly errors
    #[error("Audio format mismatch in {path}: expected {expected}, got {actual}")]
    FormatMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("No fragments to assemble")]
    NoFragments,

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Failed to decode {path}: {message}")]
    Decode { path: String, message: String },

    // Post-production errors
    #[error("Tagging failed: {message}")]
    Tagging { message: String },

    // Queue errors
    #[error("Job queue error: {message}")]
    Queue { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hound::Error> for NarrateError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => NarrateError::Io(e),
            other => NarrateError::Audio {
                message: other.to_string(),
            },
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, NarrateError>;
