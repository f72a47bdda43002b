//! narrate - chunked text-to-speech job pipeline
//!
//! Turns long text into tagged, production-ready narration: split into
//! units, synthesize each through an external engine with retry and
//! resume, stitch, overlay intro/outro/background, tag and archive.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod text;

// Collaborator traits
pub use engine::{CommandEngine, MockEngine, SynthesisEngine};
pub use pipeline::clock::Clock;
pub use text::sentence::SentenceSplitter;

// Jobs and pipeline
pub use job::{JobEvent, JobId, JobOptions, JobOutcome, JobState, JobSummary, SynthesisJob};
pub use pipeline::{JobQueue, JobRunner};

// Error handling
pub use error::{NarrateError, Result};

// Config
pub use config::Config;

// Stage error model
pub use pipeline::error::{ErrorReporter, StageError};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
