//! Default configuration constants for narrate.
//!
//! Shared by `Config`, `JobOptions` and the pipeline stages so that every
//! entry point agrees on the same production policy.

/// Default synthesis voice.
pub const DEFAULT_VOICE: &str = "bf_emma";

/// Default maximum chunk length in characters.
///
/// Long enough to keep prosody natural across several sentences, short
/// enough that a single engine call stays well below typical context limits.
pub const CHUNK_LENGTH: usize = 480;

/// Maximum synthesis attempts per unit.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay between synthesis attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 2000;

/// Wall-clock limit for a single synthesis attempt in milliseconds.
pub const ATTEMPT_TIMEOUT_MS: u64 = 300_000;

/// Default external synthesis program.
pub const ENGINE_PROGRAM: &str = "piper";

/// Sample rate the default engine declares for its raw output.
pub const ENGINE_SAMPLE_RATE: u32 = 24000;

/// Peak level (dBFS) below which an analysis window counts as silence.
pub const SILENCE_THRESHOLD_DBFS: f32 = -50.0;

/// Minimum length of a silent region that gets collapsed, in milliseconds.
pub const MIN_SILENCE_MS: u32 = 2000;

/// Length a collapsed silent region is normalized to, in milliseconds.
pub const COLLAPSE_SILENCE_MS: u32 = 2000;

/// Silence appended after the assembled narration, in milliseconds.
pub const TRAILING_SILENCE_MS: u32 = 2000;

/// Silence analysis window in milliseconds.
pub const ANALYSIS_WINDOW_MS: u32 = 10;

/// Gain applied to intro and outro tracks, in dB.
pub const OVERLAY_GAIN_DB: f32 = -5.0;

/// Narration onset after the start of the intro, in milliseconds.
pub const NARRATION_DELAY_MS: u32 = 12_000;

/// Maximum outro fade-in length in milliseconds.
pub const OUTRO_FADE_MS: u32 = 2000;

/// Distance between the outro's end and the end of the narration, in milliseconds.
pub const OUTRO_MARGIN_MS: u32 = 500;

/// Lower bound of the random gap between background bed loops, in milliseconds.
pub const BED_MIN_GAP_MS: u32 = 2000;

/// Upper bound of the random gap between background bed loops, in milliseconds.
pub const BED_MAX_GAP_MS: u32 = 5000;

/// Attenuation of the background bed at volume 0, in dB.
pub const BED_FLOOR_DB: f32 = -20.0;

/// Output profile: channel count.
pub const OUTPUT_CHANNELS: u16 = 2;

/// Output profile: sample rate in Hz.
pub const OUTPUT_SAMPLE_RATE: u32 = 44100;

/// Subject tag used when a job has none.
pub const UNKNOWN_SUBJECT: &str = "Unknown";

/// Track number tag used when a job has none.
pub const DEFAULT_TRACK: u32 = 1;

/// Default working directory for fragments and intermediate files.
pub const WORK_DIR: &str = "work";

/// Default directory for finished audio before archival.
pub const OUTPUT_DIR: &str = "audio";

/// Default archive root.
pub const ARCHIVE_DIR: &str = "archive";
