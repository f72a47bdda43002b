use crate::defaults;
use crate::error::{NarrateError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub synthesis: SynthesisConfig,
    pub assembly: AssemblyConfig,
    pub production: ProductionConfig,
}

/// Directory layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Fragments and intermediate files, one subdirectory per job.
    pub work_dir: PathBuf,
    /// Finished audio before archival.
    pub output_dir: PathBuf,
    /// Archive root for completed jobs.
    pub archive_dir: PathBuf,
}

/// Synthesis engine and retry policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub voice: String,
    pub chunk_length: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub attempt_timeout_ms: u64,
    pub engine: EngineConfig,
}

/// External synthesis program invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Program to run; receives the unit text on stdin and writes WAV to stdout.
    pub program: String,
    /// Arguments; `{voice}` is replaced with the job's voice.
    pub args: Vec<String>,
    /// Sample rate the program declares when its output carries no header.
    pub sample_rate: u32,
}

/// Silence normalization of the assembled narration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssemblyConfig {
    pub silence_threshold_dbfs: f32,
    pub min_silence_ms: u32,
    pub collapse_to_ms: u32,
    pub trailing_silence_ms: u32,
    pub analysis_window_ms: u32,
}

/// Intro, outro and background bed mixing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProductionConfig {
    pub overlay_gain_db: f32,
    pub narration_delay_ms: u32,
    pub outro_fade_ms: u32,
    pub outro_margin_ms: u32,
    pub bed_min_gap_ms: u32,
    pub bed_max_gap_ms: u32,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(defaults::WORK_DIR),
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
            archive_dir: PathBuf::from(defaults::ARCHIVE_DIR),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            voice: defaults::DEFAULT_VOICE.to_string(),
            chunk_length: defaults::CHUNK_LENGTH,
            max_attempts: defaults::MAX_ATTEMPTS,
            retry_delay_ms: defaults::RETRY_DELAY_MS,
            attempt_timeout_ms: defaults::ATTEMPT_TIMEOUT_MS,
            engine: EngineConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: defaults::ENGINE_PROGRAM.to_string(),
            args: vec![
                "--model".to_string(),
                "{voice}".to_string(),
                "--output_file".to_string(),
                "-".to_string(),
            ],
            sample_rate: defaults::ENGINE_SAMPLE_RATE,
        }
    }
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            silence_threshold_dbfs: defaults::SILENCE_THRESHOLD_DBFS,
            min_silence_ms: defaults::MIN_SILENCE_MS,
            collapse_to_ms: defaults::COLLAPSE_SILENCE_MS,
            trailing_silence_ms: defaults::TRAILING_SILENCE_MS,
            analysis_window_ms: defaults::ANALYSIS_WINDOW_MS,
        }
    }
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            overlay_gain_db: defaults::OVERLAY_GAIN_DB,
            narration_delay_ms: defaults::NARRATION_DELAY_MS,
            outro_fade_ms: defaults::OUTRO_FADE_MS,
            outro_margin_ms: defaults::OUTRO_MARGIN_MS,
            bed_min_gap_ms: defaults::BED_MIN_GAP_MS,
            bed_max_gap_ms: defaults::BED_MAX_GAP_MS,
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
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                {
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("Failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - NARRATE_VOICE → synthesis.voice
    /// - NARRATE_CHUNK_LENGTH → synthesis.chunk_length
    /// - NARRATE_WORK_DIR → paths.work_dir
    /// - NARRATE_OUTPUT_DIR → paths.output_dir
    /// - NARRATE_ARCHIVE_DIR → paths.archive_dir
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(voice) = std::env::var("NARRATE_VOICE")
            && !voice.is_empty()
        {
            self.synthesis.voice = voice;
        }

        if let Ok(length) = std::env::var("NARRATE_CHUNK_LENGTH")
            && let Ok(length) = length.trim().parse::<usize>()
        {
            self.synthesis.chunk_length = length;
        }

        if let Ok(dir) = std::env::var("NARRATE_WORK_DIR")
            && !dir.is_empty()
        {
            self.paths.work_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("NARRATE_OUTPUT_DIR")
            && !dir.is_empty()
        {
            self.paths.output_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("NARRATE_ARCHIVE_DIR")
            && !dir.is_empty()
        {
            self.paths.archive_dir = PathBuf::from(dir);
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.synthesis.chunk_length == 0 {
            return Err(NarrateError::ConfigInvalidValue {
                key: "synthesis.chunk_length".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.synthesis.max_attempts == 0 {
            return Err(NarrateError::ConfigInvalidValue {
                key: "synthesis.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.production.bed_min_gap_ms > self.production.bed_max_gap_ms {
            return Err(NarrateError::ConfigInvalidValue {
                key: "production.bed_min_gap_ms".to_string(),
                message: format!(
                    "{} exceeds bed_max_gap_ms {}",
                    self.production.bed_min_gap_ms, self.production.bed_max_gap_ms
                ),
            });
        }
        if self.assembly.analysis_window_ms == 0 {
            return Err(NarrateError::ConfigInvalidValue {
                key: "assembly.analysis_window_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/narrate/config.toml on Linux, or a relative
    /// `narrate/config.toml` when no config directory can be determined.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_default()
            .join("narrate")
            .join("config.toml")
    }
}
