//! Synthesis jobs: submission options, validated jobs, and observable state.

use crate::config::Config;
use crate::error::{NarrateError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Hex digits of the source fingerprint in a job key.
const JOB_KEY_DIGEST_LEN: usize = 12;

/// Identifier assigned to a job when it is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a job.
///
/// States advance strictly in declaration order; `Failed` is absorbing and
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Chunking,
    Synthesizing,
    Assembling,
    PostProcessing,
    Tagging,
    Archiving,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Queued => "QUEUED",
            JobState::Chunking => "CHUNKING",
            JobState::Synthesizing => "SYNTHESIZING",
            JobState::Assembling => "ASSEMBLING",
            JobState::PostProcessing => "POST_PROCESSING",
            JobState::Tagging => "TAGGING",
            JobState::Archiving => "ARCHIVING",
            JobState::Done => "DONE",
            JobState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Looping background music mixed under the narration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundBed {
    pub path: PathBuf,
    /// 0 (quietest, -20 dB) to 100 (no attenuation).
    pub volume: u8,
    pub min_gap_ms: u32,
    pub max_gap_ms: u32,
}

impl BackgroundBed {
    /// Attenuation applied after peak normalization.
    pub fn gain_db(&self) -> f32 {
        crate::defaults::BED_FLOOR_DB * (100.0 - self.volume.min(100) as f32) / 100.0
    }
}

/// Overlay gain as written in a job file: a number, or a string holding one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GainOption {
    Number(f64),
    Text(String),
}

impl GainOption {
    /// Parsed gain, or the default when the value is not a finite number.
    pub fn resolve(&self) -> f32 {
        let parsed = match self {
            GainOption::Number(n) => Some(*n),
            GainOption::Text(s) => s.trim().parse::<f64>().ok(),
        };
        match parsed {
            Some(db) if db.is_finite() => db as f32,
            _ => crate::defaults::OVERLAY_GAIN_DB,
        }
    }
}

/// Job submission as read from a TOML job file.
///
/// Only `filename`, `title` and `author` are required; everything else falls
/// back to the configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobOptions {
    /// Source text file.
    pub filename: PathBuf,
    pub title: String,
    pub author: String,
    pub subject: Option<String>,
    #[serde(alias = "model")]
    pub voice: Option<String>,
    #[serde(alias = "sentence_chunk_length")]
    pub chunk_length: Option<usize>,
    pub track: Option<u32>,
    pub intro: Option<PathBuf>,
    pub outro: Option<PathBuf>,
    #[serde(alias = "overlay_volume")]
    pub overlay_gain_db: Option<GainOption>,
    pub background: Option<PathBuf>,
    pub background_volume: Option<u32>,
    pub min_gap_ms: Option<u32>,
    pub max_gap_ms: Option<u32>,
}

impl JobOptions {
    /// Reads a job file. Relative paths inside it are resolved against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NarrateError::SourceNotFound {
                    path: path.display().to_string(),
                }
            } else {
                NarrateError::Io(e)
            }
        })?;
        let mut options: JobOptions = toml::from_str(&content)?;

        if let Some(base) = path.parent() {
            options.resolve_paths(base);
        }
        Ok(options)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if !p.as_os_str().is_empty() && p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.filename);
        for p in [&mut self.intro, &mut self.outro, &mut self.background]
            .into_iter()
            .flatten()
        {
            resolve(p);
        }
    }
}

/// A validated, immutable unit of work for the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisJob {
    pub source: PathBuf,
    pub title: String,
    pub author: String,
    pub subject: String,
    pub voice: String,
    pub chunk_length: usize,
    pub track: u32,
    pub intro: Option<PathBuf>,
    pub outro: Option<PathBuf>,
    pub overlay_gain_db: f32,
    pub background: Option<BackgroundBed>,
}

impl SynthesisJob {
    /// Creates a job with configuration defaults for everything optional.
    pub fn new(source: impl Into<PathBuf>, title: &str, author: &str, config: &Config) -> Self {
        Self {
            source: source.into(),
            title: title.to_string(),
            author: author.to_string(),
            subject: crate::defaults::UNKNOWN_SUBJECT.to_string(),
            voice: config.synthesis.voice.clone(),
            chunk_length: config.synthesis.chunk_length,
            track: crate::defaults::DEFAULT_TRACK,
            intro: None,
            outro: None,
            overlay_gain_db: config.production.overlay_gain_db,
            background: None,
        }
    }

    /// Validates submission options into a job.
    pub fn from_options(options: JobOptions, config: &Config) -> Result<Self> {
        if options.filename.as_os_str().is_empty() {
            return Err(invalid("filename", "must not be empty"));
        }
        if options.title.trim().is_empty() {
            return Err(invalid("title", "must not be empty"));
        }
        if options.author.trim().is_empty() {
            return Err(invalid("author", "must not be empty"));
        }

        let chunk_length = options
            .chunk_length
            .unwrap_or(config.synthesis.chunk_length);
        if chunk_length == 0 {
            return Err(invalid("chunk_length", "must be greater than 0"));
        }

        let background = match options.background {
            Some(path) => {
                let volume = options.background_volume.unwrap_or(100);
                if volume > 100 {
                    return Err(invalid(
                        "background_volume",
                        &format!("must be between 0 and 100, got {}", volume),
                    ));
                }
                let min_gap_ms = options
                    .min_gap_ms
                    .unwrap_or(config.production.bed_min_gap_ms);
                let max_gap_ms = options
                    .max_gap_ms
                    .unwrap_or(config.production.bed_max_gap_ms);
                if min_gap_ms > max_gap_ms {
                    return Err(invalid(
                        "min_gap_ms",
                        &format!("{} exceeds max_gap_ms {}", min_gap_ms, max_gap_ms),
                    ));
                }
                Some(BackgroundBed {
                    path,
                    volume: volume as u8,
                    min_gap_ms,
                    max_gap_ms,
                })
            }
            None => None,
        };

        let mut job = Self::new(options.filename, &options.title, &options.author, config);
        if let Some(subject) = options.subject.filter(|s| !s.trim().is_empty()) {
            job.subject = subject;
        }
        if let Some(voice) = options.voice.filter(|v| !v.trim().is_empty()) {
            job.voice = voice;
        }
        job.chunk_length = chunk_length;
        job.track = options.track.unwrap_or(job.track);
        job.intro = options.intro;
        job.outro = options.outro;
        if let Some(gain) = options.overlay_gain_db {
            job.overlay_gain_db = gain.resolve();
        }
        job.background = background;
        Ok(job)
    }

    pub fn with_intro(mut self, path: impl Into<PathBuf>) -> Self {
        self.intro = Some(path.into());
        self
    }

    pub fn with_outro(mut self, path: impl Into<PathBuf>) -> Self {
        self.outro = Some(path.into());
        self
    }

    pub fn with_background(mut self, bed: BackgroundBed) -> Self {
        self.background = Some(bed);
        self
    }

    pub fn with_voice(mut self, voice: &str) -> Self {
        self.voice = voice.to_string();
        self
    }

    pub fn with_chunk_length(mut self, chunk_length: usize) -> Self {
        self.chunk_length = chunk_length;
        self
    }

    /// Deterministic per-job name: the sanitized source stem plus a short
    /// digest of the absolute source path, voice and chunk length.
    ///
    /// Names the fragment directory and the archive directory, so a restarted
    /// job finds its earlier fragments while two sources sharing a file name,
    /// or one source rendered with another voice or unit size, never share
    /// fragments.
    pub fn job_key(&self) -> String {
        let stem = self
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name: String = stem
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let name = if name.is_empty() || name.chars().all(|c| c == '.') {
            "job".to_string()
        } else {
            name
        };
        format!("{}-{}", name, self.fingerprint())
    }

    fn fingerprint(&self) -> String {
        let source = std::path::absolute(&self.source).unwrap_or_else(|_| self.source.clone());
        let mut hasher = Sha256::new();
        hasher.update(source.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.voice.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.chunk_length.to_le_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..JOB_KEY_DIGEST_LEN].to_string()
    }

    /// File name of the finished audio: the title with spaces as underscores.
    pub fn output_file_name(&self) -> String {
        let name: String = self
            .title
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '/' | '\\' => '_',
                other => other,
            })
            .collect();
        format!("{}.wav", name)
    }

    pub fn summary(&self, id: JobId) -> JobSummary {
        JobSummary {
            id,
            source: self.source.clone(),
            author: self.author.clone(),
            title: self.title.clone(),
            voice: self.voice.clone(),
        }
    }
}

fn invalid(field: &str, message: &str) -> NarrateError {
    NarrateError::InvalidJob {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Copy of a pending job's identifying fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub source: PathBuf,
    pub author: String,
    pub title: String,
    pub voice: String,
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub id: JobId,
    pub title: String,
    pub state: JobState,
    /// Archived location of the finished audio, when the job completed.
    pub final_path: Option<PathBuf>,
    /// Last error of a failed job.
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Done
    }
}

/// Progress notifications published by the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Enqueued { id: JobId, title: String },
    StateChanged { id: JobId, state: JobState },
    Finished(JobOutcome),
}
