//! RIFF INFO metadata for the finished narration.

use crate::error::{NarrateError, Result};
use crate::job::SynthesisJob;
use lofty::config::WriteOptions;
use lofty::iff::wav::RiffInfoList;
use lofty::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Tag values written to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    pub title: String,
    pub author: String,
    pub subject: String,
    pub track: u32,
    /// `YYYY-MM-DD`
    pub date: String,
}

/// Writes title, author, subject, track and creation date tags.
#[derive(Debug, Clone, Default)]
pub struct Tagger {
    date: Option<String>,
}

impl Tagger {
    /// Tagger stamping the local date at tagging time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tagger stamping a fixed creation date.
    pub fn with_date(date: &str) -> Self {
        Self {
            date: Some(date.to_string()),
        }
    }

    pub fn tags_for(&self, job: &SynthesisJob) -> TrackTags {
        let date = self
            .date
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
        let subject = if job.subject.trim().is_empty() {
            crate::defaults::UNKNOWN_SUBJECT.to_string()
        } else {
            job.subject.clone()
        };
        TrackTags {
            title: job.title.clone(),
            author: job.author.clone(),
            subject,
            track: job.track,
            date,
        }
    }

    /// Replaces the file's INFO chunk. Sample data is left untouched.
    pub fn apply(&self, path: &Path, job: &SynthesisJob) -> Result<TrackTags> {
        let tags = self.tags_for(job);
        debug!(path = %path.display(), ?tags, "applying tags");

        let mut info = RiffInfoList::new();
        info.insert("INAM".to_string(), tags.title.clone());
        // Product carries the title as well.
        info.insert("IPRD".to_string(), tags.title.clone());
        info.insert("IART".to_string(), tags.author.clone());
        info.insert("IGNR".to_string(), tags.subject.clone());
        info.insert("ITRK".to_string(), tags.track.to_string());
        info.insert("ICRD".to_string(), tags.date.clone());

        info.save_to_path(path, WriteOptions::default())
            .map_err(|e| NarrateError::Tagging {
                message: format!("{}: {}", path.display(), e),
            })?;

        info!(path = %path.display(), "tags applied");
        Ok(tags)
    }
}
