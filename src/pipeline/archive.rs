//! Moves a completed job's source text and audio into archive storage.
//!
//! Best effort: a missing file is logged and skipped, so running the mover
//! again for the same job changes nothing.

use crate::error::{NarrateError, Result};
use crate::job::SynthesisJob;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of relocating one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveStatus {
    Moved(PathBuf),
    /// Nothing at the source path.
    Skipped,
    Failed(String),
}

impl ArchiveStatus {
    pub fn destination(&self) -> Option<&Path> {
        match self {
            ArchiveStatus::Moved(path) => Some(path),
            _ => None,
        }
    }
}

/// Outcome of archiving one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub directory: PathBuf,
    pub source: ArchiveStatus,
    pub audio: ArchiveStatus,
}

/// Relocates job inputs and outputs under `<root>/<job key>/`.
#[derive(Debug, Clone)]
pub struct ArchiveMover {
    root: PathBuf,
}

impl ArchiveMover {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Archive directory of a job, named by its job key.
    pub fn directory_for(&self, job: &SynthesisJob) -> PathBuf {
        self.root.join(job.job_key())
    }

    /// Moves the job's source text and `audio` into the job's archive directory.
    pub fn archive(&self, job: &SynthesisJob, audio: &Path) -> ArchiveReport {
        let directory = self.directory_for(job);
        ArchiveReport {
            source: self.relocate(&job.source, &directory),
            audio: self.relocate(audio, &directory),
            directory,
        }
    }

    fn relocate(&self, from: &Path, directory: &Path) -> ArchiveStatus {
        if !from.exists() {
            info!(path = %from.display(), "not found, skipping");
            return ArchiveStatus::Skipped;
        }
        let Some(name) = from.file_name() else {
            return ArchiveStatus::Failed(format!("{} has no file name", from.display()));
        };
        let to = directory.join(name);

        match fs::create_dir_all(directory)
            .map_err(NarrateError::from)
            .and_then(|()| move_file(from, &to))
        {
            Ok(()) => {
                info!(from = %from.display(), to = %to.display(), "archived");
                ArchiveStatus::Moved(to)
            }
            Err(e) => {
                warn!(from = %from.display(), to = %to.display(), error = %e, "archive move failed");
                ArchiveStatus::Failed(e.to_string())
            }
        }
    }
}

/// Renames, falling back to copy and delete across filesystems.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(from = %from.display(), "rename crosses devices, copying");
            fs::copy(from, to)?;
            fs::remove_file(from)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
