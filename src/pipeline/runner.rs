//! Drives one job through every stage in order.

use crate::config::{Config, PathsConfig};
use crate::engine::SynthesisEngine;
use crate::error::NarrateError;
use crate::job::{JobId, JobOutcome, JobState, SynthesisJob};
use crate::pipeline::archive::{ArchiveMover, ArchiveStatus};
use crate::pipeline::assembler::{Assembler, SilencePolicy};
use crate::pipeline::clock::{Clock, SystemClock};
use crate::pipeline::error::{ErrorReporter, LogReporter, StageError};
use crate::pipeline::post_processor::{PostProcessor, ProductionTiming};
use crate::pipeline::tagger::Tagger;
use crate::pipeline::worker::{RetryPolicy, SynthesisWorker};
use crate::text::{Chunker, TextUnit};
use std::cell::Cell;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, info_span, warn};

/// File the assembler writes inside a job's work directory.
pub const ASSEMBLED_FILE: &str = "assembled.wav";

/// Runs the chunk, synthesize, assemble, produce, tag and archive stages.
pub struct JobRunner {
    paths: PathsConfig,
    engine: Arc<dyn SynthesisEngine>,
    policy: RetryPolicy,
    worker: SynthesisWorker,
    assembler: Assembler,
    post: PostProcessor,
    tagger: Tagger,
    mover: ArchiveMover,
    reporter: Arc<dyn ErrorReporter>,
}

impl JobRunner {
    pub fn new(config: &Config, engine: Arc<dyn SynthesisEngine>) -> Self {
        let policy = RetryPolicy::from(&config.synthesis);
        let reporter: Arc<dyn ErrorReporter> = Arc::new(LogReporter);
        Self {
            paths: config.paths.clone(),
            worker: SynthesisWorker::new(Arc::clone(&engine), Arc::new(SystemClock), policy),
            engine,
            policy,
            assembler: Assembler::new(SilencePolicy::from(&config.assembly)),
            post: PostProcessor::new(
                ProductionTiming::from(&config.production),
                Arc::clone(&reporter),
            ),
            tagger: Tagger::new(),
            mover: ArchiveMover::new(&config.paths.archive_dir),
            reporter,
        }
    }

    /// Replaces the clock used between synthesis attempts.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.worker = SynthesisWorker::new(Arc::clone(&self.engine), clock, self.policy);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_post_processor(mut self, post: PostProcessor) -> Self {
        self.post = post;
        self
    }

    pub fn with_tagger(mut self, tagger: Tagger) -> Self {
        self.tagger = tagger;
        self
    }

    /// Work directory holding a job's fragments and intermediate audio.
    pub fn job_dir(&self, job: &SynthesisJob) -> PathBuf {
        self.paths.work_dir.join(job.job_key())
    }

    /// Runs `job` to completion or failure, calling `on_state` on every
    /// transition including the terminal one.
    pub fn run(
        &mut self,
        id: JobId,
        job: &SynthesisJob,
        mut on_state: impl FnMut(JobState),
    ) -> JobOutcome {
        let span = info_span!("job", id = %id, title = %job.title);
        let _entered = span.enter();

        let current = Cell::new(JobState::Queued);
        let mut transition = |state: JobState| {
            info!(%state, "job state");
            current.set(state);
            on_state(state);
        };

        let result = self.execute(job, &mut transition);
        match result {
            Ok(final_path) => {
                transition(JobState::Done);
                JobOutcome {
                    id,
                    title: job.title.clone(),
                    state: JobState::Done,
                    final_path: Some(final_path),
                    error: None,
                }
            }
            Err(err) => {
                let stage = current.get().to_string().to_lowercase();
                self.reporter.report(&stage, &err);
                transition(JobState::Failed);
                JobOutcome {
                    id,
                    title: job.title.clone(),
                    state: JobState::Failed,
                    final_path: None,
                    error: Some(err.message().to_string()),
                }
            }
        }
    }

    fn execute(
        &mut self,
        job: &SynthesisJob,
        transition: &mut dyn FnMut(JobState),
    ) -> Result<PathBuf, StageError> {
        transition(JobState::Chunking);
        if !job.source.is_file() {
            return Err(NarrateError::SourceNotFound {
                path: job.source.display().to_string(),
            }
            .into());
        }
        let text = fs::read_to_string(&job.source).map_err(NarrateError::from)?;
        let units: Vec<TextUnit> = Chunker::new(job.chunk_length).chunk(&text).collect();
        if units.is_empty() {
            return Err(StageError::Fatal(format!(
                "{} contains no speakable text",
                job.source.display()
            )));
        }
        info!(units = units.len(), max_len = job.chunk_length, "text chunked");

        transition(JobState::Synthesizing);
        let job_dir = self.job_dir(job);
        let rendered = self.worker.render(&units, &job.voice, &job_dir)?;
        info!(
            synthesized = rendered.synthesized,
            skipped = rendered.skipped,
            "all fragments present"
        );

        transition(JobState::Assembling);
        let assembled = job_dir.join(ASSEMBLED_FILE);
        self.assembler.assemble(&rendered.fragments, &assembled)?;

        transition(JobState::PostProcessing);
        let final_path = self.paths.output_dir.join(job.output_file_name());
        self.post.process(&assembled, job, &final_path)?;
        if let Err(e) = fs::remove_dir_all(&job_dir) {
            warn!(path = %job_dir.display(), error = %e, "could not remove work directory");
        }

        transition(JobState::Tagging);
        if let Err(e) = self.tagger.apply(&final_path, job) {
            self.reporter
                .report("tagging", &StageError::Recoverable(e.to_string()));
        }

        transition(JobState::Archiving);
        let archived = self.mover.archive(job, &final_path);
        for status in [&archived.source, &archived.audio] {
            if let ArchiveStatus::Failed(message) = status {
                self.reporter
                    .report("archiving", &StageError::Recoverable(message.clone()));
            }
        }

        Ok(archived
            .audio
            .destination()
            .map(|p| p.to_path_buf())
            .unwrap_or(final_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use crate::pipeline::clock::MockClock;
    use crate::pipeline::error::CollectingReporter;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        config: Config,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = Config::default();
            config.paths.work_dir = dir.path().join("work");
            config.paths.output_dir = dir.path().join("audio");
            config.paths.archive_dir = dir.path().join("archive");
            config.synthesis.attempt_timeout_ms = 0;
            Self { dir, config }
        }

        fn source(&self, name: &str, text: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, text).unwrap();
            path
        }

        fn runner(&self, engine: Arc<MockEngine>) -> (JobRunner, Arc<CollectingReporter>) {
            let reporter = Arc::new(CollectingReporter::new());
            let runner = JobRunner::new(&self.config, engine)
                .with_clock(Arc::new(MockClock::new()))
                .with_reporter(reporter.clone())
                .with_tagger(Tagger::with_date("2024-01-02"))
                .with_post_processor(
                    PostProcessor::new(ProductionTiming::default(), reporter.clone()).with_seed(1),
                );
            (runner, reporter)
        }
    }

    #[test]
    fn test_successful_job_walks_every_state() {
        let fx = Fixture::new();
        let source = fx.source("tale.txt", "First line. Second line. Third line.");
        let mut job = SynthesisJob::new(&source, "A Tale", "Teller", &fx.config);
        job.chunk_length = 12;
        let (mut runner, reporter) = fx.runner(Arc::new(MockEngine::new("mock")));

        let mut states = Vec::new();
        let outcome = runner.run(JobId(1), &job, |s| states.push(s));

        assert_eq!(
            states,
            vec![
                JobState::Chunking,
                JobState::Synthesizing,
                JobState::Assembling,
                JobState::PostProcessing,
                JobState::Tagging,
                JobState::Archiving,
                JobState::Done,
            ]
        );
        assert!(outcome.succeeded());
        let final_path = outcome.final_path.unwrap();
        let archive_dir = fx.config.paths.archive_dir.join(job.job_key());
        assert_eq!(final_path, archive_dir.join("A_Tale.wav"));
        assert!(final_path.exists());
        assert!(archive_dir.join("tale.txt").exists());
        assert!(!runner.job_dir(&job).exists());
        assert!(reporter.reports().is_empty());
    }

    #[test]
    fn test_missing_source_fails_before_synthesis() {
        let fx = Fixture::new();
        let job = SynthesisJob::new(fx.dir.path().join("absent.txt"), "T", "A", &fx.config);
        let engine = Arc::new(MockEngine::new("mock"));
        let (mut runner, reporter) = fx.runner(engine.clone());

        let mut states = Vec::new();
        let outcome = runner.run(JobId(2), &job, |s| states.push(s));

        assert_eq!(states, vec![JobState::Chunking, JobState::Failed]);
        assert_eq!(outcome.state, JobState::Failed);
        assert!(outcome.error.unwrap().contains("Source text not found"));
        assert_eq!(engine.call_count(), 0);
        assert_eq!(reporter.reports()[0].0, "chunking");
    }

    #[test]
    fn test_failed_unit_leaves_fragments_for_resume() {
        let fx = Fixture::new();
        let source = fx.source("book.txt", "Alpha one. Beta two. Gamma three.");
        let mut job = SynthesisJob::new(&source, "Book", "A", &fx.config);
        job.chunk_length = 10;
        let (mut runner, _) = fx.runner(Arc::new(MockEngine::new("mock").with_failure_on("Beta")));

        let outcome = runner.run(JobId(3), &job, |_| {});

        assert_eq!(outcome.state, JobState::Failed);
        assert!(outcome.error.unwrap().contains("Unit 1"));
        let job_dir = runner.job_dir(&job);
        assert!(SynthesisWorker::fragment_path(&job_dir, 0).exists());
        assert!(!SynthesisWorker::fragment_path(&job_dir, 1).exists());
        assert!(source.exists());

        // A healthy engine resumes at unit 1.
        let engine = Arc::new(MockEngine::new("mock"));
        let (mut runner, _) = fx.runner(engine.clone());
        let outcome = runner.run(JobId(4), &job, |_| {});
        assert!(outcome.succeeded());
        assert_eq!(engine.calls(), vec!["Beta two.", "Gamma three."]);
    }

    #[test]
    fn test_unspeakable_source_fails() {
        let fx = Fixture::new();
        let source = fx.source("dots.txt", "... --- !!!");
        let job = SynthesisJob::new(&source, "Dots", "A", &fx.config);
        let (mut runner, _) = fx.runner(Arc::new(MockEngine::new("mock")));

        let outcome = runner.run(JobId(5), &job, |_| {});

        assert_eq!(outcome.state, JobState::Failed);
        assert!(outcome.error.unwrap().contains("no speakable text"));
    }

    #[test]
    fn test_missing_intro_is_recovered() {
        let fx = Fixture::new();
        let source = fx.source("story.txt", "Hello there.");
        let job = SynthesisJob::new(&source, "Story", "A", &fx.config)
            .with_intro(fx.dir.path().join("no-intro.wav"));
        let (mut runner, reporter) = fx.runner(Arc::new(MockEngine::new("mock")));

        let outcome = runner.run(JobId(6), &job, |_| {});

        assert!(outcome.succeeded());
        assert_eq!(reporter.recoverable_count(), 1);
    }

    #[test]
    fn test_tagging_failure_is_recovered() {
        let fx = Fixture::new();
        let source = fx.source("ledger.txt", "Entries balance.");
        let job = SynthesisJob::new(&source, "Ledger", "Clerk", &fx.config);
        let final_path = fx.config.paths.output_dir.join(job.output_file_name());
        let (mut runner, reporter) = fx.runner(Arc::new(MockEngine::new("mock")));

        // Corrupt the finished file just before it is tagged.
        let outcome = runner.run(JobId(7), &job, |state| {
            if state == JobState::Tagging {
                fs::write(&final_path, b"no longer a wave file").unwrap();
            }
        });

        assert_eq!(outcome.state, JobState::Done);
        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "tagging");
        assert!(!reports[0].1.is_fatal());
        assert!(reports[0].1.message().contains("Tagging failed"));
    }

    #[test]
    fn test_archive_failure_is_recovered() {
        let fx = Fixture::new();
        // A plain file where the archive root should be.
        fs::write(&fx.config.paths.archive_dir, b"occupied").unwrap();
        let source = fx.source("drift.txt", "Boats drift.");
        let job = SynthesisJob::new(&source, "Drift", "Sailor", &fx.config);
        let (mut runner, reporter) = fx.runner(Arc::new(MockEngine::new("mock")));

        let outcome = runner.run(JobId(8), &job, |_| {});

        assert_eq!(outcome.state, JobState::Done);
        let final_path = outcome.final_path.unwrap();
        assert_eq!(final_path, fx.config.paths.output_dir.join("Drift.wav"));
        assert!(final_path.exists());
        assert!(source.exists());

        let reports = reporter.reports();
        assert_eq!(reports.len(), 2);
        for (stage, error) in &reports {
            assert_eq!(stage, "archiving");
            assert!(!error.is_fatal());
        }
    }
}
