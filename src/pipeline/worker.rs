//! Per-unit synthesis with bounded retry and skip-if-rendered resumability.

use crate::audio::buffer::AudioBuffer;
use crate::audio::format::Fragment;
use crate::audio::wav;
use crate::config::SynthesisConfig;
use crate::engine::SynthesisEngine;
use crate::error::{NarrateError, Result};
use crate::pipeline::clock::Clock;
use crate::text::TextUnit;
use crossbeam_channel::RecvTimeoutError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Attempt budget and timing for engine calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one.
    pub retry_delay: Duration,
    /// Wall-clock limit per attempt; `None` waits indefinitely.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SynthesisConfig::default())
    }
}

impl From<&SynthesisConfig> for RetryPolicy {
    fn from(config: &SynthesisConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            attempt_timeout: (config.attempt_timeout_ms > 0)
                .then(|| Duration::from_millis(config.attempt_timeout_ms)),
        }
    }
}

/// What a synthesis pass produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisReport {
    /// One fragment per unit, in index order.
    pub fragments: Vec<Fragment>,
    /// Units sent to the engine during this pass.
    pub synthesized: usize,
    /// Units whose fragment already existed.
    pub skipped: usize,
}

/// Renders text units to fragment files one at a time.
///
/// At most one engine call is in flight. A timed-out call on an engine that
/// cannot cancel itself is joined before the engine is used again.
pub struct SynthesisWorker {
    engine: Arc<dyn SynthesisEngine>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    stray: Mutex<Option<JoinHandle<()>>>,
}

impl SynthesisWorker {
    pub fn new(engine: Arc<dyn SynthesisEngine>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self {
            engine,
            clock,
            policy,
            stray: Mutex::new(None),
        }
    }

    /// Location of the fragment for `index` inside a job's fragment directory.
    pub fn fragment_path(dir: &Path, index: usize) -> PathBuf {
        dir.join(format!("fragment_{:05}.wav", index))
    }

    /// Synthesizes every unit whose fragment is not yet on disk.
    ///
    /// Units are processed strictly in order. Exhausting the attempt budget
    /// for any unit aborts the pass; fragments written so far stay on disk so
    /// a later pass resumes where this one stopped.
    pub fn render(
        &self,
        units: &[TextUnit],
        voice: &str,
        fragment_dir: &Path,
    ) -> Result<SynthesisReport> {
        fs::create_dir_all(fragment_dir)?;

        let mut synthesized = 0;
        let mut skipped = 0;

        for unit in units {
            let path = Self::fragment_path(fragment_dir, unit.index);
            if path.exists() {
                info!(index = unit.index, path = %path.display(), "fragment exists, skipping");
                skipped += 1;
                continue;
            }

            let audio = self.synthesize_with_retry(unit, voice)?;
            wav::write_pcm16_atomic(&path, &audio)?;
            debug!(
                index = unit.index,
                duration_ms = audio.duration_ms(),
                path = %path.display(),
                "fragment written"
            );
            synthesized += 1;
        }

        let missing: Vec<usize> = units
            .iter()
            .filter(|u| !Self::fragment_path(fragment_dir, u.index).exists())
            .map(|u| u.index)
            .collect();
        if !missing.is_empty() {
            error!(?missing, "fragments missing after synthesis");
            return Err(NarrateError::MissingFragments { indices: missing });
        }

        let fragments = units
            .iter()
            .map(|u| {
                let path = Self::fragment_path(fragment_dir, u.index);
                let format = wav::read_format(&path)?;
                Ok(Fragment {
                    index: u.index,
                    path,
                    format,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SynthesisReport {
            fragments,
            synthesized,
            skipped,
        })
    }

    fn synthesize_with_retry(&self, unit: &TextUnit, voice: &str) -> Result<AudioBuffer> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();
        let started = self.clock.now();

        for attempt in 1..=max_attempts {
            info!(index = unit.index, attempt, max_attempts, "synthesizing unit");
            match self.attempt(unit, voice) {
                Ok(audio) if !audio.is_empty() => {
                    let elapsed = self.clock.now().saturating_duration_since(started);
                    debug!(index = unit.index, attempt, ?elapsed, "unit synthesized");
                    return Ok(audio);
                }
                Ok(_) => {
                    last_error = "engine returned no audio".to_string();
                    warn!(index = unit.index, attempt, "engine returned no audio");
                }
                Err(e) => {
                    warn!(index = unit.index, attempt, error = %e, "synthesis attempt failed");
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                self.clock.sleep(self.policy.retry_delay);
            }
        }

        error!(index = unit.index, attempts = max_attempts, "giving up on unit");
        Err(NarrateError::RetriesExhausted {
            index: unit.index,
            attempts: max_attempts,
            last_error,
        })
    }

    /// One engine call, bounded by the attempt timeout.
    ///
    /// Cancellable engines enforce the deadline themselves. Any other engine
    /// runs on a helper thread; when it times out the thread is kept and
    /// joined before the next call.
    fn attempt(&self, unit: &TextUnit, voice: &str) -> Result<AudioBuffer> {
        self.settle_stray();
        let index = unit.index;

        let Some(timeout) = self.policy.attempt_timeout else {
            return self.engine.synthesize(&unit.text, voice);
        };
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        if self.engine.cancellable() {
            return match self.engine.synthesize_within(&unit.text, voice, timeout) {
                Err(NarrateError::EngineTimeout { .. }) => {
                    Err(NarrateError::SynthesisTimeout { index, timeout_ms })
                }
                other => other,
            };
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let engine = Arc::clone(&self.engine);
        let text = unit.text.clone();
        let voice = voice.to_string();

        let handle = thread::Builder::new()
            .name(format!("synth-{}", index))
            .spawn(move || {
                let result = engine.synthesize(&text, &voice);
                if tx.send(result).is_err() {
                    debug!(index, "late synthesis result discarded");
                }
            })?;

        let result = match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                *self.stray.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
                return Err(NarrateError::SynthesisTimeout { index, timeout_ms });
            }
            Err(RecvTimeoutError::Disconnected) => Err(NarrateError::Synthesis {
                index,
                message: "engine thread terminated without a result".to_string(),
            }),
        };
        if handle.join().is_err() {
            warn!(index, "engine thread panicked");
        }
        result
    }

    /// Blocks until a previously timed-out call has returned.
    fn settle_stray(&self) {
        let stray = self.stray.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = stray {
            warn!(engine = self.engine.name(), "waiting for timed-out engine call to return");
            if handle.join().is_err() {
                warn!(engine = self.engine.name(), "timed-out engine call panicked");
            }
        }
    }
}

impl Drop for SynthesisWorker {
    fn drop(&mut self) {
        self.settle_stray();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use crate::pipeline::clock::MockClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn units(texts: &[&str]) -> Vec<TextUnit> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| TextUnit {
                index,
                text: text.to_string(),
            })
            .collect()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(2000),
            attempt_timeout: None,
        }
    }

    fn worker(engine: Arc<MockEngine>, clock: MockClock, policy: RetryPolicy) -> SynthesisWorker {
        SynthesisWorker::new(engine, Arc::new(clock), policy)
    }

    #[test]
    fn test_renders_every_unit_in_order() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new("mock"));
        let worker = worker(engine.clone(), MockClock::new(), policy());

        let report = worker
            .render(&units(&["One.", "Two.", "Three."]), "v", dir.path())
            .unwrap();

        assert_eq!(report.synthesized, 3);
        assert_eq!(report.skipped, 0);
        assert_eq!(engine.calls(), vec!["One.", "Two.", "Three."]);
        let indices: Vec<usize> = report.fragments.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        for fragment in &report.fragments {
            assert!(fragment.path.exists());
            assert_eq!(fragment.format.frame_rate, 24000);
            assert_eq!(fragment.format.bits_per_sample(), 16);
        }
    }

    #[test]
    fn test_existing_fragments_are_not_resynthesized() {
        let dir = TempDir::new().unwrap();
        let first = Arc::new(MockEngine::new("mock"));
        worker(first, MockClock::new(), policy())
            .render(&units(&["One.", "Two."]), "v", dir.path())
            .unwrap();

        let second = Arc::new(MockEngine::new("mock"));
        let report = worker(second.clone(), MockClock::new(), policy())
            .render(&units(&["One.", "Two.", "Three."]), "v", dir.path())
            .unwrap();

        assert_eq!(report.skipped, 2);
        assert_eq!(report.synthesized, 1);
        assert_eq!(second.calls(), vec!["Three."]);
    }

    #[test]
    fn test_transient_failure_is_retried_after_delay() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new("mock").with_transient_failures(2));
        let clock = MockClock::new();
        let worker = worker(engine.clone(), clock.clone(), policy());

        let report = worker.render(&units(&["Only."]), "v", dir.path()).unwrap();

        assert_eq!(report.synthesized, 1);
        assert_eq!(engine.call_count(), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(2000), Duration::from_millis(2000)]
        );
    }

    #[test]
    fn test_exhausted_retries_abort_and_keep_earlier_fragments() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new("mock").with_failure_on("Two"));
        let clock = MockClock::new();
        let worker = worker(engine.clone(), clock.clone(), policy());

        let result = worker.render(&units(&["One.", "Two.", "Three."]), "v", dir.path());

        match result {
            Err(NarrateError::RetriesExhausted {
                index,
                attempts,
                last_error,
            }) => {
                assert_eq!(index, 1);
                assert_eq!(attempts, 3);
                assert!(last_error.contains("mock synthesis failure"));
            }
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }
        assert!(SynthesisWorker::fragment_path(dir.path(), 0).exists());
        assert!(!SynthesisWorker::fragment_path(dir.path(), 1).exists());
        assert!(!SynthesisWorker::fragment_path(dir.path(), 2).exists());
        // One + three attempts at Two; Three is never reached.
        assert_eq!(engine.call_count(), 4);
        // No delay after the final attempt.
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn test_hung_engine_times_out() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new("mock").with_delay(Duration::from_millis(200)));
        let policy = RetryPolicy {
            max_attempts: 2,
            retry_delay: Duration::ZERO,
            attempt_timeout: Some(Duration::from_millis(20)),
        };
        let worker = worker(engine, MockClock::new(), policy);

        match worker.render(&units(&["Slow."]), "v", dir.path()) {
            Err(NarrateError::RetriesExhausted { last_error, .. }) => {
                assert!(last_error.contains("timed out after 20ms"));
            }
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }
    }

    /// Sleeps on every call and records the peak number of concurrent calls.
    #[derive(Default)]
    struct SlowEngine {
        active: AtomicUsize,
        max_active: AtomicUsize,
        calls: AtomicUsize,
    }

    impl SynthesisEngine for SlowEngine {
        fn synthesize(&self, _text: &str, _voice: &str) -> Result<AudioBuffer> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(200));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(AudioBuffer::new(vec![0.1; 240], 1, 24_000))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[test]
    fn test_timed_out_calls_never_overlap_retries() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(SlowEngine::default());
        let policy = RetryPolicy {
            max_attempts: 3,
            retry_delay: Duration::ZERO,
            attempt_timeout: Some(Duration::from_millis(20)),
        };

        {
            let worker = SynthesisWorker::new(engine.clone(), Arc::new(MockClock::new()), policy);
            let result = worker.render(&units(&["Slow."]), "v", dir.path());
            assert!(matches!(result, Err(NarrateError::RetriesExhausted { attempts: 3, .. })));
        }

        // Dropping the worker waited for the last abandoned call.
        assert_eq!(engine.active.load(Ordering::SeqCst), 0);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.max_active.load(Ordering::SeqCst), 1);
    }

    /// Engine that enforces its own deadline, like `CommandEngine`.
    struct DeadlineEngine {
        within_calls: AtomicUsize,
    }

    impl SynthesisEngine for DeadlineEngine {
        fn synthesize(&self, _text: &str, _voice: &str) -> Result<AudioBuffer> {
            panic!("deadline-aware engine must be called through synthesize_within");
        }

        fn synthesize_within(&self, _text: &str, _voice: &str, timeout: Duration) -> Result<AudioBuffer> {
            self.within_calls.fetch_add(1, Ordering::SeqCst);
            Err(NarrateError::EngineTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })
        }

        fn cancellable(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "deadline"
        }
    }

    #[test]
    fn test_cancellable_engine_owns_the_deadline() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(DeadlineEngine {
            within_calls: AtomicUsize::new(0),
        });
        let policy = RetryPolicy {
            max_attempts: 2,
            retry_delay: Duration::ZERO,
            attempt_timeout: Some(Duration::from_millis(75)),
        };
        let worker = SynthesisWorker::new(engine.clone(), Arc::new(MockClock::new()), policy);

        match worker.render(&units(&["Hung."]), "v", dir.path()) {
            Err(NarrateError::RetriesExhausted { last_error, .. }) => {
                assert_eq!(last_error, "Synthesis of unit 0 timed out after 75ms");
            }
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(engine.within_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_timeout_allows_fast_engine() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new("mock"));
        let policy = RetryPolicy {
            attempt_timeout: Some(Duration::from_secs(30)),
            ..policy()
        };
        let report = worker(engine, MockClock::new(), policy)
            .render(&units(&["Quick."]), "v", dir.path())
            .unwrap();
        assert_eq!(report.synthesized, 1);
    }

    #[test]
    fn test_empty_audio_counts_as_failure() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new("mock").with_tone_ms(0));
        let worker = worker(engine.clone(), MockClock::new(), policy());

        let result = worker.render(&units(&["Mute."]), "v", dir.path());
        assert!(matches!(result, Err(NarrateError::RetriesExhausted { .. })));
        assert_eq!(engine.call_count(), 3);
    }

    #[test]
    fn test_leftover_partial_file_is_not_treated_as_rendered() {
        let dir = TempDir::new().unwrap();
        let path = SynthesisWorker::fragment_path(dir.path(), 0);
        std::fs::write(wav::partial_path(&path), b"truncated").unwrap();

        let engine = Arc::new(MockEngine::new("mock"));
        let report = worker(engine.clone(), MockClock::new(), policy())
            .render(&units(&["Again."]), "v", dir.path())
            .unwrap();

        assert_eq!(report.synthesized, 1);
        assert_eq!(engine.call_count(), 1);
    }

    #[test]
    fn test_policy_from_config() {
        let config = SynthesisConfig {
            attempt_timeout_ms: 0,
            ..SynthesisConfig::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.retry_delay, Duration::from_millis(2000));
        assert_eq!(policy.attempt_timeout, None);

        assert_eq!(
            RetryPolicy::default().attempt_timeout,
            Some(Duration::from_millis(300_000))
        );
    }

    #[test]
    fn test_fragment_names_sort_by_index() {
        let dir = Path::new("/work/book");
        assert_eq!(
            SynthesisWorker::fragment_path(dir, 7),
            PathBuf::from("/work/book/fragment_00007.wav")
        );
    }
}
