use crate::audio::buffer::AudioBuffer;
use crate::error::{NarrateError, Result};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for text-to-speech synthesis.
///
/// The engine is an opaque collaborator: text in, PCM out. Calls may fail
/// transiently or hang, so callers retry and time out around it.
pub trait SynthesisEngine: Send + Sync {
    /// Synthesize one unit of text with the given voice.
    ///
    /// Returns samples at the engine's declared sample rate.
    fn synthesize(&self, text: &str, voice: &str) -> Result<AudioBuffer>;

    /// Synthesize one unit, abandoning the call after `timeout`.
    ///
    /// Engines that return [`cancellable`](Self::cancellable) `true` must stop
    /// all work before returning `NarrateError::EngineTimeout`. The default
    /// ignores the limit.
    fn synthesize_within(&self, text: &str, voice: &str, _timeout: Duration) -> Result<AudioBuffer> {
        self.synthesize(text, voice)
    }

    /// Whether `synthesize_within` enforces its deadline itself.
    fn cancellable(&self) -> bool {
        false
    }

    /// Name of the engine for logging.
    fn name(&self) -> &str;
}

/// Implement SynthesisEngine for Arc<T> so one engine can serve many jobs.
impl<T: SynthesisEngine + ?Sized> SynthesisEngine for Arc<T> {
    fn synthesize(&self, text: &str, voice: &str) -> Result<AudioBuffer> {
        (**self).synthesize(text, voice)
    }

    fn synthesize_within(&self, text: &str, voice: &str, timeout: Duration) -> Result<AudioBuffer> {
        (**self).synthesize_within(text, voice, timeout)
    }

    fn cancellable(&self) -> bool {
        (**self).cancellable()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Scriptable engine for testing.
///
/// Produces a sine tone per call and records every text it was asked to
/// synthesize.
#[derive(Debug)]
pub struct MockEngine {
    name: String,
    channels: u16,
    sample_rate: u32,
    tone_ms: u32,
    trailing_silence_ms: u32,
    fail_all: bool,
    failing_texts: Vec<String>,
    transient_failures: AtomicU32,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl MockEngine {
    /// Create a mock producing 200 ms of mono 24 kHz audio per call
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            channels: 1,
            sample_rate: 24000,
            tone_ms: 200,
            trailing_silence_ms: 0,
            fail_all: false,
            failing_texts: Vec::new(),
            transient_failures: AtomicU32::new(0),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_format(mut self, channels: u16, sample_rate: u32) -> Self {
        self.channels = channels;
        self.sample_rate = sample_rate;
        self
    }

    /// Length of the tone produced for each unit
    pub fn with_tone_ms(mut self, tone_ms: u32) -> Self {
        self.tone_ms = tone_ms;
        self
    }

    /// Silence appended after the tone of each unit
    pub fn with_trailing_silence_ms(mut self, ms: u32) -> Self {
        self.trailing_silence_ms = ms;
        self
    }

    /// Fail every call
    pub fn with_failure(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Fail every call whose text contains `needle`
    pub fn with_failure_on(mut self, needle: &str) -> Self {
        self.failing_texts.push(needle.to_string());
        self
    }

    /// Fail the first `count` calls, then succeed
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Block each call for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Texts received so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn tone(&self) -> AudioBuffer {
        let frames = (self.tone_ms as u64 * self.sample_rate as u64 / 1000) as usize;
        let channels = self.channels.max(1) as usize;
        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            let t = i as f32 / self.sample_rate.max(1) as f32;
            let value = 0.5 * (TAU * 220.0 * t).sin();
            samples.extend(std::iter::repeat_n(value, channels));
        }
        let mut buffer = AudioBuffer::new(samples, self.channels, self.sample_rate);
        buffer.append_silence(self.trailing_silence_ms);
        buffer
    }
}

impl SynthesisEngine for MockEngine {
    fn synthesize(&self, text: &str, _voice: &str) -> Result<AudioBuffer> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let transient = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if self.fail_all || transient || self.failing_texts.iter().any(|t| text.contains(t)) {
            return Err(NarrateError::Engine {
                message: "mock synthesis failure".to_string(),
            });
        }

        Ok(self.tone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
