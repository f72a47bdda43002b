//! Synthesis through an external text-to-speech program.

use crate::audio::buffer::AudioBuffer;
use crate::audio::wav;
use crate::config::EngineConfig;
use crate::engine::synthesizer::SynthesisEngine;
use crate::error::{NarrateError, Result};
use std::io::{Cursor, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Placeholder in engine arguments replaced by the job's voice.
pub const VOICE_PLACEHOLDER: &str = "{voice}";

/// How often a running engine is checked against its deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs an offline TTS program once per unit.
///
/// The unit text is written to the program's stdin. Its stdout must be
/// either a WAV stream or headerless 16-bit little-endian mono PCM at the
/// configured sample rate. A program that outlives its deadline is killed.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    sample_rate: u32,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>, sample_rate: u32) -> Self {
        Self {
            program: program.into(),
            args,
            sample_rate,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.args.clone(),
            config.sample_rate,
        )
    }

    /// Arguments for one invocation with the voice substituted.
    pub fn args_for(&self, voice: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(VOICE_PLACEHOLDER, voice))
            .collect()
    }

    fn decode_output(&self, stdout: &[u8]) -> Result<AudioBuffer> {
        if stdout.is_empty() {
            return Err(NarrateError::Engine {
                message: format!("{} produced no audio", self.program),
            });
        }

        if stdout.starts_with(b"RIFF") {
            return wav::read_buffer_from(Cursor::new(stdout));
        }

        if stdout.len() % 2 != 0 {
            return Err(NarrateError::Engine {
                message: format!(
                    "{} produced {} bytes, not whole 16-bit samples",
                    self.program,
                    stdout.len()
                ),
            });
        }

        let samples = stdout
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();
        Ok(AudioBuffer::new(samples, 1, self.sample_rate))
    }

    fn spawn(&self, voice: &str) -> Result<Child> {
        let args = self.args_for(voice);
        debug!(program = %self.program, ?args, "invoking engine");

        Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    NarrateError::EngineNotFound {
                        program: self.program.clone(),
                    }
                } else {
                    NarrateError::Engine {
                        message: format!("Failed to execute {}: {}", self.program, e),
                    }
                }
            })
    }

    /// One invocation. Stdin is fed while stdout and stderr are drained so a
    /// program that writes before it finishes reading cannot stall on a full
    /// pipe.
    fn run(&self, text: &str, voice: &str, timeout: Option<Duration>) -> Result<AudioBuffer> {
        let mut child = self.spawn(voice)?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (status, stdout, stderr) = thread::scope(|s| {
            let writer = s.spawn(move || write_input(stdin, text));
            let out = s.spawn(move || read_pipe(stdout));
            let err = s.spawn(move || read_pipe(stderr));

            // Once the child is gone its pipes close and every helper returns.
            let status = self.wait_for_exit(&mut child, timeout);
            let written = joined(writer);
            let stdout = joined(out);
            let stderr = joined(err);

            let status = status?;
            if let Err(e) = written {
                debug!(program = %self.program, error = %e, "failed to feed engine stdin");
            }
            Ok::<_, NarrateError>((status, stdout?, stderr?))
        })?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(NarrateError::Engine {
                message: format!(
                    "{} failed with status {:?}: {}",
                    self.program,
                    status,
                    stderr.trim()
                ),
            });
        }

        self.decode_output(&stdout)
    }

    /// Waits for the child, killing it once `timeout` has passed.
    fn wait_for_exit(&self, child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus> {
        let Some(timeout) = timeout else {
            return Ok(child.wait()?);
        };

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                Ok(None) => {
                    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                    warn!(program = %self.program, timeout_ms, "engine exceeded its deadline, killing it");
                    kill(child);
                    return Err(NarrateError::EngineTimeout { timeout_ms });
                }
                Err(e) => {
                    kill(child);
                    return Err(e.into());
                }
            }
        }
    }
}

impl SynthesisEngine for CommandEngine {
    fn synthesize(&self, text: &str, voice: &str) -> Result<AudioBuffer> {
        self.run(text, voice, None)
    }

    fn synthesize_within(&self, text: &str, voice: &str, timeout: Duration) -> Result<AudioBuffer> {
        self.run(text, voice, Some(timeout))
    }

    fn cancellable(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Writes the unit text and closes stdin so the program sees end of input.
fn write_input(stdin: Option<ChildStdin>, text: &str) -> std::io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match stdin.write_all(text.as_bytes()) {
        // A program that exits early is judged by its exit status.
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

fn read_pipe<R: Read>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

fn joined<T>(handle: ScopedJoinHandle<'_, std::io::Result<T>>) -> Result<T> {
    let result = handle.join().map_err(|_| NarrateError::Engine {
        message: "engine pipe thread panicked".to_string(),
    })?;
    Ok(result?)
}

fn kill(child: &mut Child) {
    // The child may already have exited between the poll and the kill.
    if let Err(e) = child.kill() {
        debug!(error = %e, "kill failed");
    }
    if let Err(e) = child.wait() {
        warn!(error = %e, "failed to reap engine process");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_placeholder_is_substituted() {
        let engine = CommandEngine::new(
            "piper",
            vec![
                "--model".to_string(),
                "{voice}".to_string(),
                "--speaker={voice}".to_string(),
            ],
            22050,
        );
        assert_eq!(
            engine.args_for("bf_emma"),
            vec!["--model", "bf_emma", "--speaker=bf_emma"]
        );
    }

    #[test]
    fn test_from_config_uses_defaults() {
        let engine = CommandEngine::from_config(&EngineConfig::default());
        assert_eq!(engine.name(), "piper");
        assert!(engine.args_for("x").contains(&"x".to_string()));
    }

    #[test]
    fn test_decode_headerless_pcm() {
        let engine = CommandEngine::new("tts", Vec::new(), 16000);
        let audio = engine.decode_output(&[0x00, 0x40, 0x00, 0xC0]).unwrap();
        assert_eq!(audio.sample_rate(), 16000);
        assert_eq!(audio.samples(), &[0.5, -0.5]);
    }

    #[test]
    fn test_decode_odd_byte_count_is_error() {
        let engine = CommandEngine::new("tts", Vec::new(), 16000);
        match engine.decode_output(&[0x00, 0x40, 0x00]) {
            Err(NarrateError::Engine { message }) => {
                assert!(message.contains("3 bytes"));
            }
            other => panic!("Expected Engine error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_empty_output_is_error() {
        let engine = CommandEngine::new("tts", Vec::new(), 16000);
        assert!(matches!(
            engine.decode_output(&[]),
            Err(NarrateError::Engine { .. })
        ));
    }

    #[test]
    fn test_missing_program_is_not_found() {
        let engine = CommandEngine::new("narrate-no-such-tts-program", Vec::new(), 16000);
        match engine.synthesize("Hello.", "v") {
            Err(NarrateError::EngineNotFound { program }) => {
                assert_eq!(program, "narrate-no-such-tts-program");
            }
            other => panic!("Expected EngineNotFound, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_stdin_is_piped_through() {
        // `cat` echoes the text, which reads back as raw PCM.
        let engine = CommandEngine::new("cat", Vec::new(), 8000);
        let audio = engine.synthesize("abcd", "v").unwrap();
        assert_eq!(audio.frames(), 2);
        assert_eq!(audio.sample_rate(), 8000);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_program_is_engine_error() {
        let engine = CommandEngine::new("false", Vec::new(), 8000);
        assert!(matches!(
            engine.synthesize("Hello.", "v"),
            Err(NarrateError::Engine { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_large_input_does_not_stall_on_full_pipes() {
        // Far larger than a pipe buffer in both directions.
        let text = "ab".repeat(200_000);
        let engine = CommandEngine::new("cat", Vec::new(), 8000);
        let audio = engine.synthesize(&text, "v").unwrap();
        assert_eq!(audio.frames(), 200_000);
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_program_is_killed_at_deadline() {
        let engine = CommandEngine::new("sleep", vec!["5".to_string()], 8000);
        assert!(engine.cancellable());

        let started = Instant::now();
        let result = engine.synthesize_within("Hello.", "v", Duration::from_millis(50));

        match result {
            Err(NarrateError::EngineTimeout { timeout_ms }) => assert_eq!(timeout_ms, 50),
            other => panic!("Expected EngineTimeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_fast_program_finishes_within_deadline() {
        let engine = CommandEngine::new("cat", Vec::new(), 8000);
        let audio = engine
            .synthesize_within("abcd", "v", Duration::from_secs(10))
            .unwrap();
        assert_eq!(audio.frames(), 2);
    }
}
