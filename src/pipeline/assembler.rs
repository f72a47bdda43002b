//! Ordered concatenation of fragments with silence normalization.

use crate::audio::buffer::db_to_gain;
use crate::audio::format::{Fragment, PcmFormat};
use crate::audio::wav::{self, RawPcm};
use crate::config::AssemblyConfig;
use crate::error::{NarrateError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How dead air in the assembled narration is bounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilencePolicy {
    /// Peak level below which a window is silent.
    pub threshold_dbfs: f32,
    /// Shortest silent run that gets collapsed.
    pub min_silence_ms: u32,
    /// Length every collapsed run is replaced with.
    pub collapse_to_ms: u32,
    /// Silence appended after the last fragment.
    pub trailing_silence_ms: u32,
    pub window_ms: u32,
}

impl Default for SilencePolicy {
    fn default() -> Self {
        Self::from(&AssemblyConfig::default())
    }
}

impl From<&AssemblyConfig> for SilencePolicy {
    fn from(config: &AssemblyConfig) -> Self {
        Self {
            threshold_dbfs: config.silence_threshold_dbfs,
            min_silence_ms: config.min_silence_ms,
            collapse_to_ms: config.collapse_to_ms,
            trailing_silence_ms: config.trailing_silence_ms,
            window_ms: config.analysis_window_ms,
        }
    }
}

/// Result of assembling one job.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyReport {
    pub output: PathBuf,
    pub format: PcmFormat,
    /// Frames read from all fragments.
    pub input_frames: usize,
    /// Frames written, including normalization and trailing silence.
    pub output_frames: usize,
    pub collapsed_regions: usize,
}

/// Joins a job's fragments into one file.
#[derive(Debug, Clone, Default)]
pub struct Assembler {
    policy: SilencePolicy,
}

impl Assembler {
    pub fn new(policy: SilencePolicy) -> Self {
        Self { policy }
    }

    /// Concatenates `fragments` in index order into `output`.
    ///
    /// Every fragment must share the first fragment's format; otherwise
    /// nothing is written. Fragment files are removed only after the output
    /// is complete.
    pub fn assemble(&self, fragments: &[Fragment], output: &Path) -> Result<AssemblyReport> {
        if fragments.is_empty() {
            return Err(NarrateError::NoFragments);
        }

        let mut ordered: Vec<&Fragment> = fragments.iter().collect();
        ordered.sort_by_key(|f| f.index);

        let mut combined: Option<RawPcm> = None;
        for fragment in &ordered {
            let pcm = wav::read_raw(&fragment.path)?;
            debug!(
                index = fragment.index,
                format = %pcm.format,
                frames = pcm.frames(),
                "read fragment"
            );
            match combined.as_mut() {
                None => combined = Some(pcm),
                Some(acc) => {
                    if pcm.format != acc.format {
                        warn!(
                            path = %fragment.path.display(),
                            expected = %acc.format,
                            actual = %pcm.format,
                            "format mismatch"
                        );
                        return Err(NarrateError::FormatMismatch {
                            path: fragment.path.display().to_string(),
                            expected: acc.format.to_string(),
                            actual: pcm.format.to_string(),
                        });
                    }
                    acc.samples.extend_from_slice(&pcm.samples);
                }
            }
        }
        let mut pcm = combined.ok_or(NarrateError::NoFragments)?;
        let input_frames = pcm.frames();

        let collapsed_regions = collapse_silence(&mut pcm, &self.policy);
        let trailing = pcm.format.ms_to_frames(self.policy.trailing_silence_ms)
            * pcm.format.channels as usize;
        pcm.samples.resize(pcm.samples.len() + trailing, 0);

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = wav::partial_path(output);
        wav::write_raw(&partial, &pcm)?;
        fs::rename(&partial, output)?;

        info!(
            output = %output.display(),
            fragments = ordered.len(),
            collapsed_regions,
            duration_ms = pcm.duration_ms(),
            "assembled narration"
        );

        for fragment in &ordered {
            if let Err(e) = fs::remove_file(&fragment.path) {
                warn!(path = %fragment.path.display(), error = %e, "could not remove fragment");
            }
        }

        Ok(AssemblyReport {
            output: output.to_path_buf(),
            format: pcm.format,
            input_frames,
            output_frames: pcm.frames(),
            collapsed_regions,
        })
    }
}

/// Replaces every silent run of at least `min_silence_ms` with exactly
/// `collapse_to_ms` of digital silence. Returns the number of runs replaced.
pub fn collapse_silence(pcm: &mut RawPcm, policy: &SilencePolicy) -> usize {
    let channels = pcm.format.channels.max(1) as usize;
    let window_frames = pcm.format.ms_to_frames(policy.window_ms).max(1);
    let min_frames = pcm.format.ms_to_frames(policy.min_silence_ms);
    let collapse_frames = pcm.format.ms_to_frames(policy.collapse_to_ms);
    let threshold = pcm.full_scale() * db_to_gain(policy.threshold_dbfs);

    let window_len = window_frames * channels;
    let silent: Vec<bool> = pcm
        .samples
        .chunks(window_len)
        .map(|w| w.iter().all(|&s| (s.unsigned_abs() as f32) < threshold))
        .collect();

    let mut out = Vec::with_capacity(pcm.samples.len());
    let mut collapsed = 0;
    let mut w = 0;
    while w < silent.len() {
        let start = w * window_len;
        if !silent[w] {
            let end = (start + window_len).min(pcm.samples.len());
            out.extend_from_slice(&pcm.samples[start..end]);
            w += 1;
            continue;
        }

        let mut run_end = w;
        while run_end < silent.len() && silent[run_end] {
            run_end += 1;
        }
        let end = (run_end * window_len).min(pcm.samples.len());
        let run_frames = (end - start) / channels;

        if run_frames >= min_frames && run_frames > 0 {
            out.resize(out.len() + collapse_frames * channels, 0);
            collapsed += 1;
        } else {
            out.extend_from_slice(&pcm.samples[start..end]);
        }
        w = run_end;
    }

    pcm.samples = out;
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleKind;
    use tempfile::TempDir;

    const RATE: u32 = 1000;

    fn policy() -> SilencePolicy {
        SilencePolicy {
            threshold_dbfs: -50.0,
            min_silence_ms: 2000,
            collapse_to_ms: 2000,
            trailing_silence_ms: 2000,
            window_ms: 10,
        }
    }

    /// Mono 1 kHz audio: loud square wave for `tone_ms`, then `silence_ms` of zeros.
    fn segment(tone_ms: usize, silence_ms: usize) -> Vec<i32> {
        let mut samples: Vec<i32> = (0..tone_ms)
            .map(|i| if i % 2 == 0 { 8000 } else { -8000 })
            .collect();
        samples.extend(std::iter::repeat_n(0, silence_ms));
        samples
    }

    fn write_fragment(dir: &Path, index: usize, format: PcmFormat, samples: Vec<i32>) -> Fragment {
        let path = dir.join(format!("fragment_{:05}.wav", index));
        wav::write_raw(&path, &RawPcm { format, samples }).unwrap();
        Fragment {
            index,
            path,
            format,
        }
    }

    #[test]
    fn test_concatenates_in_index_order_and_appends_trailing_silence() {
        let dir = TempDir::new().unwrap();
        let format = PcmFormat::pcm16(1, RATE);
        let f1 = write_fragment(dir.path(), 1, format, vec![2000; 100]);
        let f0 = write_fragment(dir.path(), 0, format, vec![1000; 100]);
        let output = dir.path().join("out/Book.wav");

        let report = Assembler::new(policy())
            .assemble(&[f1.clone(), f0.clone()], &output)
            .unwrap();

        let pcm = wav::read_raw(&output).unwrap();
        assert_eq!(pcm.format, format);
        assert_eq!(&pcm.samples[..100], &[1000; 100][..]);
        assert_eq!(&pcm.samples[100..200], &[2000; 100][..]);
        assert_eq!(pcm.duration_ms(), 200 + 2000);
        assert_eq!(report.input_frames, 200);
        assert_eq!(report.output_frames, 2200);
        assert_eq!(report.collapsed_regions, 0);
    }

    #[test]
    fn test_fragments_deleted_after_success() {
        let dir = TempDir::new().unwrap();
        let format = PcmFormat::pcm16(1, RATE);
        let f0 = write_fragment(dir.path(), 0, format, segment(100, 0));
        let output = dir.path().join("Book.wav");

        Assembler::new(policy()).assemble(&[f0.clone()], &output).unwrap();

        assert!(!f0.path.exists());
        assert!(output.exists());
        assert!(!wav::partial_path(&output).exists());
    }

    #[test]
    fn test_format_mismatch_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let f0 = write_fragment(dir.path(), 0, PcmFormat::pcm16(1, 24000), segment(100, 0));
        let f1 = write_fragment(dir.path(), 1, PcmFormat::pcm16(1, 22050), segment(100, 0));
        let output = dir.path().join("Book.wav");

        let result = Assembler::new(policy()).assemble(&[f0.clone(), f1.clone()], &output);

        match result {
            Err(NarrateError::FormatMismatch {
                path,
                expected,
                actual,
            }) => {
                assert!(path.ends_with("fragment_00001.wav"));
                assert_eq!(expected, "1ch/16bit/24000Hz");
                assert_eq!(actual, "1ch/16bit/22050Hz");
            }
            other => panic!("Expected FormatMismatch, got {:?}", other),
        }
        assert!(!output.exists());
        assert!(f0.path.exists());
        assert!(f1.path.exists());
    }

    #[test]
    fn test_channel_mismatch_is_detected() {
        let dir = TempDir::new().unwrap();
        let f0 = write_fragment(dir.path(), 0, PcmFormat::pcm16(1, RATE), vec![0; 10]);
        let f1 = write_fragment(dir.path(), 1, PcmFormat::pcm16(2, RATE), vec![0; 10]);
        let result = Assembler::new(policy()).assemble(&[f0, f1], &dir.path().join("x.wav"));
        assert!(matches!(result, Err(NarrateError::FormatMismatch { .. })));
    }

    #[test]
    fn test_no_fragments_is_error() {
        let dir = TempDir::new().unwrap();
        let result = Assembler::default().assemble(&[], &dir.path().join("x.wav"));
        assert!(matches!(result, Err(NarrateError::NoFragments)));
    }

    #[test]
    fn test_long_internal_silence_is_collapsed() {
        let dir = TempDir::new().unwrap();
        let format = PcmFormat::pcm16(1, RATE);
        // 500 ms speech, 3500 ms silence, then 500 ms speech.
        let f0 = write_fragment(dir.path(), 0, format, segment(500, 3500));
        let f1 = write_fragment(dir.path(), 1, format, segment(500, 0));
        let output = dir.path().join("Book.wav");

        let report = Assembler::new(policy()).assemble(&[f0, f1], &output).unwrap();

        // 4500 in - 3500 silence + 2000 collapsed + 2000 trailing
        assert_eq!(report.collapsed_regions, 1);
        assert_eq!(wav::read_raw(&output).unwrap().duration_ms(), 5000);
    }

    #[test]
    fn test_short_pauses_are_preserved() {
        let mut pcm = RawPcm {
            format: PcmFormat::pcm16(1, RATE),
            samples: [segment(300, 1500), segment(300, 0)].concat(),
        };
        let before = pcm.samples.clone();

        let collapsed = collapse_silence(&mut pcm, &policy());

        assert_eq!(collapsed, 0);
        assert_eq!(pcm.samples, before);
    }

    #[test]
    fn test_every_long_run_collapses_to_fixed_length() {
        let mut pcm = RawPcm {
            format: PcmFormat::pcm16(1, RATE),
            samples: [segment(200, 2500), segment(200, 9000), segment(200, 0)].concat(),
        };

        let collapsed = collapse_silence(&mut pcm, &policy());

        assert_eq!(collapsed, 2);
        assert_eq!(pcm.duration_ms(), 200 * 3 + 2000 * 2);
    }

    #[test]
    fn test_quiet_noise_below_threshold_counts_as_silence() {
        // -50 dBFS of 32768 is about 103.6; 50 is well below.
        let mut samples = segment(100, 0);
        samples.extend(std::iter::repeat_n(50, 3000));
        samples.extend(segment(100, 0));
        let mut pcm = RawPcm {
            format: PcmFormat::pcm16(1, RATE),
            samples,
        };

        assert_eq!(collapse_silence(&mut pcm, &policy()), 1);
        assert_eq!(pcm.duration_ms(), 2200);
    }

    #[test]
    fn test_stereo_runs_count_frames_not_samples() {
        let format = PcmFormat {
            channels: 2,
            sample_width: 2,
            frame_rate: RATE,
            sample_kind: SampleKind::Int,
        };
        let mono = segment(100, 2500);
        let samples: Vec<i32> = mono.iter().flat_map(|&s| [s, s]).collect();
        let mut pcm = RawPcm { format, samples };

        assert_eq!(collapse_silence(&mut pcm, &policy()), 1);
        assert_eq!(pcm.frames(), 100 + 2000);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = SilencePolicy::default();
        assert_eq!(policy.threshold_dbfs, -50.0);
        assert_eq!(policy.min_silence_ms, 2000);
        assert_eq!(policy.collapse_to_ms, 2000);
        assert_eq!(policy.trailing_silence_ms, 2000);
        assert_eq!(policy.window_ms, 10);
    }
}
