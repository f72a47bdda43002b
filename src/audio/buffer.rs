//! In-memory audio with the mixing primitives used in post-production.
//!
//! Samples are interleaved `f32` in the nominal range `-1.0..=1.0`. Mixing
//! may push values outside that range; clipping happens at export.

use crate::error::{NarrateError, Result};

/// Converts a decibel change into a linear amplitude factor.
pub fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Converts a linear amplitude into dBFS. Silence maps to negative infinity.
pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * gain.log10()
    }
}

/// Interleaved audio samples with their layout.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wraps interleaved samples. A trailing partial frame is dropped.
    pub fn new(mut samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Digital silence of the given length.
    pub fn silent(duration_ms: u32, channels: u16, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let frames = ms_to_frames(duration_ms, sample_rate);
        Self {
            samples: vec![0.0; frames * channels as usize],
            channels,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }

    /// Frame count covering `ms` milliseconds at this buffer's rate.
    pub fn ms_to_frames(&self, ms: u32) -> usize {
        ms_to_frames(ms, self.sample_rate)
    }

    /// Highest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Scales every sample by `db` decibels.
    pub fn apply_gain_db(&mut self, db: f32) {
        if db == 0.0 {
            return;
        }
        let gain = db_to_gain(db);
        for sample in &mut self.samples {
            *sample *= gain;
        }
    }

    /// Scales the buffer so its peak sits `headroom_db` below full scale.
    ///
    /// Silent buffers are left untouched.
    pub fn normalize_peak(&mut self, headroom_db: f32) {
        let peak = self.peak();
        if peak <= f32::EPSILON {
            return;
        }
        let gain = db_to_gain(-headroom_db.abs()) / peak;
        for sample in &mut self.samples {
            *sample *= gain;
        }
    }

    /// Linear fade-in over the first `duration_ms`, capped at the buffer length.
    pub fn fade_in(&mut self, duration_ms: u32) {
        let fade_frames = self.ms_to_frames(duration_ms).min(self.frames());
        if fade_frames == 0 {
            return;
        }
        let channels = self.channels as usize;
        for frame in 0..fade_frames {
            let gain = frame as f32 / fade_frames as f32;
            for sample in &mut self.samples[frame * channels..(frame + 1) * channels] {
                *sample *= gain;
            }
        }
    }

    /// Mixes `other` into this buffer starting at `position_ms`.
    ///
    /// The result keeps this buffer's length: whatever of `other` extends past
    /// the end is dropped. Both buffers must share channels and sample rate.
    pub fn overlay(&mut self, other: &AudioBuffer, position_ms: u32) -> Result<()> {
        let start = self.ms_to_frames(position_ms);
        self.overlay_at_frame(other, start)
    }

    /// Like [`overlay`](Self::overlay) with a frame offset.
    pub fn overlay_at_frame(&mut self, other: &AudioBuffer, start_frame: usize) -> Result<()> {
        self.check_layout(other)?;
        let channels = self.channels as usize;
        let start = start_frame.saturating_mul(channels);
        if start >= self.samples.len() {
            return Ok(());
        }
        for (dst, src) in self.samples[start..].iter_mut().zip(other.samples.iter()) {
            *dst += src;
        }
        Ok(())
    }

    /// Appends `other` to the end of this buffer.
    pub fn append(&mut self, other: &AudioBuffer) -> Result<()> {
        self.check_layout(other)?;
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }

    /// Appends `duration_ms` of silence.
    pub fn append_silence(&mut self, duration_ms: u32) {
        let frames = self.ms_to_frames(duration_ms);
        self.samples
            .resize(self.samples.len() + frames * self.channels as usize, 0.0);
    }

    /// Cuts or zero-pads the buffer to exactly `frames` frames.
    pub fn set_frames(&mut self, frames: usize) {
        self.samples.resize(frames * self.channels as usize, 0.0);
    }

    /// Returns a copy with `channels` channels.
    ///
    /// Mono is duplicated across outputs; downmixing to mono averages all
    /// inputs; any other change maps output channel `c` to input `c % n`.
    pub fn to_channels(&self, channels: u16) -> AudioBuffer {
        let channels = channels.max(1);
        if channels == self.channels {
            return self.clone();
        }
        let src = self.channels as usize;
        let dst = channels as usize;
        let mut samples = Vec::with_capacity(self.frames() * dst);
        for frame in self.samples.chunks_exact(src) {
            if dst == 1 {
                samples.push(frame.iter().sum::<f32>() / src as f32);
            } else {
                for c in 0..dst {
                    samples.push(frame[c % src]);
                }
            }
        }
        AudioBuffer {
            samples,
            channels,
            sample_rate: self.sample_rate,
        }
    }

    /// Returns a copy at `to_rate` using linear interpolation.
    pub fn resampled(&self, to_rate: u32) -> AudioBuffer {
        if to_rate == self.sample_rate || self.sample_rate == 0 || to_rate == 0 {
            return AudioBuffer {
                samples: self.samples.clone(),
                channels: self.channels,
                sample_rate: if to_rate == 0 { self.sample_rate } else { to_rate },
            };
        }

        let channels = self.channels as usize;
        let in_frames = self.frames();
        let ratio = self.sample_rate as f64 / to_rate as f64;
        let out_frames = (in_frames as u64 * to_rate as u64).div_ceil(self.sample_rate as u64) as usize;
        let mut samples = Vec::with_capacity(out_frames * channels);

        for i in 0..out_frames {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(in_frames.saturating_sub(1));
            let fraction = (source_pos - source_idx as f64) as f32;
            for c in 0..channels {
                let left = self.samples[source_idx * channels + c];
                let value = if source_idx + 1 >= in_frames {
                    left
                } else {
                    let right = self.samples[(source_idx + 1) * channels + c];
                    left + (right - left) * fraction
                };
                samples.push(value);
            }
        }

        AudioBuffer {
            samples,
            channels: self.channels,
            sample_rate: to_rate,
        }
    }

    /// Returns a copy converted to the given channel count and sample rate.
    pub fn to_layout(&self, channels: u16, sample_rate: u32) -> AudioBuffer {
        self.to_channels(channels).resampled(sample_rate)
    }

    /// Clamped 16-bit samples for export.
    pub fn to_i16(&self) -> Vec<i16> {
        self.samples
            .iter()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)
            .collect()
    }

    fn check_layout(&self, other: &AudioBuffer) -> Result<()> {
        if self.channels != other.channels || self.sample_rate != other.sample_rate {
            return Err(NarrateError::Audio {
                message: format!(
                    "cannot mix {}ch/{}Hz into {}ch/{}Hz",
                    other.channels, other.sample_rate, self.channels, self.sample_rate
                ),
            });
        }
        Ok(())
    }
}

fn ms_to_frames(ms: u32, sample_rate: u32) -> usize {
    (ms as u64 * sample_rate as u64 / 1000) as usize
}
