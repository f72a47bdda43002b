//! PCM format descriptors.

use std::fmt;
use std::path::PathBuf;

/// Sample encoding of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Int,
    Float,
}

/// Format tuple that all fragments of one job must share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcmFormat {
    pub channels: u16,
    /// Bytes per sample.
    pub sample_width: u16,
    /// Frames per second.
    pub frame_rate: u32,
    pub sample_kind: SampleKind,
}

impl PcmFormat {
    /// 16-bit signed integer PCM.
    pub fn pcm16(channels: u16, frame_rate: u32) -> Self {
        Self {
            channels,
            sample_width: 2,
            frame_rate,
            sample_kind: SampleKind::Int,
        }
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.sample_width * 8
    }

    /// Bytes per interleaved frame.
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.sample_width as usize
    }

    /// Duration of `frames` frames in milliseconds.
    pub fn frames_to_ms(&self, frames: usize) -> u64 {
        if self.frame_rate == 0 {
            return 0;
        }
        frames as u64 * 1000 / self.frame_rate as u64
    }

    /// Number of frames covering `ms` milliseconds.
    pub fn ms_to_frames(&self, ms: u32) -> usize {
        (ms as u64 * self.frame_rate as u64 / 1000) as usize
    }
}

impl From<hound::WavSpec> for PcmFormat {
    fn from(spec: hound::WavSpec) -> Self {
        Self {
            channels: spec.channels,
            sample_width: spec.bits_per_sample.div_ceil(8),
            frame_rate: spec.sample_rate,
            sample_kind: match spec.sample_format {
                hound::SampleFormat::Int => SampleKind::Int,
                hound::SampleFormat::Float => SampleKind::Float,
            },
        }
    }
}

impl From<PcmFormat> for hound::WavSpec {
    fn from(format: PcmFormat) -> Self {
        hound::WavSpec {
            channels: format.channels,
            sample_rate: format.frame_rate,
            bits_per_sample: format.bits_per_sample(),
            sample_format: match format.sample_kind {
                SampleKind::Int => hound::SampleFormat::Int,
                SampleKind::Float => hound::SampleFormat::Float,
            },
        }
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.sample_kind {
            SampleKind::Int => "",
            SampleKind::Float => "f",
        };
        write!(
            f,
            "{}ch/{}bit{}/{}Hz",
            self.channels,
            self.bits_per_sample(),
            kind,
            self.frame_rate
        )
    }
}

/// Rendered audio of one text unit, waiting to be assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub index: usize,
    pub path: PathBuf,
    pub format: PcmFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_compact() {
        assert_eq!(PcmFormat::pcm16(1, 24000).to_string(), "1ch/16bit/24000Hz");

        let float = PcmFormat {
            channels: 2,
            sample_width: 4,
            frame_rate: 48000,
            sample_kind: SampleKind::Float,
        };
        assert_eq!(float.to_string(), "2ch/32bitf/48000Hz");
    }

    #[test]
    fn wav_spec_round_trip() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 24,
            sample_format: hound::SampleFormat::Int,
        };
        let format = PcmFormat::from(spec);
        assert_eq!(format.sample_width, 3);
        assert_eq!(format.frame_size(), 6);
        assert_eq!(hound::WavSpec::from(format), spec);
    }

    #[test]
    fn frame_math() {
        let format = PcmFormat::pcm16(1, 24000);
        assert_eq!(format.ms_to_frames(2000), 48000);
        assert_eq!(format.frames_to_ms(48000), 2000);
        assert_eq!(format.frames_to_ms(12), 0);
    }

    #[test]
    fn formats_differing_in_rate_are_not_equal() {
        assert_ne!(PcmFormat::pcm16(1, 24000), PcmFormat::pcm16(1, 22050));
    }
}
