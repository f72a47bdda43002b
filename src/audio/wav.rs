//! WAV reading and writing for fragments, assembled narration and final output.

use crate::audio::buffer::AudioBuffer;
use crate::audio::format::{PcmFormat, SampleKind};
use crate::error::{NarrateError, Result};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Integer PCM frames kept in their original format.
///
/// Used where audio must pass through unchanged, such as fragment assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPcm {
    pub format: PcmFormat,
    /// Interleaved samples at the format's bit depth.
    pub samples: Vec<i32>,
}

impl RawPcm {
    pub fn new(format: PcmFormat) -> Self {
        Self {
            format,
            samples: Vec::new(),
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    pub fn duration_ms(&self) -> u64 {
        self.format.frames_to_ms(self.frames())
    }

    /// Largest representable magnitude at this bit depth.
    pub fn full_scale(&self) -> f32 {
        (1u64 << (self.format.bits_per_sample().clamp(8, 32) - 1)) as f32
    }
}

/// Reads the format header of a WAV file.
pub fn read_format(path: &Path) -> Result<PcmFormat> {
    let reader = hound::WavReader::open(path)?;
    Ok(reader.spec().into())
}

/// Reads an integer PCM WAV file without converting its samples.
pub fn read_raw(path: &Path) -> Result<RawPcm> {
    let mut reader = hound::WavReader::open(path)?;
    let format = PcmFormat::from(reader.spec());
    if format.sample_kind != SampleKind::Int {
        return Err(NarrateError::Audio {
            message: format!(
                "{}: floating point samples are not supported here",
                path.display()
            ),
        });
    }
    let samples = reader
        .samples::<i32>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(RawPcm { format, samples })
}

/// Writes integer PCM in its own format.
pub fn write_raw(path: &Path, pcm: &RawPcm) -> Result<()> {
    let mut writer = hound::WavWriter::create(path, pcm.format.into())?;
    for &sample in &pcm.samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Reads any WAV file into a normalized float buffer.
pub fn read_buffer(path: &Path) -> Result<AudioBuffer> {
    let reader = hound::WavReader::open(path)?;
    buffer_from_reader(reader)
}

/// Parses WAV data from any reader into a normalized float buffer.
pub fn read_buffer_from<R: Read>(reader: R) -> Result<AudioBuffer> {
    let reader = hound::WavReader::new(reader)?;
    buffer_from_reader(reader)
}

fn buffer_from_reader<R: Read>(mut reader: hound::WavReader<R>) -> Result<AudioBuffer> {
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1u64 << (spec.bits_per_sample.clamp(8, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok(AudioBuffer::new(samples, spec.channels, spec.sample_rate))
}

/// Writes a buffer as 16-bit PCM.
pub fn write_pcm16(path: &Path, buffer: &AudioBuffer) -> Result<()> {
    let spec: hound::WavSpec = PcmFormat::pcm16(buffer.channels(), buffer.sample_rate()).into();
    let mut writer = hound::WavWriter::create(path, spec)?;
    for sample in buffer.to_i16() {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Writes a buffer as 16-bit PCM so that `path` only ever holds a complete file.
///
/// Data goes to a `.partial` sibling first and is renamed into place once
/// finalized. A crash mid-write leaves only the partial file behind.
pub fn write_pcm16_atomic(path: &Path, buffer: &AudioBuffer) -> Result<()> {
    let partial = partial_path(path);
    if let Err(e) = write_pcm16(&partial, buffer) {
        if let Err(cleanup) = fs::remove_file(&partial) {
            debug!(path = %partial.display(), error = %cleanup, "could not remove partial file");
        }
        return Err(e);
    }
    fs::rename(&partial, path)?;
    Ok(())
}

/// Sibling path used while a file is being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// Duration of a WAV file in milliseconds, from its header.
pub fn duration_ms<R: Read>(reader: R) -> Result<u64> {
    let reader = hound::WavReader::new(reader)?;
    let format = PcmFormat::from(reader.spec());
    Ok(format.frames_to_ms(reader.duration() as usize))
}
