//! Decoding of production assets (intro, outro, background music).
//!
//! WAV goes through hound. Compressed formats (MP3, FLAC, Vorbis, AAC) are
//! decoded with symphonia when the `decode` feature is enabled.

use crate::audio::buffer::AudioBuffer;
use crate::audio::wav;
use crate::error::{NarrateError, Result};
use std::path::Path;
use tracing::debug;

/// Decodes an audio file into a float buffer at its native layout.
pub fn decode_file(path: &Path) -> Result<AudioBuffer> {
    if !path.exists() {
        return Err(NarrateError::Decode {
            path: path.display().to_string(),
            message: "file not found".to_string(),
        });
    }

    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav") || e.eq_ignore_ascii_case("wave"));

    if is_wav {
        return wav::read_buffer(path).map_err(|e| NarrateError::Decode {
            path: path.display().to_string(),
            message: e.to_string(),
        });
    }

    decode_compressed(path)
}

#[cfg(feature = "decode")]
fn decode_compressed(path: &Path) -> Result<AudioBuffer> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let decode_err = |message: String| NarrateError::Decode {
        path: path.display().to_string(),
        message,
    };

    debug!(path = %path.display(), "decoding asset");

    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_err(format!("failed to probe format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_err("no audio track found".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| decode_err("sample rate not found".to_string()))?;
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(format!("failed to create decoder: {}", e)))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(decode_err(format!("failed to read packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count() as u16;
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(path = %path.display(), error = %e, "skipping undecodable packet");
            }
            Err(e) => return Err(decode_err(format!("decode failed: {}", e))),
        }
    }

    if channels == 0 {
        return Err(decode_err("channel count not found".to_string()));
    }

    Ok(AudioBuffer::new(samples, channels, sample_rate))
}

#[cfg(not(feature = "decode"))]
fn decode_compressed(path: &Path) -> Result<AudioBuffer> {
    Err(NarrateError::Decode {
        path: path.display().to_string(),
        message: "only WAV assets are supported without the `decode` feature".to_string(),
    })
}
