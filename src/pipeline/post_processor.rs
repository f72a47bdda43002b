//! Production mix: intro, outro and background bed around the narration.
//!
//! Every overlay is optional. A missing or undecodable asset is reported as a
//! recoverable stage error and that overlay is skipped; narration-only output
//! is always produced.

use crate::audio::buffer::AudioBuffer;
use crate::audio::{decode, wav};
use crate::config::ProductionConfig;
use crate::defaults;
use crate::error::{NarrateError, Result};
use crate::job::{BackgroundBed, SynthesisJob};
use crate::pipeline::error::{ErrorReporter, StageError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const STAGE: &str = "post-processor";

/// Timing of the production mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductionTiming {
    /// Narration onset when an intro is present.
    pub narration_delay_ms: u32,
    /// Upper bound of the outro fade-in.
    pub outro_fade_ms: u32,
    /// Gap between the outro's end and the end of the track.
    pub outro_margin_ms: u32,
}

impl Default for ProductionTiming {
    fn default() -> Self {
        Self::from(&ProductionConfig::default())
    }
}

impl From<&ProductionConfig> for ProductionTiming {
    fn from(config: &ProductionConfig) -> Self {
        Self {
            narration_delay_ms: config.narration_delay_ms,
            outro_fade_ms: config.outro_fade_ms,
            outro_margin_ms: config.outro_margin_ms,
        }
    }
}

/// What the mix ended up containing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductionReport {
    pub intro_applied: bool,
    pub outro_applied: bool,
    pub bed_applied: bool,
    /// Where the narration starts in the final track.
    pub narration_offset_ms: u32,
    pub duration_ms: u64,
}

/// Mixes production assets and exports the canonical output format.
pub struct PostProcessor {
    timing: ProductionTiming,
    rng: StdRng,
    reporter: Arc<dyn ErrorReporter>,
}

impl PostProcessor {
    pub fn new(timing: ProductionTiming, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            timing,
            rng: StdRng::from_entropy(),
            reporter,
        }
    }

    /// Fixes the bed gap sequence, for reproducible output.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Reads `input`, mixes the job's assets in, and writes `output` as
    /// stereo 16-bit 44.1 kHz PCM.
    pub fn process(
        &mut self,
        input: &Path,
        job: &SynthesisJob,
        output: &Path,
    ) -> Result<ProductionReport> {
        let narration = wav::read_buffer(input)?;
        let (mixed, mut report) = self.produce(narration, job);

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        wav::write_pcm16_atomic(output, &mixed)?;
        report.duration_ms = mixed.duration_ms();

        info!(
            output = %output.display(),
            duration_ms = report.duration_ms,
            intro = report.intro_applied,
            outro = report.outro_applied,
            bed = report.bed_applied,
            "production mix written"
        );
        Ok(report)
    }

    /// Mixes in memory. Never fails: overlay problems are reported and the
    /// overlay is left out.
    pub fn produce(
        &mut self,
        narration: AudioBuffer,
        job: &SynthesisJob,
    ) -> (AudioBuffer, ProductionReport) {
        let mut report = ProductionReport::default();
        let mut narration = to_output_layout(&narration);

        if let Some(bed) = &job.background {
            match self.bed_track(bed, narration.frames()) {
                Ok(track) => match narration.overlay_at_frame(&track, 0) {
                    Ok(()) => report.bed_applied = true,
                    Err(e) => self.skip("background", &e),
                },
                Err(e) => self.skip("background", &e),
            }
        }

        let mut base = narration;
        if let Some(path) = &job.intro {
            match self.with_intro(&base, path, job.overlay_gain_db) {
                Ok(mixed) => {
                    base = mixed;
                    report.intro_applied = true;
                    report.narration_offset_ms = self.timing.narration_delay_ms;
                }
                Err(e) => self.skip("intro", &e),
            }
        }

        if let Some(path) = &job.outro {
            match self.add_outro(&mut base, path, job.overlay_gain_db) {
                Ok(()) => report.outro_applied = true,
                Err(e) => self.skip("outro", &e),
            }
        }

        report.duration_ms = base.duration_ms();
        (base, report)
    }

    /// Intro from time zero with the narration laid over it at the delay.
    fn with_intro(&self, narration: &AudioBuffer, path: &Path, gain_db: f32) -> Result<AudioBuffer> {
        let mut intro = load_asset(path)?;
        intro.apply_gain_db(gain_db);

        let delay = narration.ms_to_frames(self.timing.narration_delay_ms);
        let total = intro.frames().max(delay + narration.frames());
        intro.set_frames(total);
        intro.overlay_at_frame(narration, delay)?;

        debug!(path = %path.display(), delay_frames = delay, "intro applied");
        Ok(intro)
    }

    /// Outro faded in and placed to end `outro_margin_ms` before the track end.
    fn add_outro(&self, base: &mut AudioBuffer, path: &Path, gain_db: f32) -> Result<()> {
        let mut outro = load_asset(path)?;
        outro.apply_gain_db(gain_db);
        outro.fade_in(self.timing.outro_fade_ms);

        let margin = base.ms_to_frames(self.timing.outro_margin_ms);
        let position = base
            .frames()
            .saturating_sub(margin)
            .saturating_sub(outro.frames());
        base.overlay_at_frame(&outro, position)?;

        debug!(path = %path.display(), position_frames = position, "outro applied");
        Ok(())
    }

    /// Background music looped with random gaps to exactly `frames` frames.
    fn bed_track(&mut self, bed: &BackgroundBed, frames: usize) -> Result<AudioBuffer> {
        let mut music = load_asset(&bed.path)?;
        if music.is_empty() {
            return Err(NarrateError::Audio {
                message: format!("{}: background track is empty", bed.path.display()),
            });
        }
        music.normalize_peak(0.0);
        music.apply_gain_db(bed.gain_db());

        let mut track = AudioBuffer::new(
            Vec::with_capacity(frames * music.channels() as usize),
            music.channels(),
            music.sample_rate(),
        );
        let (min_gap, max_gap) = (bed.min_gap_ms, bed.max_gap_ms.max(bed.min_gap_ms));
        while track.frames() < frames {
            track.append(&music)?;
            if track.frames() >= frames {
                break;
            }
            let gap = self.rng.gen_range(min_gap..=max_gap);
            track.append_silence(gap);
        }
        track.set_frames(frames);

        debug!(
            path = %bed.path.display(),
            volume = bed.volume,
            gain_db = bed.gain_db(),
            "background bed prepared"
        );
        Ok(track)
    }

    fn skip(&self, overlay: &str, err: &NarrateError) {
        self.reporter.report(
            STAGE,
            &StageError::Recoverable(format!("{} skipped: {}", overlay, err)),
        );
    }
}

fn to_output_layout(buffer: &AudioBuffer) -> AudioBuffer {
    buffer.to_layout(defaults::OUTPUT_CHANNELS, defaults::OUTPUT_SAMPLE_RATE)
}

fn load_asset(path: &Path) -> Result<AudioBuffer> {
    Ok(to_output_layout(&decode::decode_file(path)?))
}
