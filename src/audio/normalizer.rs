use tracing::{debug, info, warn};

use crate::audio::loader::AudioLoader;
use crate::audio::meter::LoudnessMeter;
use crate::audio::types::{AudioData, GainPlan, LoudnessMeasurement, TrackGain};
use crate::composition::AudioMixPlan;
use crate::config::LoudnessConfig;
use crate::error::{AudioError, CompositorError, NormalizationError, Result};
use crate::manifest::CellRole;

fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Two-pass measure-then-apply loudness normalization.
///
/// Each track is brought to the target on its own, the gained tracks are mixed
/// and re-measured, and a final output gain lands the mix on the target unless
/// that would push the true peak over the ceiling.
#[derive(Debug, Clone)]
pub struct LoudnessNormalizer {
    peak_ceiling_dbtp: f64,
    max_track_gain_db: f64,
    mix_sample_rate: u32,
    meter: LoudnessMeter,
}

impl LoudnessNormalizer {
    pub fn new(peak_ceiling_dbtp: f64, max_track_gain_db: f64, mix_sample_rate: u32) -> Self {
        Self {
            peak_ceiling_dbtp,
            max_track_gain_db,
            mix_sample_rate,
            meter: LoudnessMeter::new(),
        }
    }

    pub fn from_config(config: &LoudnessConfig) -> Self {
        Self::new(
            config.peak_ceiling_dbtp,
            config.max_track_gain_db,
            config.mix_sample_rate,
        )
    }

    /// `target - measured`, clamped; silent tracks are left alone
    pub fn track_gain_db(&self, target_lufs: f64, measured: &LoudnessMeasurement) -> f64 {
        match measured.integrated_lufs {
            Some(lufs) => (target_lufs - lufs).clamp(-self.max_track_gain_db, self.max_track_gain_db),
            None => 0.0,
        }
    }

    /// Output gain for the mix and whether the peak ceiling reduced it
    pub fn output_gain_db(&self, target_lufs: f64, mixed: &LoudnessMeasurement) -> (f64, bool) {
        let Some(lufs) = mixed.integrated_lufs else {
            return (0.0, false);
        };

        let loudness_gain = target_lufs - lufs;
        let peak_headroom = self.peak_ceiling_dbtp - mixed.true_peak_dbtp;
        if loudness_gain > peak_headroom {
            (peak_headroom, true)
        } else {
            (loudness_gain, false)
        }
    }

    /// Deterministic gain plan for decoded tracks
    pub fn plan(
        &self,
        target_lufs: f64,
        tracks: Vec<(CellRole, AudioData)>,
        max_duration: Option<f64>,
    ) -> std::result::Result<GainPlan, NormalizationError> {
        let mut gains = Vec::with_capacity(tracks.len());
        let mut prepared = Vec::with_capacity(tracks.len());

        for (role, audio) in tracks {
            // Measure what is actually mixed: stereo at the mix rate
            let audio = audio.to_stereo().resample(self.mix_sample_rate);
            let measured = self.meter.measure(&audio)?;
            let gain_db = self.track_gain_db(target_lufs, &measured);
            debug!(
                "{:?} track: {:?} LUFS, {:.2} dBTP -> gain {:+.2} dB",
                role, measured.integrated_lufs, measured.true_peak_dbtp, gain_db
            );
            gains.push(TrackGain {
                role,
                measured,
                gain_db,
            });
            prepared.push((audio, gain_db));
        }

        let mix = self.mix(&prepared, max_duration);
        let mixed = self.meter.measure(&mix)?;
        let (output_gain_db, peak_limited) = self.output_gain_db(target_lufs, &mixed);

        Ok(GainPlan {
            target_lufs,
            tracks: gains,
            mixed,
            output_gain_db,
            peak_limited,
        })
    }

    /// Sum gained stereo tracks; shorter tracks are padded with silence
    fn mix(&self, tracks: &[(AudioData, f64)], max_duration: Option<f64>) -> AudioData {
        let longest = tracks.iter().map(|(a, _)| a.samples.len()).max().unwrap_or(0);
        let len = match max_duration {
            Some(seconds) => longest.min((seconds * self.mix_sample_rate as f64).round() as usize * 2),
            None => longest,
        };

        let mut samples = vec![0.0f32; len];
        for (audio, gain_db) in tracks {
            let gain = db_to_linear(*gain_db) as f32;
            for (out, &s) in samples.iter_mut().zip(audio.samples.iter()) {
                *out += s * gain;
            }
        }
        AudioData::from_samples(samples, self.mix_sample_rate, 2)
    }

    /// Decode and plan the mix for a render. `None` when no source has audio.
    pub async fn normalize(&self, mix: &AudioMixPlan, duration: f64) -> Result<Option<GainPlan>> {
        if mix.is_silent() {
            info!("   No audio tracks to normalize");
            return Ok(None);
        }

        let normalizer = self.clone();
        let sources = mix.sources.clone();
        let target = mix.target_lufs;

        let plan = tokio::task::spawn_blocking(move || -> Result<Option<GainPlan>> {
            let mut tracks = Vec::with_capacity(sources.len());
            for source in &sources {
                match AudioLoader::load(&source.path) {
                    Ok(audio) => tracks.push((source.role, audio)),
                    Err(CompositorError::Audio(AudioError::NoAudioTrack { path })) => {
                        warn!("No decodable audio in {}, leaving it out of the mix", path);
                    }
                    Err(CompositorError::Audio(AudioError::LoadFailed { path })) => {
                        return Err(NormalizationError::MeasurementFailed {
                            path,
                            reason: "audio could not be decoded".to_string(),
                        }
                        .into());
                    }
                    Err(e) => return Err(e),
                }
            }
            if tracks.is_empty() {
                return Ok(None);
            }
            Ok(Some(normalizer.plan(target, tracks, Some(duration))?))
        })
        .await
        .map_err(|e| CompositorError::generic(format!("loudness task failed: {}", e)))??;

        match &plan {
            Some(plan) => info!(
                "   🔊 Loudness: output gain {:+.2} dB{}",
                plan.output_gain_db,
                if plan.peak_limited { " (peak limited)" } else { "" }
            ),
            None => info!("   No decodable audio, rendering without sound"),
        }
        Ok(plan)
    }
}
