//! ITU-R BS.1770 loudness and true-peak measurement.
//!
//! K-weighting uses the sample-rate independent biquad design popularised by
//! libebur128. Integrated loudness is gated over 400 ms blocks with a 100 ms
//! step (absolute gate -70 LUFS, relative gate -10 LU).

use std::f64::consts::PI;

use rayon::prelude::*;

use crate::audio::types::{AudioData, LoudnessMeasurement, SILENCE_FLOOR_DB};
use crate::error::NormalizationError;

const ABSOLUTE_GATE_LUFS: f64 = -70.0;
const RELATIVE_GATE_LU: f64 = -10.0;
const BLOCK_SECONDS: f64 = 0.4;
const STEP_SECONDS: f64 = 0.1;

const OVERSAMPLE: usize = 4;
const HALF_TAPS: isize = 12;

#[derive(Debug, Clone, Copy)]
struct Biquad {
    b: [f64; 3],
    a: [f64; 3],
}

impl Biquad {
    fn process(&self, input: &[f64]) -> Vec<f64> {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
        input
            .iter()
            .map(|&x| {
                let y = self.b[0] * x + self.b[1] * x1 + self.b[2] * x2
                    - self.a[1] * y1
                    - self.a[2] * y2;
                x2 = x1;
                x1 = x;
                y2 = y1;
                y1 = y;
                y
            })
            .collect()
    }
}

/// Pre-filter (high shelf) and RLB (high pass) stages for a sample rate
fn k_weighting(sample_rate: u32) -> [Biquad; 2] {
    let rate = sample_rate as f64;

    let f0 = 1681.974450955533;
    let gain_db = 3.999843853973347;
    let q = 0.7071752369554196;
    let k = (PI * f0 / rate).tan();
    let vh = 10f64.powf(gain_db / 20.0);
    let vb = vh.powf(0.4996667741545416);
    let a0 = 1.0 + k / q + k * k;
    let shelf = Biquad {
        b: [
            (vh + vb * k / q + k * k) / a0,
            2.0 * (k * k - vh) / a0,
            (vh - vb * k / q + k * k) / a0,
        ],
        a: [1.0, 2.0 * (k * k - 1.0) / a0, (1.0 - k / q + k * k) / a0],
    };

    let f0 = 38.13547087602444;
    let q = 0.5003270373238773;
    let k = (PI * f0 / rate).tan();
    let a0 = 1.0 + k / q + k * k;
    let high_pass = Biquad {
        b: [1.0, -2.0, 1.0],
        a: [1.0, 2.0 * (k * k - 1.0) / a0, (1.0 - k / q + k * k) / a0],
    };

    [shelf, high_pass]
}

/// Channel weights: L, R, C at 1.0, LFE excluded, surrounds at 1.41
fn channel_weight(channel: usize, channels: usize) -> f64 {
    match (channels, channel) {
        (6, 3) => 0.0,
        (6, 4) | (6, 5) => 1.41,
        _ => 1.0,
    }
}

fn block_loudness(weighted_power: f64) -> f64 {
    -0.691 + 10.0 * weighted_power.log10()
}

/// Stateless BS.1770 meter
#[derive(Debug, Clone, Copy, Default)]
pub struct LoudnessMeter;

impl LoudnessMeter {
    pub fn new() -> Self {
        Self
    }

    /// Measure integrated loudness and true peak
    pub fn measure(&self, audio: &AudioData) -> Result<LoudnessMeasurement, NormalizationError> {
        let channels = audio.channels as usize;
        if channels == 0 || audio.sample_rate == 0 {
            return Err(NormalizationError::MeasurementFailed {
                path: audio.file_path.display().to_string(),
                reason: format!(
                    "invalid stream: {} channels at {} Hz",
                    audio.channels, audio.sample_rate
                ),
            });
        }

        let frames = audio.frames();
        if frames == 0 {
            return Ok(LoudnessMeasurement::silent());
        }

        let block_len = (BLOCK_SECONDS * audio.sample_rate as f64).round() as usize;
        let step = (STEP_SECONDS * audio.sample_rate as f64).round() as usize;
        let filters = k_weighting(audio.sample_rate);

        // Per channel: block mean squares and sample peak of the oversampled signal
        let per_channel: Vec<(Vec<f64>, f64)> = (0..channels)
            .into_par_iter()
            .map(|ch| {
                let signal: Vec<f64> = audio
                    .samples
                    .iter()
                    .skip(ch)
                    .step_by(channels)
                    .map(|&s| s as f64)
                    .collect();

                let peak = true_peak(&signal);
                let weighted = filters[1].process(&filters[0].process(&signal));
                (block_mean_squares(&weighted, block_len, step), peak)
            })
            .collect();

        let peak = per_channel.iter().map(|(_, p)| *p).fold(0.0f64, f64::max);
        let true_peak_dbtp = if peak > 0.0 {
            (20.0 * peak.log10()).max(SILENCE_FLOOR_DB)
        } else {
            SILENCE_FLOOR_DB
        };

        let block_count = per_channel.first().map(|(b, _)| b.len()).unwrap_or(0);
        let blocks: Vec<f64> = (0..block_count)
            .map(|j| {
                per_channel
                    .iter()
                    .enumerate()
                    .map(|(ch, (ms, _))| channel_weight(ch, channels) * ms[j])
                    .sum()
            })
            .collect();

        Ok(LoudnessMeasurement {
            integrated_lufs: gated_loudness(&blocks),
            true_peak_dbtp,
        })
    }
}

/// Mean square of each 400 ms block; empty when the signal is shorter than one block
fn block_mean_squares(signal: &[f64], block_len: usize, step: usize) -> Vec<f64> {
    if block_len == 0 || step == 0 || signal.len() < block_len {
        return Vec::new();
    }

    let mut prefix = Vec::with_capacity(signal.len() + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for &s in signal {
        acc += s * s;
        prefix.push(acc);
    }

    (0..=(signal.len() - block_len) / step)
        .map(|j| {
            let start = j * step;
            (prefix[start + block_len] - prefix[start]) / block_len as f64
        })
        .collect()
}

fn gated_loudness(blocks: &[f64]) -> Option<f64> {
    let above_absolute: Vec<f64> = blocks
        .iter()
        .copied()
        .filter(|&z| z > 0.0 && block_loudness(z) > ABSOLUTE_GATE_LUFS)
        .collect();
    if above_absolute.is_empty() {
        return None;
    }

    let mean = above_absolute.iter().sum::<f64>() / above_absolute.len() as f64;
    let relative_gate = block_loudness(mean) + RELATIVE_GATE_LU;

    let gated: Vec<f64> = above_absolute
        .into_iter()
        .filter(|&z| block_loudness(z) > relative_gate)
        .collect();
    if gated.is_empty() {
        return None;
    }

    let mean = gated.iter().sum::<f64>() / gated.len() as f64;
    Some(block_loudness(mean))
}

/// Hann-windowed sinc interpolation table, one row per fractional phase
fn interpolation_table() -> Vec<Vec<f64>> {
    (1..OVERSAMPLE)
        .map(|phase| {
            let frac = phase as f64 / OVERSAMPLE as f64;
            (-HALF_TAPS + 1..=HALF_TAPS)
                .map(|k| {
                    let t = frac - k as f64;
                    let sinc = if t == 0.0 { 1.0 } else { (PI * t).sin() / (PI * t) };
                    let window =
                        0.5 * (1.0 + (PI * t / (HALF_TAPS as f64 + 1.0)).cos());
                    sinc * window
                })
                .collect()
        })
        .collect()
}

/// Largest absolute value of the 4x oversampled signal
fn true_peak(signal: &[f64]) -> f64 {
    let table = interpolation_table();
    let len = signal.len() as isize;
    let mut peak = signal.iter().fold(0.0f64, |m, &s| m.max(s.abs()));

    for n in 0..len {
        for coeffs in &table {
            let mut acc = 0.0;
            for (i, c) in coeffs.iter().enumerate() {
                let idx = n + (i as isize - HALF_TAPS + 1);
                if (0..len).contains(&idx) {
                    acc += signal[idx as usize] * c;
                }
            }
            peak = peak.max(acc.abs());
        }
    }
    peak
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sine(amplitude_dbfs: f64, freq: f64, seconds: f64, channels: u16) -> AudioData {
        let rate = 48000u32;
        let amplitude = 10f64.powf(amplitude_dbfs / 20.0);
        let frames = (seconds * rate as f64) as usize;
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for n in 0..frames {
            let v = (amplitude * (2.0 * PI * freq * n as f64 / rate as f64).sin()) as f32;
            for _ in 0..channels {
                samples.push(v);
            }
        }
        AudioData::from_samples(samples, rate, channels)
    }

    #[test]
    fn test_stereo_sine_reference_level() {
        let measurement = LoudnessMeter::new().measure(&sine(-23.0, 1000.0, 5.0, 2)).unwrap();
        let lufs = measurement.integrated_lufs.unwrap();
        assert!((lufs - (-23.0)).abs() <= 0.2, "measured {}", lufs);
        assert!((measurement.true_peak_dbtp - (-23.0)).abs() < 0.5);
    }

    #[test]
    fn test_mono_sine_is_three_db_lower() {
        let measurement = LoudnessMeter::new().measure(&sine(-23.0, 1000.0, 5.0, 1)).unwrap();
        let lufs = measurement.integrated_lufs.unwrap();
        assert!((lufs - (-26.01)).abs() <= 0.2, "measured {}", lufs);
    }

    #[test]
    fn test_silence_is_gated_out() {
        let silence = AudioData::from_samples(vec![0.0; 48000 * 2 * 2], 48000, 2);
        let measurement = LoudnessMeter::new().measure(&silence).unwrap();
        assert!(measurement.is_silent());
        assert_eq!(measurement.true_peak_dbtp, SILENCE_FLOOR_DB);
    }

    #[test]
    fn test_too_short_for_a_block() {
        let measurement = LoudnessMeter::new().measure(&sine(-10.0, 1000.0, 0.2, 2)).unwrap();
        assert!(measurement.integrated_lufs.is_none());
        assert!(measurement.true_peak_dbtp > -11.0);
    }

    #[test]
    fn test_true_peak_exceeds_sample_peak_between_samples() {
        // fs/4 sine sampled at +-45 degrees: every sample sits 3 dB under the real peak
        let rate = 48000.0;
        let samples: Vec<f32> = (0..4800)
            .map(|n| (0.5 * (2.0 * PI * 12000.0 * n as f64 / rate + PI / 4.0).sin()) as f32)
            .collect();
        let audio = AudioData::from_samples(samples.clone(), 48000, 1);
        let sample_peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs())) as f64;

        let measurement = LoudnessMeter::new().measure(&audio).unwrap();
        assert!(measurement.true_peak_dbtp > 20.0 * sample_peak.log10() + 2.0);
    }

    #[test]
    fn test_invalid_stream_rejected() {
        let audio = AudioData::from_samples(Vec::new(), 0, 2);
        assert!(LoudnessMeter::new().measure(&audio).is_err());
    }
}
