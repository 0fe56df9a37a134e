//! Post-processing applied to generated waveforms.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

const PEAK_LIMIT: f32 = 0.99;

/// Factors this close to 1.0 are treated as identity.
const UNITY_EPSILON: f32 = 1e-3;

/// Scale to `target_db` RMS, then limit peaks to 0.99. Silence passes through.
pub fn normalize(samples: &[f32], target_db: f32) -> Vec<f32> {
    let rms = rms(samples);
    if rms < 1e-8 {
        return samples.to_vec();
    }

    let target = 10f32.powf(target_db / 20.0);
    let gain = target / rms;
    let mut out: Vec<f32> = samples.iter().map(|s| s * gain).collect();

    let peak = peak(&out);
    if peak > PEAK_LIMIT {
        let limit = PEAK_LIMIT / peak;
        for sample in &mut out {
            *sample *= limit;
        }
    }

    debug!("Normalized audio to {:.1} dB (gain {:.3})", target_db, gain);
    out
}

pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if samples.is_empty() || from_rate == 0 || to_rate == 0 || from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    if samples.len() < 32 {
        return Ok(resample_linear(samples, from_rate, to_rate));
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)
        .map_err(|e| Error::Audio(format!("Resampler init failed: {e}")))?;
    let input = vec![samples.to_vec()];
    match resampler.process(&input, None) {
        Ok(mut out) => Ok(out.pop().unwrap_or_default()),
        Err(_) => Ok(resample_linear(samples, from_rate, to_rate)),
    }
}

fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round().max(1.0) as usize;
    let last = samples.len().saturating_sub(1);

    (0..out_len)
        .map(|i| {
            let src_pos = i as f64 / ratio;
            let left = (src_pos.floor() as usize).min(last);
            let right = (left + 1).min(last);
            let frac = (src_pos - left as f64).clamp(0.0, 1.0) as f32;
            samples[left] * (1.0 - frac) + samples[right] * frac
        })
        .collect()
}

/// Change tempo without changing pitch. `factor > 1` makes speech faster
/// (shorter); the output has `round(len / factor)` samples.
pub fn time_stretch(samples: &[f32], sample_rate: u32, factor: f32) -> Vec<f32> {
    if samples.is_empty() || !factor.is_finite() || factor <= 0.0 {
        return samples.to_vec();
    }
    if (factor - 1.0).abs() < UNITY_EPSILON {
        return samples.to_vec();
    }

    let out_len = ((samples.len() as f32) / factor).round().max(1.0) as usize;
    // 40 ms frames with 50% synthesis overlap.
    let frame_len = ((sample_rate as f32 * 0.04) as usize).max(64);
    if samples.len() < frame_len {
        return fit_length(
            resample_linear(samples, samples.len() as u32, out_len as u32),
            out_len,
        );
    }

    let synthesis_hop = frame_len / 2;
    let analysis_hop = synthesis_hop as f32 * factor;
    let window = hann_window(frame_len);

    let mut output = vec![0f32; out_len + frame_len];
    let mut weights = vec![0f32; out_len + frame_len];

    let mut frame = 0usize;
    loop {
        let out_pos = frame * synthesis_hop;
        if out_pos >= out_len {
            break;
        }
        let in_pos = (frame as f32 * analysis_hop).round() as usize;
        for (i, w) in window.iter().enumerate() {
            let x = samples.get(in_pos + i).copied().unwrap_or(0.0);
            output[out_pos + i] += x * w;
            weights[out_pos + i] += w;
        }
        frame += 1;
    }

    for (sample, weight) in output.iter_mut().zip(&weights) {
        if *weight > 1e-6 {
            *sample /= weight;
        }
    }

    output.truncate(out_len);
    output
}

/// Shift pitch by `factor` (2.0 = one octave up) keeping the duration.
pub fn pitch_shift(samples: &[f32], sample_rate: u32, factor: f32) -> Result<Vec<f32>> {
    if samples.is_empty() || !factor.is_finite() || factor <= 0.0 {
        return Ok(samples.to_vec());
    }
    if (factor - 1.0).abs() < UNITY_EPSILON {
        return Ok(samples.to_vec());
    }

    // Lengthen by `factor`, then play back `factor` times faster.
    let stretched = time_stretch(samples, sample_rate, 1.0 / factor);
    let source_rate = ((sample_rate as f32) * factor).round().max(1.0) as u32;
    let resampled = resample(&stretched, source_rate, sample_rate)?;
    Ok(fit_length(resampled, samples.len()))
}

fn fit_length(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    samples.resize(len, 0.0);
    samples
}

fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let x = (2.0 * std::f32::consts::PI * i as f32) / len as f32;
            0.5 - 0.5 * x.cos()
        })
        .collect()
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |p, &s| p.max(s.abs()))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AudioMetadata {
    pub duration_secs: f32,
    pub sample_rate: u32,
    pub num_samples: usize,
    pub rms_level: f32,
    pub peak_level: f32,
}

impl AudioMetadata {
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            duration_secs: duration_secs(samples.len(), sample_rate),
            sample_rate,
            num_samples: samples.len(),
            rms_level: rms(samples),
            peak_level: peak(samples),
        }
    }
}

pub fn duration_secs(num_samples: usize, sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        return 0.0;
    }
    num_samples as f32 / sample_rate as f32
}
