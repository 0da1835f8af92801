//! Reference audio preprocessing for the speaker encoder.
//!
//! Resamples to the encoder rate, raises quiet recordings to a loudness
//! target and removes long silences. File input and in-memory input share
//! [`preprocess_wav`], so both paths produce identical samples.

use crate::audio::wav::{self, DecodedAudio};
use crate::defaults;
use crate::error::{EchovoxError, Result};
use std::path::Path;

/// Tunables for reference preprocessing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessConfig {
    pub target_sample_rate: u32,
    pub target_dbfs: f32,
    pub window_ms: u32,
    pub voice_threshold: f32,
    pub moving_average_width: usize,
    pub max_silence_windows: usize,
    pub min_duration_ms: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: defaults::ENCODER_SAMPLE_RATE,
            target_dbfs: defaults::TARGET_DBFS,
            window_ms: defaults::VAD_WINDOW_MS,
            voice_threshold: defaults::VAD_THRESHOLD,
            moving_average_width: defaults::VAD_MOVING_AVERAGE_WIDTH,
            max_silence_windows: defaults::VAD_MAX_SILENCE_WINDOWS,
            min_duration_ms: defaults::MIN_REFERENCE_MS,
        }
    }
}

/// Load and preprocess a reference file.
pub fn preprocess_path(path: &Path, config: &PreprocessConfig) -> Result<Vec<f32>> {
    let DecodedAudio {
        samples,
        sample_rate,
    } = wav::load_audio(path)?;
    preprocess_wav(&samples, sample_rate, config)
}

/// Preprocess already-decoded mono samples.
///
/// # Errors
/// Returns `EchovoxError::InvalidAudio` if the input is empty, has a zero
/// sample rate, or is shorter than `min_duration_ms` once silence is removed.
pub fn preprocess_wav(samples: &[f32], sample_rate: u32, config: &PreprocessConfig) -> Result<Vec<f32>> {
    if samples.is_empty() {
        return Err(EchovoxError::InvalidAudio {
            message: "reference audio is empty".to_string(),
        });
    }
    if sample_rate == 0 {
        return Err(EchovoxError::InvalidAudio {
            message: "reference audio has a sample rate of 0".to_string(),
        });
    }

    let resampled = wav::resample(samples, sample_rate, config.target_sample_rate);
    let normalized = normalize_volume(&resampled, config.target_dbfs);
    let trimmed = trim_long_silences(&normalized, config);

    let min_samples =
        (config.target_sample_rate as u64 * config.min_duration_ms as u64 / 1000) as usize;
    if trimmed.len() < min_samples {
        return Err(EchovoxError::InvalidAudio {
            message: format!(
                "reference audio has {}ms of speech, need at least {}ms",
                trimmed.len() as u64 * 1000 / config.target_sample_rate as u64,
                config.min_duration_ms
            ),
        });
    }

    Ok(trimmed)
}

/// Root mean square of a block of samples.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Raise the signal towards `target_dbfs`. Never attenuates.
fn normalize_volume(samples: &[f32], target_dbfs: f32) -> Vec<f32> {
    let rms = calculate_rms(samples);
    if rms <= f32::EPSILON {
        return samples.to_vec();
    }

    let dbfs = 20.0 * rms.log10();
    let change_db = target_dbfs - dbfs;
    if change_db <= 0.0 {
        return samples.to_vec();
    }

    let gain = 10f32.powf(change_db / 20.0);
    samples.iter().map(|&s| (s * gain).clamp(-1.0, 1.0)).collect()
}

/// Drop windows that sit inside long unvoiced stretches.
///
/// Voiced flags are smoothed with a moving average, then dilated by
/// `max_silence_windows` so short pauses between words survive.
fn trim_long_silences(samples: &[f32], config: &PreprocessConfig) -> Vec<f32> {
    let window = (config.target_sample_rate as usize * config.window_ms as usize / 1000).max(1);
    let n_windows = samples.len() / window;
    if n_windows == 0 {
        return samples.to_vec();
    }

    let voiced: Vec<f32> = samples
        .chunks_exact(window)
        .map(|chunk| {
            if calculate_rms(chunk) > config.voice_threshold {
                1.0
            } else {
                0.0
            }
        })
        .collect();

    let smoothed = moving_average(&voiced, config.moving_average_width);
    let flags: Vec<bool> = smoothed.iter().map(|&v| v > 0.5).collect();
    let dilated = dilate(&flags, config.max_silence_windows);

    samples
        .chunks_exact(window)
        .zip(dilated)
        .filter(|(_, keep)| *keep)
        .flat_map(|(chunk, _)| chunk.iter().copied())
        .collect()
}

/// Centered moving average, zero padded at both ends.
fn moving_average(values: &[f32], width: usize) -> Vec<f32> {
    if width <= 1 {
        return values.to_vec();
    }
    let half = width / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + width - half).min(values.len());
            values[start..end].iter().sum::<f32>() / width as f32
        })
        .collect()
}

fn dilate(flags: &[bool], radius: usize) -> Vec<bool> {
    (0..flags.len())
        .map(|i| {
            let start = i.saturating_sub(radius);
            let end = (i + radius + 1).min(flags.len());
            flags[start..end].iter().any(|&f| f)
        })
        .collect()
}
