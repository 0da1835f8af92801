//! WAV decoding and encoding for reference and synthesized audio.

use crate::error::{EchovoxError, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Decoded audio: mono f32 samples in [-1.0, 1.0] at their source rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// File extensions the built-in decoder understands.
const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "wave"];

/// Load an audio file from disk.
///
/// Only RIFF/WAV containers are decoded here; compressed formats must be
/// converted (e.g. `ffmpeg -i in.mp3 out.wav`) before they reach the encoder.
pub fn load_audio(path: &Path) -> Result<DecodedAudio> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(EchovoxError::InvalidAudio {
            message: format!(
                "unsupported audio format '{}' for {} (convert to WAV first)",
                extension,
                path.display()
            ),
        });
    }

    let file = File::open(path).map_err(|e| EchovoxError::InvalidAudio {
        message: format!("cannot open {}: {}", path.display(), e),
    })?;
    decode_wav(BufReader::new(file))
}

/// Decode WAV data from any reader, downmixing to mono.
///
/// Integer formats of any bit depth and 32-bit float are accepted.
pub fn decode_wav<R: Read>(reader: R) -> Result<DecodedAudio> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| EchovoxError::InvalidAudio {
        message: format!("Failed to parse WAV data: {}", e),
    })?;

    let spec = wav_reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => wav_reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| EchovoxError::InvalidAudio {
                message: format!("Failed to read WAV samples: {}", e),
            })?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            wav_reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| EchovoxError::InvalidAudio {
                    message: format!("Failed to read WAV samples: {}", e),
                })?
        }
    };

    let samples = if channels > 1 {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        interleaved
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Write mono float32 PCM to a WAV file.
pub fn write_wav_f32(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(|e| EchovoxError::Other(
        format!("Failed to create WAV file {}: {}", path.display(), e),
    ))?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| EchovoxError::Other(format!("Failed to write WAV sample: {}", e)))?;
    }
    writer
        .finalize()
        .map_err(|e| EchovoxError::Other(format!("Failed to finalize WAV file: {}", e)))?;
    Ok(())
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[samples.len() - 1]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}
