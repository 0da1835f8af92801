//! Synthesized audio and its on-disk form.

use crate::audio::wav;
use crate::error::Result;
use std::path::Path;

/// Mono float samples at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Append one second of silence.
    ///
    /// Some playback paths cut the last second of a clip; the padding keeps
    /// the spoken part intact.
    pub fn pad_one_second(&mut self) {
        let pad = self.sample_rate as usize;
        self.samples.resize(self.samples.len() + pad, 0.0);
    }

    /// Write as single-channel float32 WAV.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        wav::write_wav_f32(path, &self.samples, self.sample_rate)
    }

    /// Little-endian float32 bytes of the samples.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_one_second_adds_exactly_sample_rate_zeros() {
        let mut waveform = Waveform::new(vec![0.5; 300], 16000);
        waveform.pad_one_second();
        assert_eq!(waveform.len(), 16300);
        assert!(waveform.samples[300..].iter().all(|&s| s == 0.0));
        assert_eq!(waveform.samples[299], 0.5);
    }

    #[test]
    fn duration_secs_uses_rate() {
        let waveform = Waveform::new(vec![0.0; 24000], 16000);
        assert!((waveform.duration_secs() - 1.5).abs() < 1e-6);
        assert_eq!(Waveform::new(vec![0.0; 10], 0).duration_secs(), 0.0);
    }

    #[test]
    fn write_wav_round_trips_through_decoder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let waveform = Waveform::new(vec![0.1, -0.2, 0.3], 22050);

        waveform.write_wav(&path).unwrap();
        let decoded = wav::load_audio(&path).unwrap();

        assert_eq!(decoded.sample_rate, 22050);
        assert_eq!(decoded.samples, waveform.samples);
    }

    #[test]
    fn le_bytes_are_four_per_sample() {
        let waveform = Waveform::new(vec![1.0, 2.0], 16000);
        let bytes = waveform.to_le_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
    }
}
