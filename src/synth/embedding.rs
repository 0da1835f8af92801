//! Stage 1: reference audio to voice embedding.

use crate::audio::preprocess::{self, PreprocessConfig};
use crate::error::{EchovoxError, Result};
use crate::synth::fingerprint::Fingerprint;
use std::path::{Path, PathBuf};

/// Fixed-length, L2-normalized speaker identity vector.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceEmbedding(Vec<f32>);

impl VoiceEmbedding {
    /// Normalize `values` to unit length.
    ///
    /// # Errors
    /// Returns `EchovoxError::Synthesis` for empty, all-zero or non-finite input.
    pub fn from_raw(values: Vec<f32>) -> Result<Self> {
        if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
            return Err(EchovoxError::Synthesis {
                message: "speaker encoder produced a non-finite embedding".to_string(),
            });
        }
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return Err(EchovoxError::Synthesis {
                message: "speaker encoder produced a zero embedding".to_string(),
            });
        }
        Ok(Self(values.into_iter().map(|v| v / norm).collect()))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cosine similarity; both sides are unit length so this is a dot product.
    pub fn similarity(&self, other: &VoiceEmbedding) -> f32 {
        self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum()
    }
}

/// Speaker encoder model: preprocessed audio in, embedding out.
pub trait SpeakerEncoder: Send {
    /// Embed a preprocessed utterance sampled at the encoder rate.
    fn embed_utterance(&self, wav: &[f32]) -> Result<VoiceEmbedding>;

    /// Dimension of produced embeddings.
    fn embedding_size(&self) -> usize;
}

/// Reference audio as supplied by a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceAudio {
    /// An audio file on disk.
    Path(PathBuf),
    /// Decoded mono samples at `sample_rate`.
    Samples { samples: Vec<f32>, sample_rate: u32 },
}

impl ReferenceAudio {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        ReferenceAudio::Path(path.into())
    }

    /// Run the shared preprocessing for either input form.
    pub fn preprocess(&self, config: &PreprocessConfig) -> Result<Vec<f32>> {
        match self {
            ReferenceAudio::Path(path) => preprocess::preprocess_path(path, config),
            ReferenceAudio::Samples {
                samples,
                sample_rate,
            } => preprocess::preprocess_wav(samples, *sample_rate, config),
        }
    }

    /// Cache identity: a path, or a fingerprint of the buffer contents.
    pub(crate) fn cache_key(&self) -> ReferenceKey {
        match self {
            ReferenceAudio::Path(path) => ReferenceKey::Path(path.clone()),
            ReferenceAudio::Samples {
                samples,
                sample_rate,
            } => {
                let mut fp = Fingerprint::new();
                fp.write_u64(u64::from(*sample_rate));
                fp.write_f32s(samples);
                ReferenceKey::Buffer(fp.finish())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReferenceKey {
    Path(PathBuf),
    Buffer(u64),
}

/// Embedding extraction: preprocessing plus the encoder model.
pub struct EmbeddingExtractor<'a> {
    encoder: &'a dyn SpeakerEncoder,
    config: PreprocessConfig,
}

impl<'a> EmbeddingExtractor<'a> {
    pub fn new(encoder: &'a dyn SpeakerEncoder, config: PreprocessConfig) -> Self {
        Self { encoder, config }
    }

    /// Embed decoded samples at any sample rate.
    pub fn extract(&self, samples: &[f32], sample_rate: u32) -> Result<VoiceEmbedding> {
        let wav = preprocess::preprocess_wav(samples, sample_rate, &self.config)?;
        self.encoder.embed_utterance(&wav)
    }

    /// Embed an audio file.
    pub fn extract_path(&self, path: &Path) -> Result<VoiceEmbedding> {
        let wav = preprocess::preprocess_path(path, &self.config)?;
        self.encoder.embed_utterance(&wav)
    }

    /// Embed either form of reference audio.
    pub fn extract_reference(&self, reference: &ReferenceAudio) -> Result<VoiceEmbedding> {
        let wav = reference.preprocess(&self.config)?;
        self.encoder.embed_utterance(&wav)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MeanEncoder;

    impl SpeakerEncoder for MeanEncoder {
        fn embed_utterance(&self, wav: &[f32]) -> Result<VoiceEmbedding> {
            let mean = wav.iter().map(|s| s.abs()).sum::<f32>() / wav.len() as f32;
            VoiceEmbedding::from_raw(vec![mean, 1.0, wav.len() as f32])
        }

        fn embedding_size(&self) -> usize {
            3
        }
    }

    fn tone(seconds: f32, rate: u32) -> Vec<f32> {
        let n = (seconds * rate as f32) as usize;
        (0..n)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 180.0 * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn from_raw_normalizes_to_unit_length() {
        let embedding = VoiceEmbedding::from_raw(vec![3.0, 4.0]).unwrap();
        assert_eq!(embedding.as_slice(), &[0.6, 0.8]);
        assert!((embedding.similarity(&embedding) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn from_raw_rejects_degenerate_vectors() {
        assert!(VoiceEmbedding::from_raw(vec![]).is_err());
        assert!(VoiceEmbedding::from_raw(vec![0.0, 0.0]).is_err());
        assert!(VoiceEmbedding::from_raw(vec![f32::NAN, 1.0]).is_err());
    }

    #[test]
    fn extractor_gives_same_embedding_for_path_and_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.wav");
        let samples = tone(2.0, 16000);
        crate::audio::wav::write_wav_f32(&path, &samples, 16000).unwrap();

        let encoder = MeanEncoder;
        let extractor = EmbeddingExtractor::new(&encoder, PreprocessConfig::default());

        let from_path = extractor.extract_path(&path).unwrap();
        let from_samples = extractor.extract(&samples, 16000).unwrap();
        assert_eq!(from_path, from_samples);

        let from_reference = extractor
            .extract_reference(&ReferenceAudio::from_path(&path))
            .unwrap();
        assert_eq!(from_reference, from_path);
    }

    #[test]
    fn extractor_propagates_invalid_audio() {
        let encoder = MeanEncoder;
        let extractor = EmbeddingExtractor::new(&encoder, PreprocessConfig::default());
        let result = extractor.extract(&[], 16000);
        assert!(matches!(result, Err(EchovoxError::InvalidAudio { .. })));
    }

    #[test]
    fn buffer_cache_key_tracks_contents() {
        let a = ReferenceAudio::Samples {
            samples: vec![0.1, 0.2],
            sample_rate: 16000,
        };
        let b = ReferenceAudio::Samples {
            samples: vec![0.1, 0.3],
            sample_rate: 16000,
        };
        assert_eq!(a.cache_key(), a.clone().cache_key());
        assert_ne!(a.cache_key(), b.cache_key());
    }
}
