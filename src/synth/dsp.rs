//! Built-in signal-processing backends for the three pipeline stages.
//!
//! Each backend is configured by a JSON bundle. They honour the same
//! contracts a neural backend would: fixed-size embeddings, per-entry batch
//! isolation and seeded entropy.

use crate::defaults;
use crate::error::{EchovoxError, Result};
use crate::synth::embedding::{SpeakerEncoder, VoiceEmbedding};
use crate::synth::spectrogram::{Spectrogram, SpectrogramModel, SpectrogramRequest};
use crate::synth::vocoder::VocoderModel;
use crate::text::symbols;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::f32::consts::PI;
use std::path::Path;

/// Speaker encoder bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderBundle {
    pub sample_rate: u32,
    pub embedding_size: usize,
    pub n_bands: usize,
    pub frame_ms: u32,
    pub hop_ms: u32,
    pub min_freq: f32,
    pub max_freq: f32,
    pub projection_seed: u64,
}

impl Default for EncoderBundle {
    fn default() -> Self {
        Self {
            sample_rate: defaults::ENCODER_SAMPLE_RATE,
            embedding_size: defaults::EMBEDDING_SIZE,
            n_bands: 40,
            frame_ms: 25,
            hop_ms: 10,
            min_freq: 80.0,
            max_freq: 7600.0,
            projection_seed: 0x00e5_c0de,
        }
    }
}

/// Spectrogram synthesizer bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerBundle {
    pub sample_rate: u32,
    pub n_mels: usize,
    pub letter_frames: usize,
    pub phoneme_frames: usize,
    pub pause_frames: usize,
    pub noise_level: f32,
    pub max_frames: usize,
}

impl Default for SynthesizerBundle {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SYNTHESIS_SAMPLE_RATE,
            n_mels: defaults::N_MELS,
            letter_frames: 5,
            phoneme_frames: 7,
            pause_frames: 8,
            noise_level: 0.02,
            max_frames: 4000,
        }
    }
}

/// Vocoder bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocoderBundle {
    pub sample_rate: u32,
    pub n_mels: usize,
    pub hop_length: usize,
    pub dither: f32,
    pub peak: f32,
}

impl Default for VocoderBundle {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SYNTHESIS_SAMPLE_RATE,
            n_mels: defaults::N_MELS,
            hop_length: defaults::HOP_LENGTH,
            dither: 1e-3,
            peak: 0.9,
        }
    }
}

/// Read and parse a JSON bundle.
pub fn read_bundle<T: DeserializeOwned>(component: &str, path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|e| EchovoxError::ModelLoad {
        component: component.to_string(),
        message: format!("cannot read {}: {}", path.display(), e),
    })?;
    serde_json::from_str(&contents).map_err(|e| EchovoxError::ModelLoad {
        component: component.to_string(),
        message: format!("invalid bundle {}: {}", path.display(), e),
    })
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// `n` center frequencies evenly spaced on the mel scale.
pub fn mel_frequencies(n: usize, min_hz: f32, max_hz: f32) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }
    let lo = hz_to_mel(min_hz);
    let hi = hz_to_mel(max_hz);
    (0..n)
        .map(|i| {
            let t = (i as f32 + 0.5) / n as f32;
            mel_to_hz(lo + (hi - lo) * t)
        })
        .collect()
}

/// Log band-energy statistics projected to a fixed dimension.
pub struct DspSpeakerEncoder {
    bundle: EncoderBundle,
    frame_len: usize,
    hop_len: usize,
    // Per band: windowed cos and sin tables, frame_len each
    band_tables: Vec<(Vec<f32>, Vec<f32>)>,
    // embedding_size rows of 2 * n_bands
    projection: Vec<f32>,
}

impl DspSpeakerEncoder {
    pub fn new(bundle: EncoderBundle) -> Result<Self> {
        if bundle.embedding_size == 0 || bundle.n_bands == 0 || bundle.sample_rate == 0 {
            return Err(EchovoxError::ModelLoad {
                component: "encoder".to_string(),
                message: "embedding_size, n_bands and sample_rate must be positive".to_string(),
            });
        }
        let frame_len = (bundle.sample_rate * bundle.frame_ms / 1000).max(1) as usize;
        let hop_len = (bundle.sample_rate * bundle.hop_ms / 1000).max(1) as usize;

        let window: Vec<f32> = (0..frame_len)
            .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / frame_len as f32).cos())
            .collect();
        let band_tables = mel_frequencies(bundle.n_bands, bundle.min_freq, bundle.max_freq)
            .into_iter()
            .map(|freq| {
                let omega = 2.0 * PI * freq / bundle.sample_rate as f32;
                let cos = (0..frame_len)
                    .map(|n| window[n] * (omega * n as f32).cos())
                    .collect();
                let sin = (0..frame_len)
                    .map(|n| window[n] * (omega * n as f32).sin())
                    .collect();
                (cos, sin)
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(bundle.projection_seed);
        let inputs = 2 * bundle.n_bands;
        let scale = 1.0 / (inputs as f32).sqrt();
        let projection = (0..bundle.embedding_size * inputs)
            .map(|_| rng.gen_range(-1.0f32..1.0) * scale)
            .collect();

        Ok(Self {
            bundle,
            frame_len,
            hop_len,
            band_tables,
            projection,
        })
    }

    fn band_log_energies<'a>(&'a self, frame: &'a [f32]) -> impl Iterator<Item = f32> + 'a {
        self.band_tables.iter().map(move |(cos, sin)| {
            let re: f32 = frame.iter().zip(cos).map(|(x, c)| x * c).sum();
            let im: f32 = frame.iter().zip(sin).map(|(x, s)| x * s).sum();
            (re * re + im * im + 1e-6).ln()
        })
    }
}

impl SpeakerEncoder for DspSpeakerEncoder {
    fn embed_utterance(&self, wav: &[f32]) -> Result<VoiceEmbedding> {
        if wav.len() < self.frame_len {
            return Err(EchovoxError::InvalidAudio {
                message: format!(
                    "need at least {} samples to embed, got {}",
                    self.frame_len,
                    wav.len()
                ),
            });
        }

        let n_bands = self.bundle.n_bands;
        let mut sum = vec![0.0f64; n_bands];
        let mut sum_sq = vec![0.0f64; n_bands];
        let mut n_frames = 0usize;

        let mut start = 0;
        while start + self.frame_len <= wav.len() {
            let frame = &wav[start..start + self.frame_len];
            for (band, energy) in self.band_log_energies(frame).enumerate() {
                sum[band] += energy as f64;
                sum_sq[band] += (energy as f64) * (energy as f64);
            }
            n_frames += 1;
            start += self.hop_len;
        }

        let n = n_frames as f64;
        let mut features = Vec::with_capacity(2 * n_bands);
        for band in 0..n_bands {
            let mean = sum[band] / n;
            let variance = (sum_sq[band] / n - mean * mean).max(0.0);
            features.push(mean as f32);
            features.push(variance.sqrt() as f32);
        }

        let raw: Vec<f32> = self
            .projection
            .chunks_exact(features.len())
            .map(|row| {
                row.iter()
                    .zip(&features)
                    .map(|(w, x)| w * x)
                    .sum::<f32>()
                    .tanh()
            })
            .collect();

        VoiceEmbedding::from_raw(raw)
    }

    fn embedding_size(&self) -> usize {
        self.bundle.embedding_size
    }
}

/// Formant-shaped frame generator conditioned on the embedding.
pub struct DspSpectrogramModel {
    bundle: SynthesizerBundle,
    band_freqs: Vec<f32>,
    letters: HashSet<u32>,
}

/// Voice traits read off an embedding.
struct VoiceShape {
    f0: f32,
    tilt: f32,
    formant_scale: f32,
}

impl VoiceShape {
    fn from_embedding(embedding: &VoiceEmbedding) -> Self {
        let slice = embedding.as_slice();
        let span = |from: usize| -> f32 {
            let sum: f32 = slice.iter().skip(from).take(16).sum();
            (sum * 2.0).tanh()
        };
        Self {
            f0: 140.0 + 60.0 * span(0),
            tilt: 0.5 * span(16),
            formant_scale: 1.0 + 0.1 * span(32),
        }
    }
}

impl DspSpectrogramModel {
    pub fn new(bundle: SynthesizerBundle) -> Result<Self> {
        if bundle.n_mels == 0 || bundle.sample_rate == 0 {
            return Err(EchovoxError::ModelLoad {
                component: "synthesizer".to_string(),
                message: "n_mels and sample_rate must be positive".to_string(),
            });
        }
        let band_freqs = mel_frequencies(bundle.n_mels, 0.0, bundle.sample_rate as f32 / 2.0);
        let letters = ('A'..='Z')
            .chain('a'..='z')
            .filter_map(|c| symbols::symbol_id(&c.to_string()))
            .collect();
        Ok(Self {
            bundle,
            band_freqs,
            letters,
        })
    }

    /// Frame count and voicing for one symbol.
    fn frames_for(&self, id: u32) -> (usize, bool) {
        if symbols::is_phoneme(id) {
            (self.bundle.phoneme_frames, true)
        } else if self.letters.contains(&id) {
            (self.bundle.letter_frames, true)
        } else {
            (self.bundle.pause_frames, false)
        }
    }

    fn generate_one(&self, request: &SpectrogramRequest<'_>) -> Result<Spectrogram> {
        let mut rng = StdRng::seed_from_u64(request.seed);
        let voice = VoiceShape::from_embedding(request.embedding);
        let n_mels = self.bundle.n_mels;
        let mut data = Vec::new();

        for &id in request.sequence {
            if id == symbols::eos_id() {
                break;
            }
            let (n_frames, voiced) = self.frames_for(id);
            let f1 = (300.0 + ((id * 37) % 600) as f32) * voice.formant_scale;
            let f2 = (900.0 + ((id * 91) % 1600) as f32) * voice.formant_scale;

            for k in 0..n_frames {
                if data.len() / n_mels >= self.bundle.max_frames {
                    break;
                }
                let envelope = if voiced {
                    (PI * (k as f32 + 0.5) / n_frames as f32).sin()
                } else {
                    0.0
                };
                for &fc in &self.band_freqs {
                    let formants = (-((fc - f1) / 150.0).powi(2)).exp()
                        + 0.6 * (-((fc - f2) / 250.0).powi(2)).exp();
                    let source = (1.0 + voice.tilt) * (-fc / 3000.0).exp();
                    let harmonics = 0.5 + 0.5 * (2.0 * PI * fc / voice.f0).cos();
                    let noise = self.bundle.noise_level * rng.gen_range(0.0f32..1.0);
                    data.push(envelope * (formants + 0.3 * source) * harmonics + noise);
                }
            }
        }

        Spectrogram::new(n_mels, data)
    }
}

impl SpectrogramModel for DspSpectrogramModel {
    fn generate(&mut self, batch: &[SpectrogramRequest<'_>]) -> Result<Vec<Spectrogram>> {
        batch.iter().map(|req| self.generate_one(req)).collect()
    }

    fn sample_rate(&self) -> u32 {
        self.bundle.sample_rate
    }
}

/// Additive sinusoidal vocoder over mel band centers.
pub struct DspVocoder {
    bundle: VocoderBundle,
    band_freqs: Vec<f32>,
}

impl DspVocoder {
    pub fn new(bundle: VocoderBundle) -> Result<Self> {
        if bundle.n_mels == 0 || bundle.sample_rate == 0 || bundle.hop_length == 0 {
            return Err(EchovoxError::ModelLoad {
                component: "vocoder".to_string(),
                message: "n_mels, sample_rate and hop_length must be positive".to_string(),
            });
        }
        let band_freqs = mel_frequencies(bundle.n_mels, 0.0, bundle.sample_rate as f32 / 2.0);
        Ok(Self { bundle, band_freqs })
    }
}

impl VocoderModel for DspVocoder {
    fn infer_waveform(&mut self, spectrogram: &Spectrogram, rng: &mut StdRng) -> Result<Vec<f32>> {
        if spectrogram.n_mels() != self.bundle.n_mels {
            return Err(EchovoxError::Synthesis {
                message: format!(
                    "vocoder expects {} bands, spectrogram has {}",
                    self.bundle.n_mels,
                    spectrogram.n_mels()
                ),
            });
        }

        let hop = self.bundle.hop_length;
        let rate = self.bundle.sample_rate as f32;
        let increments: Vec<f32> = self.band_freqs.iter().map(|f| 2.0 * PI * f / rate).collect();
        let mut phases: Vec<f32> = (0..self.band_freqs.len())
            .map(|_| rng.gen_range(0.0f32..2.0 * PI))
            .collect();

        let frames: Vec<&[f32]> = spectrogram.frames().collect();
        let mut output = Vec::with_capacity(frames.len() * hop);

        for (i, &frame) in frames.iter().enumerate() {
            let next = frames.get(i + 1).copied().unwrap_or(frame);
            for k in 0..hop {
                let t = k as f32 / hop as f32;
                let mut sample = 0.0f32;
                for band in 0..frame.len() {
                    let amplitude = frame[band] + (next[band] - frame[band]) * t;
                    sample += amplitude * phases[band].sin();
                    phases[band] = (phases[band] + increments[band]) % (2.0 * PI);
                }
                sample += self.bundle.dither * rng.gen_range(-1.0f32..1.0);
                output.push(sample);
            }
        }

        let max = output.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        if max > f32::EPSILON {
            let gain = self.bundle.peak / max;
            output.iter_mut().for_each(|s| *s *= gain);
        }
        Ok(output)
    }

    fn sample_rate(&self) -> u32 {
        self.bundle.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::Utterance;

    fn voice() -> VoiceEmbedding {
        VoiceEmbedding::from_raw((0..256).map(|i| (i as f32 * 0.37).sin()).collect()).unwrap()
    }

    fn request<'a>(
        sequence: &'a [u32],
        embedding: &'a VoiceEmbedding,
        seed: u64,
    ) -> SpectrogramRequest<'a> {
        SpectrogramRequest {
            sequence,
            embedding,
            seed,
        }
    }

    #[test]
    fn mel_frequencies_are_increasing_and_bounded() {
        let freqs = mel_frequencies(40, 80.0, 7600.0);
        assert_eq!(freqs.len(), 40);
        assert!(freqs.windows(2).all(|w| w[0] < w[1]));
        assert!(freqs[0] > 80.0 && freqs[39] < 7600.0);
    }

    #[test]
    fn encoder_produces_unit_embedding_of_configured_size() {
        let encoder = DspSpeakerEncoder::new(EncoderBundle::default()).unwrap();
        let wav: Vec<f32> = (0..16000)
            .map(|i| 0.3 * (2.0 * PI * 150.0 * i as f32 / 16000.0).sin())
            .collect();

        let embedding = encoder.embed_utterance(&wav).unwrap();

        assert_eq!(embedding.len(), 256);
        assert!((embedding.similarity(&embedding) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn encoder_distinguishes_different_voices() {
        let encoder = DspSpeakerEncoder::new(EncoderBundle::default()).unwrap();
        let low: Vec<f32> = (0..16000)
            .map(|i| 0.3 * (2.0 * PI * 110.0 * i as f32 / 16000.0).sin())
            .collect();
        let high: Vec<f32> = (0..16000)
            .map(|i| 0.3 * (2.0 * PI * 2400.0 * i as f32 / 16000.0).sin())
            .collect();

        let a = encoder.embed_utterance(&low).unwrap();
        let b = encoder.embed_utterance(&high).unwrap();

        assert!(a.similarity(&b) < 0.9999);
    }

    #[test]
    fn encoder_rejects_audio_shorter_than_a_frame() {
        let encoder = DspSpeakerEncoder::new(EncoderBundle::default()).unwrap();
        assert!(matches!(
            encoder.embed_utterance(&[0.1; 10]),
            Err(EchovoxError::InvalidAudio { .. })
        ));
    }

    #[test]
    fn spectrogram_length_follows_symbol_durations() {
        let mut model = DspSpectrogramModel::new(SynthesizerBundle::default()).unwrap();
        let e = voice();
        // "ab c" -> 3 letters (5 frames) + 1 space (8 frames), EOS adds nothing
        let seq = Utterance::new("ab c").unwrap().to_sequence();

        let out = model.generate(&[request(&seq, &e, 1)]).unwrap();

        assert_eq!(out[0].n_frames(), 3 * 5 + 8);
        assert_eq!(out[0].n_mels(), 80);
    }

    #[test]
    fn spectrogram_depends_only_on_entry_seed() {
        let mut model = DspSpectrogramModel::new(SynthesizerBundle::default()).unwrap();
        let e = voice();
        let a = Utterance::new("hello").unwrap().to_sequence();
        let b = Utterance::new("world wide").unwrap().to_sequence();

        let together = model
            .generate(&[request(&a, &e, 11), request(&b, &e, 22)])
            .unwrap();
        let alone = model.generate(&[request(&b, &e, 22)]).unwrap();

        assert_eq!(together[1], alone[0]);
        assert_ne!(together[0].n_frames(), together[1].n_frames());
    }

    #[test]
    fn spectrogram_respects_max_frames() {
        let bundle = SynthesizerBundle {
            max_frames: 12,
            ..SynthesizerBundle::default()
        };
        let mut model = DspSpectrogramModel::new(bundle).unwrap();
        let e = voice();
        let seq = Utterance::new("a long sentence").unwrap().to_sequence();

        let out = model.generate(&[request(&seq, &e, 3)]).unwrap();

        assert_eq!(out[0].n_frames(), 12);
    }

    #[test]
    fn vocoder_emits_hop_samples_per_frame_within_peak() {
        let mut vocoder = DspVocoder::new(VocoderBundle::default()).unwrap();
        let spec = Spectrogram::new(80, vec![0.5; 80 * 10]).unwrap();
        let mut rng = StdRng::seed_from_u64(5);

        let samples = vocoder.infer_waveform(&spec, &mut rng).unwrap();

        assert_eq!(samples.len(), 10 * 200);
        assert!(samples.iter().all(|s| s.abs() <= 0.9 + 1e-5));
    }

    #[test]
    fn vocoder_is_deterministic_for_a_seed() {
        let mut vocoder = DspVocoder::new(VocoderBundle::default()).unwrap();
        let spec = Spectrogram::new(80, vec![0.25; 80 * 4]).unwrap();

        let a = vocoder
            .infer_waveform(&spec, &mut StdRng::seed_from_u64(7))
            .unwrap();
        let b = vocoder
            .infer_waveform(&spec, &mut StdRng::seed_from_u64(7))
            .unwrap();
        let c = vocoder
            .infer_waveform(&spec, &mut StdRng::seed_from_u64(8))
            .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn vocoder_rejects_band_mismatch() {
        let mut vocoder = DspVocoder::new(VocoderBundle::default()).unwrap();
        let spec = Spectrogram::new(40, vec![0.0; 40]).unwrap();
        let result = vocoder.infer_waveform(&spec, &mut StdRng::seed_from_u64(1));
        assert!(matches!(result, Err(EchovoxError::Synthesis { .. })));
    }

    #[test]
    fn bundles_parse_with_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocoder.json");
        std::fs::write(&path, r#"{ "hop_length": 256 }"#).unwrap();

        let bundle: VocoderBundle = read_bundle("vocoder", &path).unwrap();

        assert_eq!(bundle.hop_length, 256);
        assert_eq!(bundle.n_mels, 80);
    }

    #[test]
    fn malformed_bundle_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encoder.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result: Result<EncoderBundle> = read_bundle("encoder", &path);

        assert!(matches!(result, Err(EchovoxError::ModelLoad { .. })));
    }
}
