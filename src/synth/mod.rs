//! Voice cloning: speaker embedding, spectrogram synthesis, vocoding.

pub mod dsp;
pub mod embedding;
mod fingerprint;
pub mod pipeline;
pub mod spectrogram;
pub mod speech;
pub mod vocoder;
pub mod waveform;

pub use embedding::{EmbeddingExtractor, ReferenceAudio, SpeakerEncoder, VoiceEmbedding};
pub use pipeline::{PipelineOptions, PipelineStats, Residency, SynthesisPipeline};
pub use spectrogram::{Spectrogram, SpectrogramModel, SpectrogramRequest};
pub use speech::{MockSpeech, SpeechSource, VoiceSession};
pub use vocoder::VocoderModel;
pub use waveform::Waveform;
