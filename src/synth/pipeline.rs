//! Three-stage synthesis: reference audio + text to a padded waveform.
//!
//! The pipeline owns every model object and decides when they are loaded:
//!
//! - [`Residency::Persistent`] keeps all models resident between calls.
//! - [`Residency::LowMemory`] drops the synthesizer and vocoder after each
//!   call and loads them again on the next one.
//! - `deterministic_reload` reloads all models and reseeds the generator at
//!   the start of every call, so a fixed seed gives byte-identical output.
//!
//! A pipeline takes `&mut self` for synthesis. Callers that share one across
//! tasks wrap it in a mutex (see [`crate::synth::speech`]).

use crate::audio::preprocess::PreprocessConfig;
use crate::defaults;
use crate::error::{EchovoxError, Result};
use crate::models::{self, ModelComponent, ModelLoader, ModelPaths};
use crate::synth::embedding::{
    EmbeddingExtractor, ReferenceAudio, ReferenceKey, SpeakerEncoder, VoiceEmbedding,
};
use crate::synth::spectrogram::{self, Spectrogram, SpectrogramModel};
use crate::synth::vocoder::VocoderModel;
use crate::synth::waveform::Waveform;
use crate::text::Utterance;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::time::Instant;

/// Model residency between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Persistent,
    LowMemory,
}

/// Construction-time policy for a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub residency: Residency,
    pub deterministic_reload: bool,
    pub seed: Option<u64>,
    pub preprocess: PreprocessConfig,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_flags(false, false, None)
    }
}

impl PipelineOptions {
    /// Derive the policy from operator flags.
    ///
    /// - `reload_models` without a seed uses seed 0.
    /// - A seed without `low_mem` turns on deterministic reload.
    pub fn from_flags(low_mem: bool, reload_models: bool, seed: Option<u64>) -> Self {
        let seed = seed.or(reload_models.then_some(defaults::DEFAULT_RELOAD_SEED));
        let deterministic_reload = reload_models || (seed.is_some() && !low_mem);
        Self {
            residency: if low_mem {
                Residency::LowMemory
            } else {
                Residency::Persistent
            },
            deterministic_reload,
            seed,
            preprocess: PreprocessConfig::default(),
        }
    }
}

/// Load and call counters, mostly for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub calls: u64,
    pub encoder_loads: u64,
    pub synthesizer_loads: u64,
    pub vocoder_loads: u64,
    pub embeddings_computed: u64,
}

pub struct SynthesisPipeline {
    paths: ModelPaths,
    loader: Box<dyn ModelLoader>,
    options: PipelineOptions,
    encoder: Option<Box<dyn SpeakerEncoder>>,
    synthesizer: Option<Box<dyn SpectrogramModel>>,
    vocoder: Option<Box<dyn VocoderModel>>,
    cached_embedding: Option<(ReferenceKey, VoiceEmbedding)>,
    rng: StdRng,
    stats: PipelineStats,
}

impl std::fmt::Debug for SynthesisPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisPipeline")
            .field("paths", &self.paths)
            .field("options", &self.options)
            .field("encoder_loaded", &self.encoder.is_some())
            .field("synthesizer_loaded", &self.synthesizer.is_some())
            .field("vocoder_loaded", &self.vocoder.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

impl SynthesisPipeline {
    /// Verify bundles and load the models the policy keeps resident.
    ///
    /// # Errors
    /// Returns `EchovoxError::MissingModel` if any bundle is absent, or a
    /// load error from the backend.
    pub fn new(
        paths: ModelPaths,
        loader: Box<dyn ModelLoader>,
        options: PipelineOptions,
    ) -> Result<Self> {
        models::check_model_paths(&paths)?;

        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut pipeline = Self {
            paths,
            loader,
            options,
            encoder: None,
            synthesizer: None,
            vocoder: None,
            cached_embedding: None,
            rng,
            stats: PipelineStats::default(),
        };

        pipeline.load_encoder()?;
        if pipeline.options.residency == Residency::Persistent {
            pipeline.load_synthesizer()?;
            pipeline.load_vocoder()?;
        }

        tracing::info!(
            residency = ?pipeline.options.residency,
            deterministic_reload = pipeline.options.deterministic_reload,
            seed = ?pipeline.options.seed,
            "Synthesis pipeline ready"
        );
        Ok(pipeline)
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Whether the given stage currently holds model state.
    pub fn is_loaded(&self, component: ModelComponent) -> bool {
        match component {
            ModelComponent::Encoder => self.encoder.is_some(),
            ModelComponent::Synthesizer => self.synthesizer.is_some(),
            ModelComponent::Vocoder => self.vocoder.is_some(),
        }
    }

    /// Output sample rate, from the synthesizer bundle.
    pub fn sample_rate(&mut self) -> Result<u32> {
        Ok(self.synthesizer()?.sample_rate())
    }

    fn load_encoder(&mut self) -> Result<()> {
        self.paths.verify_component(ModelComponent::Encoder)?;
        self.encoder = Some(self.loader.load_encoder(&self.paths.encoder)?);
        self.stats.encoder_loads += 1;
        tracing::debug!(path = %self.paths.encoder.display(), "Loaded encoder");
        Ok(())
    }

    fn load_synthesizer(&mut self) -> Result<()> {
        self.paths.verify_component(ModelComponent::Synthesizer)?;
        self.synthesizer = Some(self.loader.load_synthesizer(&self.paths.synthesizer)?);
        self.stats.synthesizer_loads += 1;
        tracing::debug!(path = %self.paths.synthesizer.display(), "Loaded synthesizer");
        Ok(())
    }

    fn load_vocoder(&mut self) -> Result<()> {
        self.paths.verify_component(ModelComponent::Vocoder)?;
        self.vocoder = Some(self.loader.load_vocoder(&self.paths.vocoder)?);
        self.stats.vocoder_loads += 1;
        tracing::debug!(path = %self.paths.vocoder.display(), "Loaded vocoder");
        Ok(())
    }

    fn synthesizer(&mut self) -> Result<&mut Box<dyn SpectrogramModel>> {
        if self.synthesizer.is_none() {
            self.load_synthesizer()?;
        }
        self.synthesizer
            .as_mut()
            .ok_or_else(|| EchovoxError::ModelNotLoaded {
                component: ModelComponent::Synthesizer.name().to_string(),
            })
    }

    fn vocoder(&mut self) -> Result<&mut Box<dyn VocoderModel>> {
        if self.vocoder.is_none() {
            self.load_vocoder()?;
        }
        self.vocoder.as_mut().ok_or_else(|| EchovoxError::ModelNotLoaded {
            component: ModelComponent::Vocoder.name().to_string(),
        })
    }

    /// Drop everything and reseed, as if freshly constructed.
    fn reload_all(&mut self) -> Result<()> {
        self.encoder = None;
        self.synthesizer = None;
        self.vocoder = None;
        self.cached_embedding = None;
        if let Some(seed) = self.options.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.load_encoder()?;
        self.load_synthesizer()?;
        self.load_vocoder()?;
        Ok(())
    }

    /// Embedding for a reference, computed once per reference.
    pub fn embed(&mut self, reference: &ReferenceAudio) -> Result<VoiceEmbedding> {
        let key = reference.cache_key();
        if let Some((cached_key, embedding)) = &self.cached_embedding
            && *cached_key == key
        {
            return Ok(embedding.clone());
        }

        if self.encoder.is_none() {
            self.load_encoder()?;
        }
        let encoder = self
            .encoder
            .as_deref()
            .ok_or_else(|| EchovoxError::ModelNotLoaded {
                component: ModelComponent::Encoder.name().to_string(),
            })?;
        let embedding =
            EmbeddingExtractor::new(encoder, self.options.preprocess).extract_reference(reference)?;

        self.stats.embeddings_computed += 1;
        tracing::debug!(dims = embedding.len(), "Created the embedding");
        self.cached_embedding = Some((key, embedding.clone()));
        Ok(embedding)
    }

    /// Batch spectrogram synthesis; `texts` and `embeddings` pair positionally.
    pub fn synthesize_spectrograms(
        &mut self,
        texts: &[Utterance],
        embeddings: &[VoiceEmbedding],
    ) -> Result<Vec<Spectrogram>> {
        // Split borrows: the model and the generator are separate fields.
        if self.synthesizer.is_none() {
            self.load_synthesizer()?;
        }
        let model = self
            .synthesizer
            .as_deref_mut()
            .ok_or_else(|| EchovoxError::ModelNotLoaded {
                component: ModelComponent::Synthesizer.name().to_string(),
            })?;
        spectrogram::synthesize_spectrograms(model, texts, embeddings, &mut self.rng)
    }

    /// Vocode a spectrogram into raw samples, without padding.
    pub fn infer_waveform(&mut self, spectrogram: &Spectrogram) -> Result<Vec<f32>> {
        let vocoder_seed = self.rng.next_u64();
        let mut vocoder_rng = StdRng::seed_from_u64(vocoder_seed);
        self.vocoder()?.infer_waveform(spectrogram, &mut vocoder_rng)
    }

    /// Speak `text` in the voice of `reference`.
    ///
    /// The returned waveform carries one second of trailing silence.
    pub fn synthesize(&mut self, reference: &ReferenceAudio, text: &str) -> Result<Waveform> {
        let started = Instant::now();
        let utterance = Utterance::new(text)?;

        if self.options.deterministic_reload {
            self.reload_all()?;
        }

        let result = self.run_stages(reference, &utterance);

        if self.options.residency == Residency::LowMemory {
            self.synthesizer = None;
            self.vocoder = None;
            tracing::debug!("Released synthesizer and vocoder");
        }
        self.stats.calls += 1;

        let waveform = result?;
        tracing::info!(
            text = %utterance,
            samples = waveform.len(),
            seconds = waveform.duration_secs(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Synthesized waveform"
        );
        Ok(waveform)
    }

    fn run_stages(&mut self, reference: &ReferenceAudio, utterance: &Utterance) -> Result<Waveform> {
        let embedding = self.embed(reference)?;
        let spectrograms =
            self.synthesize_spectrograms(std::slice::from_ref(utterance), &[embedding])?;
        let spectrogram = spectrograms
            .into_iter()
            .next()
            .ok_or_else(|| EchovoxError::Synthesis {
                message: "synthesizer returned no spectrogram".to_string(),
            })?;

        let sample_rate = self.sample_rate()?;
        let samples = self.infer_waveform(&spectrogram)?;
        if samples.is_empty() {
            return Err(EchovoxError::Synthesis {
                message: format!("vocoder produced no audio for \"{}\"", utterance),
            });
        }

        let mut waveform = Waveform::new(samples, sample_rate);
        waveform.pad_one_second();
        Ok(waveform)
    }
}
