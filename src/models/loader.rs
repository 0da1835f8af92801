//! Model loading seam.
//!
//! The pipeline only knows how to ask for a stage's model; which backend
//! answers is decided here.

use crate::error::Result;
use crate::synth::dsp::{
    self, DspSpeakerEncoder, DspSpectrogramModel, DspVocoder, EncoderBundle, SynthesizerBundle,
    VocoderBundle,
};
use crate::synth::embedding::SpeakerEncoder;
use crate::synth::spectrogram::SpectrogramModel;
use crate::synth::vocoder::VocoderModel;
use std::path::Path;

/// Loads stage models from bundle paths.
pub trait ModelLoader: Send {
    fn load_encoder(&self, path: &Path) -> Result<Box<dyn SpeakerEncoder>>;
    fn load_synthesizer(&self, path: &Path) -> Result<Box<dyn SpectrogramModel>>;
    fn load_vocoder(&self, path: &Path) -> Result<Box<dyn VocoderModel>>;
}

/// Loader for the built-in signal-processing backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct DspModelLoader;

impl ModelLoader for DspModelLoader {
    fn load_encoder(&self, path: &Path) -> Result<Box<dyn SpeakerEncoder>> {
        let bundle: EncoderBundle = dsp::read_bundle("encoder", path)?;
        Ok(Box::new(DspSpeakerEncoder::new(bundle)?))
    }

    fn load_synthesizer(&self, path: &Path) -> Result<Box<dyn SpectrogramModel>> {
        let bundle: SynthesizerBundle = dsp::read_bundle("synthesizer", path)?;
        Ok(Box::new(DspSpectrogramModel::new(bundle)?))
    }

    fn load_vocoder(&self, path: &Path) -> Result<Box<dyn VocoderModel>> {
        let bundle: VocoderBundle = dsp::read_bundle("vocoder", path)?;
        Ok(Box::new(DspVocoder::new(bundle)?))
    }
}
