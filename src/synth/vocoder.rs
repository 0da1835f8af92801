//! Stage 3: spectrogram to waveform.

use crate::error::Result;
use crate::synth::spectrogram::Spectrogram;
use rand::rngs::StdRng;

/// Neural or signal-processing vocoder.
///
/// Longer spectrograms amortize better; callers should vocode whole
/// sentences rather than fragments.
pub trait VocoderModel: Send {
    /// Convert a spectrogram into raw samples at [`VocoderModel::sample_rate`].
    ///
    /// Any entropy the vocoder needs (dithering, noise excitation) is drawn
    /// from `rng`.
    fn infer_waveform(&mut self, spectrogram: &Spectrogram, rng: &mut StdRng) -> Result<Vec<f32>>;

    fn sample_rate(&self) -> u32;
}
