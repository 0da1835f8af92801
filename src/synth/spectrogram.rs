//! Stage 2: text and voice embedding to spectrogram.

use crate::error::{EchovoxError, Result};
use crate::synth::embedding::VoiceEmbedding;
use crate::synth::fingerprint::Fingerprint;
use crate::text::Utterance;
use rand::RngCore;
use rand::rngs::StdRng;

/// Time-ordered frames of frequency-band energies, stored frame-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    n_mels: usize,
    data: Vec<f32>,
}

impl Spectrogram {
    /// Wrap frame-major data.
    ///
    /// # Errors
    /// Returns `EchovoxError::Synthesis` if `data` is not a whole number of frames.
    pub fn new(n_mels: usize, data: Vec<f32>) -> Result<Self> {
        if n_mels == 0 || data.len() % n_mels != 0 {
            return Err(EchovoxError::Synthesis {
                message: format!(
                    "spectrogram data of length {} does not divide into {} bands",
                    data.len(),
                    n_mels
                ),
            });
        }
        Ok(Self { n_mels, data })
    }

    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    pub fn n_frames(&self) -> usize {
        self.data.len() / self.n_mels
    }

    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        self.data.chunks_exact(self.n_mels).nth(index)
    }

    pub fn frames(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.n_mels)
    }
}

/// One entry of a synthesis batch.
///
/// `seed` is private to the entry: models seed their per-entry generator from
/// it and nothing else, so entries never observe each other.
#[derive(Debug, Clone, Copy)]
pub struct SpectrogramRequest<'a> {
    pub sequence: &'a [u32],
    pub embedding: &'a VoiceEmbedding,
    pub seed: u64,
}

/// Sequence-to-sequence spectrogram generator conditioned on a voice.
pub trait SpectrogramModel: Send {
    /// Generate one spectrogram per request, in request order.
    fn generate(&mut self, batch: &[SpectrogramRequest<'_>]) -> Result<Vec<Spectrogram>>;

    /// Sample rate the produced spectrograms are meant to be vocoded at.
    fn sample_rate(&self) -> u32;
}

/// Batch entry point: map texts to symbols and run the model.
///
/// `texts` and `embeddings` pair up positionally. Entry seeds come from one
/// draw of `rng` mixed with each entry's own content, so reordering the batch
/// reorders the output and nothing else.
pub fn synthesize_spectrograms(
    model: &mut dyn SpectrogramModel,
    texts: &[Utterance],
    embeddings: &[VoiceEmbedding],
    rng: &mut StdRng,
) -> Result<Vec<Spectrogram>> {
    if texts.len() != embeddings.len() {
        return Err(EchovoxError::Synthesis {
            message: format!(
                "batch mismatch: {} texts but {} embeddings",
                texts.len(),
                embeddings.len()
            ),
        });
    }
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let batch_seed = rng.next_u64();
    let sequences: Vec<Vec<u32>> = texts.iter().map(Utterance::to_sequence).collect();
    let requests: Vec<SpectrogramRequest<'_>> = sequences
        .iter()
        .zip(embeddings)
        .map(|(sequence, embedding)| SpectrogramRequest {
            sequence,
            embedding,
            seed: entry_seed(batch_seed, sequence, embedding),
        })
        .collect();

    let spectrograms = model.generate(&requests)?;
    if spectrograms.len() != requests.len() {
        return Err(EchovoxError::Synthesis {
            message: format!(
                "synthesizer returned {} spectrograms for a batch of {}",
                spectrograms.len(),
                requests.len()
            ),
        });
    }

    tracing::debug!(
        batch = requests.len(),
        frames = ?spectrograms.iter().map(Spectrogram::n_frames).collect::<Vec<_>>(),
        "Created the spectrograms"
    );
    Ok(spectrograms)
}

fn entry_seed(batch_seed: u64, sequence: &[u32], embedding: &VoiceEmbedding) -> u64 {
    let mut fp = Fingerprint::new();
    fp.write_u64(batch_seed);
    fp.write_u64(sequence.len() as u64);
    for &id in sequence {
        fp.write_u64(u64::from(id));
    }
    fp.write_f32s(embedding.as_slice());
    fp.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// One frame per symbol, filled with the entry seed's low bits.
    struct EchoModel;

    impl SpectrogramModel for EchoModel {
        fn generate(&mut self, batch: &[SpectrogramRequest<'_>]) -> Result<Vec<Spectrogram>> {
            batch
                .iter()
                .map(|req| {
                    let value = (req.seed % 1000) as f32;
                    Spectrogram::new(2, vec![value; req.sequence.len() * 2])
                })
                .collect()
        }

        fn sample_rate(&self) -> u32 {
            16000
        }
    }

    fn embedding() -> VoiceEmbedding {
        VoiceEmbedding::from_raw(vec![1.0, 2.0, 3.0]).unwrap()
    }

    #[test]
    fn spectrogram_rejects_ragged_data() {
        assert!(Spectrogram::new(3, vec![0.0; 7]).is_err());
        assert!(Spectrogram::new(0, vec![]).is_err());
        let spec = Spectrogram::new(3, vec![0.0; 9]).unwrap();
        assert_eq!(spec.n_frames(), 3);
        assert_eq!(spec.frame(2), Some(&[0.0, 0.0, 0.0][..]));
        assert_eq!(spec.frame(3), None);
    }

    #[test]
    fn mismatched_batch_lengths_fail() {
        let texts = vec![Utterance::new("a").unwrap(), Utterance::new("b").unwrap()];
        let embeddings = vec![embedding()];
        let mut rng = StdRng::seed_from_u64(1);
        let result = synthesize_spectrograms(&mut EchoModel, &texts, &embeddings, &mut rng);
        assert!(matches!(result, Err(EchovoxError::Synthesis { .. })));
    }

    #[test]
    fn empty_batch_is_empty_output() {
        let mut rng = StdRng::seed_from_u64(1);
        let result = synthesize_spectrograms(&mut EchoModel, &[], &[], &mut rng).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn swapping_batch_order_swaps_output() {
        let short = Utterance::new("hi").unwrap();
        let long = Utterance::new("hello there").unwrap();
        let e = embedding();

        let forward = synthesize_spectrograms(
            &mut EchoModel,
            &[short.clone(), long.clone()],
            &[e.clone(), e.clone()],
            &mut StdRng::seed_from_u64(9),
        )
        .unwrap();
        let backward = synthesize_spectrograms(
            &mut EchoModel,
            &[long, short],
            &[e.clone(), e],
            &mut StdRng::seed_from_u64(9),
        )
        .unwrap();

        assert_ne!(forward[0].n_frames(), forward[1].n_frames());
        assert_eq!(forward[0], backward[1]);
        assert_eq!(forward[1], backward[0]);
    }
}
