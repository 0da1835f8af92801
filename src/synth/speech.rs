use crate::error::{EchovoxError, Result};
use crate::synth::embedding::ReferenceAudio;
use crate::synth::pipeline::SynthesisPipeline;
use crate::synth::waveform::Waveform;
use std::sync::{Arc, Mutex};

/// Text in, speech out, in one fixed voice.
///
/// This is the seam the reply service talks to, so it can run against a mock.
pub trait SpeechSource: Send {
    fn speak(&mut self, text: &str) -> Result<Waveform>;
}

/// A pipeline bound to one reference recording.
#[derive(Debug)]
pub struct VoiceSession {
    pipeline: SynthesisPipeline,
    reference: ReferenceAudio,
}

impl VoiceSession {
    pub fn new(pipeline: SynthesisPipeline, reference: ReferenceAudio) -> Self {
        Self {
            pipeline,
            reference,
        }
    }

    pub fn pipeline(&self) -> &SynthesisPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut SynthesisPipeline {
        &mut self.pipeline
    }

    pub fn reference(&self) -> &ReferenceAudio {
        &self.reference
    }
}

impl SpeechSource for VoiceSession {
    fn speak(&mut self, text: &str) -> Result<Waveform> {
        self.pipeline.synthesize(&self.reference, text)
    }
}

/// Share one source between owners; calls are serialized by the lock.
impl<S: SpeechSource> SpeechSource for Arc<Mutex<S>> {
    fn speak(&mut self, text: &str) -> Result<Waveform> {
        let mut inner = self.lock().map_err(|_| EchovoxError::Synthesis {
            message: "speech source lock poisoned by an earlier panic".to_string(),
        })?;
        inner.speak(text)
    }
}

/// Mock speech source for testing
#[derive(Debug, Clone)]
pub struct MockSpeech {
    sample_rate: u32,
    samples_per_char: usize,
    fail_on: Option<String>,
    panic_on: Option<String>,
    spoken: Vec<String>,
}

impl MockSpeech {
    pub fn new() -> Self {
        Self {
            sample_rate: 16000,
            samples_per_char: 160,
            fail_on: None,
            panic_on: None,
            spoken: Vec::new(),
        }
    }

    /// Fail any text containing `marker`
    pub fn with_failure_on(mut self, marker: &str) -> Self {
        self.fail_on = Some(marker.to_string());
        self
    }

    /// Panic on any text containing `marker`
    pub fn with_panic_on(mut self, marker: &str) -> Self {
        self.panic_on = Some(marker.to_string());
        self
    }

    /// Texts successfully spoken so far
    pub fn spoken(&self) -> &[String] {
        &self.spoken
    }
}

impl Default for MockSpeech {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSource for MockSpeech {
    fn speak(&mut self, text: &str) -> Result<Waveform> {
        if let Some(marker) = &self.panic_on
            && text.contains(marker.as_str())
        {
            panic!("mock speech panic on {:?}", text);
        }
        if let Some(marker) = &self.fail_on
            && text.contains(marker.as_str())
        {
            return Err(EchovoxError::Synthesis {
                message: "mock synthesis failure".to_string(),
            });
        }

        self.spoken.push(text.to_string());
        let mut waveform = Waveform::new(
            vec![0.25; text.chars().count() * self.samples_per_char],
            self.sample_rate,
        );
        waveform.pad_one_second();
        Ok(waveform)
    }
}
