//! echovox - Reply to mentions in a cloned voice
//!
//! Speaker embedding → spectrogram synthesis → vocoding, driven by a
//! mention-polling reply service.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
#[cfg(feature = "cli")]
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod service;
pub mod synth;
pub mod text;

// Composition root - needs the HTTP stream and store
#[cfg(all(feature = "cli", feature = "http"))]
pub mod app;

// Core traits (stream → speech → store)
pub use models::ModelLoader;
pub use service::artifact::ArtifactStore;
pub use service::mention::MentionStream;
pub use synth::speech::SpeechSource;
pub use synth::{SpeakerEncoder, SpectrogramModel, VocoderModel};

// Pipeline
pub use synth::pipeline::{PipelineOptions, Residency, SynthesisPipeline};

// Service
pub use service::reply::{ReplyService, RestartPolicy, ServiceSettings};
pub use service::watermark::Watermark;

// Error handling
pub use error::{EchovoxError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
