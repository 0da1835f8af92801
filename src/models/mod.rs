//! Model bundle locations and verification.
//!
//! The pipeline needs three independently loadable bundles. They are checked
//! before the pipeline is built so a missing file stops startup with a clear
//! message instead of failing on the first mention.

pub mod loader;

pub use loader::{DspModelLoader, ModelLoader};

use crate::defaults;
use crate::error::{EchovoxError, Result};
use crate::synth::dsp::{EncoderBundle, SynthesizerBundle, VocoderBundle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// The three pipeline stages that load model state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelComponent {
    Encoder,
    Synthesizer,
    Vocoder,
}

impl ModelComponent {
    pub const ALL: [ModelComponent; 3] = [
        ModelComponent::Encoder,
        ModelComponent::Synthesizer,
        ModelComponent::Vocoder,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ModelComponent::Encoder => "encoder",
            ModelComponent::Synthesizer => "synthesizer",
            ModelComponent::Vocoder => "vocoder",
        }
    }
}

impl fmt::Display for ModelComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Filesystem locations of the model bundles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelPaths {
    pub encoder: PathBuf,
    pub synthesizer: PathBuf,
    pub vocoder: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            encoder: PathBuf::from(defaults::ENCODER_MODEL_PATH),
            synthesizer: PathBuf::from(defaults::SYNTHESIZER_MODEL_PATH),
            vocoder: PathBuf::from(defaults::VOCODER_MODEL_PATH),
        }
    }
}

impl ModelPaths {
    pub fn path(&self, component: ModelComponent) -> &Path {
        match component {
            ModelComponent::Encoder => &self.encoder,
            ModelComponent::Synthesizer => &self.synthesizer,
            ModelComponent::Vocoder => &self.vocoder,
        }
    }

    /// Bundles under `dir` with their default file names.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            encoder: dir.join("encoder.json"),
            synthesizer: dir.join("synthesizer.json"),
            vocoder: dir.join("vocoder.json"),
        }
    }

    /// Components whose bundle is absent or not a readable file.
    pub fn missing(&self) -> Vec<ModelComponent> {
        ModelComponent::ALL
            .into_iter()
            .filter(|&c| !is_readable_file(self.path(c)))
            .collect()
    }

    /// Fail with `MissingModel` for the first absent bundle.
    pub fn verify_component(&self, component: ModelComponent) -> Result<()> {
        let path = self.path(component);
        if is_readable_file(path) {
            Ok(())
        } else {
            Err(EchovoxError::MissingModel {
                component: component.name().to_string(),
                path: path.display().to_string(),
            })
        }
    }
}

fn is_readable_file(path: &Path) -> bool {
    fs::File::open(path)
        .and_then(|f| f.metadata())
        .is_ok_and(|m| m.is_file())
}

/// Verify every bundle exists before a pipeline is built.
///
/// # Errors
/// Returns `EchovoxError::MissingModel` naming the first absent bundle.
pub fn check_model_paths(paths: &ModelPaths) -> Result<()> {
    for component in ModelComponent::ALL {
        paths.verify_component(component)?;
    }
    Ok(())
}

/// Operator-facing hint for missing bundles.
pub fn download_hint(missing: &[ModelComponent]) -> String {
    let names: Vec<&str> = missing.iter().map(|c| c.name()).collect();
    format!(
        "Missing model bundles: {}. Place them at the configured paths, \
         or run `echovox models init` to write the built-in bundles.",
        names.join(", ")
    )
}

/// Write the built-in bundles into `dir`, creating it if needed.
pub fn write_default_bundles(dir: &Path) -> Result<ModelPaths> {
    fs::create_dir_all(dir)?;
    let paths = ModelPaths::in_dir(dir);
    write_json(&paths.encoder, &EncoderBundle::default())?;
    write_json(&paths.synthesizer, &SynthesizerBundle::default())?;
    write_json(&paths.vocoder, &VocoderBundle::default())?;
    Ok(paths)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| EchovoxError::Other(format!("Failed to serialize bundle: {e}")))?;
    fs::write(path, json)?;
    Ok(())
}
