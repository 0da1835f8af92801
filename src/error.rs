//! Error types for echovox.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EchovoxError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Reference audio errors
    #[error("Invalid audio: {message}")]
    InvalidAudio { message: String },

    // Model artifact errors
    #[error("Missing {component} model at {path}")]
    MissingModel { component: String, path: String },

    #[error("The {component} model is not loaded")]
    ModelNotLoaded { component: String },

    #[error("Failed to load {component} model: {message}")]
    ModelLoad { component: String, message: String },

    // Pipeline errors
    #[error("Synthesis failed: {message}")]
    Synthesis { message: String },

    // Service errors
    #[error("Artifact publish failed: {message}")]
    Publish { message: String },

    #[error("Failed to fetch mentions: {message}")]
    StreamFetch { message: String },

    #[error("Failed to post reply to mention {mention_id}: {message}")]
    ReplyPost { mention_id: u64, message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl EchovoxError {
    /// Errors the process must not continue past.
    ///
    /// Missing or unloaded models stop startup; everything else is contained
    /// to a single mention or a single poll iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EchovoxError::MissingModel { .. } | EchovoxError::ModelNotLoaded { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, EchovoxError>;
