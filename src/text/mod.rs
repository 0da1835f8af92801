//! Text handling: utterances and the synthesizer symbol vocabulary.

pub mod symbols;

use crate::error::{EchovoxError, Result};
use std::fmt;

/// Text to be spoken: trimmed, whitespace-collapsed, never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance(String);

impl Utterance {
    /// Build an utterance from free text.
    ///
    /// # Errors
    /// Returns `EchovoxError::Synthesis` if nothing but whitespace remains.
    pub fn new(text: &str) -> Result<Self> {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            return Err(EchovoxError::Synthesis {
                message: "utterance is empty".to_string(),
            });
        }
        Ok(Self(collapsed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Symbol ids for this utterance, EOS terminated.
    pub fn to_sequence(&self) -> Vec<u32> {
        symbols::text_to_sequence(&self.0)
    }
}

impl fmt::Display for Utterance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
