//! Mention watermark: the newest mention id already evaluated.

use crate::error::{EchovoxError, Result};
use crate::service::mention::Mention;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Watermark value before any mention has been seen.
pub const INITIAL_WATERMARK: u64 = 1;

/// Monotonic cursor over mention ids.
///
/// Every mention with `id <= current()` has been evaluated once. Replies are
/// not guaranteed: a mention can be evaluated and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    since_id: u64,
}

impl Default for Watermark {
    fn default() -> Self {
        Self::new(INITIAL_WATERMARK)
    }
}

impl Watermark {
    pub fn new(since_id: u64) -> Self {
        Self { since_id }
    }

    pub fn current(&self) -> u64 {
        self.since_id
    }

    /// Move to `max(current, candidate)` and return the result.
    pub fn advance(&mut self, candidate: u64) -> u64 {
        self.since_id = self.since_id.max(candidate);
        self.since_id
    }

    pub fn is_new(&self, mention: &Mention) -> bool {
        mention.id > self.since_id
    }

    /// Read a persisted watermark, or the initial one if the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| EchovoxError::ConfigInvalidValue {
            key: "service.state_file".to_string(),
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Persist through a temp file and rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)
            .map_err(|e| EchovoxError::Other(format!("Failed to serialize watermark: {e}")))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
