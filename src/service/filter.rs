//! Which mentions get a spoken reply, and what text gets spoken.

use crate::service::mention::Mention;
use chrono::{DateTime, Utc};
use std::fmt;

/// Why a mention was not synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The mention is itself a reply in some thread.
    IsReply,
    /// Created before this service started.
    BeforeStart,
    /// No trigger keyword in the text.
    NoKeyword,
    /// Nothing left to say once the leading words are dropped.
    EmptyUtterance,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::IsReply => "is a reply",
            Rejection::BeforeStart => "created before service start",
            Rejection::NoKeyword => "no trigger keyword",
            Rejection::EmptyUtterance => "empty utterance",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone)]
pub struct MentionFilter {
    started_at: DateTime<Utc>,
    keywords: Vec<String>,
    skip_leading_words: usize,
}

impl MentionFilter {
    /// Keywords match case-insensitively anywhere in the text.
    pub fn new(started_at: DateTime<Utc>, keywords: &[String], skip_leading_words: usize) -> Self {
        Self {
            started_at,
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            skip_leading_words,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Accept a mention and return the text to speak, or say why not.
    pub fn evaluate(&self, mention: &Mention) -> Result<String, Rejection> {
        if mention.in_reply_to.is_some() {
            return Err(Rejection::IsReply);
        }
        if mention.created_at < self.started_at {
            return Err(Rejection::BeforeStart);
        }
        let lowered = mention.text.to_lowercase();
        if !self.keywords.iter().any(|k| lowered.contains(k.as_str())) {
            return Err(Rejection::NoKeyword);
        }
        extract_utterance(&mention.text, self.skip_leading_words).ok_or(Rejection::EmptyUtterance)
    }
}

/// Drop the first `skip` whitespace-separated words and rejoin the rest.
///
/// `"@bot say hello  world"` with `skip = 2` gives `"hello world"`.
pub fn extract_utterance(text: &str, skip: usize) -> Option<String> {
    let rest: Vec<&str> = text.split_whitespace().skip(skip).collect();
    if rest.is_empty() {
        None
    } else {
        Some(rest.join(" "))
    }
}
