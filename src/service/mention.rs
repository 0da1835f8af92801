//! Inbound mentions and the stream they come from.

use crate::error::{EchovoxError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// An event addressed to the service account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub id: u64,
    pub text: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub in_reply_to: Option<u64>,
}

/// Pull-based mention API.
#[async_trait]
pub trait MentionStream: Send + Sync {
    /// Mentions with id greater than `since_id`, in any order.
    async fn fetch_since(&self, since_id: u64) -> Result<Vec<Mention>>;

    /// Reply to `mention_id` with `body`.
    async fn post_reply(&self, mention_id: u64, body: &str) -> Result<()>;
}

#[async_trait]
impl<T: MentionStream + ?Sized> MentionStream for Arc<T> {
    async fn fetch_since(&self, since_id: u64) -> Result<Vec<Mention>> {
        (**self).fetch_since(since_id).await
    }

    async fn post_reply(&self, mention_id: u64, body: &str) -> Result<()> {
        (**self).post_reply(mention_id, body).await
    }
}

/// JSON-over-HTTP mention API with bearer authentication.
///
/// `GET {base}/mentions?since_id=N` returns an array of mentions;
/// `POST {base}/replies` takes `{"in_reply_to_id": N, "text": "..."}`.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpMentionStream {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[cfg(feature = "http")]
impl HttpMentionStream {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[cfg(feature = "http")]
#[derive(Serialize)]
struct ReplyRequest<'a> {
    in_reply_to_id: u64,
    text: &'a str,
}

#[cfg(feature = "http")]
#[async_trait]
impl MentionStream for HttpMentionStream {
    async fn fetch_since(&self, since_id: u64) -> Result<Vec<Mention>> {
        let url = format!("{}/mentions?since_id={}", self.base_url, since_id);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| EchovoxError::StreamFetch {
                message: format!("{url}: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(EchovoxError::StreamFetch {
                message: format!("{url} returned status {}", response.status()),
            });
        }

        let text = response.text().await.map_err(|e| EchovoxError::StreamFetch {
            message: format!("Failed to read response: {e}"),
        })?;
        serde_json::from_str(&text).map_err(|e| EchovoxError::StreamFetch {
            message: format!("Failed to parse mentions: {e}"),
        })
    }

    async fn post_reply(&self, mention_id: u64, body: &str) -> Result<()> {
        let url = format!("{}/replies", self.base_url);
        let payload = ReplyRequest {
            in_reply_to_id: mention_id,
            text: body,
        };
        let response = self
            .authorize(self.client.post(&url).json(&payload))
            .send()
            .await
            .map_err(|e| EchovoxError::ReplyPost {
                mention_id,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(EchovoxError::ReplyPost {
                mention_id,
                message: format!("status {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Mock mention stream for testing
///
/// Serves queued mentions filtered by `since_id` and records replies.
#[derive(Debug, Default)]
pub struct MockMentionStream {
    mentions: Mutex<Vec<Mention>>,
    replies: Mutex<Vec<(u64, String)>>,
    fetches: Mutex<Vec<u64>>,
    fail_fetches: Mutex<usize>,
    fail_replies: bool,
}

impl MockMentionStream {
    pub fn new(mentions: Vec<Mention>) -> Self {
        Self {
            mentions: Mutex::new(mentions),
            ..Self::default()
        }
    }

    /// Fail the next `count` fetches
    pub fn with_fetch_failures(self, count: usize) -> Self {
        if let Ok(mut remaining) = self.fail_fetches.lock() {
            *remaining = count;
        }
        self
    }

    /// Fail every reply post
    pub fn with_reply_failure(mut self) -> Self {
        self.fail_replies = true;
        self
    }

    /// Add mentions that later fetches will return
    pub fn push(&self, mention: Mention) {
        if let Ok(mut mentions) = self.mentions.lock() {
            mentions.push(mention);
        }
    }

    /// Replies posted so far, as `(mention_id, body)`
    pub fn replies(&self) -> Vec<(u64, String)> {
        self.replies.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// `since_id` of every fetch so far
    pub fn fetches(&self) -> Vec<u64> {
        self.fetches.lock().map(|f| f.clone()).unwrap_or_default()
    }

    fn lock_error(what: &str) -> EchovoxError {
        EchovoxError::Other(format!("mock {what} lock poisoned"))
    }
}

#[async_trait]
impl MentionStream for MockMentionStream {
    async fn fetch_since(&self, since_id: u64) -> Result<Vec<Mention>> {
        self.fetches
            .lock()
            .map_err(|_| Self::lock_error("fetches"))?
            .push(since_id);

        {
            let mut remaining = self
                .fail_fetches
                .lock()
                .map_err(|_| Self::lock_error("fetch failure"))?;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(EchovoxError::StreamFetch {
                    message: "mock fetch failure".to_string(),
                });
            }
        }

        let mentions = self.mentions.lock().map_err(|_| Self::lock_error("mentions"))?;
        Ok(mentions
            .iter()
            .filter(|m| m.id > since_id)
            .cloned()
            .collect())
    }

    async fn post_reply(&self, mention_id: u64, body: &str) -> Result<()> {
        if self.fail_replies {
            return Err(EchovoxError::ReplyPost {
                mention_id,
                message: "mock reply failure".to_string(),
            });
        }
        self.replies
            .lock()
            .map_err(|_| Self::lock_error("replies"))?
            .push((mention_id, body.to_string()));
        Ok(())
    }
}
