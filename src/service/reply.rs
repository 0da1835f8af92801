//! The reply loop: poll mentions, speak, publish, reply, advance.
//!
//! Each poll is one iteration. Inside an iteration every mention is handled
//! best effort, so a failed synthesis or upload only costs that mention. The
//! iteration itself runs behind a supervisor that turns errors and panics
//! into log lines and tries again after the poll interval.

use crate::defaults;
use crate::error::{EchovoxError, Result};
use crate::service::artifact::{ArtifactStore, Publisher, UploadArtifact};
use crate::service::filter::{MentionFilter, Rejection};
use crate::service::mention::{Mention, MentionStream};
use crate::service::watermark::Watermark;
use crate::synth::speech::SpeechSource;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// How many failed iterations in a row the supervisor tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartPolicy {
    /// `None` restarts forever.
    pub max_consecutive_failures: Option<u32>,
}

impl RestartPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(max: u32) -> Self {
        Self {
            max_consecutive_failures: Some(max),
        }
    }

    fn exhausted(&self, consecutive_failures: u32) -> bool {
        self.max_consecutive_failures
            .is_some_and(|max| consecutive_failures >= max)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub keywords: Vec<String>,
    pub skip_leading_words: usize,
    pub poll_interval: Duration,
    pub reply_prefix: String,
    pub max_reply_chars: usize,
    pub state_file: Option<PathBuf>,
    pub restart: RestartPolicy,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            keywords: vec![defaults::TRIGGER_KEYWORD.to_string()],
            skip_leading_words: defaults::SKIP_LEADING_WORDS,
            poll_interval: Duration::from_secs(60),
            reply_prefix: String::new(),
            max_reply_chars: defaults::MAX_REPLY_CHARS,
            state_file: None,
            restart: RestartPolicy::default(),
        }
    }
}

/// What happened to one mention.
#[derive(Debug, Clone, PartialEq)]
pub enum MentionOutcome {
    Replied { url: String },
    Rejected(Rejection),
    SynthesisFailed(String),
    PublishFailed(String),
    ReplyFailed { url: String, error: String },
    /// Publishing or replying panicked.
    Panicked(String),
}

/// Result of one poll iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    pub fetched: usize,
    pub outcomes: Vec<(u64, MentionOutcome)>,
    pub watermark: u64,
}

impl PollReport {
    /// Ids that received a reply.
    pub fn replied(&self) -> Vec<u64> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, MentionOutcome::Replied { .. }))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Ids that reached synthesis but got no reply.
    pub fn failed(&self) -> Vec<u64> {
        self.outcomes
            .iter()
            .filter(|(_, o)| {
                !matches!(
                    o,
                    MentionOutcome::Replied { .. } | MentionOutcome::Rejected(_)
                )
            })
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Totals for a supervised run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub failed_iterations: u64,
}

pub struct ReplyService<M, A, S> {
    stream: M,
    publisher: Publisher<A>,
    speech: S,
    filter: MentionFilter,
    watermark: Watermark,
    settings: ServiceSettings,
}

impl<M, A, S> ReplyService<M, A, S>
where
    M: MentionStream,
    A: ArtifactStore,
    S: SpeechSource,
{
    /// Build a service whose start time is now.
    ///
    /// The watermark comes from `settings.state_file` when it exists.
    pub fn new(
        stream: M,
        publisher: Publisher<A>,
        speech: S,
        settings: ServiceSettings,
    ) -> Result<Self> {
        let watermark = match &settings.state_file {
            Some(path) => Watermark::load(path)?,
            None => Watermark::default(),
        };
        let filter = MentionFilter::new(
            Utc::now(),
            &settings.keywords,
            settings.skip_leading_words,
        );
        Ok(Self {
            stream,
            publisher,
            speech,
            filter,
            watermark,
            settings,
        })
    }

    /// Treat `started_at` as the service start time.
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.filter = MentionFilter::new(
            started_at,
            &self.settings.keywords,
            self.settings.skip_leading_words,
        );
        self
    }

    pub fn with_watermark(mut self, watermark: Watermark) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn stream(&self) -> &M {
        &self.stream
    }

    pub fn publisher(&self) -> &Publisher<A> {
        &self.publisher
    }

    pub fn speech(&self) -> &S {
        &self.speech
    }

    /// One iteration: fetch, handle each new mention, advance the watermark.
    ///
    /// The watermark moves past each mention before it is handled, then to
    /// the highest fetched id once the batch is done.
    ///
    /// # Errors
    /// A fetch failure ends the iteration without moving the watermark. A
    /// fatal model error ends it after the failing mention. Per-mention
    /// failures and panics are recorded in the report.
    pub async fn poll_once(&mut self) -> Result<PollReport> {
        let since = self.watermark.current();
        let mut mentions = self.stream.fetch_since(since).await?;
        mentions.sort_by_key(|m| m.id);
        tracing::debug!(since_id = since, fetched = mentions.len(), "Fetched mentions");

        let mut report = PollReport {
            fetched: mentions.len(),
            ..PollReport::default()
        };

        let watermark = self.watermark;
        for mention in mentions.iter().filter(|m| watermark.is_new(m)) {
            // Marked as evaluated before any work, so a fault past this point
            // never brings the mention back.
            self.watermark.advance(mention.id);
            self.persist_watermark();

            let outcome = match AssertUnwindSafe(self.handle_mention(mention))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome?,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(
                        mention_id = mention.id,
                        panic = %message,
                        "Mention handling panicked"
                    );
                    MentionOutcome::Panicked(message)
                }
            };
            report.outcomes.push((mention.id, outcome));
        }

        if let Some(max_id) = mentions.iter().map(|m| m.id).max() {
            self.watermark.advance(max_id);
        }
        report.watermark = self.watermark.current();
        self.persist_watermark();

        Ok(report)
    }

    fn persist_watermark(&self) {
        if let Some(path) = &self.settings.state_file
            && let Err(e) = self.watermark.save(path)
        {
            tracing::error!(path = %path.display(), error = %e, "Failed to persist watermark");
        }
    }

    async fn handle_mention(&mut self, mention: &Mention) -> Result<MentionOutcome> {
        let text = match self.filter.evaluate(mention) {
            Ok(text) => text,
            Err(rejection) => {
                tracing::debug!(mention_id = mention.id, reason = %rejection, "Skipping mention");
                return Ok(MentionOutcome::Rejected(rejection));
            }
        };

        tracing::info!(mention_id = mention.id, author = %mention.author, text = %text, "Speaking");
        let started = Instant::now();

        let speech = &mut self.speech;
        let spoken = std::panic::catch_unwind(AssertUnwindSafe(|| speech.speak(&text)))
            .unwrap_or_else(|panic| {
                Err(EchovoxError::Synthesis {
                    message: format!("synthesis panicked: {}", panic_message(panic.as_ref())),
                })
            });
        let waveform = match spoken {
            Ok(waveform) => waveform,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::error!(mention_id = mention.id, error = %e, "Synthesis failed");
                return Ok(MentionOutcome::SynthesisFailed(e.to_string()));
            }
        };

        let artifact: UploadArtifact = match self.publisher.publish(&waveform).await {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!(mention_id = mention.id, error = %e, "Publish failed");
                return Ok(MentionOutcome::PublishFailed(e.to_string()));
            }
        };

        let body = reply_body(
            &self.settings.reply_prefix,
            &artifact.public_url,
            self.settings.max_reply_chars,
        );
        if let Err(e) = self.stream.post_reply(mention.id, &body).await {
            tracing::error!(mention_id = mention.id, error = %e, "Reply failed");
            return Ok(MentionOutcome::ReplyFailed {
                url: artifact.public_url,
                error: e.to_string(),
            });
        }

        tracing::info!(
            mention_id = mention.id,
            url = %artifact.public_url,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Replied"
        );
        Ok(MentionOutcome::Replied {
            url: artifact.public_url,
        })
    }

    /// Poll until `shutdown` resolves, isolating every iteration.
    ///
    /// # Errors
    /// Returns a fatal model error as soon as one surfaces, or an error once
    /// the restart policy is exhausted.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut summary = RunSummary::default();
        let mut consecutive_failures: u32 = 0;

        tracing::info!(
            keywords = ?self.settings.keywords,
            interval = %humantime::format_duration(self.settings.poll_interval),
            since_id = self.watermark.current(),
            "Reply service started"
        );

        loop {
            summary.iterations += 1;
            let outcome = AssertUnwindSafe(self.poll_once()).catch_unwind().await;

            match outcome {
                Ok(Ok(report)) => {
                    consecutive_failures = 0;
                    if !report.outcomes.is_empty() {
                        tracing::info!(
                            fetched = report.fetched,
                            replied = report.replied().len(),
                            failed = report.failed().len(),
                            watermark = report.watermark,
                            "Poll complete"
                        );
                    }
                }
                Ok(Err(e)) if e.is_fatal() => {
                    tracing::error!(error = %e, "Fatal error, stopping");
                    return Err(e);
                }
                Ok(Err(e)) => {
                    consecutive_failures += 1;
                    summary.failed_iterations += 1;
                    tracing::error!(error = %e, consecutive_failures, "Iteration failed, restarting");
                }
                Err(panic) => {
                    consecutive_failures += 1;
                    summary.failed_iterations += 1;
                    tracing::error!(
                        panic = %panic_message(panic.as_ref()),
                        consecutive_failures,
                        "Iteration panicked, restarting"
                    );
                }
            }

            if self.settings.restart.exhausted(consecutive_failures) {
                return Err(EchovoxError::Other(format!(
                    "giving up after {consecutive_failures} consecutive failed iterations"
                )));
            }

            tracing::info!("Waiting...");
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(iterations = summary.iterations, "Shutting down");
                    return Ok(summary);
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }
}

/// `prefix + url`, cut to at most `max_chars` characters.
pub fn reply_body(prefix: &str, url: &str, max_chars: usize) -> String {
    format!("{prefix}{url}").chars().take(max_chars).collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::artifact::MockArtifactStore;
    use crate::service::mention::MockMentionStream;
    use crate::synth::speech::MockSpeech;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use tempfile::TempDir;

    type TestService = ReplyService<Arc<MockMentionStream>, MockArtifactStore, MockSpeech>;

    fn start() -> DateTime<Utc> {
        "2026-05-01T00:00:00Z".parse().unwrap()
    }

    fn mention(id: u64, text: &str) -> Mention {
        Mention {
            id,
            text: text.to_string(),
            author: format!("user{id}"),
            created_at: start() + ChronoDuration::seconds(id as i64),
            in_reply_to: None,
        }
    }

    fn service(
        mentions: Vec<Mention>,
        speech: MockSpeech,
        store: MockArtifactStore,
    ) -> (TempDir, Arc<MockMentionStream>, TestService) {
        let dir = tempfile::tempdir().unwrap();
        let stream = Arc::new(MockMentionStream::new(mentions));
        let settings = ServiceSettings {
            poll_interval: Duration::from_millis(5),
            ..ServiceSettings::default()
        };
        let svc = ReplyService::new(
            Arc::clone(&stream),
            Publisher::new(store, dir.path()),
            speech,
            settings,
        )
        .unwrap()
        .with_started_at(start());
        (dir, stream, svc)
    }

    #[test]
    fn reply_body_truncates_by_chars() {
        assert_eq!(reply_body("Listen: ", "http://x/a.wav", 280), "Listen: http://x/a.wav");
        assert_eq!(reply_body("ééé", "abc", 4), "éééa");
    }

    #[test]
    fn restart_policy_bounds() {
        assert!(!RestartPolicy::unbounded().exhausted(u32::MAX));
        assert!(!RestartPolicy::bounded(3).exhausted(2));
        assert!(RestartPolicy::bounded(3).exhausted(3));
    }

    #[tokio::test]
    async fn replies_to_keyword_mentions_and_advances() {
        let (_dir, stream, mut svc) = service(
            vec![mention(5, "@bot say hello world"), mention(3, "@bot hi there")],
            MockSpeech::new(),
            MockArtifactStore::new(),
        );

        let report = svc.poll_once().await.unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.replied(), vec![5]);
        assert_eq!(
            report.outcomes[0],
            (3, MentionOutcome::Rejected(Rejection::NoKeyword))
        );
        assert_eq!(report.watermark, 5);
        assert_eq!(svc.speech().spoken(), &["hello world".to_string()]);

        let replies = stream.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, 5);
        assert!(replies[0].1.starts_with("https://mock-bucket.example/"));
        assert!(replies[0].1.ends_with(".wav"));
    }

    #[tokio::test]
    async fn second_poll_asks_from_watermark_and_repeats_nothing() {
        let (_dir, stream, mut svc) = service(
            vec![mention(8, "@bot say again")],
            MockSpeech::new(),
            MockArtifactStore::new(),
        );

        svc.poll_once().await.unwrap();
        let second = svc.poll_once().await.unwrap();

        assert_eq!(stream.fetches(), vec![1, 8]);
        assert_eq!(second.fetched, 0);
        assert_eq!(second.watermark, 8);
        assert_eq!(stream.replies().len(), 1);
    }

    #[tokio::test]
    async fn synthesis_failure_does_not_block_later_mentions() {
        let (_dir, stream, mut svc) = service(
            vec![mention(2, "@bot say boom"), mention(4, "@bot say fine")],
            MockSpeech::new().with_failure_on("boom"),
            MockArtifactStore::new(),
        );

        let report = svc.poll_once().await.unwrap();

        assert_eq!(report.replied(), vec![4]);
        assert_eq!(report.failed(), vec![2]);
        assert_eq!(report.watermark, 4);
        assert_eq!(stream.replies().len(), 1);
    }

    #[tokio::test]
    async fn synthesis_panic_is_contained_to_its_mention() {
        let (_dir, _stream, mut svc) = service(
            vec![mention(2, "@bot say crash"), mention(3, "@bot say ok")],
            MockSpeech::new().with_panic_on("crash"),
            MockArtifactStore::new(),
        );

        let report = svc.poll_once().await.unwrap();

        assert!(matches!(
            &report.outcomes[0],
            (2, MentionOutcome::SynthesisFailed(msg)) if msg.contains("panicked")
        ));
        assert_eq!(report.replied(), vec![3]);
    }

    #[tokio::test]
    async fn publish_failure_skips_reply_but_advances() {
        let (_dir, stream, mut svc) = service(
            vec![mention(6, "@bot say hi")],
            MockSpeech::new(),
            MockArtifactStore::new().with_failure(),
        );

        let report = svc.poll_once().await.unwrap();

        assert!(matches!(report.outcomes[0].1, MentionOutcome::PublishFailed(_)));
        assert!(stream.replies().is_empty());
        assert_eq!(svc.watermark().current(), 6);
    }

    #[tokio::test]
    async fn reply_failure_keeps_url_in_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let stream = Arc::new(
            MockMentionStream::new(vec![mention(4, "@bot say hi")]).with_reply_failure(),
        );
        let mut svc = ReplyService::new(
            Arc::clone(&stream),
            Publisher::new(MockArtifactStore::new(), dir.path()),
            MockSpeech::new(),
            ServiceSettings::default(),
        )
        .unwrap()
        .with_started_at(start());

        let report = svc.poll_once().await.unwrap();

        match &report.outcomes[0].1 {
            MentionOutcome::ReplyFailed { url, .. } => assert!(url.ends_with(".wav")),
            other => panic!("Expected ReplyFailed, got {:?}", other),
        }
        assert_eq!(svc.watermark().current(), 4);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let stream = Arc::new(MockMentionStream::new(vec![]).with_fetch_failures(1));
        let mut svc = ReplyService::new(
            Arc::clone(&stream),
            Publisher::new(MockArtifactStore::new(), dir.path()),
            MockSpeech::new(),
            ServiceSettings::default(),
        )
        .unwrap()
        .with_watermark(Watermark::new(50));

        let result = svc.poll_once().await;

        assert!(matches!(result, Err(EchovoxError::StreamFetch { .. })));
        assert_eq!(svc.watermark().current(), 50);
    }

    #[tokio::test]
    async fn watermark_is_persisted_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("watermark.json");
        let settings = ServiceSettings {
            state_file: Some(state.clone()),
            ..ServiceSettings::default()
        };
        let stream = Arc::new(MockMentionStream::new(vec![mention(12, "@bot nothing")]));
        let mut svc = ReplyService::new(
            Arc::clone(&stream),
            Publisher::new(MockArtifactStore::new(), dir.path()),
            MockSpeech::new(),
            settings.clone(),
        )
        .unwrap();

        svc.poll_once().await.unwrap();

        let restarted = ReplyService::new(
            stream,
            Publisher::new(MockArtifactStore::new(), dir.path()),
            MockSpeech::new(),
            settings,
        )
        .unwrap();
        assert_eq!(restarted.watermark().current(), 12);
    }

    #[tokio::test]
    async fn run_survives_failed_iterations_until_shutdown() {
        let (_dir, stream, mut svc) = service(
            vec![mention(7, "@bot say later")],
            MockSpeech::new(),
            MockArtifactStore::new(),
        );

        let shutdown = tokio::time::sleep(Duration::from_millis(100));
        let summary = svc.run(shutdown).await.unwrap();

        assert!(summary.iterations >= 2);
        assert_eq!(summary.failed_iterations, 0);
        assert_eq!(stream.replies().len(), 1);
    }

    #[tokio::test]
    async fn run_gives_up_when_policy_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let stream = Arc::new(MockMentionStream::new(vec![]).with_fetch_failures(10));
        let settings = ServiceSettings {
            poll_interval: Duration::from_millis(1),
            restart: RestartPolicy::bounded(3),
            ..ServiceSettings::default()
        };
        let mut svc = ReplyService::new(
            Arc::clone(&stream),
            Publisher::new(MockArtifactStore::new(), dir.path()),
            MockSpeech::new(),
            settings,
        )
        .unwrap();

        let result = svc.run(std::future::pending()).await;

        assert!(matches!(result, Err(EchovoxError::Other(_))));
        assert_eq!(stream.fetches().len(), 3);
    }

    #[tokio::test]
    async fn run_recovers_after_fetch_failures() {
        let dir = tempfile::tempdir().unwrap();
        let stream = Arc::new(
            MockMentionStream::new(vec![mention(9, "@bot say recovered")]).with_fetch_failures(2),
        );
        let settings = ServiceSettings {
            poll_interval: Duration::from_millis(1),
            restart: RestartPolicy::bounded(3),
            ..ServiceSettings::default()
        };
        let mut svc = ReplyService::new(
            Arc::clone(&stream),
            Publisher::new(MockArtifactStore::new(), dir.path()),
            MockSpeech::new(),
            settings,
        )
        .unwrap()
        .with_started_at(start());

        let summary = svc.run(tokio::time::sleep(Duration::from_millis(80))).await.unwrap();

        assert_eq!(summary.failed_iterations, 2);
        assert_eq!(stream.replies().len(), 1);
        assert_eq!(svc.watermark().current(), 9);
    }

    /// Delegates to a mock but panics when replying to one id.
    struct PanickingReplies {
        inner: MockMentionStream,
        panic_on: u64,
    }

    #[async_trait::async_trait]
    impl MentionStream for PanickingReplies {
        async fn fetch_since(&self, since_id: u64) -> Result<Vec<Mention>> {
            self.inner.fetch_since(since_id).await
        }

        async fn post_reply(&self, mention_id: u64, body: &str) -> Result<()> {
            if mention_id == self.panic_on {
                panic!("reply endpoint blew up");
            }
            self.inner.post_reply(mention_id, body).await
        }
    }

    fn panicking_service(
        dir: &TempDir,
    ) -> ReplyService<Arc<PanickingReplies>, MockArtifactStore, MockSpeech> {
        let stream = Arc::new(PanickingReplies {
            inner: MockMentionStream::new(vec![
                mention(10, "@bot say first"),
                mention(11, "@bot say second"),
            ]),
            panic_on: 11,
        });
        let settings = ServiceSettings {
            poll_interval: Duration::from_millis(5),
            state_file: Some(dir.path().join("state.json")),
            ..ServiceSettings::default()
        };
        ReplyService::new(
            stream,
            Publisher::new(MockArtifactStore::new(), dir.path()),
            MockSpeech::new(),
            settings,
        )
        .unwrap()
        .with_started_at(start())
    }

    #[tokio::test]
    async fn reply_panic_is_contained_to_its_mention() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = panicking_service(&dir);

        let report = svc.poll_once().await.unwrap();

        assert_eq!(report.replied(), vec![10]);
        assert_eq!(
            report.outcomes[1],
            (11, MentionOutcome::Panicked("reply endpoint blew up".to_string()))
        );
        assert_eq!(report.failed(), vec![11]);
        assert_eq!(svc.watermark().current(), 11);
        assert_eq!(
            Watermark::load(&dir.path().join("state.json")).unwrap().current(),
            11
        );
    }

    #[tokio::test]
    async fn run_never_replies_twice_after_a_reply_panic() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = panicking_service(&dir);

        let summary = svc
            .run(tokio::time::sleep(Duration::from_millis(150)))
            .await
            .unwrap();

        assert!(summary.iterations >= 3);
        let stream = svc.stream();
        let replies_to_first = stream
            .inner
            .replies()
            .iter()
            .filter(|(id, _)| *id == 10)
            .count();
        assert_eq!(replies_to_first, 1);
        assert_eq!(stream.inner.fetches().last(), Some(&11));
        assert_eq!(svc.watermark().current(), 11);
    }
}
