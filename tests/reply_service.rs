use chrono::{DateTime, Duration as ChronoDuration, Utc};
use echovox::models::{DspModelLoader, write_default_bundles};
use echovox::service::{
    DirectoryArtifactStore, Mention, MentionOutcome, MockArtifactStore, MockMentionStream,
    Publisher, Rejection, ReplyService, ServiceSettings, Watermark,
};
use echovox::synth::{MockSpeech, PipelineOptions, ReferenceAudio, SynthesisPipeline, VoiceSession};
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;

fn started() -> DateTime<Utc> {
    "2026-06-01T09:00:00Z".parse().unwrap()
}

fn mention(id: u64, text: &str) -> Mention {
    Mention {
        id,
        text: text.to_string(),
        author: format!("fan{id}"),
        created_at: started() + ChronoDuration::minutes(id as i64),
        in_reply_to: None,
    }
}

fn five_second_reference() -> ReferenceAudio {
    let samples = (0..16000 * 5)
        .map(|i| {
            let t = i as f32 / 16000.0;
            let envelope = 0.5 + 0.5 * (2.0 * PI * 3.0 * t).sin().abs();
            0.3 * envelope * (2.0 * PI * (110.0 + 20.0 * t) * t).sin()
        })
        .collect();
    ReferenceAudio::Samples {
        samples,
        sample_rate: 16000,
    }
}

fn settings() -> ServiceSettings {
    ServiceSettings {
        poll_interval: Duration::from_millis(5),
        ..ServiceSettings::default()
    }
}

#[tokio::test]
async fn end_to_end_reply_with_real_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_default_bundles(&dir.path().join("models")).unwrap();
    let pipeline = SynthesisPipeline::new(
        paths,
        Box::new(DspModelLoader),
        PipelineOptions::from_flags(false, false, Some(11)),
    )
    .unwrap();
    let session = VoiceSession::new(pipeline, five_second_reference());

    let published = dir.path().join("published");
    let store = DirectoryArtifactStore::new(&published, Some("https://audio.example.net"));
    let stream = Arc::new(MockMentionStream::new(vec![
        mention(41, "@voxbot please say hello world"),
        mention(40, "@voxbot nice weather"),
    ]));

    let mut service = ReplyService::new(
        Arc::clone(&stream),
        Publisher::new(store, dir.path().join("scratch")),
        session,
        settings(),
    )
    .unwrap()
    .with_started_at(started());

    let report = service.poll_once().await.unwrap();

    assert_eq!(report.replied(), vec![41]);
    assert_eq!(service.watermark().current(), 41);

    let replies = stream.replies();
    assert_eq!(replies.len(), 1);
    let (replied_to, body) = &replies[0];
    assert_eq!(*replied_to, 41);
    let key = body
        .strip_prefix("https://audio.example.net/")
        .expect("reply should reference the published URL");

    let audio = echovox::audio::wav::load_audio(&published.join(key)).unwrap();
    assert_eq!(audio.sample_rate, 16000);
    assert!(audio.samples.len() > 16000, "waveform should be longer than 1s");
    assert!(audio.samples[audio.samples.len() - 16000..].iter().all(|&s| s == 0.0));

    // The scratch copy is removed after upload.
    let scratch: Vec<_> = std::fs::read_dir(dir.path().join("scratch")).unwrap().collect();
    assert!(scratch.is_empty());
}

#[tokio::test]
async fn old_mentions_and_replies_never_reach_synthesis() {
    let dir = tempfile::tempdir().unwrap();
    let mut before_start = mention(3, "@voxbot say too early");
    before_start.created_at = started() - ChronoDuration::seconds(1);
    let mut threaded = mention(4, "@voxbot say in a thread");
    threaded.in_reply_to = Some(2);

    let stream = Arc::new(MockMentionStream::new(vec![before_start, threaded]));
    let mut service = ReplyService::new(
        Arc::clone(&stream),
        Publisher::new(MockArtifactStore::new(), dir.path()),
        MockSpeech::new(),
        settings(),
    )
    .unwrap()
    .with_started_at(started());

    let report = service.poll_once().await.unwrap();

    assert!(service.speech().spoken().is_empty());
    assert!(stream.replies().is_empty());
    assert_eq!(
        report.outcomes,
        vec![
            (3, MentionOutcome::Rejected(Rejection::BeforeStart)),
            (4, MentionOutcome::Rejected(Rejection::IsReply)),
        ]
    );
    assert_eq!(service.watermark().current(), 4);
}

#[tokio::test]
async fn watermark_tracks_max_fetched_id_even_without_replies() {
    let dir = tempfile::tempdir().unwrap();
    let stream = Arc::new(MockMentionStream::new(vec![
        mention(10, "@voxbot say one"),
        mention(30, "@voxbot no trigger here"),
        mention(20, "@voxbot say broken"),
    ]));
    let mut service = ReplyService::new(
        Arc::clone(&stream),
        Publisher::new(MockArtifactStore::new(), dir.path()),
        MockSpeech::new().with_failure_on("broken"),
        settings(),
    )
    .unwrap()
    .with_started_at(started());

    let report = service.poll_once().await.unwrap();

    assert_eq!(report.replied(), vec![10]);
    assert_eq!(report.failed(), vec![20]);
    assert_eq!(report.watermark, 30);

    // Nothing newer: the watermark holds and nothing is handled twice.
    let again = service.poll_once().await.unwrap();
    assert!(again.outcomes.is_empty());
    assert_eq!(again.watermark, 30);
    assert_eq!(stream.fetches(), vec![1, 30]);
    assert_eq!(stream.replies().len(), 1);
}

#[tokio::test]
async fn new_mentions_after_first_poll_are_picked_up() {
    let dir = tempfile::tempdir().unwrap();
    let stream = Arc::new(MockMentionStream::new(vec![mention(5, "@voxbot say first")]));
    let mut service = ReplyService::new(
        Arc::clone(&stream),
        Publisher::new(MockArtifactStore::new(), dir.path()),
        MockSpeech::new(),
        settings(),
    )
    .unwrap()
    .with_started_at(started());

    service.poll_once().await.unwrap();
    stream.push(mention(6, "@voxbot say second"));
    let report = service.poll_once().await.unwrap();

    assert_eq!(report.replied(), vec![6]);
    assert_eq!(
        service.speech().spoken(),
        &["first".to_string(), "second".to_string()]
    );
}

#[tokio::test]
async fn resumed_service_skips_mentions_below_persisted_watermark() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    Watermark::new(100).save(&state).unwrap();

    let stream = Arc::new(MockMentionStream::new(vec![
        mention(90, "@voxbot say old"),
        mention(101, "@voxbot say new"),
    ]));
    let mut service = ReplyService::new(
        Arc::clone(&stream),
        Publisher::new(MockArtifactStore::new(), dir.path()),
        MockSpeech::new(),
        ServiceSettings {
            state_file: Some(state.clone()),
            ..settings()
        },
    )
    .unwrap()
    .with_started_at(started());

    let report = service.poll_once().await.unwrap();

    assert_eq!(stream.fetches(), vec![100]);
    assert_eq!(report.replied(), vec![101]);
    assert_eq!(Watermark::load(&state).unwrap().current(), 101);
}

#[tokio::test]
async fn supervised_run_outlives_a_panicking_mention() {
    let dir = tempfile::tempdir().unwrap();
    let stream = Arc::new(MockMentionStream::new(vec![
        mention(1_000, "@voxbot say explode"),
        mention(1_001, "@voxbot say survive"),
    ]));
    let mut service = ReplyService::new(
        Arc::clone(&stream),
        Publisher::new(MockArtifactStore::new(), dir.path()),
        MockSpeech::new().with_panic_on("explode"),
        settings(),
    )
    .unwrap()
    .with_started_at(started());

    let summary = service
        .run(tokio::time::sleep(Duration::from_millis(60)))
        .await
        .unwrap();

    assert!(summary.iterations >= 2);
    assert_eq!(summary.failed_iterations, 0);
    assert_eq!(stream.replies().len(), 1);
    assert_eq!(stream.replies()[0].0, 1_001);
    assert_eq!(service.watermark().current(), 1_001);
}
