//! Application entry points.
//!
//! Wires configuration into the synthesis pipeline and the reply service:
//! mentions → filter → synthesize → publish → reply

use crate::config::{Config, StoreKind};
use crate::error::{EchovoxError, Result};
use crate::models::{self, DspModelLoader};
use crate::service::artifact::{ArtifactStore, DirectoryArtifactStore, HttpArtifactStore, Publisher};
use crate::service::mention::HttpMentionStream;
use crate::service::reply::{ReplyService, RunSummary};
use crate::synth::embedding::ReferenceAudio;
use crate::synth::pipeline::{PipelineOptions, SynthesisPipeline};
use crate::synth::speech::VoiceSession;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides for `echovox run` taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub reference: Option<PathBuf>,
    pub keywords: Vec<String>,
    pub interval: Option<Duration>,
}

/// Policy flags from the command line; set flags win over the config file.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyFlags {
    pub low_mem: bool,
    pub reload_models: bool,
    pub seed: Option<u64>,
}

/// Merge command-line policy flags into the config.
pub fn apply_policy_flags(config: &mut Config, flags: PolicyFlags) {
    config.synthesis.low_mem |= flags.low_mem;
    config.synthesis.reload_models |= flags.reload_models;
    if flags.seed.is_some() {
        config.synthesis.seed = flags.seed;
    }
}

/// Merge `run` overrides into the config.
pub fn apply_run_overrides(config: &mut Config, overrides: RunOverrides) {
    if let Some(reference) = overrides.reference {
        config.service.reference_audio = Some(reference);
    }
    if !overrides.keywords.is_empty() {
        config.service.keywords = overrides.keywords;
    }
    if let Some(interval) = overrides.interval {
        config.service.poll_interval = humantime::format_duration(interval).to_string();
    }
}

/// Build a pipeline from config, failing fast on missing bundles.
pub fn build_pipeline(config: &Config) -> Result<SynthesisPipeline> {
    let missing = config.models.missing();
    if !missing.is_empty() {
        tracing::error!("{}", models::download_hint(&missing));
    }
    let options: PipelineOptions = config.synthesis.pipeline_options();
    SynthesisPipeline::new(config.models.clone(), Box::new(DspModelLoader), options)
}

/// Speak `text` in the voice of `reference` and write it to `output`.
pub fn run_synthesize_command(
    config: &Config,
    reference: &Path,
    text: &str,
    output: &Path,
) -> Result<()> {
    let mut pipeline = build_pipeline(config)?;
    let waveform = pipeline.synthesize(&ReferenceAudio::from_path(reference), text)?;
    waveform.write_wav(output)?;
    tracing::info!(
        path = %output.display(),
        seconds = waveform.duration_secs(),
        "Saved output"
    );
    Ok(())
}

fn build_store(config: &Config) -> Result<Box<dyn ArtifactStore>> {
    let store = &config.store;
    match store.kind {
        StoreKind::Http => {
            if store.bucket.is_empty() {
                return Err(EchovoxError::ConfigInvalidValue {
                    key: "store.bucket".to_string(),
                    message: "required when store.kind = \"http\"".to_string(),
                });
            }
            Ok(Box::new(HttpArtifactStore::new(
                &store.endpoint,
                &store.bucket,
                store.public_base_url.as_deref(),
            )))
        }
        StoreKind::Directory => Ok(Box::new(DirectoryArtifactStore::new(
            &store.directory,
            store.public_base_url.as_deref(),
        ))),
    }
}

/// Run the reply service until Ctrl-C.
pub async fn run_service_command(config: Config) -> Result<RunSummary> {
    config.validate()?;

    let reference = config
        .service
        .reference_audio
        .clone()
        .ok_or_else(|| EchovoxError::ConfigInvalidValue {
            key: "service.reference_audio".to_string(),
            message: "set it in the config, with --reference, or ECHOVOX_REFERENCE_AUDIO"
                .to_string(),
        })?;
    if config.stream.base_url.is_empty() {
        return Err(EchovoxError::ConfigInvalidValue {
            key: "stream.base_url".to_string(),
            message: "the mention API base URL is required".to_string(),
        });
    }

    let pipeline = build_pipeline(&config)?;
    let mut session = VoiceSession::new(pipeline, ReferenceAudio::from_path(&reference));
    // Embed once up front so a bad reference stops startup.
    let embedding = {
        let reference = session.reference().clone();
        session.pipeline_mut().embed(&reference)?
    };
    tracing::info!(reference = %reference.display(), dims = embedding.len(), "Voice loaded");

    let stream = HttpMentionStream::new(&config.stream.base_url, config.stream.token.clone());
    let publisher = Publisher::new(build_store(&config)?, config.service.output_dir());
    let settings = config.service.to_settings()?;

    let mut service = ReplyService::new(stream, publisher, session, settings)?;
    service.run(shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl-C; run until killed");
        std::future::pending::<()>().await;
    }
}
