//! Startup diagnostics for `echovox check`.
//!
//! Verifies model bundles, the reference recording and the service
//! endpoints before the reply loop is started.

use crate::audio::preprocess::{self, PreprocessConfig};
use crate::config::{Config, StoreKind};
use crate::models::{self, ModelComponent, ModelLoader};
use owo_colors::OwoColorize;
use std::path::Path;

/// Result of one check.
#[derive(Debug, PartialEq)]
pub enum CheckResult {
    /// Present and usable
    Ok,
    /// Not present at all
    NotFound,
    /// Present or configured, but unusable as-is
    Warning(String),
}

impl CheckResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, CheckResult::Ok)
    }
}

/// Check that a bundle exists and the loader accepts it.
pub fn check_bundle(loader: &dyn ModelLoader, component: ModelComponent, path: &Path) -> CheckResult {
    if !path.is_file() {
        return CheckResult::NotFound;
    }
    let loaded = match component {
        ModelComponent::Encoder => loader.load_encoder(path).map(|_| ()),
        ModelComponent::Synthesizer => loader.load_synthesizer(path).map(|_| ()),
        ModelComponent::Vocoder => loader.load_vocoder(path).map(|_| ()),
    };
    match loaded {
        Ok(()) => CheckResult::Ok,
        Err(e) => CheckResult::Warning(e.to_string()),
    }
}

/// Check that the reference recording decodes and survives preprocessing.
pub fn check_reference(path: Option<&Path>) -> CheckResult {
    let Some(path) = path else {
        return CheckResult::NotFound;
    };
    if !path.exists() {
        return CheckResult::Warning(format!("{} does not exist", path.display()));
    }
    match preprocess::preprocess_path(path, &PreprocessConfig::default()) {
        Ok(_) => CheckResult::Ok,
        Err(e) => CheckResult::Warning(e.to_string()),
    }
}

/// Check that the mention stream and artifact store are configured.
pub fn check_endpoints(config: &Config) -> Vec<(&'static str, CheckResult)> {
    let stream = if config.stream.base_url.is_empty() {
        CheckResult::NotFound
    } else if config.stream.token.is_none() {
        CheckResult::Warning("no token set (ECHOVOX_STREAM_TOKEN)".to_string())
    } else {
        CheckResult::Ok
    };

    let store = match config.store.kind {
        StoreKind::Http if config.store.bucket.is_empty() => {
            CheckResult::Warning("store.bucket is empty".to_string())
        }
        StoreKind::Http | StoreKind::Directory => CheckResult::Ok,
    };

    vec![("mention stream", stream), ("artifact store", store)]
}

fn print_result(label: &str, result: &CheckResult) {
    match result {
        CheckResult::Ok => println!("{}: {}", label, "✓ OK".green()),
        CheckResult::NotFound => println!("{}: {}", label, "✗ NOT FOUND".red()),
        CheckResult::Warning(msg) => println!("{}: {} {}", label, "⚠ WARNING:".yellow(), msg),
    }
}

/// Run all checks and print a report. Returns whether the bundles are usable.
pub fn run_checks(config: &Config, loader: &dyn ModelLoader) -> bool {
    println!("Checking model bundles...\n");

    let mut models_ok = true;
    for component in ModelComponent::ALL {
        let path = config.models.path(component);
        let result = check_bundle(loader, component, path);
        models_ok &= result.is_ok();
        print_result(&format!("{} ({})", component, path.display()), &result);
    }

    let missing = config.models.missing();
    if !missing.is_empty() {
        println!("\n{}", models::download_hint(&missing));
    }

    println!();
    print_result(
        "reference audio",
        &check_reference(config.service.reference_audio.as_deref()),
    );
    for (label, result) in check_endpoints(config) {
        print_result(label, &result);
    }

    println!();
    if models_ok {
        println!("{}", "Ready to synthesize.".green());
    } else {
        println!("{}", "Model bundles are missing or invalid.".red());
    }
    models_ok
}
