//! Command-line interface for echovox
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Reply to mentions in a cloned voice
#[derive(Parser, Debug)]
#[command(name = "echovox", version, about = "Reply to mentions in a cloned voice")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Drop the synthesizer and vocoder after each utterance
    #[arg(long, global = true)]
    pub low_mem: bool,

    /// Reload every model and reseed before each utterance (seed 0 unless --seed)
    #[arg(long, global = true)]
    pub reload_models: bool,

    /// Random seed; without --low-mem this also enables reloading
    #[arg(long, global = true, value_name = "N")]
    pub seed: Option<u64>,
}

/// Parse a poll interval.
///
/// Bare numbers are seconds; anything `humantime` accepts also works
/// (`30s`, `5m`, `1h30m`).
fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let interval = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if interval.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(interval)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll mentions and reply with synthesized speech
    Run {
        /// Reference recording of the voice to clone
        #[arg(long, value_name = "PATH")]
        reference: Option<PathBuf>,

        /// Trigger keyword (repeatable; replaces the configured set)
        #[arg(long = "keyword", short = 'k', value_name = "WORD")]
        keywords: Vec<String>,

        /// Poll interval, e.g. 60s or 2m
        #[arg(long, value_name = "DURATION", value_parser = parse_interval)]
        interval: Option<Duration>,
    },

    /// Speak one text in the reference voice and write a WAV file
    Synthesize {
        /// Reference recording of the voice to clone
        #[arg(long, value_name = "PATH")]
        reference: PathBuf,

        /// Text to speak
        #[arg(long, short = 't')]
        text: String,

        /// Output WAV file
        #[arg(long, short = 'o', value_name = "FILE", default_value = "output.wav")]
        output: PathBuf,
    },

    /// Check that every model bundle is in place
    Check,

    /// Manage model bundles
    Models {
        /// Action to perform
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// Generate shell completion script
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Actions for `models`
#[derive(Subcommand, Debug)]
pub enum ModelsAction {
    /// Write the built-in bundles
    Init {
        /// Target directory (default: parent of the configured encoder path)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },
}
