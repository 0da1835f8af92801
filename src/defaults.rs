//! Default configuration constants for echovox.
//!
//! Shared constants used by the pipeline, the reply service and the
//! configuration layer.

/// Sample rate of preprocessed reference audio in Hz.
///
/// Reference audio of any rate is resampled to this before the speaker
/// encoder sees it.
pub const ENCODER_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized output in Hz.
pub const SYNTHESIS_SAMPLE_RATE: u32 = 16000;

/// Dimension of a voice embedding.
pub const EMBEDDING_SIZE: usize = 256;

/// Number of frequency bands per spectrogram frame.
pub const N_MELS: usize = 80;

/// Output samples generated per spectrogram frame (12.5ms at 16kHz).
pub const HOP_LENGTH: usize = 200;

/// Minimum duration of preprocessed reference audio, in milliseconds.
///
/// Shorter clips do not carry enough voiced frames for a stable embedding.
pub const MIN_REFERENCE_MS: u32 = 1000;

/// Loudness target for reference normalization, in dBFS.
pub const TARGET_DBFS: f32 = -30.0;

/// Window size for silence trimming, in milliseconds.
pub const VAD_WINDOW_MS: u32 = 30;

/// RMS level above which a trimming window counts as voiced.
pub const VAD_THRESHOLD: f32 = 0.01;

/// Width of the moving average applied to voiced flags, in windows.
pub const VAD_MOVING_AVERAGE_WIDTH: usize = 8;

/// Dilation applied around voiced regions, in windows.
pub const VAD_MAX_SILENCE_WINDOWS: usize = 6;

/// Trigger keyword a mention must contain to be answered.
pub const TRIGGER_KEYWORD: &str = "say";

/// Seconds between mention polls.
pub const POLL_INTERVAL: &str = "60s";

/// Leading words dropped from mention text (`@handle keyword`).
pub const SKIP_LEADING_WORDS: usize = 2;

/// Maximum reply length accepted by the platform.
pub const MAX_REPLY_CHARS: usize = 280;

/// Length of random artifact file stems.
pub const ARTIFACT_NAME_LEN: usize = 7;

/// Seed applied when reload-per-call is requested without one.
pub const DEFAULT_RELOAD_SEED: u64 = 0;

/// Default model bundle locations, relative to the working directory.
pub const ENCODER_MODEL_PATH: &str = "models/encoder.json";
pub const SYNTHESIZER_MODEL_PATH: &str = "models/synthesizer.json";
pub const VOCODER_MODEL_PATH: &str = "models/vocoder.json";
