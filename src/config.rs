//! Recorder configuration
//!
//! Every section has sensible defaults, so an empty TOML file (or no file
//! at all) yields a working 50 Hz / 20 s recorder.
//!
//! ```toml
//! [scheduler]
//! tick_rate_hz = 50
//! history_duration_seconds = 20.0
//!
//! [jitter]
//! warm_up_pending_count = 4
//!
//! [replay]
//! voice_activity_threshold = 0.05
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub codec: CodecConfig,
    pub jitter: JitterConfig,
    pub scheduler: SchedulerConfig,
    pub replay: ReplayConfig,
}

/// Decoder parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration_ms: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
        }
    }
}

impl CodecConfig {
    /// Samples per channel in one frame
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as usize * self.frame_duration_ms as usize) / 1000
    }
}

/// Per-stream reorder and concealment policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    /// Frames that must be pending before a (re)buffering stream emits
    pub warm_up_pending_count: usize,
    /// Upper bound on placeholders inserted for one detected gap
    pub placeholder_trigger_threshold: u32,
    /// A candidate this far below the last sequence means the counter wrapped
    pub wraparound_threshold: u16,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            warm_up_pending_count: 4,
            placeholder_trigger_threshold: 1,
            wraparound_threshold: 8192,
        }
    }
}

/// Tick pacing, history and diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_rate_hz: u32,
    pub history_duration_seconds: f64,
    /// Streams with fewer emitted frames than this are not sampled yet
    pub cold_start_frames: u64,
    pub diagnostic_queue_depth_warning: usize,
    pub diagnostic_interval_ticks: u64,
    /// Drift beyond this resynchronizes the schedule instead of catching up
    pub drift_resync_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            history_duration_seconds: DEFAULT_HISTORY_SECONDS,
            cold_start_frames: 10,
            diagnostic_queue_depth_warning: 25,
            diagnostic_interval_ticks: 5,
            drift_resync_ms: 1000,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz as f64)
    }

    pub fn drift_resync(&self) -> Duration {
        Duration::from_millis(self.drift_resync_ms)
    }

    /// Number of ticks the history retains
    pub fn history_capacity(&self) -> usize {
        (self.history_duration_seconds * self.tick_rate_hz as f64).round() as usize
    }
}

/// Replay window extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub voice_activity_threshold: f32,
    /// Maximum ticks scanned when looking for speech onset
    pub trim_scan_limit: usize,
    /// Ticks kept before the detected onset
    pub onset_lead_in_ticks: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            voice_activity_threshold: 0.05,
            trim_scan_limit: 50,
            onset_lead_in_ticks: 10,
        }
    }
}

impl RecorderConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Load from the platform config directory, falling back to defaults
    /// when no file exists there
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/voice-replay/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voice-replay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.codec.channels == 0 || self.codec.channels > 2 {
            return Err(ConfigError::invalid(
                "codec.channels",
                format!("{} (expected 1 or 2)", self.codec.channels),
            ));
        }
        if self.codec.samples_per_frame() == 0 {
            return Err(ConfigError::invalid("codec.frame_duration_ms", "frame is empty"));
        }
        if self.scheduler.tick_rate_hz == 0 {
            return Err(ConfigError::invalid("scheduler.tick_rate_hz", "must be positive"));
        }
        if !(self.scheduler.history_duration_seconds > 0.0) {
            return Err(ConfigError::invalid(
                "scheduler.history_duration_seconds",
                "must be positive",
            ));
        }
        if self.scheduler.history_capacity() == 0 {
            return Err(ConfigError::invalid(
                "scheduler.history_duration_seconds",
                "history would hold no ticks",
            ));
        }
        if self.scheduler.diagnostic_interval_ticks == 0 {
            return Err(ConfigError::invalid(
                "scheduler.diagnostic_interval_ticks",
                "must be positive",
            ));
        }
        if self.jitter.warm_up_pending_count == 0 {
            return Err(ConfigError::invalid("jitter.warm_up_pending_count", "must be positive"));
        }
        if self.jitter.wraparound_threshold == 0 {
            return Err(ConfigError::invalid("jitter.wraparound_threshold", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.replay.voice_activity_threshold) {
            return Err(ConfigError::invalid(
                "replay.voice_activity_threshold",
                format!("{} (expected 0.0-1.0)", self.replay.voice_activity_threshold),
            ));
        }
        Ok(())
    }
}
