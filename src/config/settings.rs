//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//! Missing keys fall back to their defaults, so a hand-written
//! `settings.toml` only needs the values it changes.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppPaths;

/// Sample rates the capture engine accepts, in Hz.
pub const SUPPORTED_SAMPLE_RATES: [u32; 12] = [
    8_000, 11_025, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000, 64_000, 88_200, 96_000,
    192_000,
];

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A setting that loaded fine but cannot be used.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error("input_channels must be at least 1")]
    NoInputChannels,

    #[error("buffer_frames must be greater than 0")]
    EmptyBuffer,

    #[error("monitor_latency_frames must be greater than 0")]
    EmptyMonitorBuffer,

    #[error("poll_interval_ms must be greater than 0")]
    ZeroPollInterval,

    #[error("worker_name must not contain NUL bytes")]
    WorkerNameNul,
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Settings for the session controller and its worker thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Raise the worker thread's scheduling priority before capture starts.
    pub elevate_priority: bool,
    /// Try a real-time scheduling class before falling back to niceness.
    pub realtime_scheduling: bool,
    /// OS-visible name of the worker thread.
    pub worker_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            elevate_priority: true,
            realtime_scheduling: true,
            worker_name: "capture-worker".into(),
        }
    }
}

impl SessionConfig {
    /// Check the values the worker thread is spawned with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_name.contains('\0') {
            return Err(ConfigError::WorkerNameNul);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Settings for the loopback capture engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stream sample rate in Hz, shared by input and output.
    pub sample_rate: u32,
    /// Number of channels captured from the input device.
    pub input_channels: u16,
    /// Number of channels played on the output device.  `0` disables the
    /// output stream even when `monitor` is on.
    pub output_channels: u16,
    /// Fixed device buffer size in frames.  `None` lets the host decide.
    pub buffer_frames: Option<u32>,
    /// Play the captured input back through the default output device.
    pub monitor: bool,
    /// Frames of captured audio held for the output stream before the
    /// oldest are dropped.
    pub monitor_latency_frames: usize,
    /// How often a blocked `start_capture` checks for a stream fault.
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            input_channels: 1,
            output_channels: 2,
            buffer_frames: None,
            monitor: true,
            monitor_latency_frames: 4_096,
            poll_interval_ms: 50,
        }
    }
}

impl EngineConfig {
    /// Check the values a device stream would be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(ConfigError::UnsupportedSampleRate(self.sample_rate));
        }
        if self.input_channels == 0 {
            return Err(ConfigError::NoInputChannels);
        }
        if self.buffer_frames == Some(0) {
            return Err(ConfigError::EmptyBuffer);
        }
        if self.monitor_latency_frames == 0 {
            return Err(ConfigError::EmptyMonitorBuffer);
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use capture_session::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// assert!(config.session.elevate_priority);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Controller / worker thread settings.
    pub session: SessionConfig,
    /// Capture engine settings.
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path, then validate.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.session.validate()?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
