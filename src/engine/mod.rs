//! Capture engines: the blocking audio side of a recording session.
//!
//! # Architecture
//!
//! ```text
//! SessionController ── worker thread ──▶ CaptureEngine::start_capture()  (blocks)
//!        │                                        ▲
//!        └──────── end() ──▶ CaptureEngine::stop_capture() ─ StopSignal ┘
//! ```
//!
//! [`CaptureEngine`] is object-safe and `Send + Sync` so the controller can
//! hold it behind an `Arc<dyn CaptureEngine>` and call it from both the
//! caller's thread and the worker thread.
//!
//! [`LoopbackEngine`] (feature `device`) is the cpal-backed implementation.

pub mod buffer;
#[cfg(feature = "device")]
pub mod loopback;
#[cfg(test)]
pub mod scripted;
pub mod signal;

use thiserror::Error;

use crate::config::ConfigError;

pub use buffer::SampleFifo;
#[cfg(feature = "device")]
pub use loopback::LoopbackEngine;
#[cfg(test)]
pub use scripted::ScriptedEngine;
pub use signal::{Capture, StopSignal};

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors an engine reports from [`CaptureEngine::start_capture`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no input device found on the default audio host")]
    NoInputDevice,

    #[error("no output device found on the default audio host")]
    NoOutputDevice,

    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),

    #[cfg(feature = "device")]
    #[error("failed to build audio stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[cfg(feature = "device")]
    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[cfg(feature = "device")]
    #[error("failed to query default stream config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[cfg(feature = "device")]
    #[error("unsupported sample format: {0:?}")]
    UnsupportedSampleFormat(cpal::SampleFormat),

    /// The device reported an error while the session was running.
    #[error("audio stream failed: {0}")]
    Stream(String),

    #[error("audio device error: {0}")]
    Device(String),
}

// ---------------------------------------------------------------------------
// CaptureEngine trait
// ---------------------------------------------------------------------------

/// The external capture subsystem driven by a recording session.
///
/// # Contract
///
/// - `start_capture` blocks for the whole session and returns only after a
///   stop request or an unrecoverable device error.
/// - `stop_capture` is fast.  Each call ends exactly one capture: the one
///   in progress, or the next one to start if the worker has not reached
///   `start_capture` yet.  The controller calls it exactly once per session.
pub trait CaptureEngine: Send + Sync {
    /// Capture until stopped.
    fn start_capture(&self) -> Result<(), EngineError>;

    /// Ask the running (or about-to-run) capture to return.
    fn stop_capture(&self);
}

// Compile-time assertion: Box<dyn CaptureEngine> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn CaptureEngine>) {}
};
