//! Observable session state and the events emitted on transitions.

use std::time::Duration;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// States of the recording session.
///
/// ```text
/// Idle ──begin()──▶ Recording ──end()──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No worker thread exists.
    #[default]
    Idle,
    /// A worker thread owned by the controller hosts the capture.
    Recording,
}

impl SessionState {
    /// ```
    /// use capture_session::session::SessionState;
    ///
    /// assert!(SessionState::Recording.is_recording());
    /// assert!(!SessionState::Idle.is_recording());
    /// ```
    pub fn is_recording(&self) -> bool {
        matches!(self, SessionState::Recording)
    }

    /// A short human-readable label for status output.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Recording => "Recording",
        }
    }
}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// Notifications delivered to the caller over an `mpsc` channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The worker thread of a new session is running; sent from the worker
    /// before it calls into the engine.
    Started,
    /// The engine returned an error; sent from the worker thread as soon as
    /// `start_capture` gives up, before anyone calls `end()`.
    CaptureFailed { message: String },
    /// The worker was joined.  `duration` runs from `begin()` to the join.
    Stopped { duration: Duration },
}
