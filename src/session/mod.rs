//! Recording session lifecycle.
//!
//! [`SessionController`] owns at most one worker thread.  `begin()` spawns
//! it; the worker raises its own priority ([`priority`]) and blocks inside
//! [`CaptureEngine::start_capture`](crate::engine::CaptureEngine::start_capture).
//! `end()` asks the engine to stop, joins the worker, and returns the
//! engine's result.  Engines ignore a stop while no capture is running,
//! which [`StopSignal`](crate::engine::StopSignal) implements for them.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use capture_session::config::SessionConfig;
//! use capture_session::engine::{CaptureEngine, EngineError, StopSignal};
//! use capture_session::session::{SessionController, SessionState};
//!
//! #[derive(Default)]
//! struct IdleEngine(StopSignal);
//!
//! impl CaptureEngine for IdleEngine {
//!     fn start_capture(&self) -> Result<(), EngineError> {
//!         self.0.enter().wait();
//!         Ok(())
//!     }
//!     fn stop_capture(&self) {
//!         self.0.request_stop();
//!     }
//! }
//!
//! let controller = SessionController::new(Arc::new(IdleEngine::default()), SessionConfig::default());
//! controller.begin().unwrap();
//! assert_eq!(controller.state(), SessionState::Recording);
//! controller.end().unwrap();
//! assert_eq!(controller.state(), SessionState::Idle);
//! ```

pub mod controller;
pub mod priority;
pub mod state;

pub use controller::{SessionController, SessionError};
pub use priority::{elevate_current_thread, Elevation, PriorityError};
pub use state::{SessionEvent, SessionState};
