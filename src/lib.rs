//! Recording session controller.
//!
//! Starts and stops a blocking audio capture on a dedicated, priority-raised
//! worker thread, and guarantees that once a session is ended no capture
//! work is still in flight.
//!
//! * [`session`]: the controller, its state and events.
//! * [`engine`]: the [`CaptureEngine`](engine::CaptureEngine) seam and the
//!   cpal loopback engine.
//! * [`config`]: TOML settings.

pub mod config;
pub mod engine;
pub mod session;
