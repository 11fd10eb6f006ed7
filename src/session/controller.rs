//! Session controller: owns the capture worker thread between `begin()` and
//! `end()`.
//!
//! # Transition protocol
//!
//! ```text
//! begin()  lock ─▶ spawn worker ─▶ Recording ─▶ unlock
//!                     └─ worker: elevate priority ─▶ engine.start_capture() (blocks)
//!
//! end()    lock ─▶ engine.stop_capture() ─▶ wait for exit ─▶ join worker ─▶ Idle ─▶ unlock
//!                     ▲                    │
//!                     └── every 10 ms ─────┘
//! ```
//!
//! One mutex guards the whole transition, so overlapping `begin()`/`end()`
//! calls from different threads run one after another.  `end()` holds it for
//! the full join: once it returns, the worker no longer exists.
//!
//! An engine ignores a stop while no capture is running.  A worker that has
//! not reached `start_capture` yet would miss the first request, so `end()`
//! repeats it until the worker exits.  A capture honours only the first one.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::{ConfigError, SessionConfig};
use crate::engine::{CaptureEngine, EngineError};

use super::priority;
use super::state::{SessionEvent, SessionState};

/// How long `end()` waits for the worker before repeating the stop request.
const STOP_RESEND_INTERVAL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    /// `begin()` while a live worker exists.  Nothing was changed.
    #[error("a recording session is already running")]
    AlreadyRecording,

    /// The engine ended the capture with an error.  The controller is idle.
    #[error("capture engine failed: {0}")]
    Engine(#[from] EngineError),

    /// The worker thread panicked.  The controller is idle.
    #[error("capture worker panicked")]
    WorkerPanicked,

    /// The OS refused to create the worker thread.  The controller is idle.
    #[error("failed to spawn capture worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The session settings cannot be used to start a worker.
    #[error("invalid session configuration: {0}")]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

type WorkerHandle = JoinHandle<Result<(), EngineError>>;

struct Worker {
    handle: WorkerHandle,
    /// Disconnects when the worker thread exits, panicking or not.
    exited: mpsc::Receiver<()>,
    started_at: Instant,
}

/// The worker handle exists exactly while recording.
enum Session {
    Idle,
    Recording(Worker),
}

impl Session {
    fn take(&mut self) -> Option<Worker> {
        match std::mem::replace(self, Session::Idle) {
            Session::Recording(worker) => Some(worker),
            Session::Idle => None,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Starts and stops capture sessions on a dedicated worker thread.
///
/// - `begin()` while recording returns [`SessionError::AlreadyRecording`]
///   and never spawns a second worker.  If the previous worker already
///   finished on its own (engine error), it is reaped and a new session
///   starts.
/// - `end()` while idle is a no-op returning `Ok(())`.
/// - Dropping the controller while recording runs `end()` first.
pub struct SessionController {
    engine: Arc<dyn CaptureEngine>,
    config: SessionConfig,
    events: Option<mpsc::Sender<SessionEvent>>,
    session: Mutex<Session>,
}

impl SessionController {
    pub fn new(engine: Arc<dyn CaptureEngine>, config: SessionConfig) -> Self {
        Self {
            engine,
            config,
            events: None,
            session: Mutex::new(Session::Idle),
        }
    }

    /// Deliver [`SessionEvent`]s to `tx`.  Send failures are ignored.
    pub fn with_events(mut self, tx: mpsc::Sender<SessionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Blocks while another thread is inside `begin()`/`end()`.
    pub fn state(&self) -> SessionState {
        match *self.lock() {
            Session::Idle => SessionState::Idle,
            Session::Recording(_) => SessionState::Recording,
        }
    }

    /// `true` while recording and the worker is still inside the engine.
    pub fn is_capturing(&self) -> bool {
        match &*self.lock() {
            Session::Idle => false,
            Session::Recording(worker) => !worker.handle.is_finished(),
        }
    }

    /// Start a session: spawn the worker and return without waiting for the
    /// engine.
    pub fn begin(&self) -> Result<(), SessionError> {
        let mut session = self.lock();

        if let Session::Recording(worker) = &*session {
            if !worker.handle.is_finished() {
                log::debug!("session: begin() ignored, already recording");
                return Err(SessionError::AlreadyRecording);
            }
        }
        if let Some(previous) = session.take() {
            log::debug!("session: reaping worker that ended on its own");
            if let Err(e) = self.finish(previous) {
                log::warn!("session: previous session ended with error: {e}");
            }
        }

        let (handle, exited) = self.spawn_worker()?;
        *session = Session::Recording(Worker {
            handle,
            exited,
            started_at: Instant::now(),
        });
        log::info!("session: recording started");
        Ok(())
    }

    /// Stop the session and wait for the worker to exit.
    ///
    /// Returns the engine's error if the capture failed.  The controller is
    /// idle afterwards in every case.
    pub fn end(&self) -> Result<(), SessionError> {
        let mut session = self.lock();
        match session.take() {
            Some(worker) => self.finish(worker),
            None => {
                log::debug!("session: end() ignored, not recording");
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// A poisoned lock still holds a consistent `Session`: every mutation is
    /// a single assignment.
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn spawn_worker(&self) -> Result<(WorkerHandle, mpsc::Receiver<()>), SessionError> {
        self.config.validate()?;

        let engine = Arc::clone(&self.engine);
        let events = self.events.clone();
        let elevate = self.config.elevate_priority;
        let realtime = self.config.realtime_scheduling;
        let (exit_tx, exit_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(self.config.worker_name.clone())
            .spawn(move || {
                // Dropped on return and on unwind alike.
                let _exit = exit_tx;
                // Sent from here so it always precedes CaptureFailed.
                if let Some(tx) = &events {
                    let _ = tx.send(SessionEvent::Started);
                }
                if elevate {
                    match priority::elevate_current_thread(realtime) {
                        Ok(level) => log::debug!("capture worker: priority raised to {level:?}"),
                        Err(e) => log::warn!("capture worker: running at default priority ({e})"),
                    }
                }

                let result = engine.start_capture();
                if let Err(e) = &result {
                    log::error!("capture worker: engine stopped with error: {e}");
                    if let Some(tx) = events {
                        let _ = tx.send(SessionEvent::CaptureFailed {
                            message: e.to_string(),
                        });
                    }
                }
                result
            })
            .map_err(SessionError::Spawn)?;
        Ok((handle, exit_rx))
    }

    /// Stop, join, report.
    fn finish(&self, worker: Worker) -> Result<(), SessionError> {
        self.engine.stop_capture();
        while let Err(RecvTimeoutError::Timeout) = worker.exited.recv_timeout(STOP_RESEND_INTERVAL)
        {
            log::trace!("session: worker still running, repeating stop request");
            self.engine.stop_capture();
        }

        let outcome = match worker.handle.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Engine(e)),
            Err(_) => {
                log::error!("session: capture worker panicked");
                Err(SessionError::WorkerPanicked)
            }
        };

        let duration = worker.started_at.elapsed();
        log::info!("session: recording stopped after {:.2}s", duration.as_secs_f32());
        self.notify(SessionEvent::Stopped { duration });
        outcome
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Err(e) = self.end() {
            log::warn!("session: stop on drop reported: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
