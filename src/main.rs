//! Terminal front end for the capture session controller.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk.  On first run the defaults are written
//!    out so there is a `settings.toml` to edit.
//! 3. Build the [`LoopbackEngine`] and the [`SessionController`].
//! 4. Spawn a thread that prints [`SessionEvent`]s.
//! 5. Read commands from stdin until `quit` or EOF; dropping the
//!    controller stops a running session.

use std::io::{self, BufRead, Write};
use std::sync::{mpsc, Arc};

use anyhow::{Context, Result};
use capture_session::{
    config::{AppConfig, AppPaths},
    engine::LoopbackEngine,
    session::{SessionController, SessionError, SessionEvent},
};

const HELP: &str = "commands: start, stop, status, level, quit";

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("capture-session starting up");

    // 2. Configuration
    let paths = AppPaths::new();
    let first_run = !paths.settings_file.exists();
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    if first_run {
        match config.save() {
            Ok(()) => log::info!("Wrote default settings to {}", paths.settings_file.display()),
            Err(e) => log::warn!("Could not write default settings: {e}"),
        }
    }

    // 3. Engine + controller
    let engine = Arc::new(
        LoopbackEngine::new(config.engine.clone()).context("invalid engine configuration")?,
    );
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>();
    let controller =
        SessionController::new(engine.clone(), config.session.clone()).with_events(event_tx);

    // 4. Event printer, standing in for the start/stop notifications
    let printer = std::thread::Builder::new()
        .name("session-events".into())
        .spawn(move || {
            for event in event_rx {
                match event {
                    SessionEvent::Started => println!("recording started"),
                    SessionEvent::CaptureFailed { message } => {
                        println!("capture failed: {message}")
                    }
                    SessionEvent::Stopped { duration } => {
                        println!("recording stopped ({:.1}s)", duration.as_secs_f32())
                    }
                }
            }
        })
        .context("failed to spawn event printer")?;

    // 5. Command loop
    println!("{HELP}");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        match line.trim() {
            "start" => match controller.begin() {
                Ok(()) => {}
                Err(SessionError::AlreadyRecording) => println!("already recording"),
                Err(e) => println!("could not start: {e}"),
            },
            "stop" => {
                if let Err(e) = controller.end() {
                    println!("session ended with error: {e}");
                }
            }
            "status" => println!("{}", controller.state().label()),
            "level" => println!("{:.3}", engine.level()),
            "quit" | "exit" => break,
            "" => {}
            other => println!("unknown command `{other}` ({HELP})"),
        }
        io::stdout().flush().ok();
    }

    drop(controller);
    if printer.join().is_err() {
        log::warn!("event printer panicked");
    }
    log::info!("capture-session shut down");
    Ok(())
}
