//! Test double for [`CaptureEngine`] with scripted behaviour and counters.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{CaptureEngine, EngineError, StopSignal};

/// Engine that blocks until stopped, optionally failing or panicking on the
/// next capture, and counts how many captures ran at once.
#[derive(Default)]
pub struct ScriptedEngine {
    signal: StopSignal,
    /// Time spent "releasing the device" after the stop request.
    release_delay: Duration,
    fail_next: Mutex<Option<String>>,
    panic_next: AtomicBool,
    live: AtomicUsize,
    peak: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    stop_requests: AtomicUsize,
}

/// Decrements the live count even when the capture panics.
struct LiveGuard<'a>(&'a AtomicUsize);

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_release_delay(delay: Duration) -> Self {
        Self {
            release_delay: delay,
            ..Self::default()
        }
    }

    /// Make the next `start_capture` return a device error immediately.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock().unwrap() = Some(message.into());
    }

    /// Make the next `start_capture` panic immediately.
    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    /// Captures currently inside `start_capture`.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous captures seen.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Stop requests that ended a running capture.
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Every `stop_capture` call, including ignored ones.
    pub fn stop_requests(&self) -> usize {
        self.stop_requests.load(Ordering::SeqCst)
    }

    /// Poll until `starts() >= n`, giving up after one second.
    pub fn wait_for_starts(&self, n: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(1);
        while self.starts() < n {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl CaptureEngine for ScriptedEngine {
    fn start_capture(&self) -> Result<(), EngineError> {
        let capture = self.signal.enter();

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = LiveGuard(&self.live);
        self.peak.fetch_max(live, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);

        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("scripted engine panic");
        }
        if let Some(message) = self.fail_next.lock().unwrap().take() {
            return Err(EngineError::Device(message));
        }

        capture.wait();
        std::thread::sleep(self.release_delay);
        Ok(())
    }

    fn stop_capture(&self) {
        self.stop_requests.fetch_add(1, Ordering::SeqCst);
        if self.signal.request_stop() {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}
