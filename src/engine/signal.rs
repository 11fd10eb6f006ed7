//! Stop handoff between `stop_capture` and a blocked `start_capture`.
//!
//! A stop request only reaches a capture that is running.  Every capture
//! registers itself with [`StopSignal::enter`] before doing anything
//! fallible and deregisters when the returned [`Capture`] guard drops.  A
//! request made while nothing is registered, or after the running capture
//! was already stopped, is a no-op, so a stray stop can never end a later
//! session.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Active {
    ticket: u64,
    stopped: bool,
}

#[derive(Debug, Default)]
struct Slot {
    issued: u64,
    active: Option<Active>,
}

impl Slot {
    /// A capture that is no longer registered counts as stopped.
    fn is_stopped(&self, ticket: u64) -> bool {
        match self.active {
            Some(active) if active.ticket == ticket => active.stopped,
            _ => true,
        }
    }
}

/// Stop latch shared by an engine's start and stop paths.
#[derive(Debug, Default)]
pub struct StopSignal {
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new capture.  Must be the first thing `start_capture`
    /// does; the capture stays stoppable until the guard drops.
    pub fn enter(&self) -> Capture<'_> {
        let mut slot = self.slot();
        slot.issued += 1;
        let ticket = slot.issued;
        if slot.active.is_some() {
            log::warn!("stop signal: capture {ticket} replaces one still registered");
        }
        slot.active = Some(Active {
            ticket,
            stopped: false,
        });
        Capture {
            signal: self,
            ticket,
        }
    }

    /// Stop the running capture and wake it.
    ///
    /// Returns `false`, changing nothing, when no capture is registered or
    /// the registered one was already stopped.
    pub fn request_stop(&self) -> bool {
        let mut slot = self.slot();
        match slot.active.as_mut() {
            Some(active) if !active.stopped => {
                active.stopped = true;
                self.changed.notify_all();
                true
            }
            _ => {
                log::debug!("stop signal: no running capture, request ignored");
                false
            }
        }
    }
}

/// Registration of one running capture, returned by [`StopSignal::enter`].
#[derive(Debug)]
pub struct Capture<'a> {
    signal: &'a StopSignal,
    ticket: u64,
}

impl Capture<'_> {
    /// Block until this capture is stopped.
    pub fn wait(&self) {
        let slot = self.signal.slot();
        let _slot = self
            .signal
            .changed
            .wait_while(slot, |s| !s.is_stopped(self.ticket))
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until this capture is stopped or `timeout` elapses.
    ///
    /// Returns `true` if the capture was stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let slot = self.signal.slot();
        let (slot, _) = self
            .signal
            .changed
            .wait_timeout_while(slot, timeout, |s| !s.is_stopped(self.ticket))
            .unwrap_or_else(PoisonError::into_inner);
        slot.is_stopped(self.ticket)
    }
}

impl Drop for Capture<'_> {
    fn drop(&mut self) {
        let mut slot = self.signal.slot();
        if matches!(slot.active, Some(active) if active.ticket == self.ticket) {
            slot.active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn stop_releases_waiting_capture() {
        let signal = Arc::new(StopSignal::new());

        let waiter = {
            let signal = Arc::clone(&signal);
            let (entered_tx, entered_rx) = std::sync::mpsc::channel();
            let waiter = std::thread::spawn(move || {
                let capture = signal.enter();
                entered_tx.send(()).unwrap();
                capture.wait();
            });
            entered_rx.recv().unwrap();
            waiter
        };

        std::thread::sleep(Duration::from_millis(10));
        assert!(!waiter.is_finished());

        assert!(signal.request_stop());
        waiter.join().unwrap();
    }

    #[test]
    fn stop_without_capture_is_ignored() {
        let signal = StopSignal::new();
        assert!(!signal.request_stop());

        let capture = signal.enter();
        assert!(!capture.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn second_stop_for_same_capture_is_ignored() {
        let signal = StopSignal::new();
        let capture = signal.enter();

        assert!(signal.request_stop());
        assert!(!signal.request_stop());
        capture.wait();
    }

    #[test]
    fn stop_after_capture_ended_does_not_reach_next() {
        let signal = StopSignal::new();

        // Capture fails on its own without waiting; the stop arrives afterwards.
        drop(signal.enter());
        assert!(!signal.request_stop());

        let next = signal.enter();
        assert!(!next.wait_timeout(Duration::from_millis(10)));
        assert!(signal.request_stop());
        assert!(next.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn capture_after_a_stopped_one_starts_running() {
        let signal = StopSignal::new();
        let first = signal.enter();
        assert!(signal.request_stop());
        first.wait();
        drop(first);

        let second = signal.enter();
        assert!(!second.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn wait_timeout_reports_timeout() {
        let signal = StopSignal::new();
        let capture = signal.enter();

        let start = Instant::now();
        assert!(!capture.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));

        signal.request_stop();
        assert!(capture.wait_timeout(Duration::from_millis(20)));
    }
}
