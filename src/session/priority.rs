//! Best-effort scheduling priority for the calling thread.
//!
//! Unix: try the `SCHED_RR` real-time class at its maximum priority, which
//! usually needs `CAP_SYS_NICE` or an `RLIMIT_RTPRIO` grant.  On Linux, fall
//! back to the lowest niceness the process is allowed (`RLIMIT_NICE`).
//! Everything else reports [`PriorityError::Unsupported`].

use thiserror::Error;

/// Priority the thread ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    /// Real-time round-robin scheduling at `priority`.
    Realtime { priority: i32 },
    /// Time-sharing scheduling at this niceness (lower runs sooner).
    Niceness(i32),
}

#[derive(Debug, Error)]
pub enum PriorityError {
    #[error("thread priority elevation is not supported on this platform")]
    Unsupported,

    #[error("thread priority elevation denied: {0}")]
    Denied(#[source] std::io::Error),
}

/// Raise the calling thread's priority as far as the platform permits.
///
/// `realtime` enables the real-time attempt; without it only niceness is
/// tried.  Only the calling thread is affected.
pub fn elevate_current_thread(realtime: bool) -> Result<Elevation, PriorityError> {
    imp::elevate(realtime)
}

#[cfg(unix)]
mod imp {
    use std::io;

    use super::{Elevation, PriorityError};

    pub(super) fn elevate(realtime: bool) -> Result<Elevation, PriorityError> {
        let mut denied = None;
        if realtime {
            match set_round_robin() {
                Ok(priority) => return Ok(Elevation::Realtime { priority }),
                Err(e) => {
                    log::debug!("priority: SCHED_RR refused ({e})");
                    denied = Some(e);
                }
            }
        }

        match lower_niceness() {
            Ok(Some(niceness)) => Ok(Elevation::Niceness(niceness)),
            Ok(None) => Err(denied.map_or(PriorityError::Unsupported, PriorityError::Denied)),
            Err(e) => Err(PriorityError::Denied(e)),
        }
    }

    fn set_round_robin() -> io::Result<i32> {
        // SAFETY: takes a policy constant, touches no memory.
        let max = unsafe { libc::sched_get_priority_max(libc::SCHED_RR) };
        if max < 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: an all-zero sched_param is valid on every libc; only
        // sched_priority is meaningful for SCHED_RR.
        let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
        param.sched_priority = max;

        // SAFETY: pthread_self() is the live calling thread and `param`
        // outlives the call.
        let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(max)
    }

    /// Walk niceness from -20 toward 0 and keep the first value accepted.
    #[cfg(target_os = "linux")]
    fn lower_niceness() -> io::Result<Option<i32>> {
        // SAFETY: gettid has no arguments and cannot fail.
        let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;

        let mut last_err = None;
        for niceness in -20..0 {
            // On Linux, PRIO_PROCESS with a thread id targets that thread only.
            // SAFETY: plain syscall wrapper, no pointers involved.
            let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, niceness) };
            if rc == 0 {
                return Ok(Some(niceness));
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EACCES) | Some(libc::EPERM) => last_err = Some(err),
                _ => return Err(err),
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn lower_niceness() -> io::Result<Option<i32>> {
        Ok(None)
    }
}

#[cfg(not(unix))]
mod imp {
    use super::{Elevation, PriorityError};

    pub(super) fn elevate(_realtime: bool) -> Result<Elevation, PriorityError> {
        Err(PriorityError::Unsupported)
    }
}
