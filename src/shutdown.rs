//! Cooperative shutdown signalling.
//!
//! A SIGINT/SIGTERM handler stores a process-wide atomic flag; the main
//! loop receives the flag as an explicit token and checks it once per tick.
//! The handler performs a single atomic store, which is async-signal-safe.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Token observed by the main loop at each tick boundary. Once set it
/// never clears, so `Ordering::Relaxed` is sufficient.
#[derive(Clone, Copy)]
pub struct ShutdownFlag {
    flag: &'static AtomicBool,
}

impl ShutdownFlag {
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn manual() -> Self {
        // Leaked so tests get an independent 'static flag each.
        Self {
            flag: Box::leak(Box::new(AtomicBool::new(false))),
        }
    }

    #[cfg(test)]
    pub fn set(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

extern "C" fn handle_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Registers SIGINT and SIGTERM handlers and returns the token they set.
pub fn install() -> ShutdownFlag {
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as *const () as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as *const () as libc::sighandler_t);
    }
    ShutdownFlag { flag: &SHUTDOWN }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_flag_starts_clear_and_latches() {
        let flag = ShutdownFlag::manual();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
        assert!(flag.is_set());
    }

    #[test]
    fn manual_flags_are_independent() {
        let a = ShutdownFlag::manual();
        let b = ShutdownFlag::manual();
        a.set();
        assert!(!b.is_set());
    }
}
