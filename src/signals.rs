//! Termination signal handling
//!
//! SIGINT and SIGTERM only raise a flag. The stage poll loop checks the flag between sleeps and
//! cancels the in-flight scheduler job before the driver stops.
//!

use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;

static CANCEL_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_signal: libc::c_int) {
    CANCEL_REQUESTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT and SIGTERM handlers, returning the flag they raise
pub fn install_handlers() -> &'static AtomicBool {
    for signal in [libc::SIGINT, libc::SIGTERM] {
        // The handler only performs an atomic store, which is async-signal-safe
        let previous = unsafe {
            libc::signal(
                signal,
                handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t,
            )
        };
        if previous == libc::SIG_ERR {
            warn!("Unable to install handler for signal {signal}, cancellation is unavailable");
        }
    }
    &CANCEL_REQUESTED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_raises_flag() {
        let flag = install_handlers();
        assert!(!flag.load(Ordering::SeqCst));
        unsafe {
            libc::raise(libc::SIGTERM);
        }
        assert!(flag.load(Ordering::SeqCst));
        flag.store(false, Ordering::SeqCst);
    }
}
