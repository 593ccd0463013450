//! Termination signal handling.
//!
//! The handler only stores into atomics: everything else is deferred to
//! the main loop, whose single blocking point is the wait() call.  The
//! handlers are installed without SA_RESTART, so a signal arriving during
//! wait() makes it fail with EINTR and the loop observes the flag in
//! normal context, terminates outstanding jobs, removes partially built
//! files, and re-raises the signal to die with the proper status.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// The signals that terminate a build.
pub const TERMINATING: [libc::c_int; 4] =
    [libc::SIGINT, libc::SIGTERM, libc::SIGQUIT, libc::SIGHUP];

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn handler(sig: libc::c_int) {
    SIGNAL.store(sig, Ordering::Relaxed);
    INTERRUPTED.store(true, Ordering::Relaxed);
}

pub fn register() {
    // Safety: registering a signal handler is libc unsafe code.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler as libc::sighandler_t;
        for sig in TERMINATING {
            libc::sigaction(sig, &sa, std::ptr::null_mut());
        }
    }
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Die from the received signal, after cleanup has run: restore the
/// default disposition and re-raise, so the exit status reports the
/// signal.
pub fn die() -> ! {
    let sig = SIGNAL.load(Ordering::Relaxed);
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = libc::SIG_DFL;
        libc::sigaction(sig, &sa, std::ptr::null_mut());
        libc::raise(sig);
    }
    // Unreachable for the terminating signals, but don't return.
    std::process::exit(128 + sig);
}
