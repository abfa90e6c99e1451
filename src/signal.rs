//! `SIGINT`/`SIGTERM`/`SIGQUIT` handling.
//!
//! The teacher's async `SignalFd`-based handler doesn't fit a
//! thread-per-worker model cleanly, so this is a fresh, minimal
//! equivalent: a process-wide flag set from a `sigaction` handler,
//! polled by every blocking loop after each message it processes.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

static ASKED_TO_STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_: libc::c_int) {
    ASKED_TO_STOP.store(true, Ordering::SeqCst);
}

/// Installs handlers for `SIGINT`, `SIGTERM`, and `SIGQUIT`. Must be
/// called once, early in `main`.
pub fn install_handlers() -> anyhow::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        signal::sigaction(Signal::SIGINT, &action)?;
        signal::sigaction(Signal::SIGTERM, &action)?;
        signal::sigaction(Signal::SIGQUIT, &action)?;
    }
    Ok(())
}

pub fn asked_to_stop() -> bool {
    ASKED_TO_STOP.load(Ordering::SeqCst)
}

/// Sends `SIGTERM` to our own process group, the fail-fast escalation
/// path. With OS threads standing in for OS processes, this still
/// reaches any child `pg_dump`/`pg_restore` invocations spawned by the
/// external collaborators.
pub fn terminate_process_group() -> anyhow::Result<()> {
    signal::killpg(nix::unistd::getpgrp(), Signal::SIGTERM)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear() {
        assert!(!asked_to_stop());
    }
}
