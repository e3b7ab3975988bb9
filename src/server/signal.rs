//! Cancellation: SIGINT/SIGTERM and programmatic shutdown requests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use tracing::debug;

use crate::error::{Error, Result};

static SIGNALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_signal: nix::libc::c_int) {
    SIGNALLED.store(true, Ordering::SeqCst);
}

/// Install SIGINT and SIGTERM handlers that request shutdown.
///
/// The handlers are installed without `SA_RESTART`, so a blocked `poll`
/// returns `EINTR` and the loop notices the request in the same cycle.
///
/// # Errors
///
/// Returns `Error::Io` if `sigaction` fails.
pub fn install_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
        unsafe { sigaction(signal, &action) }
            .map_err(|e| Error::Io(format!("sigaction({signal}): {e}")))?;
        debug!(%signal, "installed shutdown handler");
    }
    Ok(())
}

/// Cancellation token checked by the event loop once per cycle.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// A token with no request pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to shut down at its next cycle.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown was requested here or by a signal.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst) || SIGNALLED.load(Ordering::SeqCst)
    }
}
