//! Unix signal handling for the control loop.
//!
//! SIGTERM and SIGINT request shutdown. SIGHUP is recorded and logged only;
//! the kernel configuration is fixed once the dispatcher runs.
//!
//! The raw handlers only set bits in a static mask. A watcher thread moves
//! them into [`SignalState`], which the control loop polls between
//! dispatcher iterations.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Signals the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SignalKind {
    /// SIGTERM.
    Terminate = 1,
    /// SIGINT.
    Interrupt = 2,
    /// SIGHUP.
    Hangup = 4,
}

impl SignalKind {
    const ALL: [Self; 3] = [Self::Terminate, Self::Interrupt, Self::Hangup];

    fn bit(self) -> u32 {
        self as u32
    }

    fn from_bit(bit: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.bit() == bit)
    }

    /// Whether this signal asks the daemon to stop.
    #[must_use]
    pub fn is_shutdown(self) -> bool {
        matches!(self, Self::Terminate | Self::Interrupt)
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminate => write!(f, "SIGTERM"),
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// Bits set by the raw handlers, drained by the watcher thread.
static PENDING: AtomicU32 = AtomicU32::new(0);

/// Signal flags shared between the watcher thread and the control loop.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    hangups: AtomicU32,
    signal_count: AtomicU32,
    last_signal: AtomicU32,
}

impl SignalState {
    /// Fresh state with nothing received.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Request shutdown from any thread.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }

    /// Number of SIGHUPs not yet taken, cleared by this call.
    pub fn take_hangups(&self) -> u32 {
        self.hangups.swap(0, Ordering::AcqRel)
    }

    fn record(&self, kind: SignalKind) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
        self.last_signal.store(kind.bit(), Ordering::Relaxed);
        if kind.is_shutdown() {
            self.request_shutdown();
        } else {
            self.hangups.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Total signals received.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }

    /// Most recent signal, if any.
    pub fn last_signal(&self) -> Option<SignalKind> {
        SignalKind::from_bit(self.last_signal.load(Ordering::Relaxed))
    }
}

/// Installs the handlers and owns the watcher thread's shared state.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Install handlers for SIGTERM, SIGINT and SIGHUP.
    ///
    /// On non-Unix targets only [`SignalHandler::request_shutdown`] works.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler cannot be installed or the watcher
    /// thread cannot be spawned.
    pub fn new() -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(SignalState::new()),
        };

        #[cfg(unix)]
        handler.install()?;

        Ok(handler)
    }

    #[cfg(unix)]
    #[allow(unsafe_code)]
    fn install(&self) -> std::io::Result<()> {
        extern "C" fn on_signal(signum: libc::c_int) {
            let kind = match signum {
                libc::SIGTERM => SignalKind::Terminate,
                libc::SIGINT => SignalKind::Interrupt,
                _ => SignalKind::Hangup,
            };
            PENDING.fetch_or(kind.bit(), Ordering::SeqCst);
        }

        for signum in [libc::SIGTERM, libc::SIGINT, libc::SIGHUP] {
            // SAFETY: `on_signal` only touches an atomic, which is
            // async-signal-safe.
            let previous = unsafe { libc::signal(signum, on_signal as libc::sighandler_t) };
            if previous == libc::SIG_ERR {
                return Err(std::io::Error::last_os_error());
            }
        }

        let state = Arc::clone(&self.state);
        std::thread::Builder::new()
            .name("rk-signals".into())
            .spawn(move || watch(&state))?;

        debug!("Signal handlers installed");
        Ok(())
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }

    /// Request shutdown without a signal.
    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.state.request_shutdown();
    }

    /// Shared state, for inspection.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}

/// Move pending signal bits into `state` until shutdown is requested.
fn watch(state: &SignalState) {
    while !state.shutdown_requested() {
        let pending = PENDING.swap(0, Ordering::SeqCst);
        for kind in SignalKind::ALL {
            if pending & kind.bit() != 0 {
                info!(signal = %kind, "Signal received");
                state.record(kind);
            }
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Log and discard any SIGHUPs received since the last call.
pub fn drain_hangups(handler: &SignalHandler) {
    let hangups = handler.state().take_hangups();
    if hangups > 0 {
        warn!(hangups, "SIGHUP received; configuration reload is not supported");
    }
}
