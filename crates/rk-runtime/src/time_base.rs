//! Monotonic millisecond time base and the periodic tick that drives it.
//!
//! The time base is a single 64-bit counter advanced by the configured
//! period on every tick. It is written only by the tick source and read by
//! producers (to compute due times) and by the dispatcher (to gate the
//! queue head).
//!
//! The period is checked against a 24-bit down-counter reload register
//! clocked from the core clock, the same limit the rover board's tick
//! hardware has:
//!
//! ```text
//! reload = period_ms * (clock_hz / 1000)      1 <= reload <= 2^24
//! ```
//!
//! At the default 120 MHz core clock this allows periods of 1..=139 ms.

use crossbeam_utils::CachePadded;
use rk_common::error::{KernelError, KernelResult};
use rk_common::time::{duration_to_millis, Millis};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Largest value the tick reload register accepts.
pub const MAX_RELOAD: u64 = 1 << 24;

/// Compute the reload value for `period_ms` at `clock_hz`.
///
/// # Errors
///
/// Returns [`KernelError::InvalidTickPeriod`] if the period is zero or the
/// reload value falls outside `1..=2^24`.
pub fn reload_value(period_ms: Millis, clock_hz: u64) -> KernelResult<u64> {
    let invalid = |reason: String| KernelError::InvalidTickPeriod { period_ms, reason };

    if period_ms == 0 {
        return Err(invalid("period must be at least 1ms".into()));
    }
    let cycles = period_ms
        .checked_mul(clock_hz / 1000)
        .ok_or_else(|| invalid("reload value overflows".into()))?;
    if cycles < 1 {
        return Err(invalid(format!("clock {clock_hz}Hz is too slow for a 1-cycle reload")));
    }
    if cycles > MAX_RELOAD {
        return Err(invalid(format!(
            "reload value {cycles} exceeds {MAX_RELOAD} at {clock_hz}Hz"
        )));
    }
    Ok(cycles)
}

/// Monotonic millisecond counter.
#[derive(Debug)]
pub struct TimeBase {
    now_ms: CachePadded<AtomicU64>,
    period_ms: Millis,
}

impl TimeBase {
    /// Create a time base at t=0 advancing by `period` per tick.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidTickPeriod`] if the period is not a
    /// whole number of milliseconds or cannot be programmed at `clock_hz`.
    pub fn new(period: Duration, clock_hz: u64) -> KernelResult<Self> {
        let period_ms = duration_to_millis(period);
        if period.subsec_nanos() % 1_000_000 != 0 {
            return Err(KernelError::InvalidTickPeriod {
                period_ms,
                reason: format!("{period:?} is not a whole number of milliseconds"),
            });
        }
        reload_value(period_ms, clock_hz)?;
        Ok(Self {
            now_ms: CachePadded::new(AtomicU64::new(0)),
            period_ms,
        })
    }

    /// Milliseconds since start.
    #[inline]
    #[must_use]
    pub fn now_ms(&self) -> Millis {
        self.now_ms.load(Ordering::Acquire)
    }

    /// Advance by one period and return the new time.
    #[inline]
    pub fn tick(&self) -> Millis {
        self.now_ms.fetch_add(self.period_ms, Ordering::AcqRel) + self.period_ms
    }

    /// Move the clock forward to `ms` (never backwards).
    ///
    /// For simulations and tests that drive time directly.
    pub fn advance_to(&self, ms: Millis) {
        self.now_ms.fetch_max(ms, Ordering::AcqRel);
    }

    /// Milliseconds added per tick.
    #[must_use]
    pub fn period_ms(&self) -> Millis {
        self.period_ms
    }

    /// Tick period.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Background thread ticking a [`TimeBase`] once per period.
///
/// The tick source only touches the time base, never the queue.
#[derive(Debug)]
pub struct TickSource {
    time_base: Arc<TimeBase>,
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
}

impl TickSource {
    /// Create a stopped tick source for `time_base`.
    #[must_use]
    pub fn new(time_base: Arc<TimeBase>) -> Self {
        Self {
            time_base,
            handle: None,
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start ticking.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::TickSourceRunning`] if already started, or
    /// [`KernelError::Config`] if the thread cannot be spawned.
    pub fn start(&mut self) -> KernelResult<()> {
        if self.running.load(Ordering::Acquire) {
            return Err(KernelError::TickSourceRunning);
        }

        let period = self.time_base.period();
        info!(period_ms = self.time_base.period_ms(), "Starting tick source");

        self.stop_requested.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);

        let time_base = Arc::clone(&self.time_base);
        let running = Arc::clone(&self.running);
        let stop_requested = Arc::clone(&self.stop_requested);

        let handle = match thread::Builder::new()
            .name("rk-tick".into())
            .spawn(move || {
                debug!("Tick thread started");
                let mut next = Instant::now() + period;

                while !stop_requested.load(Ordering::Acquire) {
                    thread::sleep(next.saturating_duration_since(Instant::now()));
                    if stop_requested.load(Ordering::Acquire) {
                        break;
                    }
                    time_base.tick();
                    next += period;
                }

                running.store(false, Ordering::Release);
                debug!(now_ms = time_base.now_ms(), "Tick thread stopped");
            }) {
            Ok(h) => h,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(KernelError::Config(format!(
                    "Failed to spawn tick thread: {e}"
                )));
            }
        };

        self.handle = Some(handle);
        Ok(())
    }

    /// Stop ticking and join the thread. The time base keeps its value.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        info!("Stopping tick source");
        self.stop_requested.store(true, Ordering::Release);
        if let Err(e) = handle.join() {
            warn!("Tick thread panicked: {:?}", e);
        }
        self.running.store(false, Ordering::Release);
    }

    /// Returns true while the tick thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The time base being ticked.
    #[must_use]
    pub fn time_base(&self) -> &Arc<TimeBase> {
        &self.time_base
    }
}

impl Drop for TickSource {
    fn drop(&mut self) {
        self.stop();
    }
}
