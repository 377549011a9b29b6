use thiserror::Error;

/// Kernel error types covering queue, registry, marshaling, and time-base failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KernelError {
    /// A push was attempted while the queue tail sits at capacity.
    #[error("task queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// Module ID outside the registry's slot range.
    #[error("invalid module ID {id} (registry has {slots} slots)")]
    InvalidModuleId {
        /// Offending module ID.
        id: u8,
        /// Number of registry slots.
        slots: usize,
    },

    /// Module ID in range but nothing registered at that slot.
    #[error("no module registered at ID {id}")]
    ModuleNotRegistered {
        /// Empty slot.
        id: u8,
    },

    /// Appending argument bytes would exceed the entry's payload capacity.
    #[error("argument too large: {requested} bytes requested, {available} available")]
    ArgumentTooLarge {
        /// Bytes the caller tried to append.
        requested: usize,
        /// Bytes still free in the payload.
        available: usize,
    },

    /// Pop, peek, or argument append on an empty queue.
    #[error("access to empty task queue")]
    EmptyQueueAccess,

    /// A module tried to read more payload bytes than were delivered.
    #[error("payload underrun: needed {needed} bytes, {remaining} remaining")]
    PayloadUnderrun {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// ASCII text could not be parsed as a number.
    #[error("invalid numeric argument: {0:?}")]
    InvalidNumericArgument(String),

    /// Tick period cannot be programmed into the hardware reload register.
    #[error("invalid tick period {period_ms}ms: {reason}")]
    InvalidTickPeriod {
        /// Requested period in milliseconds.
        period_ms: u64,
        /// Why the period was rejected.
        reason: String,
    },

    /// The tick source was started twice.
    #[error("tick source already running")]
    TickSourceRunning,

    /// Operation requires a running kernel.
    #[error("kernel not running (state {0})")]
    NotRunning(String),

    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// Convenience type alias for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;
