//! Kernel lifecycle state machine.
//!
//! ```text
//! BOOT ──► READY ──► RUNNING ──► STOPPED
//!   ▲        │                      │
//!   │        └──────────────────────┤
//!   └───────────────────────────────┘
//! ```
//!
//! Modules may only be registered before RUNNING; the dispatcher is only
//! polled while RUNNING.

use crate::error::{KernelError, KernelResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of the kernel context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KernelState {
    /// Constructed; storage allocated, tick not configured.
    #[default]
    Boot,
    /// Initialized; modules may register, producers may enqueue.
    Ready,
    /// Tick running; dispatcher polled by the control loop.
    Running,
    /// Tick stopped and queue discarded.
    Stopped,
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "BOOT"),
            Self::Ready => write!(f, "READY"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl KernelState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: KernelState) -> bool {
        use KernelState::{Boot, Ready, Running, Stopped};

        matches!(
            (self, target),
            (Boot, Ready)
                | (Ready, Running)
                | (Running, Stopped)
                // Shut down before ever starting the tick
                | (Ready, Stopped)
                // Restart
                | (Stopped, Boot)
        )
    }

    /// Returns true if the dispatcher may be polled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: KernelState,
    previous: Option<KernelState>,
    transition_count: u64,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine starting in BOOT.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: KernelState::Boot,
            previous: None,
            transition_count: 0,
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> KernelState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<KernelState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidStateTransition`] if `target` is not
    /// reachable from the current state.
    pub fn transition(&mut self, target: KernelState) -> KernelResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(KernelError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }
}
