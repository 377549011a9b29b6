//! Kernel context: dispatcher, tick source and lifecycle in one owner.
//!
//! Replaces a process-wide scheduler singleton. Producers that run outside
//! the control loop take cloned [`SharedQueue`] and [`TimeBase`] handles and
//! never need the kernel itself.

use crate::dispatcher::{DispatchReport, Dispatcher, DispatcherBuilder};
use crate::queue::SharedQueue;
use crate::registry::Dispatchable;
use crate::task::{ModuleId, ServiceId, TaskEntry};
use crate::time_base::{TickSource, TimeBase};
use rk_common::config::KernelConfig;
use rk_common::error::{KernelError, KernelResult};
use rk_common::state::{KernelState, StateMachine};
use rk_common::time::due_after;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Owner of the dispatcher, the tick source and the lifecycle state.
#[derive(Debug)]
pub struct Kernel {
    dispatcher: Dispatcher,
    tick: TickSource,
    state: StateMachine,
}

impl Kernel {
    /// Allocate queue, registry and time base from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Config`] for invalid sizes and
    /// [`KernelError::InvalidTickPeriod`] for a period the tick hardware
    /// cannot produce.
    pub fn new(config: &KernelConfig) -> KernelResult<Self> {
        let dispatcher = DispatcherBuilder::new().config(config.clone()).build()?;
        Ok(Self::with_dispatcher(dispatcher))
    }

    /// Wrap an already-built dispatcher.
    #[must_use]
    pub fn with_dispatcher(dispatcher: Dispatcher) -> Self {
        let tick = TickSource::new(Arc::clone(dispatcher.time_base()));
        Self {
            dispatcher,
            tick,
            state: StateMachine::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> KernelState {
        self.state.state()
    }

    /// BOOT → READY.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidStateTransition`] outside BOOT.
    pub fn initialize(&mut self) -> KernelResult<()> {
        self.state.transition(KernelState::Ready)?;
        info!(
            queue_capacity = self.dispatcher.queue().capacity(),
            tick_period_ms = self.dispatcher.time_base().period_ms(),
            "Kernel initialized"
        );
        Ok(())
    }

    /// Register a kernel module. Only allowed before the kernel starts.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidModuleId`] for an out-of-range ID, or
    /// [`KernelError::Config`] once the kernel is running.
    pub fn register(&mut self, id: ModuleId, module: Arc<dyn Dispatchable>) -> KernelResult<()> {
        if !matches!(self.state(), KernelState::Boot | KernelState::Ready) {
            return Err(KernelError::Config(format!(
                "modules must be registered before start (state {})",
                self.state()
            )));
        }
        self.dispatcher.register(id, module)
    }

    /// READY → RUNNING; starts the tick.
    ///
    /// # Errors
    ///
    /// Returns an error if not READY or the tick thread cannot start.
    pub fn start(&mut self) -> KernelResult<()> {
        if !self.state().can_transition_to(KernelState::Running) {
            return Err(KernelError::InvalidStateTransition {
                from: self.state().to_string(),
                to: KernelState::Running.to_string(),
            });
        }
        self.tick.start()?;
        self.state.transition(KernelState::Running)?;
        info!(
            modules = self.dispatcher.registry().registered_ids().count(),
            "Kernel running"
        );
        Ok(())
    }

    /// Poll the dispatcher once.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotRunning`] outside RUNNING.
    pub fn run_once(&mut self) -> KernelResult<DispatchReport> {
        if !self.state().is_running() {
            return Err(KernelError::NotRunning(self.state().to_string()));
        }
        Ok(self.dispatcher.poll())
    }

    /// Queue `module`/`service` to run `delay` from now with `args` as payload.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ArgumentTooLarge`] or [`KernelError::QueueFull`].
    pub fn schedule(
        &self,
        module: ModuleId,
        service: ServiceId,
        delay: Duration,
        args: &[u8],
    ) -> KernelResult<usize> {
        let due = due_after(self.dispatcher.time_base().now_ms(), delay);
        let mut entry = TaskEntry::scheduled(module, service, due);
        entry.set_args(args)?;
        self.dispatcher.queue().push_task(entry)
    }

    /// Stop the tick and discard pending tasks; → STOPPED.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidStateTransition`] from BOOT or STOPPED.
    pub fn shutdown(&mut self) -> KernelResult<()> {
        self.state.transition(KernelState::Stopped)?;
        self.tick.stop();
        let discarded = self.dispatcher.queue().len();
        self.dispatcher.reset_queue();
        info!(
            discarded,
            now_ms = self.dispatcher.time_base().now_ms(),
            "Kernel stopped"
        );
        Ok(())
    }

    /// STOPPED → BOOT. Modules and the time base are kept; statistics are
    /// cleared.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidStateTransition`] unless STOPPED.
    pub fn restart(&mut self) -> KernelResult<()> {
        self.state.transition(KernelState::Boot)?;
        self.dispatcher.reset_stats();
        info!("Kernel restarting");
        Ok(())
    }

    /// Producer handle to the task queue.
    #[must_use]
    pub fn queue(&self) -> Arc<SharedQueue> {
        Arc::clone(self.dispatcher.queue())
    }

    /// Reader handle to the time base.
    #[must_use]
    pub fn time_base(&self) -> Arc<TimeBase> {
        Arc::clone(self.dispatcher.time_base())
    }

    /// The dispatcher, for metrics and event log access.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
