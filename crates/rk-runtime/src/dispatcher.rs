//! Time-gated task dispatcher.
//!
//! Each poll drains the queue head while it is due:
//!
//! 1. Stop if the queue is empty or the head's due time is in the future.
//! 2. Pop the head.
//! 3. Look up the target module; an unknown ID drops the entry.
//! 4. Copy the length byte, then the payload, then the service ID into the
//!    module's buffer.
//! 5. Invoke the module synchronously and go back to 1.
//!
//! Entries behind a head that is not yet due are never looked at, even if
//! they are due themselves. The queue lock is released before the module
//! runs, so producers (and the module itself) may enqueue during a callback.
//! The module's outcome is left for whoever owns the module to read; the
//! dispatcher neither inspects nor clears it.

use crate::event_log::{DispatchEvent, DispatchRecord, EventLog};
use crate::queue::{SharedQueue, TaskQueue};
use crate::registry::{Dispatchable, ModuleRegistry};
use crate::task::{ModuleId, TaskEntry};
use crate::time_base::TimeBase;
use rk_common::config::KernelConfig;
use rk_common::error::{KernelError, KernelResult};
use rk_common::metrics::DispatchMetrics;
use rk_common::time::Millis;
use std::sync::Arc;
use std::time::Instant;
use tracing::{trace, warn};

/// Counts from one dispatcher poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Module callbacks run.
    pub invoked: usize,
    /// Entries popped but dropped.
    pub skipped: usize,
}

impl DispatchReport {
    /// Entries popped during the poll.
    #[must_use]
    pub fn popped(&self) -> usize {
        self.invoked + self.skipped
    }
}

/// Drains due entries from a shared queue into registered modules.
#[derive(Debug)]
pub struct Dispatcher {
    queue: Arc<SharedQueue>,
    time_base: Arc<TimeBase>,
    registry: ModuleRegistry,
    metrics: DispatchMetrics,
    event_log: Option<EventLog>,
}

impl Dispatcher {
    /// Create a dispatcher over `queue`, gated by `time_base`.
    #[must_use]
    pub fn new(queue: Arc<SharedQueue>, time_base: Arc<TimeBase>, config: &KernelConfig) -> Self {
        Self {
            queue,
            time_base,
            registry: ModuleRegistry::new(),
            metrics: DispatchMetrics::new(
                config.metrics.histogram_size,
                config.metrics.slow_callback,
            ),
            event_log: config
                .event_log
                .enabled
                .then(|| EventLog::new(config.event_log.capacity)),
        }
    }

    /// Register a module; see [`ModuleRegistry::register`].
    ///
    /// # Errors
    ///
    /// Returns [`rk_common::KernelError::InvalidModuleId`] if `id` is out of range.
    pub fn register(&mut self, id: ModuleId, module: Arc<dyn Dispatchable>) -> KernelResult<()> {
        self.registry.register(id, module)
    }

    /// Registered modules.
    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Queue handle for producers.
    #[must_use]
    pub fn queue(&self) -> &Arc<SharedQueue> {
        &self.queue
    }

    /// Time base gating the queue.
    #[must_use]
    pub fn time_base(&self) -> &Arc<TimeBase> {
        &self.time_base
    }

    /// Callback timing and dispatch counters.
    #[must_use]
    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    /// Dispatch event log, if enabled.
    #[must_use]
    pub fn event_log(&self) -> Option<&EventLog> {
        self.event_log.as_ref()
    }

    /// Drain every entry that is due, in order, stopping at the first head
    /// that is not yet due.
    pub fn poll(&mut self) -> DispatchReport {
        self.metrics.record_poll();
        let mut report = DispatchReport::default();

        while let Some(entry) = self.take_due_head() {
            self.deliver(&entry, &mut report);
        }

        report
    }

    /// Dispatch at most one due entry.
    pub fn poll_one(&mut self) -> DispatchReport {
        self.metrics.record_poll();
        let mut report = DispatchReport::default();

        if let Some(entry) = self.take_due_head() {
            self.deliver(&entry, &mut report);
        }

        report
    }

    /// Pop the head under the queue lock if it is due now.
    fn take_due_head(&self) -> Option<TaskEntry> {
        let now = self.time_base.now_ms();
        self.queue.with(|q| {
            if q.is_empty() {
                return None;
            }
            match q.peek_front() {
                Ok(head) if head.is_due(now) => q.pop_front().ok(),
                _ => None,
            }
        })
    }

    fn deliver(&mut self, entry: &TaskEntry, report: &mut DispatchReport) {
        let now = self.time_base.now_ms();

        let module = match self.registry.lookup(entry.module_id()) {
            Ok(module) => Arc::clone(module),
            Err(e) => {
                warn!(
                    module_id = entry.module_id(),
                    service_id = entry.service_id(),
                    error = %e,
                    "Dropping task for unknown module"
                );
                self.skip(now, entry, DispatchEvent::SkippedUnknownModule, report);
                return;
            }
        };

        let mut buffer = module.service_slot().lock();
        if let Err(e) = buffer.load(entry.service_id(), entry.args()) {
            warn!(
                module_id = entry.module_id(),
                module = module.name(),
                service_id = entry.service_id(),
                error = %e,
                "Dropping task with payload larger than module buffer"
            );
            drop(buffer);
            self.skip(now, entry, DispatchEvent::SkippedPayloadTooLarge, report);
            return;
        }

        let start = Instant::now();
        module.invoke(&mut buffer);
        let elapsed = start.elapsed();
        drop(buffer);

        if self.metrics.record_invocation(elapsed) {
            warn!(
                module = module.name(),
                service_id = entry.service_id(),
                elapsed_us = elapsed.as_micros(),
                "Slow module callback"
            );
        }
        trace!(
            module_id = entry.module_id(),
            service_id = entry.service_id(),
            due_ms = entry.due_ms(),
            now_ms = now,
            arg_len = entry.arg_len(),
            "Task dispatched"
        );

        self.log(now, entry, DispatchEvent::Invoked);
        report.invoked += 1;
    }

    fn skip(
        &mut self,
        now: Millis,
        entry: &TaskEntry,
        event: DispatchEvent,
        report: &mut DispatchReport,
    ) {
        self.metrics.record_skip();
        self.log(now, entry, event);
        report.skipped += 1;
    }

    fn log(&mut self, now: Millis, entry: &TaskEntry, event: DispatchEvent) {
        if let Some(log) = self.event_log.as_mut() {
            log.record(DispatchRecord::new(now, entry, event));
        }
    }

    /// Discard all pending entries.
    pub fn reset_queue(&self) {
        self.queue.with(TaskQueue::reset);
    }

    /// Clear metrics and the event log.
    pub fn reset_stats(&mut self) {
        self.metrics.reset();
        if let Some(log) = self.event_log.as_mut() {
            log.reset();
        }
    }
}

/// Builder for a [`Dispatcher`] and its shared handles.
pub struct DispatcherBuilder {
    config: KernelConfig,
    queue: Option<Arc<SharedQueue>>,
    time_base: Option<Arc<TimeBase>>,
    modules: Vec<(ModuleId, Arc<dyn Dispatchable>)>,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherBuilder {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: KernelConfig::default(),
            queue: None,
            time_base: None,
            modules: Vec::new(),
        }
    }

    /// Use `config` for queue capacity, tick period, metrics and event log.
    #[must_use]
    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue.capacity = capacity;
        self
    }

    /// Share an existing queue instead of allocating one.
    #[must_use]
    pub fn queue(mut self, queue: Arc<SharedQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Share an existing time base instead of creating one from the config.
    #[must_use]
    pub fn time_base(mut self, time_base: Arc<TimeBase>) -> Self {
        self.time_base = Some(time_base);
        self
    }

    /// Register `module` under `id` at build time.
    #[must_use]
    pub fn module(mut self, id: ModuleId, module: Arc<dyn Dispatchable>) -> Self {
        self.modules.push((id, module));
        self
    }

    /// Build the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Config`] if the configuration fails
    /// validation, and an error if the tick period is invalid or a module
    /// ID is out of range.
    pub fn build(self) -> KernelResult<Dispatcher> {
        self.config
            .validate()
            .map_err(|e| KernelError::Config(e.to_string()))?;

        let time_base = match self.time_base {
            Some(tb) => tb,
            None => Arc::new(TimeBase::new(
                self.config.tick.period,
                self.config.tick.clock_hz,
            )?),
        };
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(SharedQueue::new(self.config.queue.capacity)));

        let mut dispatcher = Dispatcher::new(queue, time_base, &self.config);
        for (id, module) in self.modules {
            dispatcher.register(id, module)?;
        }
        Ok(dispatcher)
    }
}
