//! Common utilities for integration tests.
//!
//! Provides a recording module and helpers for building dispatchers with
//! a manually driven time base.

#![allow(dead_code)]

use rk_runtime::{
    Dispatchable, Dispatcher, DispatcherBuilder, ModuleId, ServiceBuffer, ServiceId,
    ServiceOutcome, ServiceSlot, TimeBase, ARG_CAPACITY,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a [`Recorder`] saw on one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Service requested.
    pub service_id: ServiceId,
    /// Raw module buffer: length byte then payload.
    pub raw: Vec<u8>,
}

impl Call {
    /// Payload without the length byte.
    pub fn payload(&self) -> &[u8] {
        &self.raw[1..]
    }
}

/// Module that records every invocation and reports success.
pub struct Recorder {
    name: String,
    slot: ServiceSlot,
    calls: Mutex<Vec<Call>>,
}

impl Recorder {
    /// Recorder with a full-size buffer.
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_buffer(name, ARG_CAPACITY)
    }

    /// Recorder whose buffer accepts at most `max_payload` bytes.
    pub fn with_buffer(name: &str, max_payload: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            slot: ServiceSlot::new(max_payload),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Invocations so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Service IDs in invocation order.
    pub fn services(&self) -> Vec<ServiceId> {
        self.calls().iter().map(|c| c.service_id).collect()
    }
}

impl Dispatchable for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn service_slot(&self) -> &ServiceSlot {
        &self.slot
    }

    fn invoke(&self, request: &mut ServiceBuffer) {
        self.calls.lock().unwrap().push(Call {
            service_id: request.service_id(),
            raw: request.raw().to_vec(),
        });
        request.set_outcome(ServiceOutcome::Ok);
    }
}

/// Time base that only moves when the test advances it.
pub fn manual_time_base() -> Arc<TimeBase> {
    Arc::new(TimeBase::new(Duration::from_millis(100), 120_000_000).unwrap())
}

/// Dispatcher over a manual time base with `modules` registered.
pub fn dispatcher_with(
    capacity: usize,
    modules: &[(ModuleId, Arc<Recorder>)],
) -> (Dispatcher, Arc<TimeBase>) {
    let time_base = manual_time_base();
    let mut builder = DispatcherBuilder::new()
        .queue_capacity(capacity)
        .time_base(Arc::clone(&time_base));
    for (id, module) in modules {
        builder = builder.module(*id, Arc::clone(module) as Arc<dyn Dispatchable>);
    }
    (builder.build().unwrap(), time_base)
}
