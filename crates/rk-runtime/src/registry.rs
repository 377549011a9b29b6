//! Module registry and the module-side argument contract.
//!
//! A kernel module implements [`Dispatchable`] and owns a [`ServiceSlot`]:
//! the buffer the dispatcher fills before every invocation. The buffer
//! layout mirrors the transport convention of one length byte followed by
//! the payload:
//!
//! ```text
//! ServiceBuffer
//! ┌────────────┬─────────┬─────┬────────────────────────┐
//! │ service_id │ outcome │ len │ payload[0..max_payload]│
//! └────────────┴─────────┴─────┴────────────────────────┘
//!   written by dispatcher   │     written by dispatcher
//!              written by module
//! ```
//!
//! Module IDs are assigned by convention at build time; the registry is a
//! plain array indexed by ID. Registrations are never removed, and
//! re-registering an ID replaces the previous module.

use crate::task::{ModuleId, ServiceId, ARG_CAPACITY};
use rk_common::error::{KernelError, KernelResult};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Number of module slots in the registry.
pub const MODULE_SLOTS: usize = 10;

/// Result a module reports for the last service it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceOutcome {
    /// No service has reported yet.
    #[default]
    Idle,
    /// The service completed.
    Ok,
    /// The service failed with a module-specific code.
    Failed(u8),
}

/// The argument buffer a module shares with the dispatcher.
#[derive(Debug)]
pub struct ServiceBuffer {
    service_id: ServiceId,
    outcome: ServiceOutcome,
    /// Length byte followed by payload.
    data: Box<[u8]>,
}

impl ServiceBuffer {
    /// Create a buffer accepting payloads of up to `max_payload` bytes.
    ///
    /// `max_payload` is clamped to the task entry capacity.
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        let max_payload = max_payload.min(ARG_CAPACITY);
        Self {
            service_id: 0,
            outcome: ServiceOutcome::Idle,
            data: vec![0u8; max_payload + 1].into_boxed_slice(),
        }
    }

    /// Largest payload this buffer accepts.
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.data.len() - 1
    }

    /// Deliver a request: length byte, then payload bytes, then service ID.
    ///
    /// The outcome slot is left as the module last wrote it.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ArgumentTooLarge`] if the payload exceeds
    /// [`ServiceBuffer::max_payload`]; the buffer is unchanged.
    pub fn load(&mut self, service_id: ServiceId, payload: &[u8]) -> KernelResult<()> {
        let len = u8::try_from(payload.len())
            .ok()
            .filter(|_| payload.len() <= self.max_payload())
            .ok_or(KernelError::ArgumentTooLarge {
                requested: payload.len(),
                available: self.max_payload(),
            })?;

        self.data[0] = len;
        self.data[1..=payload.len()].copy_from_slice(payload);
        self.service_id = service_id;
        Ok(())
    }

    /// Service requested by the last delivery.
    #[must_use]
    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    /// Payload length of the last delivery.
    #[must_use]
    pub fn arg_len(&self) -> usize {
        usize::from(self.data[0])
    }

    /// Payload bytes of the last delivery.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[1..=self.arg_len()]
    }

    /// Length byte followed by the payload, as laid out in the buffer.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.data[..=self.arg_len()]
    }

    /// Sequential reader over the payload.
    #[must_use]
    pub fn reader(&self) -> ArgReader<'_> {
        ArgReader::new(self.payload())
    }

    /// Outcome of the last service.
    #[must_use]
    pub fn outcome(&self) -> ServiceOutcome {
        self.outcome
    }

    /// Record the outcome of the service just run.
    pub fn set_outcome(&mut self, outcome: ServiceOutcome) {
        self.outcome = outcome;
    }
}

/// Bounds-checked little-endian decoder over a module payload.
#[derive(Debug, Clone)]
pub struct ArgReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ArgReader<'a> {
    /// Read from the start of `bytes`.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Consume exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::PayloadUnderrun`] if fewer than `n` remain.
    pub fn read_bytes(&mut self, n: usize) -> KernelResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(KernelError::PayloadUnderrun {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Consume everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        out
    }

    fn read_array<const N: usize>(&mut self) -> KernelResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// # Errors
    ///
    /// Returns [`KernelError::PayloadUnderrun`] on a short payload.
    pub fn read_u8(&mut self) -> KernelResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Any non-zero byte is true.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::PayloadUnderrun`] on a short payload.
    pub fn read_bool(&mut self) -> KernelResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// # Errors
    ///
    /// Returns [`KernelError::PayloadUnderrun`] on a short payload.
    pub fn read_u16(&mut self) -> KernelResult<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// # Errors
    ///
    /// Returns [`KernelError::PayloadUnderrun`] on a short payload.
    pub fn read_f32(&mut self) -> KernelResult<f32> {
        self.read_array().map(f32::from_le_bytes)
    }
}

/// A module's registered buffer, shared with the dispatcher.
#[derive(Debug)]
pub struct ServiceSlot {
    buffer: Mutex<ServiceBuffer>,
}

impl ServiceSlot {
    /// Create a slot whose buffer accepts up to `max_payload` bytes.
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        Self {
            buffer: Mutex::new(ServiceBuffer::new(max_payload)),
        }
    }

    /// Exclusive access to the buffer.
    ///
    /// The dispatcher holds this lock while the module runs; a module must
    /// use the buffer handed to [`Dispatchable::invoke`] rather than lock
    /// its own slot from inside the callback.
    pub fn lock(&self) -> MutexGuard<'_, ServiceBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Outcome of the last service.
    #[must_use]
    pub fn outcome(&self) -> ServiceOutcome {
        self.lock().outcome()
    }
}

/// A kernel module that can be invoked by the dispatcher.
///
/// Implementors keep their own state behind interior mutability; `invoke`
/// runs to completion on the dispatcher's thread and blocks further
/// dispatch while it runs.
pub trait Dispatchable: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Buffer the dispatcher fills before each invocation.
    fn service_slot(&self) -> &ServiceSlot;

    /// Run the service in `request`, writing the outcome back into it.
    fn invoke(&self, request: &mut ServiceBuffer);
}

/// Fixed table mapping module IDs to modules.
pub struct ModuleRegistry {
    slots: [Option<Arc<dyn Dispatchable>>; MODULE_SLOTS],
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.slots
                    .iter()
                    .enumerate()
                    .filter_map(|(id, m)| m.as_ref().map(|m| (id, m.name().to_owned()))),
            )
            .finish()
    }
}

impl ModuleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    fn index(id: ModuleId) -> KernelResult<usize> {
        let idx = usize::from(id);
        if idx < MODULE_SLOTS {
            Ok(idx)
        } else {
            Err(KernelError::InvalidModuleId {
                id,
                slots: MODULE_SLOTS,
            })
        }
    }

    /// Register `module` under `id`, replacing any previous registration.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidModuleId`] if `id` is out of range.
    pub fn register(&mut self, id: ModuleId, module: Arc<dyn Dispatchable>) -> KernelResult<()> {
        let idx = Self::index(id)?;
        if let Some(previous) = &self.slots[idx] {
            debug!(
                module_id = id,
                previous = previous.name(),
                replacement = module.name(),
                "Module re-registered"
            );
        }
        info!(module_id = id, name = module.name(), "Module registered");
        self.slots[idx] = Some(module);
        Ok(())
    }

    /// Find the module registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidModuleId`] if `id` is out of range, or
    /// [`KernelError::ModuleNotRegistered`] if the slot is empty.
    pub fn lookup(&self, id: ModuleId) -> KernelResult<&Arc<dyn Dispatchable>> {
        self.slots[Self::index(id)?]
            .as_ref()
            .ok_or(KernelError::ModuleNotRegistered { id })
    }

    /// IDs with a registered module, ascending.
    pub fn registered_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_some())
            .filter_map(|(id, _)| ModuleId::try_from(id).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        slot: ServiceSlot,
    }

    impl Recorder {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                slot: ServiceSlot::new(ARG_CAPACITY),
            }
        }
    }

    impl Dispatchable for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn service_slot(&self) -> &ServiceSlot {
            &self.slot
        }

        fn invoke(&self, request: &mut ServiceBuffer) {
            request.set_outcome(ServiceOutcome::Ok);
        }
    }

    #[test]
    fn test_buffer_layout() {
        let mut buf = ServiceBuffer::new(8);
        buf.load(7, &[0x01, 0x02, 0x03]).unwrap();

        assert_eq!(buf.service_id(), 7);
        assert_eq!(buf.raw(), &[3, 0x01, 0x02, 0x03]);
        assert_eq!(buf.payload(), &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_buffer_rejects_oversized_payload() {
        let mut buf = ServiceBuffer::new(2);
        buf.load(1, &[9]).unwrap();

        let err = buf.load(2, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, KernelError::ArgumentTooLarge { available: 2, .. }));
        assert_eq!(buf.service_id(), 1);
        assert_eq!(buf.payload(), &[9]);
    }

    #[test]
    fn test_load_keeps_outcome() {
        let mut buf = ServiceBuffer::new(4);
        buf.set_outcome(ServiceOutcome::Failed(3));
        buf.load(0, &[]).unwrap();
        assert_eq!(buf.outcome(), ServiceOutcome::Failed(3));
    }

    #[test]
    fn test_arg_reader() {
        let mut payload = vec![1u8];
        payload.extend_from_slice(&2.5f32.to_le_bytes());
        payload.extend_from_slice(&8080u16.to_le_bytes());
        payload.push(0);

        let mut reader = ArgReader::new(&payload);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_f32().unwrap(), 2.5);
        assert_eq!(reader.read_u16().unwrap(), 8080);
        assert!(!reader.read_bool().unwrap());
        assert_eq!(reader.remaining(), 0);
        assert_eq!(
            reader.read_f32(),
            Err(KernelError::PayloadUnderrun {
                needed: 4,
                remaining: 0
            })
        );
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ModuleRegistry::new();
        registry.register(3, Arc::new(Recorder::new("rec"))).unwrap();

        assert_eq!(registry.lookup(3).unwrap().name(), "rec");
        assert_eq!(
            registry.lookup(4).err(),
            Some(KernelError::ModuleNotRegistered { id: 4 })
        );
        assert_eq!(
            registry.lookup(10).err(),
            Some(KernelError::InvalidModuleId { id: 10, slots: 10 })
        );
        assert_eq!(registry.registered_ids().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_register_out_of_range() {
        let mut registry = ModuleRegistry::new();
        let result = registry.register(200, Arc::new(Recorder::new("rec")));
        assert!(matches!(result, Err(KernelError::InvalidModuleId { id: 200, .. })));
        assert_eq!(registry.registered_ids().count(), 0);
    }

    #[test]
    fn test_reregistration_overwrites() {
        let mut registry = ModuleRegistry::new();
        registry.register(1, Arc::new(Recorder::new("old"))).unwrap();
        registry.register(1, Arc::new(Recorder::new("new"))).unwrap();
        assert_eq!(registry.lookup(1).unwrap().name(), "new");
    }
}
