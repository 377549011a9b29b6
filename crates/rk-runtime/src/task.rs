//! Task entries and argument marshaling.
//!
//! A [`TaskEntry`] is a plain value: target module, requested service, due
//! time, and a fixed 50-byte payload. Producers append raw bytes to the
//! payload with no delimiters; the byte layout is a private contract between
//! the producer and the target module.
//!
//! ```text
//! ┌──────────┬───────────┬────────┬─────┬──────────────────────────────┐
//! │ module_id│ service_id│ due_ms │ len │ args[0..50]                  │
//! │   u8     │   u16     │  u64   │ u8  │ payload bytes, len used      │
//! └──────────┴───────────┴────────┴─────┴──────────────────────────────┘
//! ```
//!
//! Floats are stored as 4-byte little-endian IEEE-754.

use rk_common::error::{KernelError, KernelResult};
use rk_common::time::Millis;
use static_assertions::const_assert;

/// Payload capacity of a single task entry in bytes.
pub const ARG_CAPACITY: usize = 50;

// The payload length travels as a single byte in the module buffer.
const_assert!(ARG_CAPACITY <= u8::MAX as usize);

/// Identifier of a registered kernel module.
pub type ModuleId = u8;

/// Identifier of an operation within a module.
pub type ServiceId = u16;

/// A deferred request for a module service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskEntry {
    module_id: ModuleId,
    service_id: ServiceId,
    due_ms: Millis,
    len: u8,
    args: [u8; ARG_CAPACITY],
}

impl Default for TaskEntry {
    fn default() -> Self {
        Self {
            module_id: 0,
            service_id: 0,
            due_ms: 0,
            len: 0,
            args: [0; ARG_CAPACITY],
        }
    }
}

impl TaskEntry {
    /// Create an immediately-due entry with an empty payload.
    #[must_use]
    pub fn new(module_id: ModuleId, service_id: ServiceId) -> Self {
        Self::scheduled(module_id, service_id, 0)
    }

    /// Create an entry that must not run before `due_ms`.
    #[must_use]
    pub fn scheduled(module_id: ModuleId, service_id: ServiceId, due_ms: Millis) -> Self {
        Self {
            module_id,
            service_id,
            due_ms,
            ..Self::default()
        }
    }

    /// Target module.
    #[must_use]
    pub fn module_id(&self) -> ModuleId {
        self.module_id
    }

    /// Requested service.
    #[must_use]
    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    /// Absolute time before which the entry must not run.
    #[must_use]
    pub fn due_ms(&self) -> Millis {
        self.due_ms
    }

    /// Returns true if the entry may run at time `now`.
    #[inline]
    #[must_use]
    pub fn is_due(&self, now: Millis) -> bool {
        self.due_ms <= now
    }

    /// Used payload bytes.
    #[must_use]
    pub fn args(&self) -> &[u8] {
        &self.args[..self.arg_len()]
    }

    /// Number of payload bytes in use.
    #[must_use]
    pub fn arg_len(&self) -> usize {
        usize::from(self.len)
    }

    /// Free payload bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        ARG_CAPACITY - self.arg_len()
    }

    /// Append raw bytes after the existing payload.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ArgumentTooLarge`] if the bytes do not fit; the
    /// entry is left unmodified.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> KernelResult<()> {
        if bytes.len() > self.remaining() {
            return Err(KernelError::ArgumentTooLarge {
                requested: bytes.len(),
                available: self.remaining(),
            });
        }
        let start = self.arg_len();
        let end = start + bytes.len();
        self.args[start..end].copy_from_slice(bytes);
        self.len = payload_len(end);
        Ok(())
    }

    /// Append a float as 4 little-endian bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ArgumentTooLarge`] if fewer than 4 bytes are free.
    pub fn append_f32(&mut self, value: f32) -> KernelResult<()> {
        self.append_bytes(&value.to_le_bytes())
    }

    /// Append a 16-bit integer as 2 little-endian bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ArgumentTooLarge`] if fewer than 2 bytes are free.
    pub fn append_u16(&mut self, value: u16) -> KernelResult<()> {
        self.append_bytes(&value.to_le_bytes())
    }

    /// Parse ASCII decimal text (as received over a link) and append it as a float.
    ///
    /// Surrounding whitespace and trailing NUL padding are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidNumericArgument`] for unparsable text, or
    /// [`KernelError::ArgumentTooLarge`] if the float does not fit.
    pub fn append_numeric(&mut self, text: &[u8]) -> KernelResult<()> {
        let value = parse_ascii_f32(text)?;
        self.append_f32(value)
    }

    /// Replace the whole payload.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ArgumentTooLarge`] if `bytes` exceeds the
    /// capacity; the previous payload is kept.
    pub fn set_args(&mut self, bytes: &[u8]) -> KernelResult<()> {
        if bytes.len() > ARG_CAPACITY {
            return Err(KernelError::ArgumentTooLarge {
                requested: bytes.len(),
                available: ARG_CAPACITY,
            });
        }
        self.args = [0; ARG_CAPACITY];
        self.args[..bytes.len()].copy_from_slice(bytes);
        self.len = payload_len(bytes.len());
        Ok(())
    }

    /// Drop the payload.
    pub fn clear_args(&mut self) {
        self.args = [0; ARG_CAPACITY];
        self.len = 0;
    }
}

#[allow(clippy::cast_possible_truncation)]
fn payload_len(len: usize) -> u8 {
    // Bounded by ARG_CAPACITY, see const_assert above.
    len as u8
}

fn parse_ascii_f32(text: &[u8]) -> KernelResult<f32> {
    let invalid = || KernelError::InvalidNumericArgument(String::from_utf8_lossy(text).into_owned());
    let s = std::str::from_utf8(text).map_err(|_| invalid())?;
    let s = s.trim_end_matches('\0').trim();
    if s.is_empty() {
        return Err(invalid());
    }
    s.parse::<f32>().map_err(|_| invalid())
}
