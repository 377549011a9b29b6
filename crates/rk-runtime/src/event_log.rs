//! Dispatch event log.
//!
//! A pre-allocated ring buffer holding one record per entry the dispatcher
//! pops, delivered or not. Old records are overwritten once the ring is
//! full; recording never allocates.

use crate::task::{ModuleId, ServiceId, TaskEntry};
use rk_common::time::Millis;
use serde::Serialize;
use std::fmt;

/// Default number of records retained.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 64;

/// What happened to a popped entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchEvent {
    /// The module callback ran.
    #[default]
    Invoked,
    /// No module at the entry's ID; entry dropped.
    SkippedUnknownModule,
    /// Payload larger than the module's buffer; entry dropped.
    SkippedPayloadTooLarge,
}

impl fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invoked => write!(f, "INVOKED"),
            Self::SkippedUnknownModule => write!(f, "SKIPPED_UNKNOWN_MODULE"),
            Self::SkippedPayloadTooLarge => write!(f, "SKIPPED_PAYLOAD_TOO_LARGE"),
        }
    }
}

/// One popped entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DispatchRecord {
    /// Time base value when the entry was popped.
    pub timestamp_ms: Millis,
    /// Target module.
    pub module_id: ModuleId,
    /// Requested service.
    pub service_id: ServiceId,
    /// Due time the entry carried.
    pub due_ms: Millis,
    /// Payload length.
    pub arg_len: usize,
    /// Outcome of the dispatch step.
    pub event: DispatchEvent,
}

impl DispatchRecord {
    /// Describe `entry` popped at `now`.
    #[must_use]
    pub fn new(now: Millis, entry: &TaskEntry, event: DispatchEvent) -> Self {
        Self {
            timestamp_ms: now,
            module_id: entry.module_id(),
            service_id: entry.service_id(),
            due_ms: entry.due_ms(),
            arg_len: entry.arg_len(),
            event,
        }
    }
}

/// Ring buffer of dispatch records.
#[derive(Debug)]
pub struct EventLog {
    records: Box<[DispatchRecord]>,
    write_pos: usize,
    /// Records written since the last reset (not capped).
    total: u64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    /// Create a log retaining `capacity` records (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: vec![DispatchRecord::default(); capacity].into_boxed_slice(),
            write_pos: 0,
            total: 0,
        }
    }

    /// Maximum number of records retained.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Number of records currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::try_from(self.total)
            .unwrap_or(usize::MAX)
            .min(self.records.len())
    }

    /// Returns true if nothing has been recorded since the last reset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Records written since the last reset, including overwritten ones.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Append a record, overwriting the oldest if full.
    pub fn record(&mut self, record: DispatchRecord) {
        self.records[self.write_pos] = record;
        self.write_pos = (self.write_pos + 1) % self.records.len();
        self.total += 1;
    }

    /// Iterate over retained records from oldest to newest.
    pub fn chronological(&self) -> impl Iterator<Item = &DispatchRecord> {
        let count = self.len();
        let cap = self.records.len();
        let start = if count == cap { self.write_pos } else { 0 };

        (0..count).map(move |i| &self.records[(start + i) % cap])
    }

    /// The `count` most recent records, newest first.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<&DispatchRecord> {
        let cap = self.records.len();
        (0..count.min(self.len()))
            .map(|i| &self.records[(self.write_pos + cap - 1 - i) % cap])
            .collect()
    }

    /// Clear all records.
    pub fn reset(&mut self) {
        self.records.fill(DispatchRecord::default());
        self.write_pos = 0;
        self.total = 0;
    }
}
