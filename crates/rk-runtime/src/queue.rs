//! Fixed-capacity task queue.
//!
//! Entries live in a slot array allocated once at construction. `head`
//! points at the next entry to pop and `tail` at the next free slot:
//!
//! ```text
//!            head          tail
//!             │             │
//!  ┌────┬────┬▼───┬────┬────▼───┬────┐
//!  │ ✗  │ ✗  │ A  │ B  │  free  │ .. │   capacity slots
//!  └────┴────┴────┴────┴────────┴────┘
//!   popped    pending
//! ```
//!
//! Indices only move forward; popped slots are not reused until the queue
//! is compacted. Compaction happens in exactly two places: [`TaskQueue::reset`]
//! and [`TaskQueue::is_empty`] when it observes `head == tail != 0`. A
//! producer that keeps the queue non-empty therefore exhausts capacity even
//! if the consumer keeps up.
//!
//! Entries are strictly FIFO and gated by the head only: an entry whose due
//! time has passed still waits behind a head that is not yet due.
//!
//! # Threading Model
//!
//! [`TaskQueue`] itself is single-owner. Producers in other contexts (the
//! tick thread, a receive thread standing in for an interrupt handler) go
//! through [`SharedQueue`], which serializes every push against the
//! dispatcher's pop.

use crate::task::{ModuleId, ServiceId, TaskEntry};
use rk_common::error::{KernelError, KernelResult};
use rk_common::time::Millis;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};

/// Ordered, due-time-gated collection of task entries.
#[derive(Debug)]
pub struct TaskQueue {
    entries: Box<[TaskEntry]>,
    head: usize,
    tail: usize,
}

impl TaskQueue {
    /// Create a queue with `capacity` slots (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: vec![TaskEntry::default(); capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tail.saturating_sub(self.head)
    }

    /// Slots left before the next push is rejected.
    ///
    /// Popped-but-uncompacted slots do not count as free.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.capacity() - self.tail
    }

    /// Discard every entry and rewind both indices.
    ///
    /// Producers of discarded entries are not notified.
    pub fn reset(&mut self) {
        if self.len() > 0 {
            debug!(discarded = self.len(), "Task queue reset");
        }
        self.entries.fill(TaskEntry::default());
        self.head = 0;
        self.tail = 0;
    }

    /// Returns true if nothing is pending.
    ///
    /// When the queue has been fully drained (`head == tail` with both
    /// non-zero), this also rewinds the indices so the slots can be reused.
    pub fn is_empty(&mut self) -> bool {
        if self.tail > self.head {
            false
        } else {
            if self.tail != 0 && self.head == self.tail {
                self.reset();
            }
            true
        }
    }

    /// Append an immediately-due entry.
    ///
    /// Returns the slot index of the new entry.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::QueueFull`] if `tail` has reached capacity.
    pub fn push_back(&mut self, module_id: ModuleId, service_id: ServiceId) -> KernelResult<usize> {
        self.push_task(TaskEntry::new(module_id, service_id))
    }

    /// Append an entry that must not run before `due_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::QueueFull`] if `tail` has reached capacity.
    pub fn push_back_sync(
        &mut self,
        module_id: ModuleId,
        service_id: ServiceId,
        due_ms: Millis,
    ) -> KernelResult<usize> {
        self.push_task(TaskEntry::scheduled(module_id, service_id, due_ms))
    }

    /// Append a fully built entry, payload included.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::QueueFull`] if `tail` has reached capacity.
    pub fn push_task(&mut self, entry: TaskEntry) -> KernelResult<usize> {
        if self.tail == self.capacity() {
            return Err(KernelError::QueueFull {
                capacity: self.capacity(),
            });
        }
        let index = self.tail;
        self.entries[index] = entry;
        self.tail += 1;

        trace!(
            index,
            module_id = entry.module_id(),
            service_id = entry.service_id(),
            due_ms = entry.due_ms(),
            "Task pushed"
        );
        Ok(index)
    }

    /// The most recently pushed entry that is still pending.
    fn last_pending_mut(&mut self) -> KernelResult<&mut TaskEntry> {
        if self.tail <= self.head {
            return Err(KernelError::EmptyQueueAccess);
        }
        Ok(&mut self.entries[self.tail - 1])
    }

    /// Append raw bytes to the last pushed entry.
    ///
    /// # Errors
    ///
    /// [`KernelError::EmptyQueueAccess`] with nothing pending, or
    /// [`KernelError::ArgumentTooLarge`] (entry unmodified).
    pub fn append_argument_bytes(&mut self, bytes: &[u8]) -> KernelResult<()> {
        self.last_pending_mut()?.append_bytes(bytes)
    }

    /// Append a little-endian float to the last pushed entry.
    ///
    /// # Errors
    ///
    /// Same as [`TaskQueue::append_argument_bytes`].
    pub fn append_argument_float(&mut self, value: f32) -> KernelResult<()> {
        self.last_pending_mut()?.append_f32(value)
    }

    /// Parse ASCII text and append it as a float to the last pushed entry.
    ///
    /// # Errors
    ///
    /// Same as [`TaskQueue::append_argument_bytes`], plus
    /// [`KernelError::InvalidNumericArgument`].
    pub fn append_argument_numeric(&mut self, text: &[u8]) -> KernelResult<()> {
        self.last_pending_mut()?.append_numeric(text)
    }

    /// Replace the payload of the last pushed entry.
    ///
    /// # Errors
    ///
    /// Same as [`TaskQueue::append_argument_bytes`].
    pub fn set_argument_bytes(&mut self, bytes: &[u8]) -> KernelResult<()> {
        self.last_pending_mut()?.set_args(bytes)
    }

    /// Remove and return the head entry.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::EmptyQueueAccess`] if nothing is pending.
    pub fn pop_front(&mut self) -> KernelResult<TaskEntry> {
        if self.head >= self.tail {
            return Err(KernelError::EmptyQueueAccess);
        }
        let entry = self.entries[self.head];
        self.head += 1;
        Ok(entry)
    }

    /// Borrow the head entry without removing it.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::EmptyQueueAccess`] if nothing is pending.
    pub fn peek_front(&self) -> KernelResult<&TaskEntry> {
        if self.head >= self.tail {
            return Err(KernelError::EmptyQueueAccess);
        }
        Ok(&self.entries[self.head])
    }

    /// Pending entry `index` positions behind the head, if any.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&TaskEntry> {
        let slot = self.head.checked_add(index)?;
        if slot < self.tail {
            self.entries.get(slot)
        } else {
            None
        }
    }

    /// Iterate over pending entries in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskEntry> {
        self.entries[self.head..self.tail].iter()
    }
}

/// Task queue shared between producer contexts and the dispatcher.
///
/// Every operation takes the queue lock for its whole duration, so a push
/// and the arguments appended to it inside [`SharedQueue::with`] are never
/// interleaved with a pop.
#[derive(Debug)]
pub struct SharedQueue {
    inner: Mutex<TaskQueue>,
}

impl SharedQueue {
    /// Create a shared queue with `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TaskQueue::new(capacity)),
        }
    }

    /// Run `f` with exclusive access to the queue.
    ///
    /// A panic in another holder does not wedge the queue: the poisoned
    /// lock is recovered, since every queue mutation leaves the indices
    /// consistent before it can panic.
    pub fn with<R>(&self, f: impl FnOnce(&mut TaskQueue) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// See [`TaskQueue::push_back`].
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::QueueFull`] if the queue is full.
    pub fn push_back(&self, module_id: ModuleId, service_id: ServiceId) -> KernelResult<usize> {
        self.with(|q| q.push_back(module_id, service_id))
    }

    /// See [`TaskQueue::push_back_sync`].
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::QueueFull`] if the queue is full.
    pub fn push_back_sync(
        &self,
        module_id: ModuleId,
        service_id: ServiceId,
        due_ms: Millis,
    ) -> KernelResult<usize> {
        self.with(|q| q.push_back_sync(module_id, service_id, due_ms))
    }

    /// See [`TaskQueue::push_task`].
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::QueueFull`] if the queue is full.
    pub fn push_task(&self, entry: TaskEntry) -> KernelResult<usize> {
        self.with(|q| q.push_task(entry))
    }

    /// See [`TaskQueue::reset`].
    pub fn reset(&self) {
        self.with(TaskQueue::reset);
    }

    /// See [`TaskQueue::is_empty`].
    pub fn is_empty(&self) -> bool {
        self.with(TaskQueue::is_empty)
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with(|q| q.len())
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.with(|q| q.capacity())
    }
}
