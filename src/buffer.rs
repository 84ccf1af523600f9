// Observation buffer
// Process-wide, append-only list of pending observations. Producers push
// under a short lock; the flusher swaps the whole list out in one step so
// appends racing a drain land in the fresh list. Items a truncated pass
// could not reach wait in a separate carryover slot that appends never touch
//
// Numan Thabit 2025 Nov

use crate::event::Pending;
use crate::metrics::LOST_OBSERVATIONS;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Empty,
    Accumulating,
    Draining,
}

pub struct ObservationBuffer {
    pending: Mutex<Vec<Pending>>,
    /// Older than everything in `pending`; always locked before it
    carryover: Mutex<Vec<Pending>>,
    carried: AtomicUsize,
    capacity: usize,
    active_drains: AtomicUsize,
    lost: AtomicU64,
}

impl ObservationBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            carryover: Mutex::new(Vec::new()),
            carried: AtomicUsize::new(0),
            capacity: capacity.max(1),
            active_drains: AtomicUsize::new(0),
            lost: AtomicU64::new(0),
        }
    }

    // A panic while holding the lock cannot leave the Vec half-written,
    // so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Vec<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_carryover(&self) -> MutexGuard<'_, Vec<Pending>> {
        self.carryover.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Never blocks beyond the push itself and never reports failure; a full
    /// buffer drops the item and counts it as lost.
    pub fn append(&self, item: Pending) {
        let carried = self.carried.load(Ordering::Acquire);
        let mut pending = self.lock();
        if pending.len() + carried >= self.capacity {
            drop(pending);
            self.record_loss(&item);
            return;
        }
        pending.push(item);
    }

    fn record_loss(&self, item: &Pending) {
        let lost = self.lost.fetch_add(1, Ordering::Relaxed) + 1;
        LOST_OBSERVATIONS.inc();
        if lost == 1 || lost % 1000 == 0 {
            warn!(
                kind = %item.kind(),
                lost = lost,
                capacity = self.capacity,
                "observation buffer full; dropping observations"
            );
        }
    }

    /// Swap the contents out for an empty list, carried items first. The
    /// append lock is held only for the swap.
    pub fn take(&self) -> Vec<Pending> {
        let mut carryover = self.lock_carryover();
        let mut items = std::mem::take(&mut *carryover);
        let fresh = std::mem::take(&mut *self.lock());
        self.carried.store(0, Ordering::Release);
        drop(carryover);

        if items.is_empty() {
            return fresh;
        }
        items.extend(fresh);
        items
    }

    /// Put items a truncated pass never reached back in front of anything
    /// appended since the swap, keeping arrival order. Appends are not held
    /// up while this runs.
    pub fn restore_front(&self, mut items: Vec<Pending>) {
        if items.is_empty() {
            return;
        }
        let mut carryover = self.lock_carryover();
        items.append(&mut carryover);
        *carryover = items;
        self.carried.store(carryover.len(), Ordering::Release);
    }

    pub(crate) fn begin_drain(&self) -> DrainGuard<'_> {
        self.active_drains.fetch_add(1, Ordering::AcqRel);
        DrainGuard { buffer: self }
    }

    pub fn state(&self) -> BufferState {
        if self.active_drains.load(Ordering::Acquire) > 0 {
            BufferState::Draining
        } else if self.is_empty() {
            BufferState::Empty
        } else {
            BufferState::Accumulating
        }
    }

    pub fn len(&self) -> usize {
        let carryover = self.lock_carryover();
        carryover.len() + self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Observations dropped since creation because the buffer was full.
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }
}

pub(crate) struct DrainGuard<'a> {
    buffer: &'a ObservationBuffer,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.buffer.active_drains.fetch_sub(1, Ordering::AcqRel);
    }
}
