//! Alarm bookkeeping shared by the reactor and the test alarm manager.
//!
//! Alarms live in a slot table. Each slot carries a generation counter that
//! is bumped whenever the slot is freed, so an [`AlarmHandle`] held past the
//! alarm's lifetime is detectably stale and stopping it does nothing.
//! Due times are kept in a min-heap; heap entries for cancelled alarms are
//! skipped lazily when they surface.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::rc::{Rc, Weak};
use std::time::Instant;

use super::Callback;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct AlarmKey {
    index: usize,
    generation: u64,
}

struct Slot {
    generation: u64,
    pending: Option<(Instant, Callback)>,
}

/// Pending alarms ordered by due time.
#[derive(Default)]
pub struct AlarmTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
    // (due, insertion sequence, key): equal due times fire in scheduling order.
    queue: BinaryHeap<Reverse<(Instant, u64, AlarmKey)>>,
    sequence: u64,
    graveyard: Vec<Callback>,
}

impl AlarmTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table wrapped for sharing with the handles it hands out.
    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new()))
    }

    fn insert(&mut self, due: Instant, callback: Callback) -> AlarmKey {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].pending = Some((due, callback));
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    pending: Some((due, callback)),
                });
                self.slots.len() - 1
            }
        };

        let key = AlarmKey {
            index,
            generation: self.slots[index].generation,
        };
        self.sequence += 1;
        self.queue.push(Reverse((due, self.sequence, key)));
        key
    }

    fn take(&mut self, key: AlarmKey) -> Option<Callback> {
        let slot = self.slots.get_mut(key.index)?;
        if slot.generation != key.generation {
            return None;
        }
        let (_, callback) = slot.pending.take()?;
        slot.generation += 1;
        self.free.push(key.index);
        Some(callback)
    }

    fn cancel(&mut self, key: AlarmKey) {
        if let Some(callback) = self.take(key) {
            // Dropping here could run arbitrary destructors under our borrow.
            self.graveyard.push(callback);
        }
    }

    fn is_live(&self, key: AlarmKey) -> bool {
        self.slots
            .get(key.index)
            .is_some_and(|slot| slot.generation == key.generation && slot.pending.is_some())
    }

    fn discard_stale_head(&mut self) {
        while let Some(Reverse((_, _, key))) = self.queue.peek() {
            if self.is_live(*key) {
                break;
            }
            self.queue.pop();
        }
    }

    /// Earliest due time among live alarms.
    pub fn next_due(&mut self) -> Option<Instant> {
        self.discard_stale_head();
        self.queue.peek().map(|Reverse((due, _, _))| *due)
    }

    /// Remove and return the earliest alarm due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Callback> {
        self.discard_stale_head();
        let Reverse((due, _, key)) = *self.queue.peek()?;
        if due > now {
            return None;
        }
        self.queue.pop();
        self.take(key)
    }

    /// Number of alarms still waiting to fire.
    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|slot| slot.pending.is_some()).count()
    }

    /// Callbacks of stopped alarms, for disposal outside any borrow.
    pub fn take_graveyard(&mut self) -> Vec<Callback> {
        std::mem::take(&mut self.graveyard)
    }
}

/// Schedule `callback` on a shared table and return its handle.
pub fn schedule(table: &Rc<RefCell<AlarmTable>>, due: Instant, callback: Callback) -> AlarmHandle {
    let key = table.borrow_mut().insert(due, callback);
    AlarmHandle {
        table: Rc::downgrade(table),
        key,
    }
}

/// Cancellation handle for a scheduled alarm.
///
/// Stopping is idempotent and safe after the alarm fired, after it was
/// stopped, or after the owning reactor went away.
#[derive(Clone)]
pub struct AlarmHandle {
    table: Weak<RefCell<AlarmTable>>,
    key: AlarmKey,
}

impl AlarmHandle {
    pub fn stop(&self) {
        if let Some(table) = self.table.upgrade() {
            table.borrow_mut().cancel(self.key);
        }
    }

    /// True until the alarm fires or is stopped.
    pub fn is_pending(&self) -> bool {
        self.table
            .upgrade()
            .is_some_and(|table| table.borrow().is_live(self.key))
    }
}

impl std::fmt::Debug for AlarmHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmHandle")
            .field("index", &self.key.index)
            .field("generation", &self.key.generation)
            .finish()
    }
}
