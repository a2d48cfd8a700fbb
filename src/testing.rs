//! Test doubles for the reactor capabilities and the byte resource.
//!
//! Available to unit tests and, through the `testing-support` feature, to the
//! integration tests under `tests/`.

use std::cell::{Cell, RefCell, RefMut};
use std::collections::{BTreeMap, VecDeque};
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::io::{FdError, FdInterface};
use crate::reactor::alarm;
use crate::reactor::{
    AlarmHandle, AlarmManager, AlarmTable, Callback, EventHandler, EventManager, Executor, HandlerId,
};

/// Executor that queues callbacks until the test drains them.
#[derive(Default)]
pub struct MockExecutor {
    queue: RefCell<VecDeque<Callback>>,
}

impl MockExecutor {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Run queued callbacks, including ones queued while running, until none are left.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(callback) => {
                    callback();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Executor for MockExecutor {
    fn run_later(&self, callback: Callback) {
        self.queue.borrow_mut().push_back(callback);
    }
}

/// Event manager that records interest and lets the test fire readiness by hand.
#[derive(Default)]
pub struct MockEventManager {
    readers: RefCell<BTreeMap<HandlerId, Weak<dyn EventHandler>>>,
    writers: RefCell<BTreeMap<HandlerId, Weak<dyn EventHandler>>>,
}

impl MockEventManager {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn is_registered_for_read(&self, id: HandlerId) -> bool {
        self.readers.borrow().contains_key(&id)
    }

    pub fn is_registered_for_write(&self, id: HandlerId) -> bool {
        self.writers.borrow().contains_key(&id)
    }

    pub fn reader_count(&self) -> usize {
        self.readers.borrow().len()
    }

    /// Call `on_readable` on every handler registered for read.
    pub fn signal_readable(&self) {
        for handler in live(&self.readers) {
            handler.on_readable();
        }
    }

    /// Call `on_writable` on every handler registered for write.
    pub fn signal_writable(&self) {
        for handler in live(&self.writers) {
            handler.on_writable();
        }
    }
}

fn live(interest: &RefCell<BTreeMap<HandlerId, Weak<dyn EventHandler>>>) -> Vec<Rc<dyn EventHandler>> {
    interest.borrow().values().filter_map(Weak::upgrade).collect()
}

impl EventManager for MockEventManager {
    fn register_for_read(&self, id: HandlerId, handler: Weak<dyn EventHandler>) {
        self.readers.borrow_mut().insert(id, handler);
    }

    fn register_for_write(&self, id: HandlerId, handler: Weak<dyn EventHandler>) {
        self.writers.borrow_mut().insert(id, handler);
    }

    fn deregister_for_read(&self, id: HandlerId) {
        self.readers.borrow_mut().remove(&id);
    }

    fn deregister_for_write(&self, id: HandlerId) {
        self.writers.borrow_mut().remove(&id);
    }
}

/// Alarm manager on a hand-driven clock.
pub struct MockAlarmManager {
    table: Rc<RefCell<AlarmTable>>,
    now: Cell<Instant>,
}

impl MockAlarmManager {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            table: AlarmTable::shared(),
            now: Cell::new(Instant::now()),
        })
    }

    pub fn pending(&self) -> usize {
        self.table.borrow().pending()
    }

    /// Time until the earliest pending alarm.
    pub fn next_delay(&self) -> Option<Duration> {
        let now = self.now.get();
        self.table
            .borrow_mut()
            .next_due()
            .map(|due| due.saturating_duration_since(now))
    }

    /// Move the clock forward and fire every alarm that became due, earliest first.
    pub fn advance(&self, by: Duration) -> usize {
        self.now.set(self.now.get() + by);
        let now = self.now.get();
        let mut fired = 0;
        loop {
            let due = self.table.borrow_mut().pop_due(now);
            match due {
                Some(callback) => {
                    callback();
                    fired += 1;
                }
                None => break,
            }
        }
        let cancelled = self.table.borrow_mut().take_graveyard();
        drop(cancelled);
        fired
    }
}

impl AlarmManager for MockAlarmManager {
    fn schedule_alarm(&self, callback: Callback, delay: Duration) -> AlarmHandle {
        alarm::schedule(&self.table, self.now.get() + delay, callback)
    }
}

/// Observable state behind a [`ScriptedFd`].
#[derive(Debug, Default)]
pub struct FdScript {
    /// Bytes the next reads will return.
    pub input: VecDeque<u8>,
    /// Report end of stream once `input` is drained.
    pub eof: bool,
    /// Everything written so far.
    pub written: Vec<u8>,
    /// Cap on bytes accepted per write call.
    pub write_limit: Option<usize>,
    /// Writes report would-block while set.
    pub write_blocked: bool,
    pub open_error: Option<i32>,
    /// Consumed by the next read.
    pub read_error: Option<i32>,
    /// Consumed by the next write.
    pub write_error: Option<i32>,
    pub is_open: bool,
    pub opens: u32,
    pub closes: u32,
    /// Read calls that reached the resource.
    pub reads: u32,
}

/// In-memory [`FdInterface`] whose behaviour the test scripts.
///
/// Clones share state, so a test keeps one clone while the connection owns another.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFd {
    script: Rc<RefCell<FdScript>>,
}

impl ScriptedFd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> RefMut<'_, FdScript> {
        self.script.borrow_mut()
    }

    pub fn feed(&self, bytes: &[u8]) {
        self.script.borrow_mut().input.extend(bytes.iter().copied());
    }

    pub fn set_eof(&self) {
        self.script.borrow_mut().eof = true;
    }

    pub fn written(&self) -> Vec<u8> {
        self.script.borrow().written.clone()
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.script.borrow_mut().written)
    }
}

impl FdInterface for ScriptedFd {
    fn open(&mut self) -> Result<(), FdError> {
        let mut script = self.script.borrow_mut();
        script.opens += 1;
        match script.open_error {
            Some(code) => Err(FdError::from_code(code)),
            None => {
                script.is_open = true;
                Ok(())
            }
        }
    }

    fn close(&mut self) -> Result<(), FdError> {
        let mut script = self.script.borrow_mut();
        if script.is_open {
            script.is_open = false;
            script.closes += 1;
        }
        Ok(())
    }

    fn raw_fd(&self) -> RawFd {
        -1
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, FdError> {
        let mut script = self.script.borrow_mut();
        script.reads += 1;
        if let Some(code) = script.read_error.take() {
            return Err(FdError::from_code(code));
        }
        if script.input.is_empty() {
            return Ok(if script.eof { Some(0) } else { None });
        }

        let n = buf.len().min(script.input.len());
        for (slot, byte) in buf.iter_mut().zip(script.input.drain(..n)) {
            *slot = byte;
        }
        Ok(Some(n))
    }

    fn write(&mut self, buf: &[u8]) -> Result<Option<usize>, FdError> {
        let mut script = self.script.borrow_mut();
        if let Some(code) = script.write_error.take() {
            return Err(FdError::from_code(code));
        }
        if script.write_blocked {
            return Ok(None);
        }

        let n = script.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        script.written.extend_from_slice(&buf[..n]);
        Ok(Some(n))
    }
}
