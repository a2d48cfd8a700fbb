use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::os::fd::{BorrowedFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use super::alarm::{self, AlarmHandle, AlarmTable};
use super::{AlarmManager, Callback, EventHandler, EventManager, Executor, HandlerId};
use crate::logger::Logger;
use crate::time_source::TimeSource;

/// Upper bound on a single wait, so a stuck clock cannot park the loop forever.
pub const MAX_WAIT: Duration = Duration::from_secs(60);

type Interest = BTreeMap<HandlerId, Weak<dyn EventHandler>>;

/// The event loop.
///
/// Each iteration of [`run_once`](Self::run_once):
/// 1. waits for readiness on the registered fds, bounded by the next alarm;
/// 2. dispatches read then write readiness from a snapshot of the interest sets;
/// 3. fires every alarm that is due, earliest first;
/// 4. drains the deferred callback queue, including work queued while draining;
/// 5. drops everything handed to [`dispose_later`](Self::dispose_later).
pub struct Reactor {
    readers: RefCell<Interest>,
    writers: RefCell<Interest>,
    alarms: Rc<RefCell<AlarmTable>>,
    deferred: RefCell<VecDeque<Callback>>,
    tombstones: RefCell<Vec<Box<dyn Any>>>,
    time: Rc<dyn TimeSource>,
    logger: Rc<dyn Logger>,
}

impl Reactor {
    pub fn new(time: Rc<dyn TimeSource>, logger: Rc<dyn Logger>) -> Rc<Self> {
        Rc::new(Self {
            readers: RefCell::new(BTreeMap::new()),
            writers: RefCell::new(BTreeMap::new()),
            alarms: AlarmTable::shared(),
            deferred: RefCell::new(VecDeque::new()),
            tombstones: RefCell::new(Vec::new()),
            time,
            logger,
        })
    }

    /// Keep `object` alive until the end of the current iteration.
    pub fn dispose_later<T: 'static>(&self, object: T) {
        self.tombstones.borrow_mut().push(Box::new(object));
    }

    pub fn pending_alarms(&self) -> usize {
        self.alarms.borrow().pending()
    }

    pub fn has_deferred_work(&self) -> bool {
        !self.deferred.borrow().is_empty() || !self.tombstones.borrow().is_empty()
    }

    /// Run iterations forever.
    pub fn run_loop(&self) -> ! {
        loop {
            self.run_once();
        }
    }

    pub fn run_once(&self) {
        let readers = snapshot(&self.readers);
        let writers = snapshot(&self.writers);

        let mut watched: Vec<(RawFd, PollFlags)> = Vec::with_capacity(readers.len() + writers.len());
        watched.extend(readers.iter().map(|(_, handler)| (handler.raw_fd(), PollFlags::POLLIN)));
        watched.extend(writers.iter().map(|(_, handler)| (handler.raw_fd(), PollFlags::POLLOUT)));

        let timeout = self.wait_timeout();
        let mut fds: Vec<PollFd> = watched
            .iter()
            .filter(|(fd, _)| *fd >= 0)
            // SAFETY: each fd belongs to a handler kept alive by the snapshot above.
            .map(|(fd, flags)| PollFd::new(unsafe { BorrowedFd::borrow_raw(*fd) }, *flags))
            .collect();

        let polled = match poll(&mut fds, timeout) {
            Ok(_) => true,
            Err(Errno::EINTR) => return,
            Err(err) => {
                self.logger.error(&format!("poll failed: {err}"));
                false
            }
        };

        if polled {
            // Line the results back up with `watched`; negative fds were never polled.
            let mut revents = fds.iter().map(|fd| fd.revents().unwrap_or(PollFlags::empty()));
            let ready: Vec<PollFlags> = watched
                .iter()
                .map(|(fd, _)| {
                    if *fd < 0 {
                        PollFlags::empty()
                    } else {
                        revents.next().unwrap_or(PollFlags::empty())
                    }
                })
                .collect();
            let (read_ready, write_ready) = ready.split_at(readers.len());

            let readable = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL;
            for ((_, handler), flags) in readers.iter().zip(read_ready) {
                if flags.intersects(readable) {
                    handler.on_readable();
                }
            }

            let writable = PollFlags::POLLOUT | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL;
            for ((_, handler), flags) in writers.iter().zip(write_ready) {
                if flags.intersects(writable) {
                    handler.on_writable();
                }
            }
        }
        drop(fds);

        self.fire_alarms();
        self.run_deferred();
        self.execute_death_row();
    }

    fn wait_timeout(&self) -> PollTimeout {
        if self.has_deferred_work() {
            return PollTimeout::ZERO;
        }

        let now = self.time.now();
        let wait = match self.alarms.borrow_mut().next_due() {
            Some(due) => due.saturating_duration_since(now).min(MAX_WAIT),
            None => MAX_WAIT,
        };

        // Round up so a wake-up never lands just before the alarm is due.
        let millis = wait.as_micros().div_ceil(1000).min(MAX_WAIT.as_millis());
        PollTimeout::from(u16::try_from(millis).unwrap_or(u16::MAX))
    }

    fn fire_alarms(&self) {
        let now = self.time.now();
        loop {
            let due = self.alarms.borrow_mut().pop_due(now);
            match due {
                Some(callback) => callback(),
                None => break,
            }
        }
    }

    fn run_deferred(&self) {
        loop {
            let next = self.deferred.borrow_mut().pop_front();
            match next {
                Some(callback) => callback(),
                None => break,
            }
        }
    }

    fn execute_death_row(&self) {
        let tombstones = std::mem::take(&mut *self.tombstones.borrow_mut());
        let cancelled = self.alarms.borrow_mut().take_graveyard();
        drop(tombstones);
        drop(cancelled);
    }
}

fn snapshot(interest: &RefCell<Interest>) -> Vec<(HandlerId, Rc<dyn EventHandler>)> {
    let mut interest = interest.borrow_mut();
    interest.retain(|_, handler| handler.strong_count() > 0);
    interest
        .iter()
        .filter_map(|(id, handler)| handler.upgrade().map(|handler| (*id, handler)))
        .collect()
}

impl EventManager for Reactor {
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

impl Executor for Reactor {
    fn run_later(&self, callback: Callback) {
        self.deferred.borrow_mut().push_back(callback);
    }
}

impl AlarmManager for Reactor {
    fn schedule_alarm(&self, callback: Callback, delay: Duration) -> AlarmHandle {
        let due = self.time.now() + delay;
        alarm::schedule(&self.alarms, due, callback)
    }
}
