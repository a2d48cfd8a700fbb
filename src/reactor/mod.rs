//! Single-threaded reactor: fd readiness, alarms, deferred callbacks.
//!
//! Components never talk to [`Reactor`] directly. They receive the narrow
//! capabilities they need ([`EventManager`], [`Executor`], [`AlarmManager`])
//! so tests can substitute the mocks from `crate::testing`.

pub mod alarm;
mod event_loop;

use std::os::fd::RawFd;
use std::rc::Weak;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub use alarm::{AlarmHandle, AlarmTable};
pub use event_loop::{MAX_WAIT, Reactor};

/// Deferred unit of work, run exactly once.
pub type Callback = Box<dyn FnOnce()>;

/// Identity of a registered event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HandlerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receiver of readiness notifications for one file descriptor.
pub trait EventHandler {
    fn raw_fd(&self) -> RawFd;
    fn on_readable(&self);
    fn on_writable(&self);
}

/// Readiness interest registration.
///
/// Handlers are held weakly; a handler that has been dropped is skipped.
pub trait EventManager {
    fn register_for_read(&self, id: HandlerId, handler: Weak<dyn EventHandler>);
    fn register_for_write(&self, id: HandlerId, handler: Weak<dyn EventHandler>);
    fn deregister_for_read(&self, id: HandlerId);
    fn deregister_for_write(&self, id: HandlerId);

    fn deregister(&self, id: HandlerId) {
        self.deregister_for_read(id);
        self.deregister_for_write(id);
    }
}

/// Runs callbacks later on the loop thread, never synchronously.
pub trait Executor {
    fn run_later(&self, callback: Callback);
}

/// Schedules cancellable one-shot alarms.
pub trait AlarmManager {
    fn schedule_alarm(&self, callback: Callback, delay: Duration) -> AlarmHandle;
}
