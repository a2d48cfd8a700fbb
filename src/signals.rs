//! Shutdown signals delivered through the reactor.
//!
//! SIGTERM, SIGINT and SIGHUP are routed into a self-pipe with `signal-hook`;
//! the read end is watched by the reactor like any other descriptor, so the
//! shutdown callback runs on the loop thread and may touch any component.

use anyhow::{Context, Result};
use signal_hook::SigId;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use std::cell::RefCell;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::{Rc, Weak};

use crate::reactor::{EventHandler, EventManager, HandlerId};

pub const SHUTDOWN_SIGNALS: [i32; 3] = [SIGTERM, SIGINT, SIGHUP];

pub struct SignalWatcher {
    id: HandlerId,
    events: Rc<dyn EventManager>,
    reader: RefCell<UnixStream>,
    registrations: Vec<SigId>,
    on_shutdown: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl SignalWatcher {
    /// Route the shutdown signals to `on_shutdown`, which runs at most once.
    pub fn install(events: Rc<dyn EventManager>, on_shutdown: impl FnOnce() + 'static) -> Result<Rc<Self>> {
        let (reader, writer) = UnixStream::pair().context("Failed to create signal pipe")?;
        reader
            .set_nonblocking(true)
            .context("Failed to make signal pipe non-blocking")?;
        writer
            .set_nonblocking(true)
            .context("Failed to make signal pipe non-blocking")?;

        let mut registrations = Vec::with_capacity(SHUTDOWN_SIGNALS.len());
        for signal in SHUTDOWN_SIGNALS {
            let writer = writer.try_clone().context("Failed to clone signal pipe")?;
            let id = signal_hook::low_level::pipe::register(signal, writer)
                .with_context(|| format!("Failed to register handler for signal {signal}"))?;
            registrations.push(id);
        }

        let watcher = Rc::new(Self {
            id: HandlerId::next(),
            events,
            reader: RefCell::new(reader),
            registrations,
            on_shutdown: RefCell::new(Some(Box::new(on_shutdown))),
        });
        let handler: Weak<dyn EventHandler> = Rc::downgrade(&watcher) as Weak<dyn EventHandler>;
        watcher.events.register_for_read(watcher.id, handler);
        Ok(watcher)
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Drain the pipe; true if at least one signal arrived.
    fn drain(&self) -> bool {
        let mut reader = self.reader.borrow_mut();
        let mut buf = [0u8; 16];
        let mut received = false;
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => received = true,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        received
    }
}

impl EventHandler for SignalWatcher {
    fn raw_fd(&self) -> RawFd {
        self.reader.borrow().as_raw_fd()
    }

    fn on_readable(&self) {
        if !self.drain() {
            return;
        }
        let callback = self.on_shutdown.borrow_mut().take();
        if let Some(callback) = callback {
            callback();
        }
    }

    fn on_writable(&self) {}
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.events.deregister(self.id);
        for id in self.registrations.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}
