//! Asynchronous buffered connection over a non-blocking resource.
//!
//! Reads ask for an exact byte count and complete once that many bytes have
//! arrived, or early when the stream ends or faults. Writes complete once every
//! byte has been handed to the resource. Completions always run through the
//! executor, never from inside the call that queued them.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};

use super::buffer::IoBuffer;
use super::fd::{FdError, FdInterface};
use crate::logger::Logger;
use crate::reactor::{Callback, EventHandler, EventManager, Executor, HandlerId};

/// Completion for a read, receiving the bytes gathered.
pub type ReadCallback = Box<dyn FnOnce(Vec<u8>)>;

/// Lifecycle of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never started.
    Fresh,
    Open,
    /// Faulted; `stop` then `start` to reopen.
    Error(FdError),
    Closed,
}

struct PendingRead {
    data: Vec<u8>,
    filled: usize,
    done: ReadCallback,
}

struct PendingWrite {
    data: Vec<u8>,
    offset: usize,
    done: Callback,
}

struct Inner {
    state: ConnectionState,
    fd: Box<dyn FdInterface>,
    buffer: IoBuffer,
    reads: VecDeque<PendingRead>,
    writes: VecDeque<PendingWrite>,
}

pub struct BufferedConnection {
    this: Weak<Self>,
    id: HandlerId,
    events: Rc<dyn EventManager>,
    executor: Rc<dyn Executor>,
    logger: Rc<dyn Logger>,
    inner: RefCell<Inner>,
}

impl BufferedConnection {
    pub fn new(
        fd: Box<dyn FdInterface>,
        events: Rc<dyn EventManager>,
        executor: Rc<dyn Executor>,
        logger: Rc<dyn Logger>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            id: HandlerId::next(),
            events,
            executor,
            logger,
            inner: RefCell::new(Inner {
                state: ConnectionState::Fresh,
                fd,
                buffer: IoBuffer::default(),
                reads: VecDeque::new(),
                writes: VecDeque::new(),
            }),
        })
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.borrow().state.clone()
    }

    /// False once a fault has been recorded, until the next `stop`.
    pub fn is_ok(&self) -> bool {
        !matches!(self.inner.borrow().state, ConnectionState::Error(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self.inner.borrow().state,
            ConnectionState::Fresh | ConnectionState::Closed
        )
    }

    pub fn error(&self) -> Option<FdError> {
        match &self.inner.borrow().state {
            ConnectionState::Error(err) => Some(err.clone()),
            _ => None,
        }
    }

    pub fn pending_reads(&self) -> usize {
        self.inner.borrow().reads.len()
    }

    pub fn pending_writes(&self) -> usize {
        self.inner.borrow().writes.len()
    }

    fn handler(&self) -> Weak<dyn EventHandler> {
        self.this.clone()
    }

    /// Open the resource and start watching it for input.
    pub fn start(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.state == ConnectionState::Open {
            return;
        }

        inner.buffer.clear();
        match inner.fd.open() {
            Ok(()) => {
                inner.state = ConnectionState::Open;
                drop(inner);
                self.events.register_for_read(self.id, self.handler());
                self.logger.debug("connection open");
            }
            Err(err) => {
                self.logger.error(&format!("cannot open connection: {err}"));
                inner.state = ConnectionState::Error(err);
            }
        }
    }

    /// Close the resource and abandon every pending operation.
    ///
    /// Abandoned reads complete with whatever bytes they had gathered.
    pub fn stop(&self) {
        let completions = {
            let mut inner = self.inner.borrow_mut();
            self.shutdown(&mut inner)
        };
        self.defer_all(completions);
    }

    /// Deliver exactly `len` bytes to `done`, or fewer if the stream ends or faults.
    pub fn read(&self, len: usize, done: impl FnOnce(Vec<u8>) + 'static) {
        let completions = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != ConnectionState::Open || len == 0 {
                vec![Box::new(move || done(Vec::new())) as Callback]
            } else {
                inner.reads.push_back(PendingRead {
                    data: vec![0; len],
                    filled: 0,
                    done: Box::new(done),
                });
                self.satisfy_reads(&mut inner)
            }
        };
        self.defer_all(completions);
    }

    /// Write all of `data`, then run `done`.
    pub fn write(&self, data: Vec<u8>, done: impl FnOnce() + 'static) {
        let completions = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != ConnectionState::Open || data.is_empty() {
                vec![Box::new(done) as Callback]
            } else if !inner.writes.is_empty() {
                inner.writes.push_back(PendingWrite {
                    data,
                    offset: 0,
                    done: Box::new(done),
                });
                Vec::new()
            } else {
                match inner.fd.write(&data) {
                    Err(err) => {
                        let mut completions = self.fault(&mut inner, err);
                        completions.push(Box::new(done));
                        completions
                    }
                    Ok(written) => {
                        let written = written.unwrap_or(0);
                        if written >= data.len() {
                            vec![Box::new(done) as Callback]
                        } else {
                            inner.writes.push_back(PendingWrite {
                                data,
                                offset: written,
                                done: Box::new(done),
                            });
                            self.events.register_for_write(self.id, self.handler());
                            Vec::new()
                        }
                    }
                }
            }
        };
        self.defer_all(completions);
    }

    fn defer_all(&self, completions: Vec<Callback>) {
        for completion in completions {
            self.executor.run_later(completion);
        }
    }

    fn satisfy_reads(&self, inner: &mut Inner) -> Vec<Callback> {
        let mut completions: Vec<Callback> = Vec::new();
        let mut ended = false;

        while !inner.buffer.is_empty() {
            let Some(op) = inner.reads.front_mut() else {
                break;
            };
            let n = inner.buffer.read(&mut op.data[op.filled..]);
            op.filled += n;

            if op.filled == op.data.len() {
                if let Some(PendingRead { data, done, .. }) = inner.reads.pop_front() {
                    completions.push(Box::new(move || done(data)));
                }
            } else if n == 0 || !inner.buffer.is_empty() {
                // Only the end-of-stream marker stops a read short of a non-empty buffer.
                ended = true;
                break;
            }
        }

        if ended {
            self.logger.debug("stream ended with reads pending");
            completions.extend(self.shutdown(inner));
        }
        completions
    }

    fn shutdown(&self, inner: &mut Inner) -> Vec<Callback> {
        inner.state = ConnectionState::Closed;
        self.events.deregister(self.id);
        if let Err(err) = inner.fd.close() {
            self.logger.debug(&format!("close failed: {err}"));
        }
        inner.buffer.clear();
        Self::purge(inner)
    }

    fn fault(&self, inner: &mut Inner, err: FdError) -> Vec<Callback> {
        self.logger.error(&format!("connection fault: {err}"));
        inner.state = ConnectionState::Error(err);
        self.events.deregister(self.id);
        Self::purge(inner)
    }

    fn purge(inner: &mut Inner) -> Vec<Callback> {
        let mut completions: Vec<Callback> = Vec::with_capacity(inner.reads.len() + inner.writes.len());
        for PendingRead {
            mut data,
            filled,
            done,
        } in inner.reads.drain(..)
        {
            data.truncate(filled);
            completions.push(Box::new(move || done(data)));
        }
        completions.extend(inner.writes.drain(..).map(|op| op.done));
        completions
    }
}

impl EventHandler for BufferedConnection {
    fn raw_fd(&self) -> RawFd {
        self.inner.borrow().fd.raw_fd()
    }

    fn on_readable(&self) {
        let completions = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != ConnectionState::Open {
                return;
            }

            let mut ended = false;
            let mut failure = None;
            loop {
                let Inner { fd, buffer, .. } = &mut *inner;
                match fd.read(buffer.write_region()) {
                    Ok(Some(0)) => {
                        buffer.write_eof();
                        ended = true;
                        break;
                    }
                    Ok(Some(n)) => buffer.commit_write(n),
                    Ok(None) => break,
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            match failure {
                Some(err) => self.fault(&mut inner, err),
                None => {
                    if ended {
                        self.events.deregister_for_read(self.id);
                    }
                    self.satisfy_reads(&mut inner)
                }
            }
        };
        self.defer_all(completions);
    }

    fn on_writable(&self) {
        let completions = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != ConnectionState::Open {
                return;
            }

            let mut completions: Vec<Callback> = Vec::new();
            let mut failure = None;
            loop {
                let Inner { fd, writes, .. } = &mut *inner;
                let Some(op) = writes.front_mut() else {
                    break;
                };
                match fd.write(&op.data[op.offset..]) {
                    Ok(Some(n)) if n > 0 => {
                        op.offset += n;
                        if op.offset >= op.data.len()
                            && let Some(op) = writes.pop_front()
                        {
                            completions.push(op.done);
                        }
                    }
                    Ok(_) => break,
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            if let Some(err) = failure {
                completions.extend(self.fault(&mut inner, err));
            } else if inner.writes.is_empty() {
                self.events.deregister_for_write(self.id);
            }
            completions
        };
        self.defer_all(completions);
    }
}
