//! Frame reader and single-flight command sender for the modem link.
//!
//! The reader keeps exactly one read outstanding on the buffered connection
//! and advances through [`ReadState`] only from that read's completion.
//! Garbage and unknown command numbers are skipped until the next `STX`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use thiserror::Error;

use super::{ACK, NAK, STX, frame_len, has_trailer, is_notification};
use crate::io::BufferedConnection;
use crate::logger::Logger;
use crate::reactor::Executor;

/// Outcome of a command sent to the modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlmResponse {
    /// Modem accepted the command; carries the echoed frame without its trailer.
    Ack(Vec<u8>),
    Nack,
    /// The link failed or was stopped before the modem answered.
    Error,
}

pub type ResponseCallback = Box<dyn FnOnce(PlmResponse)>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlmError {
    #[error("a command is already waiting for the modem's answer")]
    CommandInFlight,
    #[error("cannot send an empty command")]
    EmptyCommand,
}

/// Observer of unsolicited frames from the modem.
pub trait CommandListener {
    /// Called with the frame body, command number first.
    fn on_command(&self, frame: &[u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Idle,
    AwaitingStx,
    AwaitingCommand,
    AwaitingFirstByte { command: u8, len: usize },
    AwaitingRest { command: u8, len: usize },
}

impl ReadState {
    fn wanted(self) -> usize {
        match self {
            ReadState::Idle => 0,
            ReadState::AwaitingStx | ReadState::AwaitingCommand | ReadState::AwaitingFirstByte { .. } => 1,
            ReadState::AwaitingRest { len, .. } => len - 1,
        }
    }
}

struct InFlight {
    command: u8,
    done: ResponseCallback,
}

struct State {
    // Bumped on start/stop so completions from an older session are ignored.
    session: u64,
    read_state: ReadState,
    frame: Vec<u8>,
    in_flight: Option<InFlight>,
    last_sent_len: Option<usize>,
    listeners: Vec<(ListenerId, Weak<dyn CommandListener>)>,
    next_listener: u64,
}

pub struct PlmConnection {
    this: Weak<Self>,
    conn: Rc<BufferedConnection>,
    executor: Rc<dyn Executor>,
    logger: Rc<dyn Logger>,
    state: RefCell<State>,
}

impl PlmConnection {
    pub fn new(conn: Rc<BufferedConnection>, executor: Rc<dyn Executor>, logger: Rc<dyn Logger>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            conn,
            executor,
            logger,
            state: RefCell::new(State {
                session: 0,
                read_state: ReadState::Idle,
                frame: Vec::new(),
                in_flight: None,
                last_sent_len: None,
                listeners: Vec::new(),
                next_listener: 0,
            }),
        })
    }

    pub fn is_ok(&self) -> bool {
        self.conn.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    pub fn connection(&self) -> &Rc<BufferedConnection> {
        &self.conn
    }

    pub fn has_command_in_flight(&self) -> bool {
        self.state.borrow().in_flight.is_some()
    }

    fn is_healthy(&self) -> bool {
        self.conn.is_ok() && !self.conn.is_closed()
    }

    /// Open the link and start reading frames.
    pub fn start(&self) {
        if self.is_healthy() && self.state.borrow().read_state != ReadState::Idle {
            return;
        }

        self.conn.start();
        {
            let mut state = self.state.borrow_mut();
            state.session += 1;
            state.read_state = ReadState::Idle;
            state.frame.clear();
        }
        if self.is_healthy() {
            self.expect(ReadState::AwaitingStx);
        }
    }

    /// Close the link; a command still waiting for the modem resolves with `Error`.
    pub fn stop(&self) {
        self.conn.stop();
        {
            let mut state = self.state.borrow_mut();
            state.session += 1;
            state.read_state = ReadState::Idle;
            state.frame.clear();
        }
        self.respond(PlmResponse::Error);
    }

    pub fn add_listener(&self, listener: Weak<dyn CommandListener>) -> ListenerId {
        let mut state = self.state.borrow_mut();
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        state.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.state.borrow_mut().listeners.retain(|(listener, _)| *listener != id);
    }

    /// Frame and transmit `command`; `done` receives the modem's answer.
    ///
    /// Only one command may wait for an answer at a time.
    pub fn send_command(&self, command: Vec<u8>, done: impl FnOnce(PlmResponse) + 'static) -> Result<(), PlmError> {
        let session = {
            let mut state = self.state.borrow_mut();
            if state.in_flight.is_some() {
                return Err(PlmError::CommandInFlight);
            }
            let Some(&number) = command.first() else {
                return Err(PlmError::EmptyCommand);
            };
            state.in_flight = Some(InFlight {
                command: number,
                done: Box::new(done),
            });
            state.last_sent_len = Some(command.len());
            state.session
        };

        let mut framed = Vec::with_capacity(command.len() + 1);
        framed.push(STX);
        framed.extend_from_slice(&command);

        let this = self.this.clone();
        self.conn.write(framed, move || {
            if let Some(this) = this.upgrade()
                && this.current_session() == session
                && !this.is_healthy()
            {
                this.logger.error("modem link failed while sending a command");
                this.respond(PlmResponse::Error);
            }
        });
        Ok(())
    }

    fn current_session(&self) -> u64 {
        self.state.borrow().session
    }

    fn respond(&self, response: PlmResponse) {
        let in_flight = self.state.borrow_mut().in_flight.take();
        if let Some(InFlight { done, .. }) = in_flight {
            self.executor.run_later(Box::new(move || done(response)));
        }
    }

    fn expect(&self, next: ReadState) {
        let session = {
            let mut state = self.state.borrow_mut();
            state.read_state = next;
            state.session
        };

        let this = self.this.clone();
        self.conn.read(next.wanted(), move |bytes| {
            if let Some(this) = this.upgrade() {
                this.on_bytes(session, next, bytes);
            }
        });
    }

    fn on_bytes(&self, session: u64, expected: ReadState, bytes: Vec<u8>) {
        {
            let state = self.state.borrow();
            if state.session != session || state.read_state != expected {
                return;
            }
        }

        if bytes.len() < expected.wanted() || !self.is_healthy() {
            self.logger.debug("modem link closed, frame reader stopped");
            self.state.borrow_mut().read_state = ReadState::Idle;
            self.respond(PlmResponse::Error);
            return;
        }

        match expected {
            ReadState::Idle => {}
            ReadState::AwaitingStx => {
                if bytes[0] != STX {
                    self.logger.debug(&format!("skipping byte {:02X} while waiting for STX", bytes[0]));
                    self.expect(ReadState::AwaitingStx);
                } else {
                    self.expect(ReadState::AwaitingCommand);
                }
            }
            ReadState::AwaitingCommand => {
                let command = bytes[0];
                let last_sent_len = self.state.borrow().last_sent_len;
                match frame_len(command, last_sent_len) {
                    Some(len) if len > 0 => {
                        self.state.borrow_mut().frame = vec![command];
                        self.expect(ReadState::AwaitingFirstByte { command, len });
                    }
                    _ => {
                        self.logger.debug(&format!("unknown command {command:02X}, resynchronizing"));
                        self.expect(ReadState::AwaitingStx);
                    }
                }
            }
            ReadState::AwaitingFirstByte { command, len } => {
                let nacked = bytes[0] == NAK && self.in_flight_command() == Some(command);
                if nacked {
                    self.respond(PlmResponse::Nack);
                    self.expect(ReadState::AwaitingStx);
                    return;
                }

                self.state.borrow_mut().frame.push(bytes[0]);
                if len == 1 {
                    self.complete_frame(session, command);
                } else {
                    self.expect(ReadState::AwaitingRest { command, len });
                }
            }
            ReadState::AwaitingRest { command, .. } => {
                self.state.borrow_mut().frame.extend_from_slice(&bytes);
                self.complete_frame(session, command);
            }
        }
    }

    fn in_flight_command(&self) -> Option<u8> {
        self.state.borrow().in_flight.as_ref().map(|cmd| cmd.command)
    }

    fn complete_frame(&self, session: u64, command: u8) {
        let frame = std::mem::take(&mut self.state.borrow_mut().frame);

        if has_trailer(command) && self.in_flight_command() == Some(command) {
            let (body, trailer) = match frame.split_last() {
                Some((trailer, body)) => (body, *trailer),
                None => (&frame[..0], NAK),
            };
            let response = if trailer == ACK || trailer & 0xF0 == 0x20 {
                PlmResponse::Ack(body.to_vec())
            } else {
                PlmResponse::Nack
            };
            self.respond(response);
        }

        if is_notification(command) {
            let listeners: Vec<Rc<dyn CommandListener>> = self
                .state
                .borrow()
                .listeners
                .iter()
                .filter_map(|(_, listener)| listener.upgrade())
                .collect();
            for listener in listeners {
                listener.on_command(&frame);
            }
        }

        // A listener may have stopped or restarted the link.
        if self.current_session() == session {
            self.expect(ReadState::AwaitingStx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NullLogger;
    use crate::testing::{MockEventManager, MockExecutor, ScriptedFd};
    use nix::errno::Errno;

    struct Harness {
        plm: Rc<PlmConnection>,
        fd: ScriptedFd,
        events: Rc<MockEventManager>,
        executor: Rc<MockExecutor>,
    }

    impl Harness {
        fn receive(&self, bytes: &[u8]) {
            self.fd.feed(bytes);
            self.events.signal_readable();
            self.executor.run_all();
        }
    }

    fn harness() -> Harness {
        let fd = ScriptedFd::new();
        let events = MockEventManager::new();
        let executor = MockExecutor::new();
        let logger = Rc::new(NullLogger);
        let conn = BufferedConnection::new(Box::new(fd.clone()), events.clone(), executor.clone(), logger.clone());
        let plm = PlmConnection::new(conn, executor.clone(), logger);
        plm.start();
        Harness {
            plm,
            fd,
            events,
            executor,
        }
    }

    fn capture() -> (Rc<RefCell<Vec<PlmResponse>>>, impl FnOnce(PlmResponse) + 'static) {
        let responses = Rc::new(RefCell::new(Vec::new()));
        let sink = {
            let responses = responses.clone();
            move |response| responses.borrow_mut().push(response)
        };
        (responses, sink)
    }

    struct Recorder(RefCell<Vec<Vec<u8>>>);

    impl CommandListener for Recorder {
        fn on_command(&self, frame: &[u8]) {
            self.0.borrow_mut().push(frame.to_vec());
        }
    }

    const LIGHT_ON: [u8; 7] = [0x62, 0x01, 0x02, 0x03, 0x0F, 0x12, 0xFF];

    #[test]
    fn test_send_frames_command() {
        let h = harness();
        let (_, sink) = capture();
        h.plm.send_command(LIGHT_ON.to_vec(), sink).unwrap();
        assert_eq!(h.fd.written(), vec![0x02, 0x62, 0x01, 0x02, 0x03, 0x0F, 0x12, 0xFF]);
        assert!(h.plm.has_command_in_flight());
    }

    #[test]
    fn test_ack() {
        let h = harness();
        let (responses, sink) = capture();
        h.plm.send_command(LIGHT_ON.to_vec(), sink).unwrap();
        h.executor.run_all();

        h.receive(&[0x02, 0x62, 0x01, 0x02, 0x03, 0x0F, 0x12, 0xFF, 0x06]);
        assert_eq!(*responses.borrow(), vec![PlmResponse::Ack(LIGHT_ON.to_vec())]);
        assert!(!h.plm.has_command_in_flight());
    }

    #[test]
    fn test_nack_on_first_byte() {
        let h = harness();
        let (responses, sink) = capture();
        h.plm.send_command(LIGHT_ON.to_vec(), sink).unwrap();

        h.receive(&[0x02, 0x62, 0x15]);
        assert_eq!(*responses.borrow(), vec![PlmResponse::Nack]);
    }

    #[test]
    fn test_nack_trailer() {
        let h = harness();
        let (responses, sink) = capture();
        h.plm.send_command(LIGHT_ON.to_vec(), sink).unwrap();

        h.receive(&[0x02, 0x62, 0x01, 0x02, 0x03, 0x0F, 0x12, 0xFF, 0x15]);
        assert_eq!(*responses.borrow(), vec![PlmResponse::Nack]);
    }

    #[test]
    fn test_second_send_rejected() {
        let h = harness();
        let (responses, sink) = capture();
        h.plm.send_command(LIGHT_ON.to_vec(), sink).unwrap();

        let (second, other) = capture();
        assert_eq!(
            h.plm.send_command(LIGHT_ON.to_vec(), other),
            Err(PlmError::CommandInFlight)
        );
        assert_eq!(h.fd.written().len(), 8);

        h.receive(&[0x02, 0x62, 0x01, 0x02, 0x03, 0x0F, 0x12, 0xFF, 0x06]);
        assert_eq!(responses.borrow().len(), 1);
        assert!(second.borrow().is_empty());
    }

    #[test]
    fn test_empty_command_rejected() {
        let h = harness();
        let (_, sink) = capture();
        assert_eq!(h.plm.send_command(Vec::new(), sink), Err(PlmError::EmptyCommand));
        assert!(!h.plm.has_command_in_flight());
    }

    #[test]
    fn test_resync_after_garbage() {
        let h = harness();
        let (responses, sink) = capture();
        h.plm.send_command(LIGHT_ON.to_vec(), sink).unwrap();

        // Stray bytes, then an unknown command, then the real echo.
        h.receive(&[0xAA, 0x55, 0x02, 0x7E, 0x02, 0x62, 0x01, 0x02, 0x03, 0x0F, 0x12, 0xFF, 0x06]);
        assert_eq!(*responses.borrow(), vec![PlmResponse::Ack(LIGHT_ON.to_vec())]);
    }

    #[test]
    fn test_echo_before_any_send_is_skipped() {
        let h = harness();
        let recorder = Rc::new(Recorder(RefCell::new(Vec::new())));
        let weak: Weak<dyn CommandListener> = Rc::downgrade(&recorder) as Weak<dyn CommandListener>;
        h.plm.add_listener(weak);

        h.receive(&[0x02, 0x62, 0x02, 0x50, 0x04, 0x05, 0x06, 0x01, 0x02, 0x03, 0x2F, 0x12, 0xFF]);
        assert_eq!(recorder.0.borrow().len(), 1);
    }

    #[test]
    fn test_listener_receives_standard_message() {
        let h = harness();
        let recorder = Rc::new(Recorder(RefCell::new(Vec::new())));
        let weak: Weak<dyn CommandListener> = Rc::downgrade(&recorder) as Weak<dyn CommandListener>;
        let id = h.plm.add_listener(weak);

        let message = [0x02, 0x50, 0x04, 0x05, 0x06, 0x01, 0x02, 0x03, 0x2F, 0x12, 0xFF];
        h.receive(&message);
        assert_eq!(*recorder.0.borrow(), vec![message[1..].to_vec()]);

        h.plm.remove_listener(id);
        h.receive(&message);
        assert_eq!(recorder.0.borrow().len(), 1);
    }

    #[test]
    fn test_standard_message_does_not_resolve_command() {
        let h = harness();
        let (responses, sink) = capture();
        h.plm.send_command(LIGHT_ON.to_vec(), sink).unwrap();

        h.receive(&[0x02, 0x50, 0x04, 0x05, 0x06, 0x01, 0x02, 0x03, 0x2F, 0x12, 0xFF]);
        assert!(responses.borrow().is_empty());
        assert!(h.plm.has_command_in_flight());
    }

    #[test]
    fn test_frames_split_across_reads() {
        let h = harness();
        let (responses, sink) = capture();
        h.plm.send_command(LIGHT_ON.to_vec(), sink).unwrap();

        h.receive(&[0x02, 0x62, 0x01]);
        h.receive(&[0x02, 0x03, 0x0F]);
        assert!(responses.borrow().is_empty());
        h.receive(&[0x12, 0xFF, 0x06]);
        assert_eq!(*responses.borrow(), vec![PlmResponse::Ack(LIGHT_ON.to_vec())]);
    }

    #[test]
    fn test_error_on_read_fault() {
        let h = harness();
        let (responses, sink) = capture();
        h.plm.send_command(LIGHT_ON.to_vec(), sink).unwrap();
        h.executor.run_all();

        h.fd.script().read_error = Some(Errno::EIO as i32);
        h.events.signal_readable();
        h.executor.run_all();
        assert_eq!(*responses.borrow(), vec![PlmResponse::Error]);
        assert!(!h.plm.is_ok());
    }

    #[test]
    fn test_error_when_sending_on_closed_link() {
        let h = harness();
        h.plm.stop();
        h.executor.run_all();

        let (responses, sink) = capture();
        h.plm.send_command(LIGHT_ON.to_vec(), sink).unwrap();
        h.executor.run_all();
        assert_eq!(*responses.borrow(), vec![PlmResponse::Error]);
        assert!(h.fd.written().is_empty());
    }

    #[test]
    fn test_stop_resolves_in_flight_with_error_once() {
        let h = harness();
        let (responses, sink) = capture();
        h.plm.send_command(LIGHT_ON.to_vec(), sink).unwrap();

        h.plm.stop();
        h.executor.run_all();
        assert_eq!(*responses.borrow(), vec![PlmResponse::Error]);
        assert!(h.plm.is_closed());
    }

    #[test]
    fn test_restart_reads_fresh_frames() {
        let h = harness();
        h.plm.stop();
        h.executor.run_all();
        h.plm.start();
        assert!(!h.plm.is_closed());

        let (responses, sink) = capture();
        h.plm.send_command(LIGHT_ON.to_vec(), sink).unwrap();
        h.receive(&[0x02, 0x62, 0x01, 0x02, 0x03, 0x0F, 0x12, 0xFF, 0x06]);
        assert_eq!(*responses.borrow(), vec![PlmResponse::Ack(LIGHT_ON.to_vec())]);
    }

    #[test]
    fn test_start_twice_keeps_single_reader() {
        let h = harness();
        h.plm.start();
        assert_eq!(h.plm.connection().pending_reads(), 1);
    }
}
