//! Retrying command queue on top of the modem link.
//!
//! Commands are sent one at a time in arrival order. A command is finished
//! only when the target device itself acknowledges it: the modem's ACK merely
//! says the message went out on the powerline. Lost modem answers reset the
//! link, lost device answers trigger a resend, and each command gets a
//! bounded number of sends before it resolves with [`Response::Timeout`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::Duration;

use super::connection::{CommandListener, ListenerId, PlmConnection, PlmResponse};
use super::{DeviceAddress, STANDARD_MESSAGE, light_off_command, light_on_command};
use crate::logger::Logger;
use crate::reactor::{AlarmHandle, AlarmManager, Executor};

/// Final outcome of a queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ok,
    Error,
    /// The device never acknowledged within the allowed number of sends.
    Timeout,
}

pub type DoneCallback = Box<dyn FnOnce(Response)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointConfig {
    /// How long to wait for the modem to echo a command.
    pub modem_timeout: Duration,
    /// How long to wait for the device after the modem accepted a command.
    pub device_ack_timeout: Duration,
    pub max_send_attempts: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            modem_timeout: Duration::from_millis(crate::constants::DEFAULT_MODEM_TIMEOUT_MS),
            device_ack_timeout: Duration::from_millis(crate::constants::DEFAULT_DEVICE_ACK_TIMEOUT_MS),
            max_send_attempts: crate::constants::DEFAULT_MAX_SEND_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandState {
    Init,
    Sent,
    NeedResend,
    WaitingForDeviceAck,
}

struct Command {
    address: DeviceAddress,
    bytes: Vec<u8>,
    done: DoneCallback,
    state: CommandState,
    alarm: Option<AlarmHandle>,
    attempts: u32,
    // Identifies the latest send so answers to earlier sends are ignored.
    token: u64,
}

impl Command {
    fn cancel_alarm(&mut self) {
        if let Some(alarm) = self.alarm.take() {
            alarm.stop();
        }
    }
}

pub struct PlmEndpoint {
    this: Weak<Self>,
    plm: Rc<PlmConnection>,
    alarms: Rc<dyn AlarmManager>,
    executor: Rc<dyn Executor>,
    logger: Rc<dyn Logger>,
    config: EndpointConfig,
    listener: ListenerId,
    queue: RefCell<VecDeque<Command>>,
    next_token: Cell<u64>,
}

impl PlmEndpoint {
    pub fn new(
        plm: Rc<PlmConnection>,
        alarms: Rc<dyn AlarmManager>,
        executor: Rc<dyn Executor>,
        logger: Rc<dyn Logger>,
        config: EndpointConfig,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let listener: Weak<dyn CommandListener> = this.clone();
            let listener = plm.add_listener(listener);
            Self {
                this: this.clone(),
                plm,
                alarms,
                executor,
                logger,
                config,
                listener,
                queue: RefCell::new(VecDeque::new()),
                next_token: Cell::new(0),
            }
        })
    }

    pub fn start(&self) {
        self.plm.start();
    }

    /// Stop the link and resolve every queued command with `Error`.
    pub fn stop(&self) {
        let abandoned = std::mem::take(&mut *self.queue.borrow_mut());
        self.plm.stop();
        self.resolve_all(abandoned, Response::Error);
    }

    pub fn is_ok(&self) -> bool {
        self.plm.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.plm.is_closed()
    }

    /// Commands waiting or in progress.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn send_light_on(&self, address: DeviceAddress, done: impl FnOnce(Response) + 'static) {
        self.enqueue(address, light_on_command(address), Box::new(done));
    }

    pub fn send_light_off(&self, address: DeviceAddress, done: impl FnOnce(Response) + 'static) {
        self.enqueue(address, light_off_command(address), Box::new(done));
    }

    fn enqueue(&self, address: DeviceAddress, bytes: Vec<u8>, done: DoneCallback) {
        let is_head = {
            let mut queue = self.queue.borrow_mut();
            queue.push_back(Command {
                address,
                bytes,
                done,
                state: CommandState::Init,
                alarm: None,
                attempts: 0,
                token: 0,
            });
            queue.len() == 1
        };
        if is_head {
            self.send_top_command();
        }
    }

    fn resolve(&self, done: DoneCallback, response: Response) {
        self.executor.run_later(Box::new(move || done(response)));
    }

    fn resolve_all(&self, commands: VecDeque<Command>, response: Response) {
        for mut command in commands {
            command.cancel_alarm();
            self.resolve(command.done, response);
        }
    }

    fn next_token(&self) -> u64 {
        let token = self.next_token.get() + 1;
        self.next_token.set(token);
        token
    }

    fn schedule(&self, token: u64, delay: Duration, on_fire: fn(&Self, u64)) -> AlarmHandle {
        let this = self.this.clone();
        self.alarms.schedule_alarm(
            Box::new(move || {
                if let Some(this) = this.upgrade() {
                    on_fire(&this, token);
                }
            }),
            delay,
        )
    }

    /// Send the head of the queue, skipping commands that ran out of attempts.
    fn send_top_command(&self) {
        loop {
            if self.queue.borrow().is_empty() {
                return;
            }
            if !self.plm.is_ok() || self.plm.is_closed() {
                self.logger.error("modem link unavailable, dropping queued commands");
                let abandoned = std::mem::take(&mut *self.queue.borrow_mut());
                self.resolve_all(abandoned, Response::Error);
                return;
            }

            let mut queue = self.queue.borrow_mut();
            let Some(command) = queue.front_mut() else {
                return;
            };

            if command.attempts >= self.config.max_send_attempts {
                if let Some(mut expired) = queue.pop_front() {
                    drop(queue);
                    self.logger.error(&format!(
                        "device {} did not answer after {} attempts",
                        expired.address, expired.attempts
                    ));
                    expired.cancel_alarm();
                    self.resolve(expired.done, Response::Timeout);
                }
                continue;
            }

            let token = self.next_token();
            command.cancel_alarm();
            command.attempts += 1;
            command.state = CommandState::Sent;
            command.token = token;
            command.alarm = Some(self.schedule(token, self.config.modem_timeout, Self::on_modem_timeout));
            let bytes = command.bytes.clone();
            self.logger.debug(&format!(
                "sending {:02X?} to {} (attempt {})",
                bytes, command.address, command.attempts
            ));
            drop(queue);

            let this = self.this.clone();
            let sent = self.plm.send_command(bytes, move |response| {
                if let Some(this) = this.upgrade() {
                    this.on_command_sent(token, response);
                }
            });
            if let Err(err) = sent {
                // The modem timeout resets the link, which clears the stuck command.
                self.logger.error(&format!("cannot send command: {err}"));
            }
            return;
        }
    }

    fn resend(&self) {
        if let Some(command) = self.queue.borrow_mut().front_mut() {
            command.state = CommandState::NeedResend;
        }
        self.send_top_command();
    }

    /// Run `f` on the head command if `token` still identifies its latest send.
    fn with_current<R>(&self, token: u64, state: CommandState, f: impl FnOnce(&mut Command) -> R) -> Option<R> {
        let mut queue = self.queue.borrow_mut();
        let command = queue.front_mut()?;
        if command.token != token || command.state != state {
            return None;
        }
        Some(f(command))
    }

    fn on_command_sent(&self, token: u64, response: PlmResponse) {
        match response {
            PlmResponse::Ack(_) => {
                let alarm = self.schedule(token, self.config.device_ack_timeout, Self::on_device_timeout);
                let accepted = self.with_current(token, CommandState::Sent, |command| {
                    command.cancel_alarm();
                    command.state = CommandState::WaitingForDeviceAck;
                    command.alarm = Some(alarm.clone());
                });
                if accepted.is_none() {
                    alarm.stop();
                }
            }
            PlmResponse::Nack => {
                if self.with_current(token, CommandState::Sent, |_| ()).is_some() {
                    self.logger.debug("modem rejected command, resending");
                    self.resend();
                }
            }
            PlmResponse::Error => {
                if self.with_current(token, CommandState::Sent, |_| ()).is_none() {
                    return;
                }
                if self.plm.is_ok() && !self.plm.is_closed() {
                    self.resend();
                } else {
                    let abandoned = std::mem::take(&mut *self.queue.borrow_mut());
                    self.resolve_all(abandoned, Response::Error);
                }
            }
        }
    }

    fn on_modem_timeout(&self, token: u64) {
        let current = self.with_current(token, CommandState::Sent, |command| {
            command.alarm = None;
        });
        if current.is_some() {
            self.logger.error("modem did not answer, resetting the link");
            self.plm.stop();
            self.plm.start();
            self.resend();
        }
    }

    fn on_device_timeout(&self, token: u64) {
        let current = self.with_current(token, CommandState::WaitingForDeviceAck, |command| {
            command.alarm = None;
        });
        if current.is_some() {
            self.logger.debug("device did not answer, resending");
            self.resend();
        }
    }
}

impl CommandListener for PlmEndpoint {
    fn on_command(&self, frame: &[u8]) {
        // 0x50, from[3], to[3], flags, cmd1, cmd2
        if frame.len() < 10 || frame[0] != STANDARD_MESSAGE {
            return;
        }

        let acked = {
            let mut queue = self.queue.borrow_mut();
            let Some(command) = queue.front_mut() else {
                return;
            };
            if command.state != CommandState::WaitingForDeviceAck {
                return;
            }
            if !command.address.matches(&frame[1..4]) && !command.address.matches(&frame[4..7]) {
                return;
            }
            if frame[8] != command.bytes[5] {
                return;
            }

            command.cancel_alarm();
            if frame[7] & 0xF0 == 0x20 {
                queue.pop_front()
            } else {
                None
            }
        };

        match acked {
            Some(command) => {
                self.logger.debug(&format!("device {} acknowledged", command.address));
                self.send_top_command();
                self.resolve(command.done, Response::Ok);
            }
            None => {
                self.logger.debug("device rejected command, resending");
                self.resend();
            }
        }
    }
}

impl Drop for PlmEndpoint {
    fn drop(&mut self) {
        self.plm.remove_listener(self.listener);
        for command in self.queue.get_mut().iter_mut() {
            command.cancel_alarm();
        }
    }
}
