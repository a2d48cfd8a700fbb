//! Outside light scheduling.
//!
//! The controller wakes up periodically, makes sure the modem link is usable,
//! and switches every configured light off while the sun is up and on
//! otherwise. A check only commands lights whose confirmed state differs from
//! the wanted one, so a steady state costs no powerline traffic. The next check
//! is scheduled once every command of the current round has resolved.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::logger::Logger;
use crate::plm::{DeviceAddress, PlmEndpoint, Response};
use crate::reactor::{AlarmHandle, AlarmManager};
use crate::solar;
use crate::time_source::TimeSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightState {
    /// Nothing requested yet.
    Idle,
    Sent,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Light {
    address: DeviceAddress,
    state: LightState,
    /// Last requested level.
    on: bool,
}

impl Light {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            state: LightState::Idle,
            on: false,
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn state(&self) -> LightState {
        self.state
    }

    /// Confirmed on by the device.
    pub fn is_on(&self) -> bool {
        self.state == LightState::Done && self.on
    }

    /// Confirmed off by the device.
    pub fn is_off(&self) -> bool {
        self.state == LightState::Done && !self.on
    }

    /// No command outstanding.
    pub fn is_settled(&self) -> bool {
        self.state != LightState::Sent
    }

    fn request(&mut self, on: bool) {
        self.state = LightState::Sent;
        self.on = on;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSchedule {
    pub latitude: f64,
    pub longitude: f64,
    pub check_interval: Duration,
}

pub struct LightController {
    this: Weak<Self>,
    endpoint: Rc<PlmEndpoint>,
    alarms: Rc<dyn AlarmManager>,
    clock: Rc<dyn TimeSource>,
    logger: Rc<dyn Logger>,
    schedule: LightSchedule,
    lights: RefCell<Vec<Light>>,
    next_check: RefCell<Option<AlarmHandle>>,
}

impl LightController {
    pub fn new(
        endpoint: Rc<PlmEndpoint>,
        alarms: Rc<dyn AlarmManager>,
        clock: Rc<dyn TimeSource>,
        logger: Rc<dyn Logger>,
        schedule: LightSchedule,
        addresses: &[DeviceAddress],
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            endpoint,
            alarms,
            clock,
            logger,
            schedule,
            lights: RefCell::new(addresses.iter().copied().map(Light::new).collect()),
            next_check: RefCell::new(None),
        })
    }

    pub fn lights(&self) -> Vec<Light> {
        self.lights.borrow().clone()
    }

    pub fn endpoint(&self) -> &Rc<PlmEndpoint> {
        &self.endpoint
    }

    /// Run the first check right away.
    pub fn start(&self) {
        self.check();
    }

    /// Cancel the next check and close the modem link.
    pub fn stop(&self) {
        if let Some(alarm) = self.next_check.borrow_mut().take() {
            alarm.stop();
        }
        self.endpoint.stop();
    }

    fn schedule_next_check(&self) {
        let this = self.this.clone();
        let alarm = self.alarms.schedule_alarm(
            Box::new(move || {
                if let Some(this) = this.upgrade() {
                    this.next_check.borrow_mut().take();
                    this.check();
                }
            }),
            self.schedule.check_interval,
        );
        if let Some(previous) = self.next_check.borrow_mut().replace(alarm) {
            previous.stop();
        }
    }

    fn check(&self) {
        if !self.endpoint.is_ok() {
            self.logger.debug("modem link faulted, closing it");
            self.endpoint.stop();
        }
        if self.endpoint.is_closed() {
            self.endpoint.start();
        }
        if !self.endpoint.is_ok() || self.endpoint.is_closed() {
            self.logger.error("modem link unavailable, retrying at the next check");
            self.schedule_next_check();
            return;
        }

        let now = self.clock.local_now();
        let daytime = match solar::is_daytime(&now, self.schedule.latitude, self.schedule.longitude) {
            Ok(daytime) => daytime,
            Err(err) => {
                self.logger.error(&format!("cannot compute sun times: {err}"));
                self.schedule_next_check();
                return;
            }
        };
        let want_on = !daytime;

        let requests: Vec<(usize, DeviceAddress)> = {
            let mut lights = self.lights.borrow_mut();
            lights
                .iter_mut()
                .enumerate()
                .filter(|(_, light)| if want_on { !light.is_on() } else { !light.is_off() })
                .map(|(index, light)| {
                    light.request(want_on);
                    (index, light.address)
                })
                .collect()
        };

        for (index, address) in requests {
            self.logger.info(&format!(
                "switching {address} {}",
                if want_on { "on" } else { "off" }
            ));
            let this = self.this.clone();
            let done = move |response| {
                if let Some(this) = this.upgrade() {
                    this.on_light_done(index, response);
                }
            };
            if want_on {
                self.endpoint.send_light_on(address, done);
            } else {
                self.endpoint.send_light_off(address, done);
            }
        }

        self.schedule_if_settled();
    }

    fn on_light_done(&self, index: usize, response: Response) {
        let address = {
            let mut lights = self.lights.borrow_mut();
            let Some(light) = lights.get_mut(index) else {
                return;
            };
            light.state = if response == Response::Ok {
                LightState::Done
            } else {
                LightState::Failed
            };
            light.address
        };

        match response {
            Response::Ok => self.logger.debug(&format!("{address} confirmed")),
            other => self.logger.error(&format!("{address} not switched: {other:?}")),
        }
        self.schedule_if_settled();
    }

    fn schedule_if_settled(&self) {
        let settled = self.lights.borrow().iter().all(Light::is_settled);
        let waiting = self.next_check.borrow().as_ref().is_some_and(AlarmHandle::is_pending);
        if settled && !waiting {
            self.schedule_next_check();
        }
    }
}
