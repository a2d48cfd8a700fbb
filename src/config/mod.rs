//! Configuration for the shd daemon.
//!
//! Settings live in a TOML file, by default `$XDG_CONFIG_HOME/shd/shd.toml`,
//! or wherever `--config PATH` points:
//!
//! ```toml
//! serial_device = "/dev/ttyUSB0"   # Serial port of the powerline modem
//! latitude = 52.37                 # Location used for sunrise/sunset
//! longitude = 4.89
//! outside_lights = ["226A8F"]      # Device addresses, six hex digits each
//!
//! # Optional tuning
//! device_ack_timeout_ms = 5000     # Wait for a device answer (100-60000)
//! modem_timeout_ms = 5000          # Wait for the modem echo (100-60000)
//! max_send_attempts = 5            # Sends per command before giving up (1-20)
//! check_interval_secs = 60         # Time between light checks (10-3600)
//! ```
//!
//! Loading validates every field; a file that fails validation is rejected
//! as a whole with an error naming the offending setting.

pub mod loading;
pub mod validation;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::constants::*;
use crate::lights::LightSchedule;
use crate::plm::{DeviceAddress, EndpointConfig};

pub use loading::{get_config_path, load, load_from_path, set_config_path};

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Serial port the modem is attached to.
    pub serial_device: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Addresses of the lights switched at sunrise and sunset.
    #[serde(default)]
    pub outside_lights: Vec<String>,

    pub device_ack_timeout_ms: Option<u64>,
    pub modem_timeout_ms: Option<u64>,
    pub max_send_attempts: Option<u32>,
    pub check_interval_secs: Option<u64>,
}

impl Config {
    pub fn load() -> Result<Self> {
        loading::load()
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        loading::load_from_path(path)
    }

    pub fn serial_device(&self) -> &str {
        self.serial_device.as_deref().unwrap_or(DEFAULT_SERIAL_DEVICE)
    }

    /// Decoded light addresses, in file order.
    pub fn light_addresses(&self) -> Result<Vec<DeviceAddress>> {
        self.outside_lights
            .iter()
            .map(|addr| {
                addr.parse::<DeviceAddress>()
                    .with_context(|| format!("Invalid entry in outside_lights: '{addr}'"))
            })
            .collect()
    }

    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            modem_timeout: Duration::from_millis(self.modem_timeout_ms.unwrap_or(DEFAULT_MODEM_TIMEOUT_MS)),
            device_ack_timeout: Duration::from_millis(
                self.device_ack_timeout_ms.unwrap_or(DEFAULT_DEVICE_ACK_TIMEOUT_MS),
            ),
            max_send_attempts: self.max_send_attempts.unwrap_or(DEFAULT_MAX_SEND_ATTEMPTS),
        }
    }

    pub fn light_schedule(&self) -> LightSchedule {
        LightSchedule {
            latitude: self.latitude,
            longitude: self.longitude,
            check_interval: Duration::from_secs(self.check_interval_secs.unwrap_or(DEFAULT_CHECK_INTERVAL_SECS)),
        }
    }

    /// Print the effective settings.
    pub fn log_config(&self, path: &Path) {
        let endpoint = self.endpoint_config();
        let schedule = self.light_schedule();

        log_block_start!("Loaded configuration from {}", path.display());
        log_indented!("Serial device: {}", self.serial_device());
        log_indented!("Location: {:.4}°, {:.4}°", self.latitude, self.longitude);
        if self.outside_lights.is_empty() {
            log_indented!("Outside lights: none");
        } else {
            log_indented!("Outside lights: {}", self.outside_lights.join(", "));
        }
        log_indented!("Check interval: {}s", schedule.check_interval.as_secs());
        log_indented!(
            "Modem timeout: {}ms, device timeout: {}ms, attempts: {}",
            endpoint.modem_timeout.as_millis(),
            endpoint.device_ack_timeout.as_millis(),
            endpoint.max_send_attempts
        );
    }
}

#[cfg(test)]
mod tests;
