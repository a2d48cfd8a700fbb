//! Range and format checks applied to every loaded configuration.

use anyhow::{Context, Result};

use super::Config;
use crate::constants::*;
use crate::plm::DeviceAddress;

pub fn validate_config(config: &Config) -> Result<()> {
    if let Some(device) = &config.serial_device
        && device.trim().is_empty()
    {
        anyhow::bail!("serial_device must not be empty");
    }

    if !(-90.0..=90.0).contains(&config.latitude) {
        anyhow::bail!(
            "latitude must be between -90 and 90 degrees (got {})",
            config.latitude
        );
    }

    if !(-180.0..=180.0).contains(&config.longitude) {
        anyhow::bail!(
            "longitude must be between -180 and 180 degrees (got {})",
            config.longitude
        );
    }

    for addr in &config.outside_lights {
        addr.parse::<DeviceAddress>()
            .with_context(|| format!("Invalid entry in outside_lights: '{addr}'"))?;
    }

    validate_timeout(config.modem_timeout_ms, "modem_timeout_ms")?;
    validate_timeout(config.device_ack_timeout_ms, "device_ack_timeout_ms")?;

    if let Some(attempts) = config.max_send_attempts
        && !(MINIMUM_SEND_ATTEMPTS..=MAXIMUM_SEND_ATTEMPTS).contains(&attempts)
    {
        anyhow::bail!(
            "max_send_attempts ({}) must be between {} and {}",
            attempts,
            MINIMUM_SEND_ATTEMPTS,
            MAXIMUM_SEND_ATTEMPTS
        );
    }

    if let Some(interval) = config.check_interval_secs
        && !(MINIMUM_CHECK_INTERVAL_SECS..=MAXIMUM_CHECK_INTERVAL_SECS).contains(&interval)
    {
        anyhow::bail!(
            "check_interval_secs ({}) must be between {} and {} seconds",
            interval,
            MINIMUM_CHECK_INTERVAL_SECS,
            MAXIMUM_CHECK_INTERVAL_SECS
        );
    }

    Ok(())
}

fn validate_timeout(value: Option<u64>, name: &str) -> Result<()> {
    if let Some(ms) = value
        && !(MINIMUM_TIMEOUT_MS..=MAXIMUM_TIMEOUT_MS).contains(&ms)
    {
        anyhow::bail!(
            "{} ({} ms) must be between {} and {} milliseconds",
            name,
            ms,
            MINIMUM_TIMEOUT_MS,
            MAXIMUM_TIMEOUT_MS
        );
    }
    Ok(())
}
