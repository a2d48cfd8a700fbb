//! Sunrise and sunset times for the configured location.
//!
//! Times are returned as fractional hours on the local clock (`7.5` is 07:30),
//! which is all the light scheduler needs to decide between day and night.

use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Timelike};
use sunrise::{Coordinates, SolarDay, SolarEvent};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunTimes {
    pub sunrise: f64,
    pub sunset: f64,
}

impl SunTimes {
    /// Whether `hour` lies strictly between sunrise and sunset.
    ///
    /// When the location's day straddles local midnight the window wraps.
    pub fn contains(&self, hour: f64) -> bool {
        if self.sunrise <= self.sunset {
            hour > self.sunrise && hour < self.sunset
        } else {
            hour > self.sunrise || hour < self.sunset
        }
    }
}

fn fractional_hour<Tz: TimeZone>(time: &DateTime<Tz>) -> f64 {
    f64::from(time.hour()) + f64::from(time.minute()) / 60.0 + f64::from(time.second()) / 3600.0
}

/// Sunrise and sunset on `date` at the given location, on the clock of `tz`.
pub fn sun_times_in<Tz: TimeZone>(date: NaiveDate, latitude: f64, longitude: f64, tz: &Tz) -> Result<SunTimes> {
    let coord = Coordinates::new(latitude, longitude)
        .ok_or_else(|| anyhow::anyhow!("Invalid coordinates ({latitude}, {longitude})"))?;
    let solar_day = SolarDay::new(coord, date);
    let sunrise = solar_day.event_time(SolarEvent::Sunrise).with_timezone(tz);
    let sunset = solar_day.event_time(SolarEvent::Sunset).with_timezone(tz);

    Ok(SunTimes {
        sunrise: fractional_hour(&sunrise),
        sunset: fractional_hour(&sunset),
    })
}

/// Sunrise and sunset on `date` in local time.
pub fn sun_times(date: NaiveDate, latitude: f64, longitude: f64) -> Result<SunTimes> {
    sun_times_in(date, latitude, longitude, &Local)
}

/// Whether the sun is up at `now` for the given location.
pub fn is_daytime<Tz: TimeZone>(now: &DateTime<Tz>, latitude: f64, longitude: f64) -> Result<bool> {
    let times = sun_times_in(now.date_naive(), latitude, longitude, &now.timezone())?;
    Ok(times.contains(fractional_hour(now)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_equator_equinox_is_twelve_hours() {
        let times = sun_times_in(date(2024, 3, 20), 0.0, 0.0, &Utc).unwrap();
        assert!((5.5..6.5).contains(&times.sunrise), "sunrise {}", times.sunrise);
        assert!((17.5..18.5).contains(&times.sunset), "sunset {}", times.sunset);
    }

    #[test]
    fn test_amsterdam_midsummer() {
        let times = sun_times_in(date(2024, 6, 21), 52.37, 4.89, &Utc).unwrap();
        assert!((3.0..4.0).contains(&times.sunrise), "sunrise {}", times.sunrise);
        assert!((19.5..20.5).contains(&times.sunset), "sunset {}", times.sunset);
    }

    #[test]
    fn test_winter_day_is_shorter() {
        let summer = sun_times_in(date(2024, 6, 21), 52.37, 4.89, &Utc).unwrap();
        let winter = sun_times_in(date(2024, 12, 21), 52.37, 4.89, &Utc).unwrap();
        assert!(winter.sunset - winter.sunrise < summer.sunset - summer.sunrise);
    }

    #[test]
    fn test_invalid_coordinates() {
        assert!(sun_times_in(date(2024, 6, 21), 95.0, 0.0, &Utc).is_err());
        assert!(sun_times_in(date(2024, 6, 21), 0.0, 190.0, &Utc).is_err());
    }

    #[test]
    fn test_is_daytime() {
        let noon = Utc.with_ymd_and_hms(2024, 6, 21, 12, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2024, 6, 21, 23, 30, 0).unwrap();
        assert!(is_daytime(&noon, 52.37, 4.89).unwrap());
        assert!(!is_daytime(&night, 52.37, 4.89).unwrap());
    }

    #[test]
    fn test_window_wraps_midnight() {
        let times = SunTimes {
            sunrise: 21.0,
            sunset: 9.0,
        };
        assert!(times.contains(23.0));
        assert!(times.contains(3.0));
        assert!(!times.contains(12.0));
    }
}
