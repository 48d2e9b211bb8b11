//! Night-time detection for the poll loop.
//!
//! Between today's sunset and the next sunrise the inverter has nothing to
//! report, so a failed poll in that window turns into one long sleep instead
//! of a tight retry loop.

use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::time::sleep;
use tracing::{info, warn};

/// Where the inverter is installed.
#[derive(Debug, Clone)]
pub struct Location {
    pub city: String,
    pub region: String,
    pub timezone: Tz,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SunTimes {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

/// Astronomical collaborator: sunrise and sunset for a civil date.
///
/// Returns `None` when the sun does not rise or set on that date.
pub trait SunCalculator: Send + Sync {
    fn sun_times(&self, location: &Location, date: NaiveDate) -> Option<SunTimes>;
}

/// [`SunCalculator`] backed by the `sunrise` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolarCalculator;

impl SunCalculator for SolarCalculator {
    fn sun_times(&self, location: &Location, date: NaiveDate) -> Option<SunTimes> {
        use chrono::Datelike;

        let (sunrise, sunset) = sunrise::sunrise_sunset(
            location.latitude,
            location.longitude,
            date.year(),
            date.month(),
            date.day(),
        );
        let sunrise = DateTime::<Utc>::from_timestamp(sunrise, 0)?;
        let sunset = DateTime::<Utc>::from_timestamp(sunset, 0)?;
        (sunrise < sunset).then_some(SunTimes { sunrise, sunset })
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Local time together with the night interval that may contain it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaylightWindow {
    pub local_time: DateTime<Tz>,
    pub sunset_today: DateTime<Tz>,
    pub sunrise_tomorrow: DateTime<Tz>,
}

impl DaylightWindow {
    pub fn is_dark(&self) -> bool {
        self.local_time > self.sunset_today
    }

    /// Time left until the next sunrise, or `None` while it is still light.
    pub fn sleep_duration(&self) -> Option<Duration> {
        if !self.is_dark() {
            return None;
        }
        let remaining = self.sunrise_tomorrow - self.local_time;
        Some(remaining.to_std().unwrap_or(Duration::ZERO))
    }
}

pub struct DaylightScheduler {
    location: Location,
    sun: Box<dyn SunCalculator>,
    clock: Box<dyn Clock>,
    sunrise_offset_days: u64,
}

impl DaylightScheduler {
    pub fn new(
        location: Location,
        sun: Box<dyn SunCalculator>,
        clock: Box<dyn Clock>,
        sunrise_offset_days: u64,
    ) -> Self {
        Self {
            location,
            sun,
            clock,
            sunrise_offset_days,
        }
    }

    /// Computes the window from the current wall clock. Never cached: a long
    /// sleep moves both the time and the date.
    pub fn window(&self) -> Option<DaylightWindow> {
        let tz = self.location.timezone;
        let local_time = self.clock.now().with_timezone(&tz);
        let today = local_time.date_naive();
        let sunrise_day = today.checked_add_days(Days::new(self.sunrise_offset_days))?;

        let today_sun = self.sun.sun_times(&self.location, today)?;
        let next_sun = self.sun.sun_times(&self.location, sunrise_day)?;

        Some(DaylightWindow {
            local_time,
            sunset_today: today_sun.sunset.with_timezone(&tz),
            sunrise_tomorrow: next_sun.sunrise.with_timezone(&tz),
        })
    }

    /// Sleeps until sunrise when called after sunset. Returns how long it slept.
    pub async fn pause_if_dark(&self) -> Option<Duration> {
        let Some(window) = self.window() else {
            warn!(
                city = %self.location.city,
                region = %self.location.region,
                "no sunrise/sunset for this date, not pausing"
            );
            return None;
        };

        let duration = window.sleep_duration()?;
        info!(
            city = %self.location.city,
            region = %self.location.region,
            sunrise = %window.sunrise_tomorrow,
            hours = duration.as_secs_f64() / 3600.0,
            "its dark, sleeping before trying again"
        );
        sleep(duration).await;
        Some(duration)
    }
}
