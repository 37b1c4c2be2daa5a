use crate::config::ScheduleConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

/// A fixed weekly wall-clock instant (weekday + local time) in a named zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySchedule {
    pub weekday: Weekday,
    pub time: NaiveTime,
    pub tz: Tz,
}

impl WeeklySchedule {
    pub fn new(weekday: Weekday, time: NaiveTime, tz: Tz) -> Self {
        Self { weekday, time, tz }
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let weekday: Weekday = config
            .weekday
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid weekday: {}", config.weekday))?;
        let time = NaiveTime::parse_from_str(&config.time, "%H:%M")
            .with_context(|| format!("invalid schedule time (expected HH:MM): {}", config.time))?;
        let tz: Tz = config
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid timezone {}: {}", config.timezone, e))?;
        Ok(Self::new(weekday, time, tz))
    }

    /// The schedule's local time on `date`, as UTC.
    /// A time skipped by a DST jump resolves to one hour later.
    pub fn at_date(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(self.time);
        let resolved = self
            .tz
            .from_local_datetime(&local)
            .earliest()
            .or_else(|| self.tz.from_local_datetime(&(local + Duration::hours(1))).earliest());
        match resolved {
            Some(dt) => dt.with_timezone(&Utc),
            // No zone has a two-hour gap; treat the wall time as UTC rather than panic.
            None => Utc.from_utc_datetime(&local),
        }
    }

    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// First weekly occurrence at or after `now`.
    pub fn first_at_or_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = self.local_date(now);
        let days_ahead = (self.weekday.num_days_from_monday() + 7
            - today.weekday().num_days_from_monday())
            % 7;
        let candidate = self.at_date(today + Duration::days(days_ahead as i64));
        if candidate >= now {
            candidate
        } else {
            self.at_date(today + Duration::days(days_ahead as i64 + 7))
        }
    }

    /// Next weekly occurrence after the serviced `window` that is also after `now`.
    /// Several overdue windows collapse into one.
    pub fn next_after(&self, window: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut date = self.local_date(window) + Duration::weeks(1);
        let mut next = self.at_date(date);
        while next <= now {
            date += Duration::weeks(1);
            next = self.at_date(date);
        }
        next
    }

    /// Same local time one day after `window`, rolled forward daily if already past.
    pub fn retry_after(&self, window: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut date = self.local_date(window) + Duration::days(1);
        let mut fire_at = self.at_date(date);
        while fire_at <= now {
            date += Duration::days(1);
            fire_at = self.at_date(date);
        }
        fire_at
    }
}

/// Weekly schedule plus the spacing between re-checks after a market-closed deferral.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    pub weekly: WeeklySchedule,
    pub closed_recheck: Duration,
}

impl Cadence {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Ok(Self {
            weekly: WeeklySchedule::from_config(config)?,
            closed_recheck: Duration::seconds(config.market_closed_recheck_s as i64),
        })
    }
}
