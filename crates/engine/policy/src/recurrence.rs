//! iCalendar recurrence rules
//!
//! Supports the subset of RFC 5545 that deployment windows use in practice:
//! `DTSTART` (UTC) plus an `RRULE` with `FREQ` in
//! `MINUTELY | HOURLY | DAILY | WEEKLY | MONTHLY`, `INTERVAL`, `COUNT`,
//! `UNTIL`, `BYDAY` (plain weekdays), `BYHOUR` and `BYMINUTE`.
//!
//! ```text
//! DTSTART:20240101T090000Z
//! RRULE:FREQ=WEEKLY;BYDAY=MO,TU,WE,TH,FR;BYHOUR=9,14
//! ```
//!
//! All times are UTC; a `DTSTART` without a `Z` suffix is read as UTC. A
//! `TZID` naming any other zone is rejected rather than misread.

use crate::error::{PolicyError, Result};
use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
    Weekday,
};
use std::str::FromStr;

/// Upper bound on periods scanned per query
const MAX_PERIODS: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// A parsed recurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recurrence {
    pub dtstart: DateTime<Utc>,
    pub frequency: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<DateTime<Utc>>,
    pub by_day: Vec<Weekday>,
    pub by_hour: Vec<u32>,
    pub by_minute: Vec<u32>,
}

/// Where `now` falls relative to the recurring windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Open { closes: DateTime<Utc> },
    Upcoming { opens: DateTime<Utc> },
    /// No further occurrences (COUNT or UNTIL reached)
    Exhausted,
}

impl FromStr for Recurrence {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        let mut dtstart = None;
        let mut frequency = None;
        let mut interval = 1;
        let mut count = None;
        let mut until = None;
        let mut by_day = Vec::new();
        let mut by_hour = Vec::new();
        let mut by_minute = Vec::new();

        for line in s.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(rest) = line.strip_prefix("DTSTART") {
                // DTSTART:20240101T090000Z or DTSTART;TZID=UTC:20240101T090000
                let (params, value) = rest
                    .split_once(':')
                    .ok_or_else(|| PolicyError::recurrence(format!("malformed DTSTART '{line}'")))?;
                check_dtstart_params(params)?;
                dtstart = Some(parse_instant(value)?);
                continue;
            }
            let rule = line.strip_prefix("RRULE:").unwrap_or(line);
            for part in rule.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                let (key, value) = part
                    .split_once('=')
                    .ok_or_else(|| PolicyError::recurrence(format!("expected KEY=VALUE, got '{part}'")))?;
                match key.to_ascii_uppercase().as_str() {
                    "DTSTART" => dtstart = Some(parse_instant(value)?),
                    "FREQ" => frequency = Some(parse_frequency(value)?),
                    "INTERVAL" => {
                        interval = parse_number(key, value)?;
                        if interval == 0 {
                            return Err(PolicyError::recurrence("INTERVAL must be at least 1"));
                        }
                    }
                    "COUNT" => count = Some(parse_number(key, value)?),
                    "UNTIL" => until = Some(parse_instant(value)?),
                    "BYDAY" => by_day = parse_list(value, parse_weekday)?,
                    "BYHOUR" => by_hour = parse_list(value, |v| parse_bounded("BYHOUR", v, 24))?,
                    "BYMINUTE" => by_minute = parse_list(value, |v| parse_bounded("BYMINUTE", v, 60))?,
                    "WKST" => {}
                    other => {
                        return Err(PolicyError::recurrence(format!("unsupported rule part '{other}'")))
                    }
                }
            }
        }

        Ok(Self {
            dtstart: dtstart.ok_or_else(|| PolicyError::recurrence("missing DTSTART"))?,
            frequency: frequency.ok_or_else(|| PolicyError::recurrence("missing FREQ"))?,
            interval,
            count,
            until,
            by_day,
            by_hour,
            by_minute,
        })
    }
}

impl Recurrence {
    /// Locate `now` among windows of length `duration` opening at each
    /// occurrence
    pub fn window_at(&self, now: DateTime<Utc>, duration: Duration) -> Result<WindowState> {
        // COUNT is positional, so it forces a scan from the first period.
        let mut remaining = self.count;
        let first = if remaining.is_some() {
            0
        } else {
            self.period_near(now - duration)
        };

        for period in first..first.saturating_add(MAX_PERIODS) {
            let Some(period_start) = self.period_start(period) else {
                break;
            };
            let opens = Utc.from_utc_datetime(&period_start);
            if self.until.is_some_and(|until| opens > until + Duration::days(31)) {
                return Ok(WindowState::Exhausted);
            }
            for start in self.expand(period_start) {
                if start < self.dtstart {
                    continue;
                }
                if self.until.is_some_and(|until| start > until) {
                    return Ok(WindowState::Exhausted);
                }
                if let Some(n) = remaining.as_mut() {
                    if *n == 0 {
                        return Ok(WindowState::Exhausted);
                    }
                    *n -= 1;
                }
                let end = start + duration;
                if start <= now && now < end {
                    return Ok(WindowState::Open { closes: end });
                }
                if start > now {
                    return Ok(WindowState::Upcoming { opens: start });
                }
            }
        }

        Err(PolicyError::EvaluationFailed {
            reason: "no recurrence occurrence within search horizon".into(),
        })
    }

    /// First occurrence strictly after `at`
    pub fn next_after(&self, at: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        // A zero-length window is never open
        match self.window_at(at, Duration::zero())? {
            WindowState::Upcoming { opens } => Ok(Some(opens)),
            WindowState::Open { .. } | WindowState::Exhausted => Ok(None),
        }
    }

    /// Index of a period starting shortly before `at`
    fn period_near(&self, at: DateTime<Utc>) -> u64 {
        if at <= self.dtstart {
            return 0;
        }
        let elapsed = at - self.dtstart;
        let units = match self.frequency {
            Frequency::Minutely => elapsed.num_minutes(),
            Frequency::Hourly => elapsed.num_hours(),
            Frequency::Daily => elapsed.num_days(),
            Frequency::Weekly => elapsed.num_weeks(),
            Frequency::Monthly => {
                i64::from(at.year() - self.dtstart.year()) * 12
                    + i64::from(at.month()) - i64::from(self.dtstart.month())
            }
        };
        u64::try_from(units / i64::from(self.interval) - 1).unwrap_or(0)
    }

    fn period_start(&self, period: u64) -> Option<NaiveDateTime> {
        let base = self.dtstart.naive_utc();
        let steps = i64::try_from(period.checked_mul(u64::from(self.interval))?).ok()?;
        match self.frequency {
            Frequency::Minutely => base.checked_add_signed(Duration::try_minutes(steps)?),
            Frequency::Hourly => base.checked_add_signed(Duration::try_hours(steps)?),
            Frequency::Daily => base.checked_add_signed(Duration::try_days(steps)?),
            Frequency::Weekly => base.checked_add_signed(Duration::try_weeks(steps)?),
            Frequency::Monthly => NaiveDate::from_ymd_opt(base.year(), base.month(), 1)?
                .checked_add_months(Months::new(u32::try_from(steps).ok()?))
                .map(|first| first.and_time(base.time())),
        }
    }

    /// Occurrences inside one period, sorted
    fn expand(&self, start: NaiveDateTime) -> Vec<DateTime<Utc>> {
        let second = self.dtstart.second();
        let or_default = |list: &[u32], default: u32| {
            if list.is_empty() {
                vec![default]
            } else {
                list.to_vec()
            }
        };

        let mut occurrences: Vec<NaiveDateTime> = match self.frequency {
            Frequency::Minutely => vec![start],
            Frequency::Hourly => or_default(&self.by_minute, start.minute())
                .into_iter()
                .filter_map(|m| start.date().and_hms_opt(start.hour(), m, second))
                .collect(),
            Frequency::Daily | Frequency::Weekly | Frequency::Monthly => {
                let hours = or_default(&self.by_hour, start.hour());
                let minutes = or_default(&self.by_minute, start.minute());
                let mut out = Vec::new();
                for day in self.days_in_period(start.date()) {
                    for &h in &hours {
                        for &m in &minutes {
                            out.extend(day.and_hms_opt(h, m, second));
                        }
                    }
                }
                out
            }
        };

        occurrences.retain(|t| {
            (self.by_day.is_empty() || self.by_day.contains(&t.weekday()))
                && (self.by_hour.is_empty() || self.by_hour.contains(&t.hour()))
                && (self.by_minute.is_empty() || self.by_minute.contains(&t.minute()))
        });
        occurrences.sort();
        occurrences.dedup();
        occurrences
            .into_iter()
            .map(|t| Utc.from_utc_datetime(&t))
            .collect()
    }

    fn days_in_period(&self, date: NaiveDate) -> Vec<NaiveDate> {
        match self.frequency {
            Frequency::Weekly => {
                let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                let weekdays = if self.by_day.is_empty() {
                    vec![self.dtstart.weekday()]
                } else {
                    self.by_day.clone()
                };
                weekdays
                    .iter()
                    .map(|wd| monday + Duration::days(i64::from(wd.num_days_from_monday())))
                    .collect()
            }
            Frequency::Monthly if self.by_day.is_empty() => {
                NaiveDate::from_ymd_opt(date.year(), date.month(), self.dtstart.day())
                    .into_iter()
                    .collect()
            }
            Frequency::Monthly => date
                .with_day(1)
                .into_iter()
                .flat_map(|first| first.iter_days())
                .take_while(|d| d.month() == date.month())
                .collect(),
            _ => vec![date],
        }
    }
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    let trimmed = value.trim().trim_end_matches('Z');
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y%m%dT%H%M%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y%m%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(PolicyError::recurrence(format!("invalid date-time '{value}'")))
}

const UTC_ZONES: [&str; 4] = ["UTC", "Etc/UTC", "GMT", "Etc/GMT"];

fn check_dtstart_params(params: &str) -> Result<()> {
    for param in params.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        match param.split_once('=') {
            Some((key, zone)) if key.eq_ignore_ascii_case("TZID") => {
                if !UTC_ZONES.iter().any(|z| z.eq_ignore_ascii_case(zone.trim())) {
                    return Err(PolicyError::recurrence(format!(
                        "unsupported TZID '{zone}', windows must be given in UTC"
                    )));
                }
            }
            Some((key, _)) if key.eq_ignore_ascii_case("VALUE") => {}
            _ => {
                return Err(PolicyError::recurrence(format!(
                    "unsupported DTSTART parameter '{param}'"
                )))
            }
        }
    }
    Ok(())
}

fn parse_frequency(value: &str) -> Result<Frequency> {
    match value.to_ascii_uppercase().as_str() {
        "MINUTELY" => Ok(Frequency::Minutely),
        "HOURLY" => Ok(Frequency::Hourly),
        "DAILY" => Ok(Frequency::Daily),
        "WEEKLY" => Ok(Frequency::Weekly),
        "MONTHLY" => Ok(Frequency::Monthly),
        other => Err(PolicyError::recurrence(format!("unsupported FREQ '{other}'"))),
    }
}

fn parse_weekday(value: &str) -> Result<Weekday> {
    match value.to_ascii_uppercase().as_str() {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        other => Err(PolicyError::recurrence(format!("unsupported BYDAY '{other}'"))),
    }
}

fn parse_number(key: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| PolicyError::recurrence(format!("{key} expects a number, got '{value}'")))
}

fn parse_bounded(key: &str, value: &str, limit: u32) -> Result<u32> {
    let n = parse_number(key, value)?;
    if n >= limit {
        return Err(PolicyError::recurrence(format!("{key} value {n} out of range")));
    }
    Ok(n)
}

fn parse_list<T>(value: &str, parse: impl Fn(&str) -> Result<T>) -> Result<Vec<T>> {
    value.split(',').map(str::trim).map(parse).collect()
}
