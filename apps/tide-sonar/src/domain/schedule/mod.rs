//! Exchange Session Calendar
//!
//! Decides whether the exchange is in session and how many trading minutes
//! have elapsed since the open. All evaluation happens in exchange-local
//! time; callers holding a UTC instant go through [`MarketSchedule::to_local`].
//!
//! # Sessions (exchange-local)
//!
//! ```text
//! 09:25 ─ pre-open auction ─ 09:30 ═══ morning ═══ 11:30   13:00 ═══ afternoon ═══ 15:00
//! ```
//!
//! The gate is open over `[09:25, 11:30]` and `[13:00, 15:00]`, closed on
//! weekends and configured holidays.

use std::collections::HashSet;

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc, Weekday,
};

const fn hm(hour: u32, minute: u32) -> NaiveTime {
    match NaiveTime::from_hms_opt(hour, minute, 0) {
        Some(time) => time,
        None => panic!("invalid session time"),
    }
}

/// Pre-open call auction start.
pub const PRE_OPEN: NaiveTime = hm(9, 25);
/// Continuous trading open.
pub const OPEN: NaiveTime = hm(9, 30);
/// Morning session close.
pub const MORNING_CLOSE: NaiveTime = hm(11, 30);
/// Afternoon session open.
pub const AFTERNOON_OPEN: NaiveTime = hm(13, 0);
/// Daily close.
pub const CLOSE: NaiveTime = hm(15, 0);

/// UTC offset of the exchange (China Standard Time, no DST).
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 8;

// =============================================================================
// Session Hours
// =============================================================================

/// Daily session boundaries in exchange-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHours {
    /// Gate opens (pre-open allowance).
    pub pre_open: NaiveTime,
    /// Elapsed-minute clock starts.
    pub open: NaiveTime,
    /// Morning session ends.
    pub morning_close: NaiveTime,
    /// Afternoon session starts.
    pub afternoon_open: NaiveTime,
    /// Day ends.
    pub close: NaiveTime,
}

impl Default for SessionHours {
    fn default() -> Self {
        Self {
            pre_open: PRE_OPEN,
            open: OPEN,
            morning_close: MORNING_CLOSE,
            afternoon_open: AFTERNOON_OPEN,
            close: CLOSE,
        }
    }
}

impl SessionHours {
    /// Length of the morning session in minutes.
    #[must_use]
    pub fn morning_minutes(&self) -> f64 {
        minutes_between(self.open, self.morning_close)
    }

    /// Length of the full trading day in minutes.
    #[must_use]
    pub fn full_day_minutes(&self) -> f64 {
        self.morning_minutes() + minutes_between(self.afternoon_open, self.close)
    }

    /// Whether a local time falls inside one of the two trading windows.
    #[must_use]
    pub fn in_window(&self, at: NaiveTime) -> bool {
        let morning = self.pre_open <= at && at <= self.morning_close;
        let afternoon = self.afternoon_open <= at && at <= self.close;
        morning || afternoon
    }

    /// Trading minutes elapsed since the open.
    ///
    /// Frozen at the morning length over the midday break, capped at the
    /// full-day length after close, and never below 1 so it can be used as a
    /// divisor.
    #[must_use]
    pub fn elapsed_minutes(&self, at: NaiveTime) -> f64 {
        let elapsed = if at <= self.open {
            0.0
        } else if at <= self.morning_close {
            minutes_between(self.open, at)
        } else if at < self.afternoon_open {
            self.morning_minutes()
        } else if at <= self.close {
            self.morning_minutes() + minutes_between(self.afternoon_open, at)
        } else {
            self.full_day_minutes()
        };
        elapsed.max(1.0)
    }
}

#[allow(clippy::cast_precision_loss)]
fn minutes_between(from: NaiveTime, to: NaiveTime) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

// =============================================================================
// Market Schedule
// =============================================================================

/// Market-open gate.
///
/// Stateless apart from its calendar: weekends and the configured holiday
/// dates are closed, the session windows are open. `force_open` bypasses the
/// calendar entirely and is meant for exercising the pipeline off-hours.
#[derive(Debug, Clone)]
pub struct MarketSchedule {
    hours: SessionHours,
    holidays: HashSet<NaiveDate>,
    offset: FixedOffset,
    force_open: bool,
}

impl Default for MarketSchedule {
    fn default() -> Self {
        Self::new(exchange_offset(DEFAULT_UTC_OFFSET_HOURS).unwrap_or_else(|| Utc.fix()))
    }
}

impl MarketSchedule {
    /// Create a schedule with default session hours in the given offset.
    #[must_use]
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            hours: SessionHours::default(),
            holidays: HashSet::new(),
            offset,
            force_open: false,
        }
    }

    /// Replace the session hours.
    #[must_use]
    pub const fn with_hours(mut self, hours: SessionHours) -> Self {
        self.hours = hours;
        self
    }

    /// Add closed dates.
    #[must_use]
    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    /// Force the gate open regardless of the calendar.
    #[must_use]
    pub const fn with_force_open(mut self, force_open: bool) -> Self {
        self.force_open = force_open;
        self
    }

    /// Session boundaries.
    #[must_use]
    pub const fn hours(&self) -> &SessionHours {
        &self.hours
    }

    /// Exchange UTC offset.
    #[must_use]
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Whether the gate is forced open.
    #[must_use]
    pub const fn is_forced_open(&self) -> bool {
        self.force_open
    }

    /// Convert a UTC instant to exchange-local wall-clock time.
    #[must_use]
    pub fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.offset).naive_local()
    }

    /// Current exchange-local wall-clock time.
    #[must_use]
    pub fn local_now(&self) -> NaiveDateTime {
        self.to_local(Utc::now())
    }

    /// Whether the market is in session at a UTC instant.
    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.is_open_local(self.to_local(now))
    }

    /// Whether the market is in session at an exchange-local time.
    #[must_use]
    pub fn is_open_local(&self, local: NaiveDateTime) -> bool {
        if self.force_open {
            return true;
        }
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        if self.holidays.contains(&local.date()) {
            return false;
        }
        self.hours.in_window(local.time())
    }
}

/// Build a fixed exchange offset from whole hours east of UTC.
#[must_use]
pub fn exchange_offset(hours: i32) -> Option<FixedOffset> {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use test_case::test_case;

    use super::*;

    /// 2026-03-10 is a Tuesday.
    fn tuesday(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test_case(9, 24 => false ; "before pre-open")]
    #[test_case(9, 25 => true ; "pre-open boundary")]
    #[test_case(9, 26 => true ; "pre-open auction")]
    #[test_case(10, 45 => true ; "morning session")]
    #[test_case(11, 30 => true ; "morning close boundary")]
    #[test_case(12, 15 => false ; "midday break")]
    #[test_case(13, 0 => true ; "afternoon open boundary")]
    #[test_case(15, 0 => true ; "close boundary")]
    #[test_case(15, 1 => false ; "after close")]
    fn weekday_windows(hour: u32, minute: u32) -> bool {
        MarketSchedule::default().is_open_local(tuesday(hour, minute))
    }

    #[test]
    fn weekends_are_closed() {
        let saturday = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let sunday = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
        let schedule = MarketSchedule::default();
        for day in [saturday, sunday] {
            for hour in [0, 9, 10, 14, 23] {
                assert!(!schedule.is_open_local(day.and_hms_opt(hour, 30, 0).unwrap()));
            }
        }
    }

    #[test]
    fn holidays_are_closed() {
        let holiday = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let schedule = MarketSchedule::default().with_holidays([holiday]);
        assert!(!schedule.is_open_local(tuesday(10, 0)));
        let next_day = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        assert!(schedule.is_open_local(next_day.and_hms_opt(10, 0, 0).unwrap()));
    }

    #[test]
    fn force_open_overrides_calendar() {
        let schedule = MarketSchedule::default().with_force_open(true);
        let saturday = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        assert!(schedule.is_open_local(saturday.and_hms_opt(3, 0, 0).unwrap()));
        assert!(schedule.is_forced_open());
    }

    #[test]
    fn utc_instants_are_converted_to_exchange_time() {
        let schedule = MarketSchedule::default();
        // 01:26 UTC is 09:26 in UTC+8.
        let instant = Utc.with_ymd_and_hms(2026, 3, 10, 1, 26, 0).unwrap();
        assert_eq!(schedule.to_local(instant), tuesday(9, 26));
        assert!(schedule.is_open(instant));
        // 04:15 UTC is 12:15 in UTC+8.
        let lunch = Utc.with_ymd_and_hms(2026, 3, 10, 4, 15, 0).unwrap();
        assert!(!schedule.is_open(lunch));
    }

    #[test_case(9, 0 => 1.0 ; "before open floors at one")]
    #[test_case(9, 30 => 1.0 ; "at open floors at one")]
    #[test_case(9, 45 => 15.0 ; "morning")]
    #[test_case(11, 30 => 120.0 ; "morning close")]
    #[test_case(12, 10 => 120.0 ; "frozen over lunch")]
    #[test_case(13, 30 => 150.0 ; "afternoon")]
    #[test_case(15, 0 => 240.0 ; "close")]
    #[test_case(20, 0 => 240.0 ; "capped after close")]
    fn elapsed_minutes(hour: u32, minute: u32) -> f64 {
        SessionHours::default().elapsed_minutes(NaiveTime::from_hms_opt(hour, minute, 0).unwrap())
    }

    #[test]
    fn session_lengths() {
        let hours = SessionHours::default();
        assert!((hours.morning_minutes() - 120.0).abs() < f64::EPSILON);
        assert!((hours.full_day_minutes() - 240.0).abs() < f64::EPSILON);
    }

    #[test]
    fn exchange_offset_bounds() {
        assert_eq!(exchange_offset(8).unwrap().local_minus_utc(), 8 * 3600);
        assert!(exchange_offset(30).is_none());
    }
}
