use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::models::{DaySlots, ExamDay};

/// Every date and hour in the exam calendar is read in this zone.
pub const EXAM_ZONE: Tz = chrono_tz::America::Sao_Paulo;

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Converts an instant to exam-zone wall-clock time.
pub fn in_zone(now: DateTime<Utc>) -> DateTime<Tz> {
    now.with_timezone(&EXAM_ZONE)
}

pub fn today(now: DateTime<Utc>) -> NaiveDate {
    in_zone(now).date_naive()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamDaySchedule {
    pub date: NaiveDate,
    pub gates_open: NaiveTime,
    pub gates_close: NaiveTime,
    pub exam_start: NaiveTime,
    pub exam_end: NaiveTime,
}

impl ExamDaySchedule {
    /// Resolves a wall-clock time on this exam date to an instant.
    pub fn at(&self, time: NaiveTime) -> DateTime<Utc> {
        let local = self.date.and_time(time);
        match EXAM_ZONE.from_local_datetime(&local).earliest() {
            Some(instant) => instant.with_timezone(&Utc),
            // Unreachable for exam dates; Sao Paulo has no DST since 2019.
            None => Utc.from_utc_datetime(&local),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamCalendar {
    pub year: i32,
    pub days: DaySlots<ExamDaySchedule>,
}

impl ExamCalendar {
    pub fn enem_2025() -> anyhow::Result<Self> {
        Ok(Self {
            year: 2025,
            days: DaySlots::new(
                ExamDaySchedule {
                    date: date(2025, 11, 9)?,
                    gates_open: time(12, 0)?,
                    gates_close: time(13, 0)?,
                    exam_start: time(13, 30)?,
                    exam_end: time(19, 0)?,
                },
                ExamDaySchedule {
                    date: date(2025, 11, 16)?,
                    gates_open: time(12, 0)?,
                    gates_close: time(13, 0)?,
                    exam_start: time(13, 30)?,
                    exam_end: time(18, 30)?,
                },
            ),
        })
    }

    pub fn schedule(&self, day: ExamDay) -> &ExamDaySchedule {
        self.days.get(day)
    }

    /// Which exam day, if any, falls on the given exam-zone date.
    pub fn day_on(&self, date: NaiveDate) -> Option<ExamDay> {
        [ExamDay::First, ExamDay::Second]
            .into_iter()
            .find(|day| self.schedule(*day).date == date)
    }
}

fn date(year: i32, month: u32, day: u32) -> anyhow::Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).context("invalid exam date")
}

fn time(hour: u32, minute: u32) -> anyhow::Result<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0).context("invalid exam time")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sp(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        EXAM_ZONE
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    pub(crate) struct FixedClock(pub DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[test]
    fn sao_paulo_is_three_hours_behind_utc_in_november() {
        let instant = sp(2025, 11, 9, 12, 0, 0);
        assert_eq!(instant.to_rfc3339(), "2025-11-09T15:00:00+00:00");
    }

    #[test]
    fn late_evening_utc_is_still_previous_day_in_zone() {
        let instant = Utc.with_ymd_and_hms(2025, 11, 10, 2, 0, 0).unwrap();
        assert_eq!(today(instant), NaiveDate::from_ymd_opt(2025, 11, 9).unwrap());
    }

    #[test]
    fn calendar_dates_are_distinct_and_resolvable() {
        let calendar = ExamCalendar::enem_2025().unwrap();
        assert_ne!(calendar.days.first.date, calendar.days.second.date);
        assert_eq!(
            calendar.day_on(NaiveDate::from_ymd_opt(2025, 11, 16).unwrap()),
            Some(ExamDay::Second)
        );
        assert_eq!(calendar.day_on(NaiveDate::from_ymd_opt(2025, 11, 10).unwrap()), None);
        let first = calendar.schedule(ExamDay::First);
        assert_eq!(first.at(first.exam_end), sp(2025, 11, 9, 19, 0, 0));
    }

    #[test]
    fn invalid_calendar_constants_are_errors() {
        assert!(date(2025, 2, 30).is_err());
        assert!(time(24, 0).is_err());
        assert_eq!(time(18, 30).unwrap(), NaiveTime::from_hms_opt(18, 30, 0).unwrap());
    }
}
