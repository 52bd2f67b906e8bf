//! Exam-day clock: derives the operational stage and the two countdowns
//! shown to coordinators, and fires milestone reminders.
//!
//! Everything here is recomputed from the current instant on every tick.
//! The only state carried between ticks is the set of fired alerts.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc};

use crate::alerts::{FiredAlert, FiredAlerts};
use crate::calendar::{in_zone, ExamCalendar};
use crate::models::{ExamDay, Stage};

pub const NO_COUNTDOWN: &str = "--:--:--";

const MORNING_FROM_HOUR: u32 = 8;
const DURING_FROM_HOUR: u32 = 13;
const CLOSING_FROM_HOUR: u32 = 19;

/// Stage for an instant. The hour cutoffs are shared by both exam days, so
/// day 2 reports `DuringApplication` until 19:00 although its exam ends at
/// 18:30.
pub fn stage_at(calendar: &ExamCalendar, now: DateTime<Utc>) -> Stage {
    let local = in_zone(now);
    let today = local.date_naive();

    if today.year() < calendar.year {
        return Stage::Preparation;
    }
    if today.year() > calendar.year {
        return Stage::Ended;
    }

    if calendar.day_on(today).is_none() {
        let last = calendar.days.second.date;
        return if today > last {
            Stage::Ended
        } else {
            Stage::Preparation
        };
    }

    match local.hour() {
        h if h < MORNING_FROM_HOUR => Stage::Preparation,
        h if h < DURING_FROM_HOUR => Stage::MorningOfExam,
        h if h < CLOSING_FROM_HOUR => Stage::DuringApplication,
        _ => Stage::Closing,
    }
}

/// Time left in the active day's exam, counted from the exam-start hour
/// until the regular end. `None` outside that window.
pub fn time_remaining(calendar: &ExamCalendar, day: ExamDay, now: DateTime<Utc>) -> Option<Duration> {
    let schedule = calendar.schedule(day);
    let window_start = NaiveTime::from_hms_opt(schedule.exam_start.hour(), 0, 0)?;
    let start = schedule.at(window_start);
    let end = schedule.at(schedule.exam_end);
    if now < start || now > end {
        return None;
    }
    Some(end - now)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextExam {
    pub label: &'static str,
    pub remaining: Option<Duration>,
}

/// Countdown to the next gate opening, regardless of the selected day.
pub fn next_exam(calendar: &ExamCalendar, now: DateTime<Utc>) -> NextExam {
    for (day, label) in [
        (ExamDay::First, "Início do 1º dia de provas"),
        (ExamDay::Second, "Início do 2º dia de provas"),
    ] {
        let schedule = calendar.schedule(day);
        let target = schedule.at(schedule.gates_open);
        if now < target {
            return NextExam {
                label,
                remaining: Some(target - now),
            };
        }
    }
    NextExam {
        label: "Aplicação encerrada",
        remaining: None,
    }
}

fn split_hms(seconds: i64) -> (i64, i64, i64) {
    (seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

/// `HH:MM:SS`, hours uncapped, floored to the second.
pub fn format_hms(remaining: Duration) -> String {
    let seconds = remaining.num_seconds().max(0);
    let (h, m, s) = split_hms(seconds);
    format!("{h:02}:{m:02}:{s:02}")
}

/// `{d}d HH:MM:SS` when at least a day remains, `HH:MM:SS` otherwise.
pub fn format_countdown(remaining: Duration) -> String {
    let seconds = remaining.num_seconds();
    if seconds <= 0 {
        return "00:00:00".to_string();
    }
    let days = seconds / 86_400;
    let (h, m, s) = split_hms(seconds % 86_400);
    if days >= 1 {
        format!("{days}d {h:02}:{m:02}:{s:02}")
    } else {
        format!("{h:02}:{m:02}:{s:02}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageFrame {
    pub stage: Stage,
    pub time_remaining: String,
    pub next_exam_label: &'static str,
    pub next_exam_countdown: String,
    pub alerts: Vec<FiredAlert>,
}

pub struct StageEngine {
    calendar: ExamCalendar,
    day: ExamDay,
    fired: FiredAlerts,
}

impl StageEngine {
    pub fn new(calendar: ExamCalendar, day: ExamDay) -> Self {
        Self {
            calendar,
            day,
            fired: FiredAlerts::new(),
        }
    }

    pub fn fired(&self) -> &FiredAlerts {
        &self.fired
    }

    /// Forgets every fired alert. Called when the monitor starts a new
    /// exam-zone day.
    pub fn reset(&mut self) {
        self.fired.clear();
    }

    /// Frame without firing alerts; used for one-shot status output.
    pub fn peek(&self, now: DateTime<Utc>) -> StageFrame {
        let next = next_exam(&self.calendar, now);
        StageFrame {
            stage: stage_at(&self.calendar, now),
            time_remaining: time_remaining(&self.calendar, self.day, now)
                .map(format_hms)
                .unwrap_or_else(|| NO_COUNTDOWN.to_string()),
            next_exam_label: next.label,
            next_exam_countdown: next
                .remaining
                .map(format_countdown)
                .unwrap_or_else(|| NO_COUNTDOWN.to_string()),
            alerts: Vec::new(),
        }
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> StageFrame {
        let mut frame = self.peek(now);
        let schedule = self.calendar.schedule(self.day);
        frame.alerts = self.fired.check(schedule, self.day, now);
        frame
    }
}
