use std::collections::HashSet;

use chrono::{DateTime, NaiveTime, Utc};

use crate::calendar::ExamDaySchedule;
use crate::models::ExamDay;

/// Width of the firing window, in minutes. Must stay above one tick so a
/// slow tick can't step over the window.
pub const FIRING_WINDOW_MINUTES: f64 = 1.2;

#[derive(Debug, Clone, PartialEq)]
pub struct AlertDefinition {
    pub id: &'static str,
    pub target: NaiveTime,
    pub minutes_before: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FiredAlert {
    pub key: String,
    pub day: ExamDay,
    pub message: String,
}

pub fn definitions(schedule: &ExamDaySchedule) -> Vec<AlertDefinition> {
    let hm = |time: NaiveTime| time.format("%H:%M").to_string();
    vec![
        AlertDefinition {
            id: "gates_open",
            target: schedule.gates_open,
            minutes_before: 30.0,
            message: format!("Os portões abrem em 30 minutos ({}).", hm(schedule.gates_open)),
        },
        AlertDefinition {
            id: "gates_close",
            target: schedule.gates_close,
            minutes_before: 15.0,
            message: format!("Os portões fecham em 15 minutos ({}).", hm(schedule.gates_close)),
        },
        AlertDefinition {
            id: "exam_start",
            target: schedule.exam_start,
            minutes_before: 10.0,
            message: format!("A prova começa em 10 minutos ({}).", hm(schedule.exam_start)),
        },
        AlertDefinition {
            id: "exam_end",
            target: schedule.exam_end,
            minutes_before: 30.0,
            message: format!(
                "Faltam 30 minutos para o fim da prova ({}).",
                hm(schedule.exam_end)
            ),
        },
    ]
}

pub fn alert_key(id: &str, day: ExamDay) -> String {
    format!("{}_day{}", id, day.number())
}

/// Minutes from `now` until the alert's target instant; negative once passed.
pub fn minutes_until(definition: &AlertDefinition, schedule: &ExamDaySchedule, now: DateTime<Utc>) -> f64 {
    (schedule.at(definition.target) - now).num_milliseconds() as f64 / 60_000.0
}

pub fn in_firing_window(diff_minutes: f64, minutes_before: f64) -> bool {
    diff_minutes > minutes_before - FIRING_WINDOW_MINUTES && diff_minutes <= minutes_before
}

/// Alerts already delivered this session, keyed `alertId_dayN`.
#[derive(Debug, Default, Clone)]
pub struct FiredAlerts {
    fired: HashSet<String>,
}

impl FiredAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.fired.contains(key)
    }

    pub fn len(&self) -> usize {
        self.fired.len()
    }

    pub fn clear(&mut self) {
        self.fired.clear();
    }

    /// Returns the alerts of `day` whose window contains `now` and marks them.
    pub fn check(
        &mut self,
        schedule: &ExamDaySchedule,
        day: ExamDay,
        now: DateTime<Utc>,
    ) -> Vec<FiredAlert> {
        let mut due = Vec::new();
        for definition in definitions(schedule) {
            let key = alert_key(definition.id, day);
            if self.fired.contains(&key) {
                continue;
            }
            let diff = minutes_until(&definition, schedule, now);
            if in_firing_window(diff, definition.minutes_before) {
                self.fired.insert(key.clone());
                due.push(FiredAlert {
                    key,
                    day,
                    message: definition.message,
                });
            }
        }
        due
    }
}
