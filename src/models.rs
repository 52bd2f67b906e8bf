use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExamDay {
    First,
    Second,
}

impl ExamDay {
    pub fn from_number(day: u8) -> Option<Self> {
        match day {
            1 => Some(ExamDay::First),
            2 => Some(ExamDay::Second),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            ExamDay::First => 1,
            ExamDay::Second => 2,
        }
    }
}

/// Two values, one per exam day, selected explicitly by [`ExamDay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySlots<T> {
    pub first: T,
    pub second: T,
}

impl<T> DaySlots<T> {
    pub fn new(first: T, second: T) -> Self {
        Self { first, second }
    }

    pub fn get(&self, day: ExamDay) -> &T {
        match day {
            ExamDay::First => &self.first,
            ExamDay::Second => &self.second,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preparation,
    MorningOfExam,
    DuringApplication,
    Closing,
    Ended,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Preparation => "Preparação",
            Stage::MorningOfExam => "Manhã da prova",
            Stage::DuringApplication => "Durante a aplicação",
            Stage::Closing => "Encerramento do dia",
            Stage::Ended => "Aplicação encerrada",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub code: String,
    pub name: String,
}

impl Room {
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            self.code.clone()
        } else {
            format!("{} - {}", self.code, self.name)
        }
    }
}

/// One checklist status row as delivered by the change feed. Every field is
/// optional because partial rows are discarded rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub checked: Option<bool>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub new: Option<StatusRow>,
    #[serde(default)]
    pub old: Option<StatusRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomProgress {
    pub room_id: String,
    pub room_label: String,
    pub completed: u32,
    pub total: u32,
    pub percent: u8,
}

impl RoomProgress {
    pub fn new(room_id: String, room_label: String, completed: u32, total: u32) -> Self {
        let mut progress = Self {
            room_id,
            room_label,
            completed: 0,
            total,
            percent: 0,
        };
        progress.set_completed(completed);
        progress
    }

    /// Stores `completed` clamped to `[0, total]` and refreshes `percent`.
    pub fn set_completed(&mut self, completed: u32) {
        self.completed = completed.min(self.total);
        self.percent = percent_of(self.completed, self.total);
    }

    pub fn is_complete(&self) -> bool {
        self.percent == 100
    }
}

pub fn percent_of(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let raw = (completed as f64 / total as f64 * 100.0).round();
    raw.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(percent_of(8, 9), 89);
        assert_eq!(percent_of(1, 8), 13);
        assert_eq!(percent_of(9, 9), 100);
        assert_eq!(percent_of(0, 0), 0);
    }

    #[test]
    fn progress_clamps_completed_to_total() {
        let progress = RoomProgress::new("a".to_string(), "A".to_string(), 12, 9);
        assert_eq!(progress.completed, 9);
        assert_eq!(progress.percent, 100);
        assert!(progress.is_complete());
    }

    #[test]
    fn day_slots_select_by_day() {
        let slots = DaySlots::new(1, 2);
        assert_eq!(*slots.get(ExamDay::Second), 2);
        assert_eq!(*slots.get(ExamDay::First), 1);
        assert_eq!(ExamDay::from_number(3), None);
    }

    #[test]
    fn change_event_decodes_feed_shape() {
        let event: ChangeEvent = serde_json::from_str(
            r#"{"eventType":"update","new":{"room_id":"r1","item_id":"i1","checked":true,"date":"2025-11-09"},"old":null}"#,
        )
        .unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.new.unwrap().checked, Some(true));
        assert!(event.old.is_none());
    }
}
