use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use tracing::debug;

use crate::models::{ChangeEvent, ChangeKind, Room, RoomProgress, StatusRow};

/// How a change event is turned into a counter delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeltaMode {
    /// Adjust only when `checked` actually flips between the old and new row.
    #[default]
    Flip,
    /// +1 for every event whose new row is checked, -1 otherwise.
    NewValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Loaded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressNotice {
    ItemCompleted { room: RoomProgress, item_id: String },
    RoomCompleted { room: RoomProgress },
}

/// Point-in-time view used to seed the aggregator.
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub total_items: u32,
    pub rooms: Vec<Room>,
    pub checked_by_room: HashMap<String, u32>,
}

impl ProgressSnapshot {
    pub fn from_rows(total_items: u32, rooms: Vec<Room>, statuses: &[StatusRow]) -> Self {
        let mut checked_by_room = HashMap::new();
        for row in statuses {
            if let (Some(room_id), Some(true)) = (&row.room_id, row.checked) {
                *checked_by_room.entry(room_id.clone()).or_insert(0) += 1;
            }
        }
        Self {
            total_items,
            rooms,
            checked_by_room,
        }
    }
}

pub struct ProgressAggregator {
    date: NaiveDate,
    mode: DeltaMode,
    /// `None` until the checklist size is known.
    total_items: Option<u32>,
    state: LoadState,
    rooms: BTreeMap<String, RoomProgress>,
    /// Unclamped counts for rooms synthesized while the total is unknown.
    pending: HashMap<String, u32>,
    completion_notified: HashSet<String>,
}

impl ProgressAggregator {
    pub fn new(date: NaiveDate, total_items: Option<u32>, mode: DeltaMode) -> Self {
        Self {
            date,
            mode,
            total_items,
            state: LoadState::Loading,
            rooms: BTreeMap::new(),
            pending: HashMap::new(),
            completion_notified: HashSet::new(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn mode(&self) -> DeltaMode {
        self.mode
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn total_items(&self) -> Option<u32> {
        self.total_items
    }

    #[cfg(test)]
    pub fn room(&self, room_id: &str) -> Option<&RoomProgress> {
        self.rooms.get(room_id)
    }

    /// Rooms ordered by label.
    pub fn snapshot(&self) -> Vec<RoomProgress> {
        let mut rooms: Vec<RoomProgress> = self.rooms.values().cloned().collect();
        rooms.sort_by(|a, b| a.room_label.cmp(&b.room_label));
        rooms
    }

    /// Applies the initial snapshot. Rooms synthesized from earlier feed
    /// events but absent from the snapshot are kept, with any count held
    /// back while the total was unknown re-applied against the new total.
    pub fn seed(&mut self, snapshot: ProgressSnapshot) {
        let total = snapshot.total_items;
        self.total_items = Some(total);
        for progress in self.rooms.values_mut() {
            let completed = self
                .pending
                .get(&progress.room_id)
                .copied()
                .unwrap_or(progress.completed);
            progress.total = total;
            progress.set_completed(completed);
        }
        self.pending.clear();
        for room in snapshot.rooms {
            let completed = snapshot.checked_by_room.get(&room.id).copied().unwrap_or(0);
            let progress = RoomProgress::new(room.id.clone(), room.label(), completed, total);
            self.rooms.insert(room.id, progress);
        }
        self.state = LoadState::Loaded;
    }

    /// Initial load failed: nothing is tracked, but loading is over.
    pub fn degrade(&mut self) {
        self.rooms.clear();
        self.pending.clear();
        self.state = LoadState::Loaded;
    }

    pub fn apply(&mut self, event: &ChangeEvent) -> Vec<ProgressNotice> {
        let Some(row) = event.new.as_ref().or(event.old.as_ref()) else {
            debug!(kind = ?event.kind, "change event without rows discarded");
            return Vec::new();
        };
        let (Some(room_id), Some(item_id)) = (row.room_id.as_deref(), row.item_id.as_deref()) else {
            debug!(kind = ?event.kind, "change event without room or item discarded");
            return Vec::new();
        };
        if row.date.is_some_and(|date| date != self.date) {
            return Vec::new();
        }

        let delta = match self.delta(event) {
            Some(delta) if delta != 0 => delta,
            _ => return Vec::new(),
        };

        let step = |count: u32| {
            if delta > 0 {
                count.saturating_add(1)
            } else {
                count.saturating_sub(1)
            }
        };
        let total = self.total_items.unwrap_or(0);
        let progress = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomProgress::new(room_id.to_string(), placeholder_label(room_id), 0, total));

        let before = progress.percent;
        let completed = match self.total_items {
            Some(_) => step(progress.completed),
            None => {
                let raw = self.pending.entry(room_id.to_string()).or_insert(0);
                *raw = step(*raw);
                *raw
            }
        };
        progress.set_completed(completed);
        let progress = progress.clone();

        let mut notices = Vec::new();
        if delta > 0 {
            notices.push(ProgressNotice::ItemCompleted {
                room: progress.clone(),
                item_id: item_id.to_string(),
            });
        }
        if before < 100
            && progress.is_complete()
            && self.completion_notified.insert(progress.room_id.clone())
        {
            notices.push(ProgressNotice::RoomCompleted { room: progress });
        }
        notices
    }

    fn delta(&self, event: &ChangeEvent) -> Option<i8> {
        let new_checked = event.new.as_ref().and_then(|row| row.checked);
        let old_checked = event.old.as_ref().and_then(|row| row.checked);
        match self.mode {
            DeltaMode::NewValue => new_checked.map(|checked| if checked { 1 } else { -1 }),
            DeltaMode::Flip => {
                let (before, after) = match event.kind {
                    ChangeKind::Insert => (false, new_checked?),
                    ChangeKind::Delete => (old_checked?, false),
                    ChangeKind::Update => match old_checked {
                        Some(old) => (old, new_checked?),
                        // No old image: fall back to the new value alone.
                        None => return new_checked.map(|checked| if checked { 1 } else { -1 }),
                    },
                };
                Some(i8::from(after) - i8::from(before))
            }
        }
    }
}

fn placeholder_label(room_id: &str) -> String {
    let short: String = room_id.chars().take(8).collect();
    format!("Sala {short}")
}
