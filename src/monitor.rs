//! Long-running exam-day loop.
//!
//! A 1 Hz tick drives the [`StageEngine`]; checklist changes arrive from the
//! Postgres change feed and are folded into the [`ProgressAggregator`]. Both
//! are owned by this loop, so every mutation is serialised through
//! `tokio::select!`.

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::PgPool;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::calendar::{self, Clock, ExamCalendar, SystemClock};
use crate::db;
use crate::feed;
use crate::models::{ChangeEvent, ExamDay, Stage};
use crate::progress::{DeltaMode, LoadState, ProgressAggregator, ProgressNotice, ProgressSnapshot};
use crate::stage::{StageEngine, StageFrame};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub day: ExamDay,
    pub delta_mode: DeltaMode,
    pub load_timeout: Duration,
    pub tick: Duration,
}

/// Everything the loop owns; handed back when it stops.
pub struct MonitorState {
    pub engine: StageEngine,
    pub aggregator: ProgressAggregator,
}

type LoadResult = anyhow::Result<ProgressSnapshot>;

pub async fn run(pool: PgPool, config: MonitorConfig) -> anyhow::Result<()> {
    let clock = SystemClock;
    let today = calendar::today(clock.now());

    let total_items = match db::count_items_for_role(&pool, db::ROOM_CHIEF_ROLE).await {
        Ok(count) => Some(count),
        Err(err) => {
            warn!(error = %err, "could not count checklist items; waiting for the snapshot");
            None
        }
    };
    let state = MonitorState {
        engine: StageEngine::new(ExamCalendar::enem_2025()?, config.day),
        aggregator: ProgressAggregator::new(today, total_items, config.delta_mode),
    };

    let listener = feed::subscribe(&pool).await?;
    let (event_tx, event_rx) = mpsc::channel(256);
    let feed_task = tokio::spawn(async move {
        if let Err(err) = feed::forward(listener, event_tx).await {
            warn!(error = %err, "change feed stopped");
        }
    });

    let load = move |date: NaiveDate| {
        let pool = pool.clone();
        async move { db::load_snapshot(&pool, date).await }
    };
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for ctrl-c; stopping");
        }
    };

    let state = drive(&config, &clock, state, event_rx, load, shutdown).await;

    feed_task.abort();
    info!(
        alerts_fired = state.engine.fired().len(),
        loaded = state.aggregator.state() == LoadState::Loaded,
        rooms = state.aggregator.snapshot().len(),
        "monitor stopped"
    );
    Ok(())
}

/// Runs the loop until `shutdown` resolves. `load` fetches the snapshot for
/// an exam-zone date; it is called at start and again whenever the date
/// rolls over.
pub async fn drive<C, L, F, S>(
    config: &MonitorConfig,
    clock: &C,
    mut state: MonitorState,
    mut events: mpsc::Receiver<ChangeEvent>,
    load: L,
    shutdown: S,
) -> MonitorState
where
    C: Clock,
    L: Fn(NaiveDate) -> F,
    F: Future<Output = LoadResult> + Send + 'static,
    S: Future<Output = ()>,
{
    let mut load_rx = start_load(&load, state.aggregator.date(), config.load_timeout);
    let mut loading = true;
    let mut feed_open = true;

    let mut ticker = tokio::time::interval(config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_stage: Option<Stage> = None;

    info!(
        day = config.day.number(),
        date = %state.aggregator.date(),
        mode = ?state.aggregator.mode(),
        "monitor started"
    );

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = clock.now();
                let today = calendar::today(now);
                if today != state.aggregator.date() {
                    warn!(
                        from = %state.aggregator.date(),
                        to = %today,
                        "exam-zone date changed; reloading room progress"
                    );
                    state.aggregator = ProgressAggregator::new(
                        today,
                        state.aggregator.total_items(),
                        state.aggregator.mode(),
                    );
                    state.engine.reset();
                    load_rx = start_load(&load, today, config.load_timeout);
                    loading = true;
                }
                let frame = state.engine.tick(now);
                report_frame(&frame, &mut last_stage);
            }
            event = events.recv(), if feed_open => {
                match event {
                    Some(event) => {
                        for notice in state.aggregator.apply(&event) {
                            report_notice(&notice);
                        }
                    }
                    None => {
                        feed_open = false;
                        warn!("change feed closed; room progress is frozen");
                    }
                }
            }
            result = &mut load_rx, if loading => {
                loading = false;
                match result.context("initial load task dropped").and_then(|r| r) {
                    Ok(snapshot) => seed(&mut state.aggregator, snapshot),
                    Err(err) => {
                        warn!(error = %err, "initial load failed; tracking no rooms");
                        state.aggregator.degrade();
                    }
                }
            }
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
        }
    }

    state
}

/// Spawns one snapshot load. The result is dropped if the receiver is gone,
/// either because the loop stopped or because a newer load replaced it.
fn start_load<L, F>(load: &L, date: NaiveDate, timeout: Duration) -> oneshot::Receiver<LoadResult>
where
    L: Fn(NaiveDate) -> F,
    F: Future<Output = LoadResult> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let pending = load(date);
    tokio::spawn(async move {
        let result = match tokio::time::timeout(timeout, pending).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("initial load timed out after {timeout:?}")),
        };
        let _ = tx.send(result);
    });
    rx
}

fn seed(aggregator: &mut ProgressAggregator, snapshot: ProgressSnapshot) {
    aggregator.seed(snapshot);
    let rooms = aggregator.snapshot();
    let complete = rooms.iter().filter(|room| room.is_complete()).count();
    info!(
        date = %aggregator.date(),
        rooms = rooms.len(),
        complete,
        total_items = ?aggregator.total_items(),
        "room progress loaded"
    );
}

fn report_frame(frame: &StageFrame, last_stage: &mut Option<Stage>) {
    if *last_stage != Some(frame.stage) {
        info!(
            stage = frame.stage.label(),
            remaining = %frame.time_remaining,
            next = frame.next_exam_label,
            countdown = %frame.next_exam_countdown,
            "stage changed"
        );
        *last_stage = Some(frame.stage);
    }
    for alert in &frame.alerts {
        warn!(key = %alert.key, day = alert.day.number(), "{}", alert.message);
    }
}

fn report_notice(notice: &ProgressNotice) {
    match notice {
        ProgressNotice::ItemCompleted { room, item_id } => info!(
            room = %room.room_label,
            item = %item_id,
            completed = room.completed,
            total = room.total,
            percent = room.percent,
            "checklist item completed"
        ),
        ProgressNotice::RoomCompleted { room } => {
            info!(room = %room.room_label, "room checklist complete")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Utc};

    use super::*;
    use crate::calendar::tests::sp;
    use crate::models::{ChangeKind, Room, StatusRow};

    /// Wall clock that advances with tokio's (paused) clock.
    struct PausedClock {
        base: DateTime<Utc>,
        started: tokio::time::Instant,
    }

    impl PausedClock {
        fn starting_at(base: DateTime<Utc>) -> Self {
            Self {
                base,
                started: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for PausedClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + chrono::Duration::from_std(self.started.elapsed()).unwrap()
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, day).unwrap()
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            day: ExamDay::First,
            delta_mode: DeltaMode::Flip,
            load_timeout: Duration::from_secs(5),
            tick: Duration::from_secs(1),
        }
    }

    fn state(today: NaiveDate, total_items: Option<u32>) -> MonitorState {
        MonitorState {
            engine: StageEngine::new(ExamCalendar::enem_2025().unwrap(), ExamDay::First),
            aggregator: ProgressAggregator::new(today, total_items, DeltaMode::Flip),
        }
    }

    fn checked(room: &str, item: &str, day: NaiveDate) -> ChangeEvent {
        ChangeEvent {
            kind: ChangeKind::Insert,
            new: Some(StatusRow {
                room_id: Some(room.to_string()),
                item_id: Some(item.to_string()),
                checked: Some(true),
                date: Some(day),
            }),
            old: None,
        }
    }

    fn room_a_snapshot(day: NaiveDate) -> ProgressSnapshot {
        let room = Room {
            id: "A".to_string(),
            code: "S101".to_string(),
            name: String::new(),
        };
        let statuses = [
            checked("A", "i1", day).new.unwrap(),
            checked("A", "i2", day).new.unwrap(),
        ];
        ProgressSnapshot::from_rows(9, vec![room], &statuses)
    }

    fn stop_after(secs: u64) -> impl Future<Output = ()> {
        tokio::time::sleep(Duration::from_secs(secs))
    }

    #[tokio::test(start_paused = true)]
    async fn load_error_degrades_to_empty() {
        let clock = PausedClock::starting_at(sp(2025, 11, 9, 10, 0, 0));
        let (_tx, rx) = mpsc::channel(8);
        let load = |_: NaiveDate| async { Err::<ProgressSnapshot, _>(anyhow::anyhow!("relation does not exist")) };

        let state = drive(&config(), &clock, state(date(9), Some(9)), rx, load, stop_after(3)).await;

        assert_eq!(state.aggregator.state(), LoadState::Loaded);
        assert!(state.aggregator.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_load_times_out_to_empty() {
        let clock = PausedClock::starting_at(sp(2025, 11, 9, 10, 0, 0));
        let (_tx, rx) = mpsc::channel(8);
        let load = |day: NaiveDate| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(room_a_snapshot(day))
        };

        let state = drive(&config(), &clock, state(date(9), Some(9)), rx, load, stop_after(10)).await;

        assert_eq!(state.aggregator.state(), LoadState::Loaded);
        assert!(state.aggregator.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn room_seen_on_feed_survives_later_seed() {
        let clock = PausedClock::starting_at(sp(2025, 11, 9, 10, 0, 0));
        let (tx, rx) = mpsc::channel(8);
        tx.send(checked("unseen-1", "i1", date(9))).await.unwrap();
        let load = |day: NaiveDate| async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(room_a_snapshot(day))
        };

        let state = drive(&config(), &clock, state(date(9), Some(9)), rx, load, stop_after(5)).await;

        let aggregator = &state.aggregator;
        assert_eq!(aggregator.state(), LoadState::Loaded);
        let unseen = aggregator.room("unseen-1").unwrap();
        assert_eq!((unseen.completed, unseen.total), (1, 9));
        assert_eq!(aggregator.room("A").unwrap().completed, 2);
        assert_eq!(aggregator.snapshot().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn load_finishing_after_shutdown_is_dropped() {
        let clock = PausedClock::starting_at(sp(2025, 11, 9, 10, 0, 0));
        let (_tx, rx) = mpsc::channel(8);
        let load = |day: NaiveDate| async move {
            tokio::time::sleep(Duration::from_secs(4)).await;
            Ok(room_a_snapshot(day))
        };

        let state = drive(&config(), &clock, state(date(9), Some(9)), rx, load, stop_after(1)).await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(state.aggregator.state(), LoadState::Loading);
        assert!(state.aggregator.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn date_rollover_reloads_and_accepts_new_day_events() {
        let clock = PausedClock::starting_at(sp(2025, 11, 8, 23, 59, 58));
        let (tx, rx) = mpsc::channel(8);
        let requested = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requested);
        let load = move |day: NaiveDate| {
            seen.lock().unwrap().push(day);
            async move { Ok(ProgressSnapshot::from_rows(9, Vec::new(), &[])) }
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(4)).await;
            tx.send(checked("R", "i1", date(9))).await.unwrap();
        });

        let state = drive(&config(), &clock, state(date(8), Some(9)), rx, load, stop_after(6)).await;

        assert_eq!(*requested.lock().unwrap(), vec![date(8), date(9)]);
        assert_eq!(state.aggregator.date(), date(9));
        assert_eq!(state.aggregator.state(), LoadState::Loaded);
        assert_eq!(state.aggregator.room("R").unwrap().completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reminders_fire_once_through_the_loop() {
        let clock = PausedClock::starting_at(sp(2025, 11, 9, 11, 29, 58));
        let (_tx, rx) = mpsc::channel(8);
        let load = |day: NaiveDate| async move { Ok(room_a_snapshot(day)) };

        let state = drive(&config(), &clock, state(date(9), Some(9)), rx, load, stop_after(90)).await;

        assert_eq!(state.engine.fired().len(), 1);
    }
}
