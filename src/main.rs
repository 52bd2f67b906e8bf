use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod alerts;
mod calendar;
mod db;
mod feed;
mod models;
mod monitor;
mod progress;
mod stage;

use crate::calendar::ExamCalendar;
use crate::models::ExamDay;
use crate::progress::{DeltaMode, ProgressAggregator};
use crate::stage::StageEngine;

#[derive(Parser)]
#[command(name = "enem-day-monitor")]
#[command(about = "Exam-day stage clock and room checklist progress for ENEM coordinators", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic rooms and the room chief checklist
    Seed,
    /// Import checklist items from a CSV file
    ImportItems {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Check or uncheck one checklist item for a room
    Check {
        #[arg(long)]
        room: String,
        /// Item position within the role's checklist
        #[arg(long)]
        item: i32,
        #[arg(long, default_value = db::ROOM_CHIEF_ROLE)]
        role: String,
        /// Exam-zone date; defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        uncheck: bool,
    },
    /// Print the current stage, countdowns and room progress
    Status {
        #[arg(long, default_value_t = 1, value_parser = parse_day)]
        day: u8,
    },
    /// Follow the exam day: stage changes, reminders and checklist progress
    #[command(group(
        ArgGroup::new("deltas")
            .args(["strict_deltas", "legacy_deltas"])
            .multiple(false)
    ))]
    Monitor {
        #[arg(long, default_value_t = 1, value_parser = parse_day)]
        day: u8,
        /// Only count an update when `checked` actually flips (default)
        #[arg(long)]
        strict_deltas: bool,
        /// Count every update by its new `checked` value
        #[arg(long)]
        legacy_deltas: bool,
        #[arg(long, default_value_t = 30)]
        load_timeout_secs: u64,
        #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(100..=1000))]
        tick_ms: u64,
    },
}

fn parse_day(value: &str) -> Result<u8, String> {
    let day: u8 = value.parse().map_err(|_| format!("`{value}` is not a day number"))?;
    ExamDay::from_number(day)
        .map(ExamDay::number)
        .ok_or_else(|| "exam day must be 1 or 2".to_string())
}

fn exam_day(day: u8) -> anyhow::Result<ExamDay> {
    ExamDay::from_number(day).context("exam day must be 1 or 2")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the checklist Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportItems { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} checklist items from {}.", csv.display());
        }
        Commands::Check {
            room,
            item,
            role,
            date,
            uncheck,
        } => {
            let date = date.unwrap_or_else(|| calendar::today(Utc::now()));
            db::set_status(&pool, &room, &role, item, date, !uncheck).await?;
            let verb = if uncheck { "Unchecked" } else { "Checked" };
            println!("{verb} item {item} ({role}) in room {room} for {date}.");
        }
        Commands::Status { day } => {
            let now = Utc::now();
            let engine = StageEngine::new(ExamCalendar::enem_2025()?, exam_day(day)?);
            let frame = engine.peek(now);
            println!("Stage: {}", frame.stage.label());
            println!("Time remaining (day {day}): {}", frame.time_remaining);
            println!("{}: {}", frame.next_exam_label, frame.next_exam_countdown);

            let today = calendar::today(now);
            let mut aggregator = ProgressAggregator::new(today, None, DeltaMode::default());
            match db::load_snapshot(&pool, today).await {
                Ok(snapshot) => aggregator.seed(snapshot),
                Err(err) => {
                    tracing::warn!(error = %err, "could not load room progress");
                    aggregator.degrade();
                }
            }

            let rooms = aggregator.snapshot();
            if rooms.is_empty() {
                println!("No rooms tracked for {today}.");
                return Ok(());
            }

            println!("Room progress for {today}:");
            for room in rooms {
                println!(
                    "- {}: {}/{} ({}%)",
                    room.room_label, room.completed, room.total, room.percent
                );
            }
        }
        Commands::Monitor {
            day,
            strict_deltas: _,
            legacy_deltas,
            load_timeout_secs,
            tick_ms,
        } => {
            let config = monitor::MonitorConfig {
                day: exam_day(day)?,
                delta_mode: if legacy_deltas {
                    DeltaMode::NewValue
                } else {
                    DeltaMode::Flip
                },
                load_timeout: Duration::from_secs(load_timeout_secs),
                tick: Duration::from_millis(tick_ms),
            };
            monitor::run(pool, config).await?;
        }
    }

    Ok(())
}
