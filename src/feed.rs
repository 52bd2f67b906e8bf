use anyhow::Context;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::models::{ChangeEvent, StatusRow};

/// Channel the `checklist_status` trigger notifies on.
pub const CHANNEL: &str = "checklist_status_changes";

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("payload is not a change event: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("change event carries neither a new nor an old row")]
    MissingRow,
    #[error("change event row is missing `{0}`")]
    MissingField(&'static str),
}

pub fn decode(payload: &str) -> Result<ChangeEvent, FeedError> {
    let event: ChangeEvent = serde_json::from_str(payload)?;
    let row: &StatusRow = event
        .new
        .as_ref()
        .or(event.old.as_ref())
        .ok_or(FeedError::MissingRow)?;
    if row.room_id.is_none() {
        return Err(FeedError::MissingField("room_id"));
    }
    if row.item_id.is_none() {
        return Err(FeedError::MissingField("item_id"));
    }
    Ok(event)
}

pub async fn subscribe(pool: &PgPool) -> anyhow::Result<PgListener> {
    let mut listener = PgListener::connect_with(pool)
        .await
        .context("failed to open change feed connection")?;
    listener
        .listen(CHANNEL)
        .await
        .with_context(|| format!("failed to LISTEN on {CHANNEL}"))?;
    info!(channel = CHANNEL, "subscribed to checklist change feed");
    Ok(listener)
}

/// Decodes notifications and hands them to the monitor until the receiver
/// goes away. Undecodable payloads are dropped.
pub async fn forward(mut listener: PgListener, events: mpsc::Sender<ChangeEvent>) -> anyhow::Result<()> {
    loop {
        let notification = listener.recv().await.context("change feed interrupted")?;
        match decode(notification.payload()) {
            Ok(event) => {
                if events.send(event).await.is_err() {
                    debug!("monitor gone, stopping change feed");
                    return Ok(());
                }
            }
            Err(err) => debug!(%err, "discarding change feed payload"),
        }
    }
}
