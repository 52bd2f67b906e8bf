use anyhow::{bail, Context};
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Room, StatusRow};
use crate::progress::ProgressSnapshot;

/// Checklist role whose item count is the denominator for every room.
pub const ROOM_CHIEF_ROLE: &str = "chefe_sala";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let rooms = vec![
        (
            Uuid::parse_str("6f1c2a4e-8d0b-4c55-9a1e-2f3b7c9d1e01")?,
            "S101",
            "Bloco A - Sala 101",
        ),
        (
            Uuid::parse_str("1b7e9f30-52c4-4d8a-b6e2-0a4c8d3f5e02")?,
            "S102",
            "Bloco A - Sala 102",
        ),
        (
            Uuid::parse_str("c83d5e17-6a9f-4b20-8e41-7d2c9b0a6f03")?,
            "S201",
            "Bloco B - Sala 201",
        ),
        (
            Uuid::parse_str("47a0b8c2-1e3d-4f96-a5b7-9c8e2d1f0a04")?,
            "S202",
            "Bloco B - Sala 202 (atendimento especializado)",
        ),
    ];

    for (id, code, name) in rooms {
        sqlx::query(
            r#"
            INSERT INTO enem_coordination.rooms (id, code, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(id)
        .bind(code)
        .bind(name)
        .execute(pool)
        .await?;
    }

    let items = [
        "Conferir kit de provas lacrado",
        "Afixar ensalamento na porta",
        "Verificar relógio da sala",
        "Organizar carteiras conforme mapa",
        "Conferir documentos dos participantes",
        "Recolher e lacrar eletrônicos",
        "Registrar horário de início",
        "Coletar assinaturas na lista de presença",
        "Lacrar envelope de devolução",
    ];

    for (index, title) in items.iter().enumerate() {
        let position = index as i32 + 1;
        sqlx::query(
            r#"
            INSERT INTO enem_coordination.checklist_items (id, role, title, position, source_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ROOM_CHIEF_ROLE)
        .bind(*title)
        .bind(position)
        .bind(format!("seed-{ROOM_CHIEF_ROLE}-{position:02}"))
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn fetch_rooms(pool: &PgPool) -> anyhow::Result<Vec<Room>> {
    let records = sqlx::query(
        "SELECT id::text AS id, code, name FROM enem_coordination.rooms ORDER BY code",
    )
    .fetch_all(pool)
    .await?;

    Ok(records
        .into_iter()
        .map(|row| Room {
            id: row.get("id"),
            code: row.get("code"),
            name: row.get("name"),
        })
        .collect())
}

pub async fn count_items_for_role(pool: &PgPool, role: &str) -> anyhow::Result<u32> {
    let count: i64 = sqlx::query(
        "SELECT COUNT(*) AS count FROM enem_coordination.checklist_items WHERE role = $1",
    )
    .bind(role)
    .fetch_one(pool)
    .await?
    .get("count");

    u32::try_from(count).context("checklist item count out of range")
}

pub async fn fetch_statuses(pool: &PgPool, date: NaiveDate) -> anyhow::Result<Vec<StatusRow>> {
    let records = sqlx::query(
        "SELECT room_id::text AS room_id, item_id::text AS item_id, checked, date \
         FROM enem_coordination.checklist_status \
         WHERE date = $1",
    )
    .bind(date)
    .fetch_all(pool)
    .await?;

    Ok(records
        .into_iter()
        .map(|row| StatusRow {
            room_id: row.get("room_id"),
            item_id: row.get("item_id"),
            checked: row.get("checked"),
            date: row.get("date"),
        })
        .collect())
}

pub async fn load_snapshot(pool: &PgPool, date: NaiveDate) -> anyhow::Result<ProgressSnapshot> {
    let rooms = fetch_rooms(pool).await.context("failed to fetch rooms")?;
    let total_items = count_items_for_role(pool, ROOM_CHIEF_ROLE)
        .await
        .context("failed to count checklist items")?;
    let statuses = fetch_statuses(pool, date)
        .await
        .context("failed to fetch checklist status")?;
    Ok(ProgressSnapshot::from_rows(total_items, rooms, &statuses))
}

/// Checks or unchecks one checklist item for a room on `date`.
pub async fn set_status(
    pool: &PgPool,
    room_code: &str,
    role: &str,
    position: i32,
    date: NaiveDate,
    checked: bool,
) -> anyhow::Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO enem_coordination.checklist_status (room_id, item_id, date, checked)
        SELECT r.id, i.id, $4, $5
        FROM enem_coordination.rooms r
        JOIN enem_coordination.checklist_items i ON i.role = $2 AND i.position = $3
        WHERE r.code = $1
        ON CONFLICT (room_id, item_id, date) DO UPDATE
        SET checked = EXCLUDED.checked, updated_at = now()
        "#,
    )
    .bind(room_code)
    .bind(role)
    .bind(position)
    .bind(date)
    .bind(checked)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        bail!("no room {room_code} or no {role} item at position {position}");
    }
    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        role: String,
        title: String,
        position: i32,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let source_key = row
            .source_key
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| format!("import-{}-{:02}", row.role, row.position));

        let result = sqlx::query(
            r#"
            INSERT INTO enem_coordination.checklist_items (id, role, title, position, source_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.role)
        .bind(&row.title)
        .bind(row.position)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}
