use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

/// Row stored in `booking_cursor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRow {
    pub last_id: i64,
    pub last_created: Option<String>,
    pub updated_at: String,
}

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    // WAL and stricter durability; one connection is all a single run needs
    // and keeps `sqlite::memory:` pointing at one database.
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid sqlite url {}", database_url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    if !database_url.contains(":memory:") {
        ensure_parent_dir(&options.clone().get_filename())?;
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .context("failed to open sqlite database")?;
    Ok(pool)
}

/// Create the directory holding the database file, if it has one.
fn ensure_parent_dir(db_file: &Path) -> Result<()> {
    match db_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create database directory {}", dir.display())),
        _ => Ok(()),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_booking_cursor(pool: &Pool) -> Result<Option<CursorRow>> {
    let row = sqlx::query(
        "SELECT last_id, last_created, updated_at FROM booking_cursor WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    // Columns are loosely typed; a mistyped value is a decode error, not a panic.
    Ok(Some(CursorRow {
        last_id: row.try_get("last_id")?,
        last_created: row.try_get("last_created")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

#[instrument(skip(pool, last_created))]
pub async fn upsert_booking_cursor(
    pool: &Pool,
    last_id: i64,
    last_created: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO booking_cursor (id, last_id, last_created, updated_at) VALUES (1, ?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(id) DO UPDATE SET last_id = excluded.last_id, last_created = excluded.last_created, updated_at = excluded.updated_at",
    )
    .bind(last_id)
    .bind(last_created)
    .execute(pool)
    .await?;
    Ok(())
}
