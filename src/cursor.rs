//! Persisted high-water mark of notified booking ids.
//!
//! `load` never fails: a missing or unreadable store means "nothing seen yet"
//! and yields a cursor of 0. `save` either replaces the whole record or
//! leaves the previous one untouched.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

use crate::config::State;
use crate::db;
use crate::model::parse_booking_id;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorState {
    /// Highest booking id already handled.
    pub last_id: i64,
    /// `created` of that booking, informational only.
    #[serde(default)]
    pub last_created: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self) -> CursorState;

    async fn save(&self, state: &CursorState) -> Result<()>;
}

/// Build the store selected in the configuration.
pub async fn open(state: &State) -> Result<Box<dyn CursorStore>> {
    match state {
        State::File { path } => Ok(Box::new(FileCursorStore::new(path))),
        State::Sqlite { database_url } => {
            Ok(Box::new(SqliteCursorStore::connect(database_url).await?))
        }
    }
}

/// JSON document on local disk, replaced by rename on every save.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Interpret a stored document. Older documents may carry `last_id: null`
/// or a string id; anything without a usable non-negative id is `None`.
fn parse_document(raw: &str) -> Option<CursorState> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let obj = value.as_object()?;
    let last_id = match obj.get("last_id") {
        None | Some(Value::Null) => 0,
        Some(v) => parse_booking_id(v).filter(|id| *id >= 0)?,
    };
    let last_created = obj
        .get("last_created")
        .and_then(Value::as_str)
        .map(str::to_string);
    let updated_at = obj
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    Some(CursorState {
        last_id,
        last_created,
        updated_at,
    })
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create state directory {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents).context("failed to write cursor state")?;
    tmp.as_file()
        .sync_all()
        .context("failed to flush cursor state")?;
    tmp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl CursorStore for FileCursorStore {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn load(&self) -> CursorState {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no cursor state yet; starting from 0");
                return CursorState::default();
            }
            Err(err) => {
                warn!(?err, "cursor state unreadable; starting from 0");
                return CursorState::default();
            }
        };
        match parse_document(&raw) {
            Some(state) => state,
            None => {
                warn!("cursor state corrupt; starting from 0");
                CursorState::default()
            }
        }
    }

    #[instrument(skip_all, fields(path = %self.path.display(), last_id = state.last_id))]
    async fn save(&self, state: &CursorState) -> Result<()> {
        let mut contents = serde_json::to_vec_pretty(state).context("failed to encode cursor")?;
        contents.push(b'\n');
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &contents))
            .await
            .context("cursor writer panicked")??;
        Ok(())
    }
}

/// Single-row table in a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteCursorStore {
    pool: db::Pool,
}

impl SqliteCursorStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = db::init_pool(database_url).await?;
        db::run_migrations(&pool)
            .await
            .context("failed to migrate cursor database")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: db::Pool) -> Self {
        Self { pool }
    }
}

fn parse_sqlite_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    #[instrument(skip_all)]
    async fn load(&self) -> CursorState {
        match db::get_booking_cursor(&self.pool).await {
            Ok(Some(row)) if row.last_id >= 0 => CursorState {
                last_id: row.last_id,
                last_created: row.last_created,
                updated_at: parse_sqlite_timestamp(&row.updated_at),
            },
            Ok(Some(row)) => {
                warn!(last_id = row.last_id, "negative cursor stored; starting from 0");
                CursorState::default()
            }
            Ok(None) => {
                debug!("no cursor row yet; starting from 0");
                CursorState::default()
            }
            Err(err) => {
                warn!(?err, "cursor row unreadable; starting from 0");
                CursorState::default()
            }
        }
    }

    #[instrument(skip_all, fields(last_id = state.last_id))]
    async fn save(&self, state: &CursorState) -> Result<()> {
        db::upsert_booking_cursor(&self.pool, state.last_id, state.last_created.as_deref())
            .await
            .context("failed to store cursor")
    }
}
