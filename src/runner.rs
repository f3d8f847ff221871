//! One poll: load cursor, fetch, select, notify (capped), store cursor.
//!
//! The cursor advances to the newest *selected* id once the whole batch has
//! been delivered, including bookings beyond the per-run cap. Those are
//! skipped for good. If any send fails, nothing is stored and the bookings
//! already delivered in this run will be sent again next time.

use chrono::Utc;
use std::fmt;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::booking_api::BookingSource;
use crate::cursor::{CursorState, CursorStore};
use crate::message::format_booking;
use crate::pushover::Notifier;
use crate::selector::select_new;

/// Inputs of a run that do not come from the collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub max_fetch: u32,
    pub max_per_run: usize,
    pub title: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    /// Send notifications and advance the cursor.
    #[default]
    Notify,
    /// Report what would be sent; touch nothing.
    DryRun,
    /// Mark everything fetched as seen without sending.
    Baseline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub found: usize,
    pub dispatched: usize,
    pub skipped: usize,
    pub previous_cursor: i64,
    pub cursor: i64,
    pub persisted: bool,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "found {} new, sent {}, skipped {} over cap; cursor {} -> {}",
            self.found, self.dispatched, self.skipped, self.previous_cursor, self.cursor
        )?;
        if !self.persisted && self.cursor != self.previous_cursor {
            f.write_str(" (not stored)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to fetch bookings")]
    Fetch(#[source] anyhow::Error),
    #[error(
        "failed to notify booking {booking_id} after {delivered} delivered; cursor kept at {cursor}, delivered bookings will be sent again next run"
    )]
    Dispatch {
        booking_id: i64,
        delivered: usize,
        cursor: i64,
        #[source]
        source: anyhow::Error,
    },
    #[error(
        "sent {dispatched} notifications but failed to store cursor {cursor}; duplicates may be sent next run"
    )]
    Persist {
        cursor: i64,
        dispatched: usize,
        #[source]
        source: anyhow::Error,
    },
}

pub struct Runner<'a> {
    source: &'a dyn BookingSource,
    notifier: &'a dyn Notifier,
    store: &'a dyn CursorStore,
    settings: RunSettings,
    mode: RunMode,
}

impl<'a> Runner<'a> {
    pub fn new(
        source: &'a dyn BookingSource,
        notifier: &'a dyn Notifier,
        store: &'a dyn CursorStore,
        settings: RunSettings,
    ) -> Self {
        Self {
            source,
            notifier,
            store,
            settings,
            mode: RunMode::Notify,
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    #[instrument(skip(self), fields(mode = ?self.mode))]
    pub async fn run_once(&self) -> Result<RunReport, RunError> {
        let previous = self.store.load().await.last_id;
        info!(cursor = previous, "loaded cursor");

        let fetched = self
            .source
            .fetch_recent(self.settings.max_fetch)
            .await
            .map_err(RunError::Fetch)?;
        let fetched_count = fetched.len();

        let selected = select_new(fetched, previous);
        let unchanged = RunReport {
            found: selected.len(),
            dispatched: 0,
            skipped: 0,
            previous_cursor: previous,
            cursor: previous,
            persisted: false,
        };
        let Some(newest) = selected.last() else {
            info!(fetched = fetched_count, "no new bookings");
            return Ok(unchanged);
        };

        let found = selected.len();
        let next_cursor = newest.id.max(previous);
        let cap = self.settings.max_per_run.min(found);
        info!(
            fetched = fetched_count,
            found,
            cap = self.settings.max_per_run,
            "selected new bookings"
        );

        let (batch, skipped) = match self.mode {
            RunMode::Notify => (&selected[..cap], found - cap),
            RunMode::DryRun => {
                for nb in &selected[..cap] {
                    info!(id = nb.id, created = ?nb.booking.created, "would notify");
                }
                info!(
                    would_advance_to = next_cursor,
                    skipped = found - cap,
                    "dry run; nothing sent or stored"
                );
                return Ok(RunReport {
                    skipped: found - cap,
                    ..unchanged
                });
            }
            RunMode::Baseline => (&selected[..0], found),
        };

        for (delivered, nb) in batch.iter().enumerate() {
            let message = format_booking(&nb.booking, &self.settings.title);
            self.notifier
                .send(&message)
                .await
                .map_err(|source| RunError::Dispatch {
                    booking_id: nb.id,
                    delivered,
                    cursor: previous,
                    source,
                })?;
            info!(id = nb.id, "notified booking");
        }

        if self.mode == RunMode::Baseline {
            info!(skipped, "baseline; marking new bookings as seen without sending");
        } else if skipped > 0 {
            warn!(
                skipped,
                first_skipped = selected[cap].id,
                "per-run cap reached; remaining new bookings will not be notified"
            );
        }

        let state = CursorState {
            last_id: next_cursor,
            last_created: newest.booking.created.clone(),
            updated_at: Some(Utc::now()),
        };
        self.store
            .save(&state)
            .await
            .map_err(|source| RunError::Persist {
                cursor: next_cursor,
                dispatched: batch.len(),
                source,
            })?;
        info!(from = previous, to = next_cursor, "advanced cursor");

        Ok(RunReport {
            found,
            dispatched: batch.len(),
            skipped,
            previous_cursor: previous,
            cursor: next_cursor,
            persisted: true,
        })
    }
}
