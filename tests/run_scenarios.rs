use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use booking_notifier::booking_api::BookingSource;
use booking_notifier::cursor::{CursorState, CursorStore, FileCursorStore, SqliteCursorStore};
use booking_notifier::message::Message;
use booking_notifier::model::Booking;
use booking_notifier::pushover::Notifier;
use booking_notifier::runner::{RunError, RunMode, RunSettings, Runner};

fn booking(id: i64) -> Booking {
    Booking::from_value(serde_json::json!({
        "id": id,
        "created": format!("2026-10-19 10:{:02}:00", id % 60),
        "participant": { "name": format!("Dancer {}", id) },
    }))
}

fn settings(max_per_run: usize) -> RunSettings {
    RunSettings {
        max_fetch: 50,
        max_per_run,
        title: "Ny anmälan".into(),
    }
}

#[derive(Clone, Default)]
struct FakeSource {
    response: Arc<Mutex<Option<Result<Vec<Booking>>>>>,
    requested: Arc<Mutex<Vec<u32>>>,
}

impl FakeSource {
    fn with_bookings(bookings: Vec<Booking>) -> Self {
        Self {
            response: Arc::new(Mutex::new(Some(Ok(bookings)))),
            ..Default::default()
        }
    }

    fn with_ids(ids: &[i64]) -> Self {
        Self::with_bookings(ids.iter().copied().map(booking).collect())
    }

    fn failing(message: &str) -> Self {
        Self {
            response: Arc::new(Mutex::new(Some(Err(anyhow!(message.to_string()))))),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl BookingSource for FakeSource {
    async fn fetch_recent(&self, max_rows: u32) -> Result<Vec<Booking>> {
        self.requested.lock().await.push(max_rows);
        self.response
            .lock()
            .await
            .take()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    responses: Arc<Mutex<VecDeque<Result<()>>>>,
    sent: Arc<Mutex<Vec<Message>>>,
}

impl RecordingNotifier {
    fn with_responses(responses: Vec<Result<()>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn sent(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }

    async fn sent_ids(&self) -> Vec<i64> {
        self.sent()
            .await
            .iter()
            .map(|m| {
                let tail = m.body.rsplit("(ID ").next().unwrap();
                tail.trim_end_matches(')').parse().unwrap()
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &Message) -> Result<()> {
        let response = self.responses.lock().await.pop_front().unwrap_or(Ok(()));
        if response.is_ok() {
            self.sent.lock().await.push(message.clone());
        }
        response
    }
}

#[derive(Clone, Default)]
struct MemoryStore {
    state: Arc<Mutex<Option<CursorState>>>,
    saves: Arc<Mutex<usize>>,
    fail_save: bool,
}

impl MemoryStore {
    fn at(last_id: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(Some(CursorState {
                last_id,
                ..Default::default()
            }))),
            ..Default::default()
        }
    }

    async fn last_id(&self) -> i64 {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|s| s.last_id)
            .unwrap_or(0)
    }

    async fn saves(&self) -> usize {
        *self.saves.lock().await
    }
}

#[async_trait::async_trait]
impl CursorStore for MemoryStore {
    async fn load(&self) -> CursorState {
        self.state.lock().await.clone().unwrap_or_default()
    }

    async fn save(&self, state: &CursorState) -> Result<()> {
        if self.fail_save {
            return Err(anyhow!("disk full"));
        }
        *self.saves.lock().await += 1;
        *self.state.lock().await = Some(state.clone());
        Ok(())
    }
}

#[tokio::test]
async fn capped_run_advances_past_undispatched_bookings() {
    let source = FakeSource::with_ids(&[101, 99, 103, 102]);
    let notifier = RecordingNotifier::default();
    let store = MemoryStore::at(100);

    let report = Runner::new(&source, &notifier, &store, settings(2))
        .run_once()
        .await
        .unwrap();

    assert_eq!(notifier.sent_ids().await, vec![101, 102]);
    assert_eq!(report.found, 3);
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.previous_cursor, 100);
    assert_eq!(report.cursor, 103);
    assert!(report.persisted);
    assert_eq!(store.last_id().await, 103);
    assert_eq!(source.requested.lock().await.clone(), vec![50]);
}

#[tokio::test]
async fn first_run_sends_oldest_first() {
    let source = FakeSource::with_ids(&[5, 3, 4]);
    let notifier = RecordingNotifier::default();
    let store = MemoryStore::default();

    let report = Runner::new(&source, &notifier, &store, settings(5))
        .run_once()
        .await
        .unwrap();

    assert_eq!(notifier.sent_ids().await, vec![3, 4, 5]);
    assert_eq!(report.skipped, 0);
    assert_eq!(store.last_id().await, 5);

    let sent = notifier.sent().await;
    assert_eq!(sent[0].title, "Ny anmälan");
    assert!(sent[0].body.starts_with("Dancer 3\n"));
}

#[tokio::test]
async fn dispatch_failure_keeps_prior_cursor() {
    let source = FakeSource::with_ids(&[11, 12, 13]);
    let notifier =
        RecordingNotifier::with_responses(vec![Ok(()), Err(anyhow!("pushover 500")), Ok(())]);
    let store = MemoryStore::at(10);

    let err = Runner::new(&source, &notifier, &store, settings(5))
        .run_once()
        .await
        .unwrap_err();

    match err {
        RunError::Dispatch {
            booking_id,
            delivered,
            cursor,
            ..
        } => {
            assert_eq!(booking_id, 12);
            assert_eq!(delivered, 1);
            assert_eq!(cursor, 10);
        }
        other => panic!("unexpected error: {other}"),
    }
    // The third booking is never attempted.
    assert_eq!(notifier.sent_ids().await, vec![11]);
    assert_eq!(store.saves().await, 0);
    assert_eq!(store.last_id().await, 10);
}

#[tokio::test]
async fn nothing_new_is_a_no_op() {
    let source = FakeSource::with_ids(&[7, 8, 9]);
    let notifier = RecordingNotifier::default();
    let store = MemoryStore::at(9);

    let report = Runner::new(&source, &notifier, &store, settings(5))
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.found, 0);
    assert_eq!(report.cursor, 9);
    assert!(!report.persisted);
    assert!(notifier.sent().await.is_empty());
    assert_eq!(store.saves().await, 0);
}

#[tokio::test]
async fn empty_fetch_is_a_no_op() {
    let source = FakeSource::with_ids(&[]);
    let notifier = RecordingNotifier::default();
    let store = MemoryStore::default();

    let report = Runner::new(&source, &notifier, &store, settings(5))
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.found, 0);
    assert_eq!(store.saves().await, 0);
}

#[tokio::test]
async fn malformed_records_are_ignored() {
    let mut bookings = vec![booking(21)];
    bookings.push(Booking::from_value(serde_json::json!({ "id": "n/a" })));
    bookings.push(Booking::from_value(serde_json::json!({ "created": "2026-10-19" })));
    bookings.push(booking(20));
    let source = FakeSource::with_bookings(bookings);
    let notifier = RecordingNotifier::default();
    let store = MemoryStore::default();

    let report = Runner::new(&source, &notifier, &store, settings(5))
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.found, 2);
    assert_eq!(notifier.sent_ids().await, vec![20, 21]);
    assert_eq!(store.last_id().await, 21);
}

#[tokio::test]
async fn fetch_failure_touches_nothing() {
    let source = FakeSource::failing("HTTP 503");
    let notifier = RecordingNotifier::default();
    let store = MemoryStore::at(4);

    let err = Runner::new(&source, &notifier, &store, settings(5))
        .run_once()
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Fetch(_)));
    assert!(notifier.sent().await.is_empty());
    assert_eq!(store.saves().await, 0);
    assert_eq!(store.last_id().await, 4);
}

#[tokio::test]
async fn persist_failure_is_reported_after_sending() {
    let source = FakeSource::with_ids(&[1, 2]);
    let notifier = RecordingNotifier::default();
    let store = MemoryStore {
        fail_save: true,
        ..Default::default()
    };

    let err = Runner::new(&source, &notifier, &store, settings(5))
        .run_once()
        .await
        .unwrap_err();

    match &err {
        RunError::Persist {
            cursor, dispatched, ..
        } => {
            assert_eq!(*cursor, 2);
            assert_eq!(*dispatched, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("duplicates may be sent"));
    assert_eq!(notifier.sent_ids().await, vec![1, 2]);
}

#[tokio::test]
async fn dry_run_sends_and_stores_nothing() {
    let source = FakeSource::with_ids(&[31, 32, 33]);
    let notifier = RecordingNotifier::default();
    let store = MemoryStore::at(30);

    let report = Runner::new(&source, &notifier, &store, settings(2))
        .with_mode(RunMode::DryRun)
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.found, 3);
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.cursor, 30);
    assert!(!report.persisted);
    assert!(notifier.sent().await.is_empty());
    assert_eq!(store.saves().await, 0);
}

#[tokio::test]
async fn baseline_marks_everything_seen() {
    let source = FakeSource::with_ids(&[40, 44, 42]);
    let notifier = RecordingNotifier::default();
    let store = MemoryStore::default();

    let report = Runner::new(&source, &notifier, &store, settings(1))
        .with_mode(RunMode::Baseline)
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.dispatched, 0);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.cursor, 44);
    assert!(notifier.sent().await.is_empty());
    assert_eq!(store.last_id().await, 44);
}

#[tokio::test]
async fn cursor_never_decreases_across_runs() {
    let td = tempfile::tempdir().unwrap();
    let store = FileCursorStore::new(td.path().join("booking_state.json"));
    let notifier = RecordingNotifier::default();

    let first = FakeSource::with_ids(&[10, 12]);
    Runner::new(&first, &notifier, &store, settings(5))
        .run_once()
        .await
        .unwrap();
    assert_eq!(store.load().await.last_id, 12);

    // Upstream returns older bookings only; nothing is new.
    let second = FakeSource::with_ids(&[8, 11, 12]);
    let report = Runner::new(&second, &notifier, &store, settings(5))
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.found, 0);
    assert_eq!(store.load().await.last_id, 12);

    let third = FakeSource::with_ids(&[13, 12]);
    Runner::new(&third, &notifier, &store, settings(5))
        .run_once()
        .await
        .unwrap();
    assert_eq!(store.load().await.last_id, 13);
    assert_eq!(notifier.sent_ids().await, vec![10, 12, 13]);
}

#[tokio::test]
async fn corrupt_state_file_starts_fresh() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("booking_state.json");
    std::fs::write(&path, "{{{ garbage").unwrap();
    let store = FileCursorStore::new(&path);
    let notifier = RecordingNotifier::default();
    let source = FakeSource::with_ids(&[2, 1]);

    let report = Runner::new(&source, &notifier, &store, settings(5))
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.previous_cursor, 0);
    assert_eq!(notifier.sent_ids().await, vec![1, 2]);
    assert_eq!(store.load().await.last_id, 2);
}

#[tokio::test]
async fn sqlite_store_backs_a_full_run() {
    let store = SqliteCursorStore::connect("sqlite::memory:").await.unwrap();
    let notifier = RecordingNotifier::default();
    let source = FakeSource::with_ids(&[501, 503, 502]);

    let report = Runner::new(&source, &notifier, &store, settings(2))
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.cursor, 503);
    assert_eq!(notifier.sent_ids().await, vec![501, 502]);
    let loaded = store.load().await;
    assert_eq!(loaded.last_id, 503);
    assert_eq!(loaded.last_created.as_deref(), Some("2026-10-19 10:23:00"));
}
