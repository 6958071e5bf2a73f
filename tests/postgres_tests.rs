//! Postgres-backed integration tests
//!
//! These exercise the invariants that live in SQL: the active-key unique
//! index behind task deduplication, the derived-state reset on a changed
//! file's upsert, and the dispatch loops. They need a reachable database
//! and skip themselves when DATABASE_URL is not set.
//!
//! Tests share one database, so they serialize on a lock and key every
//! row they create with a fresh uuid.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use curator::db::{CreateLibrary, Database, LibraryType, TaskStatus, UpsertMediaItem};
use curator::jobs::{TaskHandler, TaskQueue};
use curator::services::{Event, Notifier};

static DB_GUARD: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

async fn connect() -> Option<Database> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping");
        return None;
    };
    let db = match Database::connect(&url).await {
        Ok(db) => db,
        Err(err) => {
            eprintln!("database unreachable ({err}); skipping");
            return None;
        }
    };
    if let Err(err) = db.migrate().await {
        eprintln!("migration failed ({err}); skipping");
        return None;
    }
    Some(db)
}

fn movie_input(library_id: Uuid, path: &str) -> UpsertMediaItem {
    UpsertMediaItem {
        library_id,
        parent_id: None,
        title: "Film".into(),
        sort_title: Some("Film".into()),
        original_title: None,
        year: Some(2001),
        file_path: path.to_string(),
        size_bytes: 100,
        file_modified_at: Some(Utc::now()),
        video_codec: None,
        audio_codec: None,
        width: None,
        height: None,
        duration_secs: Some(100.0),
        bitrate: None,
        resolution_hint: None,
        source_hint: None,
        edition: None,
        season_number: None,
        episode_number: None,
        disc_number: None,
        track_number: None,
        part_number: None,
    }
}

// ============================================================================
// Unique-key deduplication
// ============================================================================

#[tokio::test]
async fn unique_key_admits_one_live_task_under_contention() {
    let _guard = DB_GUARD.lock().await;
    let Some(db) = connect().await else { return };

    let queue = Arc::new(TaskQueue::new(db.clone(), Notifier::new()));
    let key = format!("scan:it-{}", Uuid::new_v4());

    // All callers race straight through the pre-check; the index decides
    let mut handles = Vec::new();
    for _ in 0..8 {
        let queue = Arc::clone(&queue);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            queue
                .enqueue_unique("scan", json!({}), &key, "keys-it")
                .await
                .unwrap()
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1, "exactly one enqueue may win the key");

    let tasks = db.tasks();
    if let Some(record) = tasks.find_active_by_key(&key).await.unwrap() {
        tasks.mark_cancelled(record.id).await.unwrap();
    }
    tasks.delete_terminal_by_key(&key).await.unwrap();
}

#[tokio::test]
async fn re_enqueue_skips_active_and_replaces_terminal() {
    let _guard = DB_GUARD.lock().await;
    let Some(db) = connect().await else { return };

    let queue = TaskQueue::new(db.clone(), Notifier::new());
    let key = format!("scan:it-{}", Uuid::new_v4());

    let first = queue
        .enqueue_unique("scan", json!({}), &key, "keys-it")
        .await
        .unwrap()
        .expect("first enqueue admitted");

    // Active conflict is a silent no-op, not an error
    assert!(queue
        .enqueue_unique("scan", json!({}), &key, "keys-it")
        .await
        .unwrap()
        .is_none());

    db.tasks().mark_completed(first.id).await.unwrap();

    let second = queue
        .enqueue_unique("scan", json!({}), &key, "keys-it")
        .await
        .unwrap()
        .expect("re-enqueue after terminal admitted");
    assert_ne!(second.id, first.id);

    // The stale terminal record was cleared, not kept alongside
    assert!(db.tasks().get_by_id(first.id).await.unwrap().is_none());

    db.tasks().mark_cancelled(second.id).await.unwrap();
    db.tasks().delete_terminal_by_key(&key).await.unwrap();
}

// ============================================================================
// Media item upsert
// ============================================================================

#[tokio::test]
async fn changed_file_upsert_keeps_id_and_resets_derived_state() {
    let _guard = DB_GUARD.lock().await;
    let Some(db) = connect().await else { return };

    let library = db
        .libraries()
        .create(CreateLibrary {
            name: format!("it-{}", Uuid::new_v4()),
            library_type: LibraryType::Movies,
            folders: vec!["/tmp/curator-it".into()],
            watch_enabled: false,
            auto_scan: false,
            generate_thumbnails: false,
            generate_previews: false,
            normalize_audio: false,
            group_by_season: false,
        })
        .await
        .unwrap();

    let items = db.media_items();
    let input = movie_input(library.id, "/tmp/curator-it/Film (2001).mkv");
    let created = items.upsert(input.clone()).await.unwrap();

    items.update_fingerprint(created.id, "FPDATA").await.unwrap();
    items.set_has_thumbnail(created.id, true).await.unwrap();
    items.set_has_preview(created.id, true).await.unwrap();

    // The round-tripped mtime still matches the value handed to upsert
    let stored = items
        .get_by_path(library.id, &input.file_path)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.matches_disk(input.size_bytes as u64, input.file_modified_at));

    let mut changed = input.clone();
    changed.size_bytes = 200;
    changed.file_modified_at = Some(Utc::now());
    let updated = items.upsert(changed).await.unwrap();

    assert_eq!(updated.id, created.id, "identity survives the update");
    assert!(updated.fingerprint.is_none(), "old content's hash cleared");
    assert!(!updated.has_thumbnail, "stale thumbnail flag cleared");
    assert!(!updated.has_preview, "stale preview flag cleared");

    db.libraries().delete(library.id).await.unwrap();
}

// ============================================================================
// Dispatch
// ============================================================================

struct NoopTask;

#[async_trait]
impl TaskHandler for NoopTask {
    fn task_type(&self) -> &'static str {
        "noop-it"
    }

    fn queue(&self) -> &'static str {
        "metadata"
    }

    async fn run(
        &self,
        _queue: &TaskQueue,
        _payload: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<()> {
        Ok(())
    }
}

struct FailingTask;

#[async_trait]
impl TaskHandler for FailingTask {
    fn task_type(&self) -> &'static str {
        "failing-it"
    }

    fn queue(&self) -> &'static str {
        "artwork"
    }

    async fn run(
        &self,
        _queue: &TaskQueue,
        _payload: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<()> {
        anyhow::bail!("deliberate failure")
    }
}

/// Parks until its token cancels, holding its queue's only permit
struct ParkingTask;

#[async_trait]
impl TaskHandler for ParkingTask {
    fn task_type(&self) -> &'static str {
        "parking-it"
    }

    fn queue(&self) -> &'static str {
        "fingerprint"
    }

    async fn run(
        &self,
        _queue: &TaskQueue,
        _payload: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<()> {
        cancel.cancelled().await;
        Ok(())
    }
}

#[tokio::test]
async fn dispatch_emits_completion_and_failure_events() {
    let _guard = DB_GUARD.lock().await;
    let Some(db) = connect().await else { return };

    let notifier = Notifier::new();
    let mut events = notifier.subscribe();

    let queue = Arc::new(TaskQueue::new(db.clone(), notifier));
    queue.register_handler(Arc::new(NoopTask));
    queue.register_handler(Arc::new(FailingTask));
    queue.run();

    let ok_key = format!("noop:it-{}", Uuid::new_v4());
    let fail_key = format!("fail:it-{}", Uuid::new_v4());
    let ok_task = queue
        .enqueue_unique("noop-it", json!({}), &ok_key, "metadata")
        .await
        .unwrap()
        .unwrap();
    let fail_task = queue
        .enqueue_unique("failing-it", json!({}), &fail_key, "artwork")
        .await
        .unwrap()
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut completed = false;
    let mut failed = false;
    while !(completed && failed) {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("both events within the deadline")
            .expect("event channel open");
        match event {
            Event::TaskCompleted { task_id, .. } if task_id == ok_task.id => completed = true,
            Event::TaskFailed { task_id, error, .. } if task_id == fail_task.id => {
                assert!(error.contains("deliberate failure"));
                failed = true;
            }
            _ => {}
        }
    }

    queue.shutdown();
    tokio::time::sleep(Duration::from_millis(700)).await;
    db.tasks().delete_terminal_by_key(&ok_key).await.unwrap();
    db.tasks().delete_terminal_by_key(&fail_key).await.unwrap();
}

#[tokio::test]
async fn shutdown_wins_while_permits_are_exhausted() {
    let _guard = DB_GUARD.lock().await;
    let Some(db) = connect().await else { return };

    let queue = Arc::new(TaskQueue::new(db.clone(), Notifier::new()));
    queue.register_handler(Arc::new(ParkingTask));
    queue.run();

    let key1 = format!("park:it-{}", Uuid::new_v4());
    let key2 = format!("park:it-{}", Uuid::new_v4());

    let first = queue
        .enqueue_unique("parking-it", json!({}), &key1, "fingerprint")
        .await
        .unwrap()
        .unwrap();

    // Wait for the first task to occupy the queue's single permit
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let record = db.tasks().get_by_id(first.id).await.unwrap().unwrap();
        if record.status() == TaskStatus::Running {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "first task never claimed"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let second = queue
        .enqueue_unique("parking-it", json!({}), &key2, "fingerprint")
        .await
        .unwrap()
        .unwrap();

    // Shutdown releases the parked task; the freed permit must not let
    // the dispatcher claim the second one
    queue.shutdown();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let record = db.tasks().get_by_id(second.id).await.unwrap().unwrap();
    assert_eq!(
        record.status(),
        TaskStatus::Pending,
        "task claimed after shutdown"
    );

    db.tasks().mark_cancelled(second.id).await.unwrap();
    db.tasks().delete_terminal_by_key(&key1).await.unwrap();
    db.tasks().delete_terminal_by_key(&key2).await.unwrap();
}
