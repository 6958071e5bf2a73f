//! Service entry point: wires the database, task queue, watcher, and
//! scheduler together and runs until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use curator::config::Config;
use curator::db::Database;
use curator::jobs::{
    artwork_pass::{PreviewTask, ThumbnailTask},
    fingerprint_pass::FingerprintTask,
    metadata_pass::MetadataTask,
    scan_pass::ScanTask,
    schedule, LibraryPayload, TaskQueue,
};
use curator::services::{
    DuplicateDetector, Fingerprinter, LibraryWatcher, MediaTools, MetadataLookup, Notifier,
    NullLookup, Prober, ScannerService, TvMazeLookup,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "curator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting curator");

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;
    info!("database ready");

    // Tasks stranded in `running` by a previous process go back to pending
    let requeued = db.tasks().requeue_orphaned().await?;
    if requeued > 0 {
        info!(requeued, "orphaned tasks requeued");
    }

    let notifier = Notifier::new();
    let prober = Prober::new(&config.ffprobe_path);
    if !prober.is_available().await {
        warn!(path = %config.ffprobe_path, "ffprobe not available, probing will fail");
    }
    let fingerprinter = Fingerprinter::new(&config.fpcalc_path);
    let tools = Arc::new(MediaTools::new(
        &config.ffmpeg_path,
        &config.artwork_path,
        Duration::from_secs(config.encode_timeout_secs),
    ));
    let detector = Arc::new(DuplicateDetector::new(
        db.clone(),
        config.duplicate_threshold,
        config.duration_tolerance,
    ));
    let scanner = Arc::new(ScannerService::new(
        db.clone(),
        prober.clone(),
        notifier.clone(),
    ));
    let lookup: Arc<dyn MetadataLookup> = if config.metadata_enabled {
        Arc::new(TvMazeLookup::new())
    } else {
        Arc::new(NullLookup)
    };

    let queue = Arc::new(TaskQueue::new(db.clone(), notifier.clone()));
    queue.register_handler(Arc::new(ScanTask::new(db.clone(), Arc::clone(&scanner))));
    queue.register_handler(Arc::new(FingerprintTask::new(
        db.clone(),
        fingerprinter,
        detector,
        notifier.clone(),
        config.fingerprint_workers,
    )));
    queue.register_handler(Arc::new(ThumbnailTask::new(
        db.clone(),
        Arc::clone(&tools),
        notifier.clone(),
        config.artwork_workers,
    )));
    queue.register_handler(Arc::new(PreviewTask::new(
        db.clone(),
        Arc::clone(&tools),
        notifier.clone(),
        config.artwork_workers,
    )));
    queue.register_handler(Arc::new(MetadataTask::new(
        db.clone(),
        lookup,
        notifier.clone(),
        config.metadata_workers,
    )));
    queue.run();

    // Settled watcher events become scan tasks; the unique key collapses
    // bursts into one pending scan per library
    let mut watcher = LibraryWatcher::new(db.clone(), Duration::from_millis(config.watch_debounce_ms));
    let mut watch_events = watcher.start()?;
    watcher.refresh().await?;

    {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            while let Some(event) = watch_events.recv().await {
                let payload = match serde_json::to_value(LibraryPayload {
                    library_id: event.library_id,
                }) {
                    Ok(payload) => payload,
                    Err(err) => {
                        error!(error = %err, "watch event payload");
                        continue;
                    }
                };

                let key = format!("scan:{}", event.library_id);
                match queue.enqueue_unique("scan", payload, &key, "scan").await {
                    Ok(Some(task)) => {
                        info!(library_id = %event.library_id, task_id = %task.id, "scan enqueued from watcher");
                    }
                    Ok(None) => {}
                    Err(err) => {
                        error!(library_id = %event.library_id, error = %err, "watcher enqueue failed");
                    }
                }
            }
        });
    }

    let mut scheduler = schedule::start_scheduler(Arc::clone(&queue)).await?;

    info!("curator running");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    queue.shutdown();
    scheduler.shutdown().await?;

    Ok(())
}
