//! Periodic scheduling
//!
//! One cron job: hourly scans for libraries with auto-scan enabled. The
//! unique-key rule makes the hourly enqueue harmless when a scan for the
//! library is already pending or running.

use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::jobs::{LibraryPayload, TaskQueue};

pub async fn start_scheduler(queue: Arc<TaskQueue>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let scan_job = Job::new_async("0 0 * * * *", move |_uuid, _lock| {
        let queue = Arc::clone(&queue);
        Box::pin(async move {
            if let Err(err) = enqueue_auto_scans(&queue).await {
                error!(error = %err, "auto-scan enqueue failed");
            }
        })
    })?;
    scheduler.add(scan_job).await?;

    scheduler.start().await?;
    info!("scheduler started");
    Ok(scheduler)
}

async fn enqueue_auto_scans(queue: &TaskQueue) -> Result<()> {
    let libraries = queue.database().libraries().list_auto_scan().await?;

    for library in libraries {
        let enqueued = queue
            .enqueue_unique(
                "scan",
                serde_json::to_value(LibraryPayload {
                    library_id: library.id,
                })?,
                &format!("scan:{}", library.id),
                "scan",
            )
            .await?;

        if enqueued.is_some() {
            info!(library_id = %library.id, "auto-scan enqueued");
        }
    }

    Ok(())
}
