//! Fingerprint task body
//!
//! Two phases: compute missing fingerprints with a bounded worker pool,
//! then run the pairwise duplicate scan. On completion it chains the
//! artwork and metadata passes for the library, gated on the library's
//! feature flags.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::db::Database;
use crate::jobs::worker_pool::run_pool;
use crate::jobs::{decode_payload, LibraryPayload, TaskHandler, TaskQueue};
use crate::services::fingerprint::{DuplicateDetector, Fingerprinter};
use crate::services::notifier::{Event, Notifier};

pub struct FingerprintTask {
    db: Database,
    fingerprinter: Fingerprinter,
    detector: Arc<DuplicateDetector>,
    notifier: Notifier,
    workers: usize,
}

impl FingerprintTask {
    pub fn new(
        db: Database,
        fingerprinter: Fingerprinter,
        detector: Arc<DuplicateDetector>,
        notifier: Notifier,
        workers: usize,
    ) -> Self {
        Self {
            db,
            fingerprinter,
            detector,
            notifier,
            workers,
        }
    }
}

#[async_trait]
impl TaskHandler for FingerprintTask {
    fn task_type(&self) -> &'static str {
        "fingerprint"
    }

    fn queue(&self) -> &'static str {
        "fingerprint"
    }

    async fn run(
        &self,
        queue: &TaskQueue,
        payload: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<()> {
        let LibraryPayload { library_id } = decode_payload(self.task_type(), payload)?;

        let Some(library) = self.db.libraries().get_by_id(library_id).await? else {
            warn!(library_id = %library_id, "fingerprint pass for unknown library");
            return Ok(());
        };

        // Items already fingerprinted are not re-computed
        let missing = self.db.media_items().list_missing_fingerprint(library_id).await?;
        debug!(library_id = %library_id, missing = missing.len(), "fingerprint pass started");

        let db = self.db.clone();
        let fingerprinter = self.fingerprinter.clone();
        let notifier = self.notifier.clone();

        let outcome = run_pool(
            missing,
            self.workers,
            cancel.clone(),
            move |processed, total| {
                notifier.emit(Event::TaskProgress {
                    task_type: "fingerprint".to_string(),
                    library_id,
                    processed,
                    total,
                });
            },
            move |item| {
                let db = db.clone();
                let fingerprinter = fingerprinter.clone();
                async move {
                    let computed = fingerprinter.compute(Path::new(&item.file_path)).await;
                    match computed {
                        Ok(fingerprint) => {
                            if let Err(err) = db
                                .media_items()
                                .update_fingerprint(item.id, &fingerprint.encoded)
                                .await
                            {
                                warn!(item_id = %item.id, error = %err, "fingerprint store failed");
                            }
                        }
                        Err(err) => {
                            warn!(
                                item_id = %item.id,
                                path = %item.file_path,
                                error = %err,
                                "fingerprint failed"
                            );
                        }
                    }
                }
            },
        )
        .await;

        if outcome.cancelled {
            return Ok(());
        }

        let pairs = self.detector.scan_library(library_id).await?;
        self.notifier.emit(Event::DuplicatesFlagged { library_id, pairs });

        let payload = serde_json::to_value(LibraryPayload { library_id })?;

        if library.generate_thumbnails {
            queue
                .enqueue_unique(
                    "thumbnails",
                    payload.clone(),
                    &format!("thumbs:{library_id}"),
                    "artwork",
                )
                .await?;
        }
        if library.generate_previews {
            queue
                .enqueue_unique(
                    "previews",
                    payload.clone(),
                    &format!("previews:{library_id}"),
                    "artwork",
                )
                .await?;
        }
        queue
            .enqueue_unique(
                "metadata",
                payload,
                &format!("metadata:{library_id}"),
                "metadata",
            )
            .await?;

        Ok(())
    }
}
