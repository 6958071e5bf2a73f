//! Thumbnail and preview task bodies
//!
//! Both are ffmpeg-bound, so their pools stay small. Generation failures
//! are per-item: logged, counted, and retried on the next pass because
//! the has_thumbnail/has_preview flag stays false.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::db::Database;
use crate::jobs::worker_pool::run_pool;
use crate::jobs::{decode_payload, LibraryPayload, TaskHandler, TaskQueue};
use crate::services::media_tools::MediaTools;
use crate::services::notifier::{Event, Notifier};

pub struct ThumbnailTask {
    db: Database,
    tools: Arc<MediaTools>,
    notifier: Notifier,
    workers: usize,
}

impl ThumbnailTask {
    pub fn new(db: Database, tools: Arc<MediaTools>, notifier: Notifier, workers: usize) -> Self {
        Self {
            db,
            tools,
            notifier,
            workers,
        }
    }
}

#[async_trait]
impl TaskHandler for ThumbnailTask {
    fn task_type(&self) -> &'static str {
        "thumbnails"
    }

    fn queue(&self) -> &'static str {
        "artwork"
    }

    async fn run(
        &self,
        _queue: &TaskQueue,
        payload: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<()> {
        let LibraryPayload { library_id } = decode_payload(self.task_type(), payload)?;

        let missing = self.db.media_items().list_missing_thumbnail(library_id).await?;
        debug!(library_id = %library_id, missing = missing.len(), "thumbnail pass started");

        let db = self.db.clone();
        let tools = Arc::clone(&self.tools);
        let notifier = self.notifier.clone();

        run_pool(
            missing,
            self.workers,
            cancel,
            move |processed, total| {
                notifier.emit(Event::TaskProgress {
                    task_type: "thumbnails".to_string(),
                    library_id,
                    processed,
                    total,
                });
            },
            move |item| {
                let db = db.clone();
                let tools = Arc::clone(&tools);
                async move {
                    let generated = tools
                        .generate_thumbnail(item.id, Path::new(&item.file_path), item.duration_secs)
                        .await;
                    match generated {
                        Ok(_) => {
                            if let Err(err) = db.media_items().set_has_thumbnail(item.id, true).await {
                                warn!(item_id = %item.id, error = %err, "thumbnail flag update failed");
                            }
                        }
                        Err(err) => {
                            warn!(item_id = %item.id, error = %err, "thumbnail generation failed");
                        }
                    }
                }
            },
        )
        .await;

        Ok(())
    }
}

pub struct PreviewTask {
    db: Database,
    tools: Arc<MediaTools>,
    notifier: Notifier,
    workers: usize,
}

impl PreviewTask {
    pub fn new(db: Database, tools: Arc<MediaTools>, notifier: Notifier, workers: usize) -> Self {
        Self {
            db,
            tools,
            notifier,
            workers,
        }
    }
}

#[async_trait]
impl TaskHandler for PreviewTask {
    fn task_type(&self) -> &'static str {
        "previews"
    }

    fn queue(&self) -> &'static str {
        "artwork"
    }

    async fn run(
        &self,
        _queue: &TaskQueue,
        payload: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<()> {
        let LibraryPayload { library_id } = decode_payload(self.task_type(), payload)?;

        let missing = self.db.media_items().list_missing_preview(library_id).await?;
        debug!(library_id = %library_id, missing = missing.len(), "preview pass started");

        let db = self.db.clone();
        let tools = Arc::clone(&self.tools);
        let notifier = self.notifier.clone();

        run_pool(
            missing,
            self.workers,
            cancel,
            move |processed, total| {
                notifier.emit(Event::TaskProgress {
                    task_type: "previews".to_string(),
                    library_id,
                    processed,
                    total,
                });
            },
            move |item| {
                let db = db.clone();
                let tools = Arc::clone(&tools);
                async move {
                    let generated = tools
                        .generate_preview(item.id, Path::new(&item.file_path), item.duration_secs)
                        .await;
                    match generated {
                        Ok(_) => {
                            if let Err(err) = db.media_items().set_has_preview(item.id, true).await {
                                warn!(item_id = %item.id, error = %err, "preview flag update failed");
                            }
                        }
                        Err(err) => {
                            warn!(item_id = %item.id, error = %err, "preview generation failed");
                        }
                    }
                }
            },
        )
        .await;

        Ok(())
    }
}
