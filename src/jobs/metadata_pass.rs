//! Metadata enrichment task body
//!
//! Looks up each item against the configured provider and applies the
//! match through the locked-fields filter. Items locked with `*` are not
//! even looked up.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::db::Database;
use crate::jobs::worker_pool::run_pool;
use crate::jobs::{decode_payload, LibraryPayload, TaskHandler, TaskQueue};
use crate::services::metadata::{apply_locks, MetadataLookup};
use crate::services::notifier::{Event, Notifier};

pub struct MetadataTask {
    db: Database,
    lookup: Arc<dyn MetadataLookup>,
    notifier: Notifier,
    workers: usize,
}

impl MetadataTask {
    pub fn new(
        db: Database,
        lookup: Arc<dyn MetadataLookup>,
        notifier: Notifier,
        workers: usize,
    ) -> Self {
        Self {
            db,
            lookup,
            notifier,
            workers,
        }
    }
}

#[async_trait]
impl TaskHandler for MetadataTask {
    fn task_type(&self) -> &'static str {
        "metadata"
    }

    fn queue(&self) -> &'static str {
        "metadata"
    }

    async fn run(
        &self,
        _queue: &TaskQueue,
        payload: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<()> {
        let LibraryPayload { library_id } = decode_payload(self.task_type(), payload)?;

        let Some(library) = self.db.libraries().get_by_id(library_id).await? else {
            warn!(library_id = %library_id, "metadata pass for unknown library");
            return Ok(());
        };
        let library_type = library.library_type();

        let items: Vec<_> = self
            .db
            .media_items()
            .list_by_library(library_id)
            .await?
            .into_iter()
            .filter(|item| !item.is_locked("*"))
            .collect();
        debug!(library_id = %library_id, items = items.len(), "metadata pass started");

        let db = self.db.clone();
        let lookup = Arc::clone(&self.lookup);
        let notifier = self.notifier.clone();

        run_pool(
            items,
            self.workers,
            cancel,
            move |processed, total| {
                notifier.emit(Event::TaskProgress {
                    task_type: "metadata".to_string(),
                    library_id,
                    processed,
                    total,
                });
            },
            move |item| {
                let db = db.clone();
                let lookup = Arc::clone(&lookup);
                async move {
                    let found = match lookup.lookup(&item.title, item.year, library_type).await {
                        Ok(Some(found)) => found,
                        Ok(None) => return,
                        Err(err) => {
                            warn!(item_id = %item.id, error = %err, "metadata lookup failed");
                            return;
                        }
                    };

                    let update = apply_locks(&item, &found);
                    if update.is_empty() {
                        return;
                    }

                    if let Err(err) = db
                        .media_items()
                        .update_metadata(
                            item.id,
                            update.title.as_deref(),
                            update.sort_title.as_deref(),
                            update.year,
                        )
                        .await
                    {
                        warn!(item_id = %item.id, error = %err, "metadata update failed");
                    }
                }
            },
        )
        .await;

        Ok(())
    }
}
