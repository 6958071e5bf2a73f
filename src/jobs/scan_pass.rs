//! Scan task body
//!
//! Runs one library scan and, when the walk completes, chains the
//! fingerprint pass. The unique key keeps a burst of watcher-triggered
//! scans from piling up more than one pending fingerprint pass.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::db::Database;
use crate::jobs::{decode_payload, LibraryPayload, TaskHandler, TaskQueue};
use crate::services::scanner::ScannerService;

pub struct ScanTask {
    db: Database,
    scanner: Arc<ScannerService>,
}

impl ScanTask {
    pub fn new(db: Database, scanner: Arc<ScannerService>) -> Self {
        Self { db, scanner }
    }
}

#[async_trait]
impl TaskHandler for ScanTask {
    fn task_type(&self) -> &'static str {
        "scan"
    }

    fn queue(&self) -> &'static str {
        "scan"
    }

    async fn run(
        &self,
        queue: &TaskQueue,
        payload: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<()> {
        let LibraryPayload { library_id } = decode_payload(self.task_type(), payload)?;

        let Some(library) = self.db.libraries().get_by_id(library_id).await? else {
            warn!(library_id = %library_id, "scan requested for unknown library");
            return Ok(());
        };

        let summary = self.scanner.scan_library(&library, &cancel).await?;

        // A cancelled walk is incomplete; chaining enrichment would run
        // against a partial view
        if !summary.cancelled {
            queue
                .enqueue_unique(
                    "fingerprint",
                    serde_json::to_value(LibraryPayload { library_id })?,
                    &format!("phash:{library_id}"),
                    "fingerprint",
                )
                .await?;
        }

        Ok(())
    }
}
