//! Media item database repository
//!
//! A media item is one file on disk plus derived state. (library_id,
//! file_path) is the natural key; size and mtime drive change detection.

use anyhow::Result;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

/// Human-facing duplicate state of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateStatus {
    None,
    Potential,
    Addressed,
}

impl DuplicateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateStatus::None => "none",
            DuplicateStatus::Potential => "potential",
            DuplicateStatus::Addressed => "addressed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "potential" => DuplicateStatus::Potential,
            "addressed" => DuplicateStatus::Addressed,
            _ => DuplicateStatus::None,
        }
    }
}

/// Media item record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MediaItemRecord {
    pub id: Uuid,
    pub library_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub sort_title: Option<String>,
    pub original_title: Option<String>,
    pub year: Option<i32>,
    pub file_path: String,
    pub size_bytes: i64,
    pub file_modified_at: Option<DateTime<Utc>>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_secs: Option<f64>,
    pub bitrate: Option<i64>,
    pub resolution_hint: Option<String>,
    pub source_hint: Option<String>,
    pub edition: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
    pub disc_number: Option<i32>,
    pub track_number: Option<i32>,
    pub part_number: Option<i32>,
    pub fingerprint: Option<String>,
    pub duplicate_status: String,
    pub locked_fields: Json<Vec<String>>,
    pub has_thumbnail: bool,
    pub has_preview: bool,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaItemRecord {
    pub fn duplicate_status(&self) -> DuplicateStatus {
        DuplicateStatus::parse(&self.duplicate_status)
    }

    /// Whether a named field is exempt from automatic overwrite.
    /// A `*` entry locks the entire item.
    pub fn is_locked(&self, field: &str) -> bool {
        self.locked_fields
            .iter()
            .any(|f| f == "*" || f == field)
    }

    /// Change-detection check against on-disk size and mtime.
    /// Postgres timestamptz keeps microseconds while filesystem mtimes
    /// carry nanoseconds, so both sides compare at microsecond precision.
    pub fn matches_disk(&self, size: u64, modified: Option<DateTime<Utc>>) -> bool {
        self.size_bytes == size as i64
            && self.file_modified_at.map(truncate_mtime) == modified.map(truncate_mtime)
    }
}

/// Truncate a filesystem mtime to what timestamptz can store, so the
/// round-tripped value compares equal to the on-disk one
pub fn truncate_mtime(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Input for upserting a media item by (library, path)
#[derive(Debug, Clone)]
pub struct UpsertMediaItem {
    pub library_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub sort_title: Option<String>,
    pub original_title: Option<String>,
    pub year: Option<i32>,
    pub file_path: String,
    pub size_bytes: i64,
    pub file_modified_at: Option<DateTime<Utc>>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_secs: Option<f64>,
    pub bitrate: Option<i64>,
    pub resolution_hint: Option<String>,
    pub source_hint: Option<String>,
    pub edition: Option<String>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
    pub disc_number: Option<i32>,
    pub track_number: Option<i32>,
    pub part_number: Option<i32>,
}

const COLUMNS: &str = "id, library_id, parent_id, title, sort_title, original_title, year, \
                       file_path, size_bytes, file_modified_at, video_codec, audio_codec, \
                       width, height, duration_secs, bitrate, resolution_hint, source_hint, \
                       edition, season_number, episode_number, disc_number, track_number, \
                       part_number, fingerprint, duplicate_status, locked_fields, \
                       has_thumbnail, has_preview, added_at, updated_at";

pub struct MediaItemRepository {
    pool: PgPool,
}

impl MediaItemRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get an item by its path within a library
    pub async fn get_by_path(
        &self,
        library_id: Uuid,
        path: &str,
    ) -> Result<Option<MediaItemRecord>> {
        let record = sqlx::query_as::<_, MediaItemRecord>(&format!(
            "SELECT {COLUMNS} FROM media_items WHERE library_id = $1 AND file_path = $2"
        ))
        .bind(library_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<MediaItemRecord>> {
        let record = sqlx::query_as::<_, MediaItemRecord>(&format!(
            "SELECT {COLUMNS} FROM media_items WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// All persisted paths for a library, used for removal pruning
    pub async fn list_paths_by_library(&self, library_id: Uuid) -> Result<Vec<String>> {
        let paths = sqlx::query_scalar::<_, String>(
            "SELECT file_path FROM media_items WHERE library_id = $1",
        )
        .bind(library_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(paths)
    }

    /// Delete items whose paths vanished from disk. Returns removed count.
    pub async fn prune_paths(&self, library_id: Uuid, paths: &[String]) -> Result<u64> {
        if paths.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "DELETE FROM media_items WHERE library_id = $1 AND file_path = ANY($2)",
        )
        .bind(library_id)
        .bind(paths)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Insert or update by (library, path). The item id survives updates.
    /// A conflict means the file changed on disk, so derived state
    /// (fingerprint, artwork flags) is cleared for the enrichment passes
    /// to recompute against the new content.
    pub async fn upsert(&self, input: UpsertMediaItem) -> Result<MediaItemRecord> {
        let record = sqlx::query_as::<_, MediaItemRecord>(&format!(
            r#"
            INSERT INTO media_items (
                id, library_id, parent_id, title, sort_title, original_title, year,
                file_path, size_bytes, file_modified_at, video_codec, audio_codec,
                width, height, duration_secs, bitrate, resolution_hint, source_hint,
                edition, season_number, episode_number, disc_number, track_number,
                part_number
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
            ON CONFLICT (library_id, file_path) DO UPDATE SET
                parent_id = EXCLUDED.parent_id,
                title = EXCLUDED.title,
                sort_title = EXCLUDED.sort_title,
                original_title = EXCLUDED.original_title,
                year = EXCLUDED.year,
                size_bytes = EXCLUDED.size_bytes,
                file_modified_at = EXCLUDED.file_modified_at,
                video_codec = EXCLUDED.video_codec,
                audio_codec = EXCLUDED.audio_codec,
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                duration_secs = EXCLUDED.duration_secs,
                bitrate = EXCLUDED.bitrate,
                resolution_hint = EXCLUDED.resolution_hint,
                source_hint = EXCLUDED.source_hint,
                edition = EXCLUDED.edition,
                season_number = EXCLUDED.season_number,
                episode_number = EXCLUDED.episode_number,
                disc_number = EXCLUDED.disc_number,
                track_number = EXCLUDED.track_number,
                part_number = EXCLUDED.part_number,
                fingerprint = NULL,
                has_thumbnail = FALSE,
                has_preview = FALSE,
                updated_at = NOW()
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.library_id)
        .bind(input.parent_id)
        .bind(&input.title)
        .bind(&input.sort_title)
        .bind(&input.original_title)
        .bind(input.year)
        .bind(&input.file_path)
        .bind(input.size_bytes)
        .bind(input.file_modified_at.map(truncate_mtime))
        .bind(&input.video_codec)
        .bind(&input.audio_codec)
        .bind(input.width)
        .bind(input.height)
        .bind(input.duration_secs)
        .bind(input.bitrate)
        .bind(&input.resolution_hint)
        .bind(&input.source_hint)
        .bind(&input.edition)
        .bind(input.season_number)
        .bind(input.episode_number)
        .bind(input.disc_number)
        .bind(input.track_number)
        .bind(input.part_number)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Items without a perceptual fingerprint
    pub async fn list_missing_fingerprint(&self, library_id: Uuid) -> Result<Vec<MediaItemRecord>> {
        let records = sqlx::query_as::<_, MediaItemRecord>(&format!(
            "SELECT {COLUMNS} FROM media_items \
             WHERE library_id = $1 AND fingerprint IS NULL ORDER BY file_path"
        ))
        .bind(library_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Items holding a fingerprint, for the pairwise comparison pass
    pub async fn list_fingerprinted(&self, library_id: Uuid) -> Result<Vec<MediaItemRecord>> {
        let records = sqlx::query_as::<_, MediaItemRecord>(&format!(
            "SELECT {COLUMNS} FROM media_items \
             WHERE library_id = $1 AND fingerprint IS NOT NULL ORDER BY file_path"
        ))
        .bind(library_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn list_missing_thumbnail(&self, library_id: Uuid) -> Result<Vec<MediaItemRecord>> {
        let records = sqlx::query_as::<_, MediaItemRecord>(&format!(
            "SELECT {COLUMNS} FROM media_items \
             WHERE library_id = $1 AND has_thumbnail = FALSE ORDER BY file_path"
        ))
        .bind(library_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn list_missing_preview(&self, library_id: Uuid) -> Result<Vec<MediaItemRecord>> {
        let records = sqlx::query_as::<_, MediaItemRecord>(&format!(
            "SELECT {COLUMNS} FROM media_items \
             WHERE library_id = $1 AND has_preview = FALSE ORDER BY file_path"
        ))
        .bind(library_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// All items for a library (metadata enrichment pass)
    pub async fn list_by_library(&self, library_id: Uuid) -> Result<Vec<MediaItemRecord>> {
        let records = sqlx::query_as::<_, MediaItemRecord>(&format!(
            "SELECT {COLUMNS} FROM media_items WHERE library_id = $1 ORDER BY file_path"
        ))
        .bind(library_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn update_fingerprint(&self, id: Uuid, fingerprint: &str) -> Result<()> {
        sqlx::query(
            "UPDATE media_items SET fingerprint = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_duplicate_status(&self, id: Uuid, status: DuplicateStatus) -> Result<()> {
        sqlx::query(
            "UPDATE media_items SET duplicate_status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_has_thumbnail(&self, id: Uuid, value: bool) -> Result<()> {
        sqlx::query(
            "UPDATE media_items SET has_thumbnail = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_has_preview(&self, id: Uuid, value: bool) -> Result<()> {
        sqlx::query(
            "UPDATE media_items SET has_preview = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Overwrite display metadata from an enrichment match.
    /// Callers are responsible for honoring locked fields; pass `None` for
    /// any field that must not change.
    pub async fn update_metadata(
        &self,
        id: Uuid,
        title: Option<&str>,
        sort_title: Option<&str>,
        year: Option<i32>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE media_items SET
                title = COALESCE($2, title),
                sort_title = COALESCE($3, sort_title),
                year = COALESCE($4, year),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(sort_title)
        .bind(year)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::types::Json;

    fn item_with_locks(locks: Vec<&str>) -> MediaItemRecord {
        MediaItemRecord {
            id: Uuid::new_v4(),
            library_id: Uuid::new_v4(),
            parent_id: None,
            title: "Test".into(),
            sort_title: None,
            original_title: None,
            year: None,
            file_path: "/x/y.mkv".into(),
            size_bytes: 10,
            file_modified_at: None,
            video_codec: None,
            audio_codec: None,
            width: None,
            height: None,
            duration_secs: None,
            bitrate: None,
            resolution_hint: None,
            source_hint: None,
            edition: None,
            season_number: None,
            episode_number: None,
            disc_number: None,
            track_number: None,
            part_number: None,
            fingerprint: None,
            duplicate_status: "none".into(),
            locked_fields: Json(locks.into_iter().map(String::from).collect()),
            has_thumbnail: false,
            has_preview: false,
            added_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn locked_field_lookup() {
        let item = item_with_locks(vec!["title"]);
        assert!(item.is_locked("title"));
        assert!(!item.is_locked("year"));
    }

    #[test]
    fn wildcard_locks_everything() {
        let item = item_with_locks(vec!["*"]);
        assert!(item.is_locked("title"));
        assert!(item.is_locked("year"));
        assert!(item.is_locked("anything"));
    }

    #[test]
    fn disk_match_requires_size_and_mtime() {
        let mut item = item_with_locks(vec![]);
        let now = Utc::now();
        item.size_bytes = 42;
        item.file_modified_at = Some(now);

        assert!(item.matches_disk(42, Some(now)));
        assert!(!item.matches_disk(43, Some(now)));
        assert!(!item.matches_disk(42, None));
    }

    #[test]
    fn disk_match_survives_mtime_precision_loss() {
        use chrono::TimeZone;

        // The stored value lost its sub-microsecond digits in timestamptz;
        // the same instant read back from disk still carries them
        let on_disk = Utc.timestamp_nanos(1_700_000_000_123_456_789);
        let stored = truncate_mtime(on_disk);
        assert_ne!(stored, on_disk);

        let mut item = item_with_locks(vec![]);
        item.size_bytes = 42;
        item.file_modified_at = Some(stored);

        assert!(item.matches_disk(42, Some(on_disk)));
        // A genuinely newer mtime still reads as changed
        let later = on_disk + chrono::Duration::seconds(1);
        assert!(!item.matches_disk(42, Some(later)));
    }
}
