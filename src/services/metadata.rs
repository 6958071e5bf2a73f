//! Metadata enrichment
//!
//! A provider trait plus the lock-aware application of a match onto a
//! stored item. TVMaze is the bundled provider (free, no API key); other
//! providers slot in behind the same trait.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::db::{LibraryType, MediaItemRecord};

/// A metadata match for one item. Fields left `None` were not offered by
/// the provider and never overwrite stored values.
#[derive(Debug, Clone, Default)]
pub struct MetadataMatch {
    pub title: Option<String>,
    pub sort_title: Option<String>,
    pub year: Option<i32>,
}

/// Field updates to persist after lock filtering. `None` means keep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub sort_title: Option<String>,
    pub year: Option<i32>,
}

impl MetadataUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.sort_title.is_none() && self.year.is_none()
    }
}

/// Filter a provider match against the item's locked fields. Every
/// automatic mutation path goes through this one predicate check.
pub fn apply_locks(item: &MediaItemRecord, found: &MetadataMatch) -> MetadataUpdate {
    let mut update = MetadataUpdate::default();

    if !item.is_locked("title") {
        update.title = found.title.clone();
        update.sort_title = found.sort_title.clone();
    }
    if !item.is_locked("year") {
        update.year = found.year;
    }

    update
}

#[async_trait]
pub trait MetadataLookup: Send + Sync {
    /// Look up a match by parsed title and year. `Ok(None)` means no
    /// confident match; only hard transport failures are errors.
    async fn lookup(
        &self,
        title: &str,
        year: Option<i32>,
        library_type: LibraryType,
    ) -> Result<Option<MetadataMatch>>;
}

/// Provider that matches nothing. Used when enrichment is disabled.
pub struct NullLookup;

#[async_trait]
impl MetadataLookup for NullLookup {
    async fn lookup(
        &self,
        _title: &str,
        _year: Option<i32>,
        _library_type: LibraryType,
    ) -> Result<Option<MetadataMatch>> {
        Ok(None)
    }
}

#[derive(Deserialize)]
struct TvMazeShow {
    name: String,
    premiered: Option<String>,
}

/// TVMaze lookup for show libraries. Other library types return no match.
pub struct TvMazeLookup {
    client: Client,
    base_url: String,
}

impl TvMazeLookup {
    pub fn new() -> Self {
        Self::with_base_url("https://api.tvmaze.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for TvMazeLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataLookup for TvMazeLookup {
    async fn lookup(
        &self,
        title: &str,
        _year: Option<i32>,
        library_type: LibraryType,
    ) -> Result<Option<MetadataMatch>> {
        if library_type != LibraryType::Shows {
            return Ok(None);
        }

        let url = format!("{}/singlesearch/shows", self.base_url);
        debug!(title, "tvmaze lookup");

        let response = self
            .client
            .get(&url)
            .query(&[("q", title)])
            .send()
            .await
            .context("tvmaze request failed")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let show: TvMazeShow = response
            .error_for_status()
            .context("tvmaze returned an error status")?
            .json()
            .await
            .context("unparseable tvmaze response")?;

        let year = show
            .premiered
            .as_deref()
            .and_then(|date| date.get(..4))
            .and_then(|y| y.parse().ok());

        Ok(Some(MetadataMatch {
            title: Some(show.name),
            sort_title: None,
            year,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::types::Json;
    use uuid::Uuid;

    fn item(locks: Vec<&str>) -> MediaItemRecord {
        MediaItemRecord {
            id: Uuid::new_v4(),
            library_id: Uuid::new_v4(),
            parent_id: None,
            title: "Parsed Title".into(),
            sort_title: None,
            original_title: None,
            year: Some(2001),
            file_path: "/m/x.mkv".into(),
            size_bytes: 1,
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

    fn full_match() -> MetadataMatch {
        MetadataMatch {
            title: Some("Official Title".into()),
            sort_title: Some("Official Title, The".into()),
            year: Some(1999),
        }
    }

    #[test]
    fn unlocked_item_takes_everything() {
        let update = apply_locks(&item(vec![]), &full_match());
        assert_eq!(update.title.as_deref(), Some("Official Title"));
        assert_eq!(update.year, Some(1999));
    }

    #[test]
    fn locked_title_is_kept() {
        let update = apply_locks(&item(vec!["title"]), &full_match());
        assert!(update.title.is_none());
        assert!(update.sort_title.is_none());
        assert_eq!(update.year, Some(1999));
    }

    #[test]
    fn wildcard_blocks_all_updates() {
        let update = apply_locks(&item(vec!["*"]), &full_match());
        assert!(update.is_empty());
    }

    #[tokio::test]
    async fn null_lookup_matches_nothing() {
        let result = NullLookup
            .lookup("Anything", None, LibraryType::Shows)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
