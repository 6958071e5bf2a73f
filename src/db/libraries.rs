//! Library database repository

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

/// Content type of a library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryType {
    Movies,
    Shows,
    Music,
    Audiobooks,
}

impl LibraryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryType::Movies => "movies",
            LibraryType::Shows => "shows",
            LibraryType::Music => "music",
            LibraryType::Audiobooks => "audiobooks",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "movies" => Some(LibraryType::Movies),
            "shows" => Some(LibraryType::Shows),
            "music" => Some(LibraryType::Music),
            "audiobooks" => Some(LibraryType::Audiobooks),
            _ => None,
        }
    }

    /// Movie-like types carry multi-part (disc/part) filename suffixes
    pub fn is_movie_like(&self) -> bool {
        matches!(self, LibraryType::Movies | LibraryType::Audiobooks)
    }
}

/// Library record from database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LibraryRecord {
    pub id: Uuid,
    pub name: String,
    pub library_type: String,
    pub folders: Json<Vec<String>>,
    pub watch_enabled: bool,
    pub auto_scan: bool,
    pub generate_thumbnails: bool,
    pub generate_previews: bool,
    pub normalize_audio: bool,
    pub group_by_season: bool,
    pub last_scanned_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl LibraryRecord {
    pub fn library_type(&self) -> LibraryType {
        LibraryType::parse(&self.library_type).unwrap_or(LibraryType::Movies)
    }
}

/// Input for creating a library
#[derive(Debug)]
pub struct CreateLibrary {
    pub name: String,
    pub library_type: LibraryType,
    pub folders: Vec<String>,
    pub watch_enabled: bool,
    pub auto_scan: bool,
    pub generate_thumbnails: bool,
    pub generate_previews: bool,
    pub normalize_audio: bool,
    pub group_by_season: bool,
}

const COLUMNS: &str = "id, name, library_type, folders, watch_enabled, auto_scan, \
                       generate_thumbnails, generate_previews, normalize_audio, \
                       group_by_season, last_scanned_at, created_at, updated_at";

pub struct LibraryRepository {
    pool: PgPool,
}

impl LibraryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get all libraries
    pub async fn list_all(&self) -> Result<Vec<LibraryRecord>> {
        let records = sqlx::query_as::<_, LibraryRecord>(&format!(
            "SELECT {COLUMNS} FROM libraries ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Get libraries with filesystem watching enabled
    pub async fn list_watched(&self) -> Result<Vec<LibraryRecord>> {
        let records = sqlx::query_as::<_, LibraryRecord>(&format!(
            "SELECT {COLUMNS} FROM libraries WHERE watch_enabled = TRUE ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Get libraries with periodic scanning enabled
    pub async fn list_auto_scan(&self) -> Result<Vec<LibraryRecord>> {
        let records = sqlx::query_as::<_, LibraryRecord>(&format!(
            "SELECT {COLUMNS} FROM libraries WHERE auto_scan = TRUE ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Get a library by ID
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<LibraryRecord>> {
        let record = sqlx::query_as::<_, LibraryRecord>(&format!(
            "SELECT {COLUMNS} FROM libraries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Create a new library
    pub async fn create(&self, input: CreateLibrary) -> Result<LibraryRecord> {
        let record = sqlx::query_as::<_, LibraryRecord>(&format!(
            r#"
            INSERT INTO libraries (
                id, name, library_type, folders, watch_enabled, auto_scan,
                generate_thumbnails, generate_previews, normalize_audio, group_by_season
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(input.library_type.as_str())
        .bind(Json(&input.folders))
        .bind(input.watch_enabled)
        .bind(input.auto_scan)
        .bind(input.generate_thumbnails)
        .bind(input.generate_previews)
        .bind(input.normalize_audio)
        .bind(input.group_by_season)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Delete a library; its items, collections, and sister groups cascade
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM libraries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Record scan completion time
    pub async fn update_last_scanned(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE libraries SET last_scanned_at = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
