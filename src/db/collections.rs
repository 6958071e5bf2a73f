//! Collection hierarchy repositories: shows/seasons and artists/albums
//!
//! Uniqueness is case-insensitive on name within the owning scope. The
//! unique indexes are the last line of defense; concurrent creation races
//! are collapsed by the hierarchy resolver before they reach the database.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ShowRecord {
    pub id: Uuid,
    pub library_id: Uuid,
    pub name: String,
    pub year: Option<i32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SeasonRecord {
    pub id: Uuid,
    pub show_id: Uuid,
    pub season_number: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArtistRecord {
    pub id: Uuid,
    pub library_id: Uuid,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlbumRecord {
    pub id: Uuid,
    pub artist_id: Uuid,
    pub library_id: Uuid,
    pub title: String,
    pub year: Option<i32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub struct CollectionRepository {
    pool: PgPool,
}

impl CollectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_show(&self, library_id: Uuid, name: &str) -> Result<Option<ShowRecord>> {
        let record = sqlx::query_as::<_, ShowRecord>(
            "SELECT id, library_id, name, year, created_at FROM shows \
             WHERE library_id = $1 AND LOWER(name) = LOWER($2)",
        )
        .bind(library_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn create_show(
        &self,
        library_id: Uuid,
        name: &str,
        year: Option<i32>,
    ) -> Result<ShowRecord> {
        let record = sqlx::query_as::<_, ShowRecord>(
            r#"
            INSERT INTO shows (id, library_id, name, year)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (library_id, LOWER(name)) DO UPDATE SET name = shows.name
            RETURNING id, library_id, name, year, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(library_id)
        .bind(name)
        .bind(year)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn find_season(
        &self,
        show_id: Uuid,
        season_number: i32,
    ) -> Result<Option<SeasonRecord>> {
        let record = sqlx::query_as::<_, SeasonRecord>(
            "SELECT id, show_id, season_number, created_at FROM seasons \
             WHERE show_id = $1 AND season_number = $2",
        )
        .bind(show_id)
        .bind(season_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn create_season(&self, show_id: Uuid, season_number: i32) -> Result<SeasonRecord> {
        let record = sqlx::query_as::<_, SeasonRecord>(
            r#"
            INSERT INTO seasons (id, show_id, season_number)
            VALUES ($1, $2, $3)
            ON CONFLICT (show_id, season_number) DO UPDATE SET show_id = seasons.show_id
            RETURNING id, show_id, season_number, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(show_id)
        .bind(season_number)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn find_artist(&self, library_id: Uuid, name: &str) -> Result<Option<ArtistRecord>> {
        let record = sqlx::query_as::<_, ArtistRecord>(
            "SELECT id, library_id, name, created_at FROM artists \
             WHERE library_id = $1 AND LOWER(name) = LOWER($2)",
        )
        .bind(library_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn create_artist(&self, library_id: Uuid, name: &str) -> Result<ArtistRecord> {
        let record = sqlx::query_as::<_, ArtistRecord>(
            r#"
            INSERT INTO artists (id, library_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (library_id, LOWER(name)) DO UPDATE SET name = artists.name
            RETURNING id, library_id, name, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(library_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn find_album(&self, artist_id: Uuid, title: &str) -> Result<Option<AlbumRecord>> {
        let record = sqlx::query_as::<_, AlbumRecord>(
            "SELECT id, artist_id, library_id, title, year, created_at FROM albums \
             WHERE artist_id = $1 AND LOWER(title) = LOWER($2)",
        )
        .bind(artist_id)
        .bind(title)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn create_album(
        &self,
        artist_id: Uuid,
        library_id: Uuid,
        title: &str,
        year: Option<i32>,
    ) -> Result<AlbumRecord> {
        let record = sqlx::query_as::<_, AlbumRecord>(
            r#"
            INSERT INTO albums (id, artist_id, library_id, title, year)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (artist_id, LOWER(title)) DO UPDATE SET title = albums.title
            RETURNING id, artist_id, library_id, title, year, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(artist_id)
        .bind(library_id)
        .bind(title)
        .bind(year)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }
}
