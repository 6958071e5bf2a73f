//! Database connection and repositories
//!
//! Each table gets a repository struct constructed from the shared pool.
//! Repositories return `anyhow::Result`; the pool itself is cheap to clone.

pub mod collections;
pub mod libraries;
pub mod media_items;
pub mod schema;
pub mod sister_groups;
pub mod tasks;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use collections::{AlbumRecord, ArtistRecord, CollectionRepository, SeasonRecord, ShowRecord};
pub use libraries::{CreateLibrary, LibraryRecord, LibraryRepository, LibraryType};
pub use media_items::{DuplicateStatus, MediaItemRecord, MediaItemRepository, UpsertMediaItem};
pub use sister_groups::{SisterGroupRecord, SisterGroupRepository, SisterMember};
pub use tasks::{TaskRecord, TaskRepository, TaskStatus};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10)
    }

    /// Create a new database connection pool
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(Self::get_max_connections())
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Ensure all tables exist
    pub async fn migrate(&self) -> Result<()> {
        schema::ensure_schema(&self.pool).await
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn libraries(&self) -> LibraryRepository {
        LibraryRepository::new(self.pool.clone())
    }

    pub fn media_items(&self) -> MediaItemRepository {
        MediaItemRepository::new(self.pool.clone())
    }

    pub fn collections(&self) -> CollectionRepository {
        CollectionRepository::new(self.pool.clone())
    }

    pub fn sister_groups(&self) -> SisterGroupRepository {
        SisterGroupRepository::new(self.pool.clone())
    }

    pub fn tasks(&self) -> TaskRepository {
        TaskRepository::new(self.pool.clone())
    }
}
