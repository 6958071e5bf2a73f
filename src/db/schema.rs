//! Schema bootstrap
//!
//! Creates the tables the core needs on startup. Statements are idempotent;
//! column renames and type changes are not handled here.

use anyhow::Result;
use sqlx::PgPool;
use tracing::debug;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS libraries (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        library_type TEXT NOT NULL,
        folders JSONB NOT NULL DEFAULT '[]',
        watch_enabled BOOLEAN NOT NULL DEFAULT FALSE,
        auto_scan BOOLEAN NOT NULL DEFAULT TRUE,
        generate_thumbnails BOOLEAN NOT NULL DEFAULT FALSE,
        generate_previews BOOLEAN NOT NULL DEFAULT FALSE,
        normalize_audio BOOLEAN NOT NULL DEFAULT FALSE,
        group_by_season BOOLEAN NOT NULL DEFAULT TRUE,
        last_scanned_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS shows (
        id UUID PRIMARY KEY,
        library_id UUID NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        year INTEGER,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_shows_library_name
        ON shows (library_id, LOWER(name))
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS seasons (
        id UUID PRIMARY KEY,
        show_id UUID NOT NULL REFERENCES shows(id) ON DELETE CASCADE,
        season_number INTEGER NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (show_id, season_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS artists (
        id UUID PRIMARY KEY,
        library_id UUID NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_artists_library_name
        ON artists (library_id, LOWER(name))
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS albums (
        id UUID PRIMARY KEY,
        artist_id UUID NOT NULL REFERENCES artists(id) ON DELETE CASCADE,
        library_id UUID NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        year INTEGER,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_albums_artist_title
        ON albums (artist_id, LOWER(title))
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS media_items (
        id UUID PRIMARY KEY,
        library_id UUID NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
        parent_id UUID,
        title TEXT NOT NULL,
        sort_title TEXT,
        original_title TEXT,
        year INTEGER,
        file_path TEXT NOT NULL,
        size_bytes BIGINT NOT NULL DEFAULT 0,
        file_modified_at TIMESTAMPTZ,
        video_codec TEXT,
        audio_codec TEXT,
        width INTEGER,
        height INTEGER,
        duration_secs DOUBLE PRECISION,
        bitrate BIGINT,
        resolution_hint TEXT,
        source_hint TEXT,
        edition TEXT,
        season_number INTEGER,
        episode_number INTEGER,
        disc_number INTEGER,
        track_number INTEGER,
        part_number INTEGER,
        fingerprint TEXT,
        duplicate_status TEXT NOT NULL DEFAULT 'none',
        locked_fields JSONB NOT NULL DEFAULT '[]',
        has_thumbnail BOOLEAN NOT NULL DEFAULT FALSE,
        has_preview BOOLEAN NOT NULL DEFAULT FALSE,
        added_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (library_id, file_path)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_media_items_library
        ON media_items (library_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sister_groups (
        id UUID PRIMARY KEY,
        library_id UUID NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
        base_title TEXT NOT NULL,
        directory TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sister_group_members (
        group_id UUID NOT NULL REFERENCES sister_groups(id) ON DELETE CASCADE,
        media_item_id UUID NOT NULL REFERENCES media_items(id) ON DELETE CASCADE,
        sort_position INTEGER NOT NULL,
        PRIMARY KEY (group_id, media_item_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id UUID PRIMARY KEY,
        task_type TEXT NOT NULL,
        payload JSONB NOT NULL DEFAULT '{}',
        unique_key TEXT,
        queue TEXT NOT NULL DEFAULT 'default',
        status TEXT NOT NULL DEFAULT 'pending',
        error TEXT,
        enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        started_at TIMESTAMPTZ,
        finished_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_tasks_queue_status
        ON tasks (queue, status, enqueued_at)
    "#,
    // Backstop for the at-most-one-live-task-per-key rule when two
    // processes enqueue the same key concurrently
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_unique_key_active
        ON tasks (unique_key)
        WHERE status IN ('pending', 'running')
    "#,
];

/// Run all schema statements against the pool
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for stmt in STATEMENTS {
        sqlx::query(stmt).execute(pool).await?;
    }
    debug!("Schema check complete");
    Ok(())
}
