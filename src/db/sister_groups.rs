//! Sister group repository
//!
//! A sister group ties together the parts of one logical work (multi-disc
//! movies, split audiobooks). Membership is rebuilt wholesale after each
//! scan; there is no incremental mutation.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SisterGroupRecord {
    pub id: Uuid,
    pub library_id: Uuid,
    pub base_title: String,
    pub directory: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A member item with its part-number sort position
#[derive(Debug, Clone)]
pub struct SisterMember {
    pub media_item_id: Uuid,
    pub sort_position: i32,
}

/// A group to persist: identity key plus ordered members
#[derive(Debug, Clone)]
pub struct NewSisterGroup {
    pub base_title: String,
    pub directory: String,
    pub members: Vec<SisterMember>,
}

pub struct SisterGroupRepository {
    pool: PgPool,
}

impl SisterGroupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Drop all groups for a library and write the new set in one
    /// transaction. A failed rebuild leaves the previous scan's groups.
    pub async fn replace_for_library(
        &self,
        library_id: Uuid,
        groups: &[NewSisterGroup],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sister_groups WHERE library_id = $1")
            .bind(library_id)
            .execute(&mut *tx)
            .await?;

        for group in groups {
            let group_id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO sister_groups (id, library_id, base_title, directory) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(group_id)
            .bind(library_id)
            .bind(&group.base_title)
            .bind(&group.directory)
            .execute(&mut *tx)
            .await?;

            for member in &group.members {
                sqlx::query(
                    "INSERT INTO sister_group_members (group_id, media_item_id, sort_position) \
                     VALUES ($1, $2, $3)",
                )
                .bind(group_id)
                .bind(member.media_item_id)
                .bind(member.sort_position)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        Ok(groups.len())
    }

    pub async fn list_by_library(&self, library_id: Uuid) -> Result<Vec<SisterGroupRecord>> {
        let records = sqlx::query_as::<_, SisterGroupRecord>(
            "SELECT id, library_id, base_title, directory, created_at \
             FROM sister_groups WHERE library_id = $1 ORDER BY base_title",
        )
        .bind(library_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Members of a group ordered by part number
    pub async fn list_members(&self, group_id: Uuid) -> Result<Vec<SisterMember>> {
        let rows = sqlx::query_as::<_, (Uuid, i32)>(
            "SELECT media_item_id, sort_position FROM sister_group_members \
             WHERE group_id = $1 ORDER BY sort_position",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(media_item_id, sort_position)| SisterMember {
                media_item_id,
                sort_position,
            })
            .collect())
    }
}
