//! Background task repository
//!
//! Tasks are durable rows; the in-process queue polls for pending work.
//! The unique-key invariant lives here: at most one non-terminal task per
//! key at any time.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal tasks never run again; their rows only linger for history
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRecord {
    pub id: Uuid,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub unique_key: Option<String>,
    pub queue: String,
    pub status: String,
    pub error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn status(&self) -> TaskStatus {
        TaskStatus::parse(&self.status).unwrap_or(TaskStatus::Pending)
    }
}

const COLUMNS: &str =
    "id, task_type, payload, unique_key, queue, status, error, enqueued_at, started_at, finished_at";

pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a pending task. Returns `None` when the active-key index
    /// rejects the row because another live task already holds the key;
    /// inserts without a key always succeed.
    pub async fn insert(
        &self,
        task_type: &str,
        payload: serde_json::Value,
        unique_key: Option<&str>,
        queue: &str,
    ) -> Result<Option<TaskRecord>> {
        let record = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"
            INSERT INTO tasks (id, task_type, payload, unique_key, queue, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            ON CONFLICT (unique_key) WHERE status IN ('pending', 'running') DO NOTHING
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(task_type)
        .bind(payload)
        .bind(unique_key)
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<TaskRecord>> {
        let record = sqlx::query_as::<_, TaskRecord>(&format!(
            "SELECT {COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Find a pending or running task holding the given key
    pub async fn find_active_by_key(&self, key: &str) -> Result<Option<TaskRecord>> {
        let record = sqlx::query_as::<_, TaskRecord>(&format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE unique_key = $1 AND status IN ('pending', 'running') LIMIT 1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Clear lingering terminal records for a key before a re-enqueue
    pub async fn delete_terminal_by_key(&self, key: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM tasks WHERE unique_key = $1 \
             AND status IN ('completed', 'failed', 'cancelled')",
        )
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Claim the oldest pending task on a queue, marking it running.
    /// `FOR UPDATE SKIP LOCKED` keeps concurrent dispatchers from claiming
    /// the same row.
    pub async fn claim_next_pending(&self, queue: &str) -> Result<Option<TaskRecord>> {
        let record = sqlx::query_as::<_, TaskRecord>(&format!(
            r#"
            UPDATE tasks SET status = 'running', started_at = NOW()
            WHERE id = (
                SELECT id FROM tasks
                WHERE queue = $1 AND status = 'pending'
                ORDER BY enqueued_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {COLUMNS}
            "#
        ))
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn mark_completed(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = 'completed', finished_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET status = 'failed', error = $2, finished_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn mark_cancelled(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE tasks SET status = 'cancelled', finished_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Return tasks stranded in `running` by a previous process to the
    /// pending state. Called once at startup, before dispatch begins.
    pub async fn requeue_orphaned(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'pending', started_at = NULL WHERE status = 'running'",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
