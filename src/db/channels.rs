//! Channel repository.

use super::DbError;
use sqlx::SqlitePool;

/// A stored channel.
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: i64,
}

type ChannelRow = (i64, String, Option<String>, Option<i64>, i64);

fn from_row(row: ChannelRow) -> ChannelRecord {
    ChannelRecord {
        id: row.0,
        name: row.1,
        description: row.2,
        created_by: row.3,
        created_at: row.4,
    }
}

/// Repository for channel operations.
pub struct ChannelRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChannelRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a channel. Name uniqueness is enforced by the schema.
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        created_by: Option<i64>,
    ) -> Result<ChannelRecord, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO channels (name, description, created_by, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(created_by)
        .bind(now)
        .execute(self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.find_by_id(id)
            .await?
            .ok_or(DbError::ChannelNotFound(id))
    }

    /// Look up a channel by id. Inactive channels resolve as absent.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<ChannelRecord>, DbError> {
        let row = sqlx::query_as::<_, ChannelRow>(
            r#"
            SELECT id, name, description, created_by, created_at
            FROM channels
            WHERE id = ? AND is_active = 1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(from_row))
    }

    /// Whether the channel exists and is active.
    pub async fn exists(&self, id: i64) -> Result<bool, DbError> {
        Ok(self.find_by_id(id).await?.is_some())
    }
}
