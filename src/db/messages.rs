//! Message repository: the persisted history backend.
//!
//! Signatures are stored as the JSON text the client sent, never parsed.

use super::DbError;
use sqlx::SqlitePool;

/// A stored message joined with its sender's identity, as needed for replay.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: i64,
    pub channel_id: i64,
    pub user_id: i64,
    pub content: String,
    /// Opaque signature JSON text, exactly as received.
    pub signature: Option<String>,
    pub created_at: i64,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub sender_commitment: Option<String>,
}

type StoredRow = (
    i64,
    i64,
    i64,
    String,
    Option<String>,
    i64,
    String,
    Option<String>,
    Option<String>,
);

fn from_row(row: StoredRow) -> StoredMessage {
    StoredMessage {
        id: row.0,
        channel_id: row.1,
        user_id: row.2,
        content: row.3,
        signature: row.4,
        created_at: row.5,
        sender_name: row.6,
        sender_avatar: row.7,
        sender_commitment: row.8,
    }
}

const SELECT_JOINED: &str = r#"
    SELECT m.id, m.channel_id, m.user_id, m.content, m.signature, m.created_at,
           u.name, u.avatar, u.commitment
    FROM messages m
    JOIN users u ON u.id = m.user_id
"#;

/// Repository for message operations.
pub struct MessageRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MessageRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a message and return the stored row (with server-assigned id
    /// and timestamp).
    pub async fn insert(
        &self,
        channel_id: i64,
        user_id: i64,
        content: &str,
        signature: Option<&str>,
    ) -> Result<StoredMessage, DbError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO messages (channel_id, user_id, content, signature, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(channel_id)
        .bind(user_id)
        .bind(content)
        .bind(signature)
        .bind(now)
        .execute(self.pool)
        .await?;

        let id = result.last_insert_rowid();
        let row = sqlx::query_as::<_, StoredRow>(&format!("{SELECT_JOINED} WHERE m.id = ?"))
            .bind(id)
            .fetch_one(self.pool)
            .await?;
        Ok(from_row(row))
    }

    /// The `limit` newest messages of a channel, newest first. Deleted
    /// messages are never returned; the caller reverses for chronological
    /// replay.
    pub async fn recent(
        &self,
        channel_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, DbError> {
        let rows = sqlx::query_as::<_, StoredRow>(&format!(
            "{SELECT_JOINED} WHERE m.channel_id = ? AND m.is_deleted = 0 \
             ORDER BY m.created_at DESC, m.id DESC LIMIT ?"
        ))
        .bind(channel_id)
        .bind(limit as i64)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    /// Total undeleted messages (status surface).
    pub async fn count(&self) -> Result<i64, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE is_deleted = 0")
                .fetch_one(self.pool)
                .await?;
        Ok(count)
    }
}
