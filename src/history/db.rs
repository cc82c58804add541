//! Database-backed history for channels mode.
//!
//! Replay delegates to the message repository: newest-first fetch bounded by
//! `limit`, reversed to chronological order. Deleted messages never come
//! back because every replay is a fresh query.

use super::{HistoryError, HistoryStore};
use crate::db::{Database, StoredMessage};
use crate::proto::ChatMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

pub struct DbHistory {
    db: Database,
}

impl DbHistory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Convert a stored row into the wire shape.
pub fn to_chat_message(stored: &StoredMessage) -> ChatMessage {
    // Stored signatures are JSON text; a row that predates the current
    // client or got truncated deserializes to nothing rather than failing
    // the whole replay.
    let signature = stored
        .signature
        .as_deref()
        .and_then(|text| serde_json::from_str(text).ok());

    let timestamp = DateTime::<Utc>::from_timestamp(stored.created_at, 0)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

    ChatMessage {
        id: stored.id.to_string(),
        sender: stored.sender_name.clone(),
        sender_avatar: stored.sender_avatar.clone(),
        message: stored.content.clone(),
        signature,
        commitment: stored.sender_commitment.clone(),
        timestamp,
    }
}

#[async_trait]
impl HistoryStore for DbHistory {
    /// Nothing left to do: in channels mode the session persists each
    /// message through `MessageRepository::insert` at receipt time, which is
    /// also what assigns its id and timestamp. The row is already durable by
    /// the time the session appends.
    async fn append(&self, _scope: &str, _msg: ChatMessage) -> Result<(), HistoryError> {
        Ok(())
    }

    async fn recent(&self, scope: &str, limit: usize) -> Result<Vec<ChatMessage>, HistoryError> {
        let Ok(channel_id) = scope.parse::<i64>() else {
            warn!(scope = %scope, "non-numeric scope in channels mode");
            return Ok(Vec::new());
        };

        let mut rows = self.db.messages().recent(channel_id, limit).await?;
        rows.reverse();
        Ok(rows.iter().map(to_chat_message).collect())
    }

    async fn len(&self) -> usize {
        self.db.messages().count().await.unwrap_or(0) as usize
    }
}
