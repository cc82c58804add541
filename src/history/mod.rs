//! Recent-history abstraction.
//!
//! A scope's history is a bounded, chronologically ordered sequence of the
//! most recent messages, replayed to newly admitted connections. Room mode
//! keeps it in memory; channels mode delegates to the database.

use crate::proto::ChatMessage;
use async_trait::async_trait;
use thiserror::Error;

pub mod db;
pub mod memory;

pub use db::DbHistory;
pub use memory::MemoryHistory;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Database(#[from] crate::db::DbError),
}

/// Bounded per-scope message history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append to the tail. Backends bound their storage: the memory backend
    /// evicts from the head past capacity, the db backend bounds reads.
    async fn append(&self, scope: &str, msg: ChatMessage) -> Result<(), HistoryError>;

    /// At most `limit` most recent messages, oldest first. An empty or
    /// unknown scope yields an empty sequence, not an error.
    async fn recent(&self, scope: &str, limit: usize) -> Result<Vec<ChatMessage>, HistoryError>;

    /// Total messages retained (status surface).
    async fn len(&self) -> usize;
}
