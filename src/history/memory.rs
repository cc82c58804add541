//! In-memory ring-buffer history for room mode.

use super::{HistoryError, HistoryStore};
use crate::proto::ChatMessage;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Fixed-capacity per-scope ring buffer. Oldest messages are evicted first.
pub struct MemoryHistory {
    capacity: usize,
    scopes: DashMap<String, Mutex<VecDeque<ChatMessage>>>,
}

impl MemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            scopes: DashMap::new(),
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, scope: &str, msg: ChatMessage) -> Result<(), HistoryError> {
        // Capacity zero means no retention at all.
        if self.capacity == 0 {
            return Ok(());
        }
        let entry = self
            .scopes
            .entry(scope.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(self.capacity)));
        let mut buffer = entry.lock();
        while buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(msg);
        Ok(())
    }

    async fn recent(&self, scope: &str, limit: usize) -> Result<Vec<ChatMessage>, HistoryError> {
        let Some(entry) = self.scopes.get(scope) else {
            return Ok(Vec::new());
        };
        let buffer = entry.lock();
        let skip = buffer.len().saturating_sub(limit);
        Ok(buffer.iter().skip(skip).cloned().collect())
    }

    async fn len(&self) -> usize {
        self.scopes.iter().map(|entry| entry.value().lock().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::now_rfc3339;
    use serde_json::json;

    fn msg(id: u32) -> ChatMessage {
        ChatMessage {
            id: format!("m{id}"),
            sender: "alice".into(),
            sender_avatar: None,
            message: format!("message {id}"),
            signature: None,
            commitment: None,
            timestamp: now_rfc3339(),
        }
    }

    #[tokio::test]
    async fn empty_scope_yields_empty_sequence() {
        let history = MemoryHistory::new(10);
        assert!(history.recent("lobby", 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn capacity_is_a_hard_bound_oldest_evicted() {
        let history = MemoryHistory::new(3);
        for i in 0..5 {
            history.append("lobby", msg(i)).await.unwrap();
        }
        let recent = history.recent("lobby", 10).await.unwrap();
        assert_eq!(recent.len(), 3);
        let ids: Vec<&str> = recent.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn zero_capacity_retains_nothing() {
        let history = MemoryHistory::new(0);
        for i in 0..5 {
            history.append("lobby", msg(i)).await.unwrap();
        }
        assert_eq!(history.len().await, 0);
        assert!(history.recent("lobby", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_returns_newest_limit_in_chronological_order() {
        let history = MemoryHistory::new(10);
        for i in 0..6 {
            history.append("lobby", msg(i)).await.unwrap();
        }
        let recent = history.recent("lobby", 2).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m4", "m5"]);
    }

    #[tokio::test]
    async fn scopes_are_independent() {
        let history = MemoryHistory::new(10);
        history.append("a", msg(1)).await.unwrap();
        history.append("b", msg(2)).await.unwrap();
        assert_eq!(history.recent("a", 10).await.unwrap().len(), 1);
        assert_eq!(history.recent("b", 10).await.unwrap().len(), 1);
        assert_eq!(history.len().await, 2);
    }

    #[tokio::test]
    async fn opaque_fields_round_trip_unmodified() {
        let history = MemoryHistory::new(10);
        let mut original = msg(1);
        original.signature = Some(json!({"rows":[9,8,7],"s":"cafe"}));
        original.commitment = Some("commitment-root".into());
        history.append("lobby", original.clone()).await.unwrap();

        let recent = history.recent("lobby", 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0], original);
    }
}
