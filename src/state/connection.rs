//! Connection records and id generation.
//!
//! A [`Connection`] pairs a transport-level send capability (the bounded
//! outbound queue drained by the owning session task) with a resolved
//! identity. The registry holds the record while the connection is live;
//! identity is mutated only through the owning session (room-mode rename).

use crate::error::DeliveryError;
use crate::proto::ServerFrame;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Process-unique connection identifier.
pub type ConnId = u64;

/// Generates connection ids. One instance lives for the process lifetime.
#[derive(Debug, Default)]
pub struct ConnIdGenerator {
    counter: AtomicU64,
}

impl ConnIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unique connection id.
    pub fn next(&self) -> ConnId {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

/// Who a connection speaks for.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Stable user id: the display name in room mode, the database row id in
    /// channels mode.
    pub user_id: String,
    /// Display name shown to other participants.
    pub name: String,
    /// Optional avatar URL (channels mode, from the stored user).
    pub avatar: Option<String>,
    /// Opaque public-key commitment supplied at admission.
    pub commitment: Option<String>,
}

/// One live client session as the rest of the server sees it.
#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    identity: RwLock<Identity>,
    sender: mpsc::Sender<ServerFrame>,
}

impl Connection {
    pub fn new(id: ConnId, identity: Identity, sender: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            id,
            identity: RwLock::new(identity),
            sender,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Snapshot of the current identity.
    pub fn identity(&self) -> Identity {
        self.identity.read().clone()
    }

    /// Current display name.
    pub fn name(&self) -> String {
        self.identity.read().name.clone()
    }

    /// Replace the display name (room-mode rename). The registry enforces
    /// uniqueness before calling this.
    pub(crate) fn set_name(&self, name: String) {
        self.identity.write().name = name;
    }

    /// Queue a frame for this connection, bounded by `timeout`.
    ///
    /// Failure means the session task is gone or its queue stayed full for
    /// the whole timeout; either way the connection is considered failed.
    pub async fn send_timeout(
        &self,
        frame: ServerFrame,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        match self.sender.send_timeout(frame, timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(DeliveryError::Closed),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(DeliveryError::Timeout),
        }
    }
}
