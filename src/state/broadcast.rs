//! Best-effort fan-out to the members of a scope.
//!
//! Broadcasts iterate a registry snapshot, deliver to each member
//! concurrently with a per-recipient timeout, and never abort on a
//! per-recipient failure. Failed recipients are pruned afterwards through the
//! registry's idempotent `leave`, so two broadcasts observing the same dead
//! peer remove it once.

use super::connection::{ConnId, Connection};
use super::registry::ScopeRegistry;
use crate::error::{DeliveryError, RegistryError};
use crate::proto::ServerFrame;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Delivers frames to scope members.
pub struct Broadcaster {
    registry: Arc<ScopeRegistry>,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: Arc<ScopeRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    /// Deliver `frame` to every member of `scope` except `exclude`.
    ///
    /// Per-recipient failures are logged and the failed connections removed
    /// from the registry; they never surface to the caller. The only
    /// caller-visible error is a broadcast against a scope that was never
    /// created.
    ///
    /// Returns how many members the frame was handed to.
    pub async fn broadcast(
        &self,
        scope: &str,
        frame: &ServerFrame,
        exclude: Option<ConnId>,
    ) -> Result<usize, RegistryError> {
        if !self.registry.scope_exists(scope) {
            return Err(RegistryError::UnknownScope(scope.to_string()));
        }

        let recipients: Vec<Arc<Connection>> = self
            .registry
            .members(scope)
            .into_iter()
            .filter(|conn| Some(conn.id()) != exclude)
            .collect();

        // Sends run concurrently so one stalled peer cannot serialize the
        // fan-out behind its timeout.
        let attempts = recipients.iter().map(|conn| {
            let frame = frame.clone();
            async move { (conn.id(), conn.send_timeout(frame, self.send_timeout).await) }
        });

        let mut delivered = 0usize;
        let mut failed: Vec<ConnId> = Vec::new();
        for (conn_id, result) in join_all(attempts).await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(scope = %scope, conn_id, error_code = e.error_code(), "delivery failed, pruning connection");
                    failed.push(conn_id);
                }
            }
        }

        for conn_id in failed {
            self.registry.leave(scope, conn_id);
        }

        debug!(scope = %scope, delivered, "broadcast complete");
        Ok(delivered)
    }

    /// Deliver to exactly one connection. Failure is the caller's problem.
    pub async fn send_direct(
        &self,
        conn: &Connection,
        frame: ServerFrame,
    ) -> Result<(), DeliveryError> {
        conn.send_timeout(frame, self.send_timeout).await
    }
}
