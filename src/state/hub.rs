//! The Hub, central shared state for the relay.
//!
//! One Hub is built at startup and shared across every session task and the
//! status surface. It owns the membership registry, the fan-out engine, the
//! history backend, and (in channels mode) the database handle and token
//! verifier.

use crate::auth::TokenVerifier;
use crate::config::{Config, Mode};
use crate::db::Database;
use crate::history::HistoryStore;
use crate::state::{Broadcaster, ConnIdGenerator, ScopeRegistry};
use std::sync::Arc;
use std::time::Duration;

pub struct Hub {
    /// Server name announced in welcome notices.
    pub server_name: String,

    /// Which variant this process runs.
    pub mode: Mode,

    /// Live membership, shared with the broadcaster.
    pub registry: Arc<ScopeRegistry>,

    /// Fan-out engine over `registry`.
    pub broadcaster: Broadcaster,

    /// Recent-history backend (memory or database).
    pub history: Arc<dyn HistoryStore>,

    /// How many history entries a new connection is replayed.
    pub replay_window: usize,

    /// Outbound queue depth per connection.
    pub queue_depth: usize,

    /// Connection id source for new sessions.
    pub conn_ids: ConnIdGenerator,

    /// Persistent storage. Present only in channels mode.
    pub db: Option<Database>,

    /// Bearer-token verifier. Present only in channels mode.
    pub verifier: Option<TokenVerifier>,
}

impl Hub {
    pub fn new(
        config: &Config,
        history: Arc<dyn HistoryStore>,
        db: Option<Database>,
        verifier: Option<TokenVerifier>,
    ) -> Self {
        // Display names are a connection-level namespace only in room mode;
        // channels mode takes identity from stored user rows, which may
        // legitimately share a display name.
        let registry = Arc::new(ScopeRegistry::new(config.server.mode == Mode::Room));
        let broadcaster = Broadcaster::new(
            registry.clone(),
            Duration::from_millis(config.delivery.send_timeout_ms),
        );

        Self {
            server_name: config.server.name.clone(),
            mode: config.server.mode,
            registry,
            broadcaster,
            history,
            replay_window: config.history.replay,
            queue_depth: config.delivery.queue_depth,
            conn_ids: ConnIdGenerator::new(),
            db,
            verifier,
        }
    }
}
