//! relaychatd, a WebSocket chat relay.
//!
//! One binary, two deployment variants selected by `[server] mode`:
//! an ephemeral single-room relay, and a persisted multi-channel relay with
//! token admission.

mod auth;
mod config;
mod db;
mod error;
mod history;
mod http;
mod network;
mod proto;
mod state;

use crate::auth::TokenVerifier;
use crate::config::{Config, Mode};
use crate::db::Database;
use crate::history::{DbHistory, HistoryStore, MemoryHistory};
use crate::network::Gateway;
use crate::state::Hub;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "failed to load config");
        e
    })?;

    info!(
        server = %config.server.name,
        mode = ?config.server.mode,
        listen = %config.listen.address,
        "starting relaychatd"
    );

    // Mode wiring: the room variant is purely in-memory, the channels
    // variant hangs everything off the database. `Config::validate` already
    // guaranteed the sections each mode needs are present.
    let (history, db, verifier): (Arc<dyn HistoryStore>, Option<Database>, Option<TokenVerifier>) =
        match config.server.mode {
            Mode::Room => (
                Arc::new(MemoryHistory::new(config.history.capacity)),
                None,
                None,
            ),
            Mode::Channels => {
                let db_path = config
                    .database
                    .as_ref()
                    .map(|d| d.path.as_str())
                    .unwrap_or("relaychat.db");
                let db = Database::new(db_path).await?;
                info!(path = %db_path, "database ready");

                let secret = config.auth.as_ref().map(|a| a.secret.as_str()).unwrap_or("");
                (
                    Arc::new(DbHistory::new(db.clone())),
                    Some(db),
                    Some(TokenVerifier::new(secret)),
                )
            }
        };

    let hub = Arc::new(Hub::new(&config, history, db, verifier));

    if config.server.status_port != 0 {
        let status_hub = Arc::clone(&hub);
        tokio::spawn(http::run_status_server(status_hub, config.server.status_port));
    }

    let gateway = Gateway::bind(
        config.listen.address,
        config.listen.allow_origins.clone(),
        hub,
    )
    .await?;

    gateway.run().await
}
