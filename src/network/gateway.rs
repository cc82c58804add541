//! Gateway, the TCP listener that accepts incoming WebSocket connections.
//!
//! The Gateway binds one socket and spawns a Session task per client. Origin
//! checking and route parsing happen inside the WebSocket handshake callback,
//! so a disallowed origin or an unknown path is refused with a plain HTTP
//! error before any session state exists.

use crate::network::session::{Session, SessionRoute};
use crate::state::Hub;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tracing::{error, info, instrument, warn};

/// Accepts incoming connections and spawns session handlers.
pub struct Gateway {
    listener: TcpListener,
    allow_origins: Vec<String>,
    hub: Arc<Hub>,
}

impl Gateway {
    /// Bind the gateway to the configured address.
    pub async fn bind(
        addr: SocketAddr,
        allow_origins: Vec<String>,
        hub: Arc<Hub>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "listener bound");
        Ok(Self {
            listener,
            allow_origins,
            hub,
        })
    }

    /// Run the gateway, accepting connections forever.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let hub = Arc::clone(&self.hub);
                    let allowed = self.allow_origins.clone();
                    let conn_id = hub.conn_ids.next();

                    tokio::spawn(async move {
                        let mut route: Option<SessionRoute> = None;
                        let callback =
                            |req: &http::Request<()>, response: http::Response<()>| {
                                if !origin_allowed(&allowed, req) {
                                    warn!(%addr, "handshake rejected, origin not allowed");
                                    return Err(http::Response::builder()
                                        .status(http::StatusCode::FORBIDDEN)
                                        .body(Some("origin not allowed".to_string()))
                                        .unwrap());
                                }

                                match SessionRoute::parse(req.uri()) {
                                    Some(r) => {
                                        route = Some(r);
                                        Ok(response)
                                    }
                                    None => {
                                        warn!(%addr, uri = %req.uri(), "handshake rejected, unknown path");
                                        Err(http::Response::builder()
                                            .status(http::StatusCode::NOT_FOUND)
                                            .body(Some("no such endpoint".to_string()))
                                            .unwrap())
                                    }
                                }
                            };

                        // Bound separately so the handshake future (and the
                        // borrow of `route` inside the callback) ends here.
                        let accepted = accept_hdr_async(stream, callback).await;
                        match accepted {
                            Ok(ws_stream) => {
                                // The callback ran, so the route is set.
                                let Some(route) = route else { return };
                                info!(conn_id, %addr, "connection accepted");
                                let session =
                                    Session::new(conn_id, addr, hub, route, ws_stream);
                                if let Err(e) = session.run().await {
                                    warn!(conn_id, %addr, error = %e, error_code = e.error_code(), "session ended with error");
                                }
                                info!(conn_id, %addr, "connection closed");
                            }
                            Err(e) => {
                                warn!(%addr, error = %e, "handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                }
            }
        }
    }
}

/// Check the handshake Origin header against the configured allow list.
/// An empty list allows every origin, as does a literal `*` entry. Requests
/// without an Origin header (non-browser clients) are always allowed.
fn origin_allowed(allowed: &[String], req: &http::Request<()>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match req.headers().get("Origin").and_then(|o| o.to_str().ok()) {
        Some(origin) => allowed.iter().any(|a| a == origin || a == "*"),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(origin: Option<&str>) -> http::Request<()> {
        let mut builder = http::Request::builder().uri("/ws");
        if let Some(origin) = origin {
            builder = builder.header("Origin", origin);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn empty_allow_list_permits_everyone() {
        assert!(origin_allowed(&[], &request(Some("https://evil.example"))));
        assert!(origin_allowed(&[], &request(None)));
    }

    #[test]
    fn listed_origin_is_permitted_others_are_not() {
        let allowed = vec!["https://chat.example".to_string()];
        assert!(origin_allowed(&allowed, &request(Some("https://chat.example"))));
        assert!(!origin_allowed(&allowed, &request(Some("https://evil.example"))));
    }

    #[test]
    fn wildcard_entry_permits_any_origin() {
        let allowed = vec!["*".to_string()];
        assert!(origin_allowed(&allowed, &request(Some("https://anything.example"))));
    }

    #[test]
    fn missing_origin_header_is_permitted() {
        let allowed = vec!["https://chat.example".to_string()];
        assert!(origin_allowed(&allowed, &request(None)));
    }
}
