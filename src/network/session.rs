//! Session, the per-connection lifecycle task.
//!
//! Each session runs in its own tokio task with three phases:
//!
//! 1. Admission. Room mode waits for a valid `join` frame; channels mode
//!    resolves the bearer token against the user table and checks the channel
//!    exists. Refusals close the socket with a mode-specific close code
//!    before any shared state is touched.
//! 2. Active. A unified `tokio::select!` loop: inbound WebSocket frames are
//!    classified and relayed, and the connection's outbound queue is drained
//!    into the socket. One stalled peer never blocks anyone else because all
//!    cross-session traffic goes through that bounded queue.
//! 3. Closed. The connection is removed from the registry first, then the
//!    departure notice is broadcast, so a concurrent broadcast can never
//!    deliver to a half-dead member.

use crate::config::Mode;
use crate::error::{AuthError, CLOSE_UNKNOWN_SCOPE, RegistryError, SessionResult};
use crate::history::db::to_chat_message;
use crate::proto::{ChatMessage, ClientFrame, ServerFrame, now_rfc3339};
use crate::state::{ConnId, Connection, Hub, Identity, ROOM_SCOPE, ScopeId};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Which endpoint a connection arrived on, parsed from the handshake URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRoute {
    /// `/ws`, the single implicit room.
    Room,
    /// `/ws/{channel_id}?token=...`, a persisted channel.
    Channel {
        channel_id: String,
        token: Option<String>,
    },
}

impl SessionRoute {
    /// Parse the request URI into a route, or `None` for paths this server
    /// does not serve.
    pub fn parse(uri: &http::Uri) -> Option<Self> {
        let path = uri.path();
        if path == "/ws" {
            return Some(Self::Room);
        }
        let channel_id = path.strip_prefix("/ws/")?;
        if channel_id.is_empty() || channel_id.contains('/') {
            return None;
        }
        Some(Self::Channel {
            channel_id: channel_id.to_string(),
            token: uri.query().and_then(|q| query_param(q, "token")),
        })
    }
}

/// First value of `key` in a raw query string. Token values are URL-safe
/// base64, so no percent-decoding is needed.
fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| v.to_string())
    })
}

/// A handshake-level refusal: close code plus human-readable reason.
struct Refusal {
    code: u16,
    reason: String,
}

impl Refusal {
    fn auth(err: AuthError) -> Self {
        Self {
            code: err.close_code(),
            reason: err.to_string(),
        }
    }

    fn unknown_scope(channel_id: &str) -> Self {
        Self {
            code: CLOSE_UNKNOWN_SCOPE,
            reason: format!("no such channel: {channel_id}"),
        }
    }

    fn internal() -> Self {
        Self {
            code: CloseCode::Error.into(),
            reason: "internal error".to_string(),
        }
    }
}

/// One client connection, from handshake to cleanup.
pub struct Session {
    conn_id: ConnId,
    addr: SocketAddr,
    hub: Arc<Hub>,
    route: SessionRoute,
    ws: WebSocketStream<TcpStream>,
}

impl Session {
    pub fn new(
        conn_id: ConnId,
        addr: SocketAddr,
        hub: Arc<Hub>,
        route: SessionRoute,
        ws: WebSocketStream<TcpStream>,
    ) -> Self {
        Self {
            conn_id,
            addr,
            hub,
            route,
            ws,
        }
    }

    /// Run the session to completion.
    #[instrument(skip(self), fields(conn_id = %self.conn_id, addr = %self.addr), name = "session")]
    pub async fn run(self) -> SessionResult<()> {
        let Session {
            conn_id,
            addr: _,
            hub,
            route,
            mut ws,
        } = self;

        // Phase 1: Admission.
        let (scope, conn, outgoing_rx) = match (hub.mode, route) {
            (Mode::Room, SessionRoute::Room) => {
                match room_admission(&hub, conn_id, &mut ws).await? {
                    Some(admitted) => admitted,
                    None => return Ok(()),
                }
            }
            (Mode::Channels, SessionRoute::Channel { channel_id, token }) => {
                match channel_admission(&hub, &channel_id, token.as_deref()).await {
                    Ok(identity) => {
                        let (tx, rx) = mpsc::channel(hub.queue_depth);
                        let conn = Arc::new(Connection::new(conn_id, identity, tx));
                        hub.registry.join(&channel_id, conn.clone())?;
                        (channel_id, conn, rx)
                    }
                    Err(refusal) => {
                        return refuse(ws, refusal).await;
                    }
                }
            }
            _ => {
                return refuse(
                    ws,
                    Refusal {
                        code: CLOSE_UNKNOWN_SCOPE,
                        reason: "endpoint not served in this mode".to_string(),
                    },
                )
                .await;
            }
        };

        let name = conn.name();
        info!(scope = %scope, name = %name, "session admitted");

        // Once registered, cleanup must run no matter how the session ends.
        // Capture the active-phase result and deregister before returning it.
        let result = serve(&hub, &scope, &conn, ws, outgoing_rx).await;

        // Phase 3: Closed. Deregister before the notice so the departure
        // broadcast never targets this connection.
        let name = conn.name();
        hub.registry.leave(&scope, conn_id);
        let _ = hub
            .broadcaster
            .broadcast(
                &scope,
                &ServerFrame::system(format!("{name} left the chat")),
                Some(conn_id),
            )
            .await;
        info!(scope = %scope, name = %name, "session closed");

        result
    }
}

/// Welcome sequence and active loop for an admitted connection.
async fn serve(
    hub: &Arc<Hub>,
    scope: &str,
    conn: &Arc<Connection>,
    ws: WebSocketStream<TcpStream>,
    mut outgoing_rx: mpsc::Receiver<ServerFrame>,
) -> SessionResult<()> {
    let conn_id = conn.id();
    let name = conn.name();

    // Welcome sequence. Direct frames first, then the join notice to the
    // rest of the scope. The history frame is always sent, even empty,
    // so clients can render an empty room without a special case.
    hub.broadcaster
        .send_direct(
            conn,
            ServerFrame::system(format!("Connected to {}", hub.server_name)),
        )
        .await
        .ok();
    let replay = hub.history.recent(scope, hub.replay_window).await?;
    hub.broadcaster
        .send_direct(conn, ServerFrame::History { messages: replay })
        .await
        .ok();
    if hub.mode == Mode::Room {
        hub.broadcaster
            .send_direct(
                conn,
                ServerFrame::Users {
                    users: hub.registry.names(scope),
                },
            )
            .await
            .ok();
    }
    let _ = hub
        .broadcaster
        .broadcast(
            scope,
            &ServerFrame::system(format!("{name} joined the chat")),
            Some(conn_id),
        )
        .await;

    // Active loop.
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !handle_text(hub, scope, conn, &text).await? {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "read error");
                        break;
                    }
                }
            }
            outbound = outgoing_rx.recv() => {
                let Some(frame) = outbound else { break };
                let text = serde_json::to_string(&frame)?;
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    debug!(error = %e, "write error");
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Close the socket with a refusal code before any state was shared.
async fn refuse(mut ws: WebSocketStream<TcpStream>, refusal: Refusal) -> SessionResult<()> {
    info!(code = refusal.code, reason = %refusal.reason, "admission refused");
    ws.send(WsMessage::Close(Some(CloseFrame {
        code: CloseCode::from(refusal.code),
        reason: Cow::Owned(refusal.reason),
    })))
    .await?;
    Ok(())
}

/// Room-mode admission: wait for a `join` frame carrying an unclaimed
/// display name. Rejections are reported as `system` frames and the client
/// may retry on the same socket; `None` means the client went away first.
async fn room_admission(
    hub: &Arc<Hub>,
    conn_id: ConnId,
    ws: &mut WebSocketStream<TcpStream>,
) -> SessionResult<Option<(ScopeId, Arc<Connection>, mpsc::Receiver<ServerFrame>)>> {
    let (tx, rx) = mpsc::channel(hub.queue_depth);
    loop {
        let Some(msg) = ws.next().await else {
            return Ok(None);
        };
        match msg? {
            WsMessage::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::Join { sender, commitment }) => {
                    let name = sender.trim().to_string();
                    if name.is_empty() {
                        send_frame(ws, &ServerFrame::system("display name must not be empty"))
                            .await?;
                        continue;
                    }
                    let identity = Identity {
                        user_id: name.clone(),
                        name,
                        avatar: None,
                        commitment,
                    };
                    let conn = Arc::new(Connection::new(conn_id, identity, tx.clone()));
                    match hub.registry.join(ROOM_SCOPE, conn.clone()) {
                        Ok(()) => return Ok(Some((ROOM_SCOPE.to_string(), conn, rx))),
                        Err(RegistryError::NameInUse(name)) => {
                            send_frame(
                                ws,
                                &ServerFrame::system(format!(
                                    "the name {name} is already taken"
                                )),
                            )
                            .await?;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(_) => debug!("frame before admission ignored"),
                Err(e) => debug!(error = %e, "unparseable frame before admission"),
            },
            WsMessage::Close(_) => return Ok(None),
            _ => {}
        }
    }
}

/// Channels-mode admission: token, then user row, then channel existence.
/// Each failure maps to its own close code so clients can distinguish a
/// missing token from a revoked account from a dead link.
async fn channel_admission(
    hub: &Arc<Hub>,
    channel_id: &str,
    token: Option<&str>,
) -> Result<Identity, Refusal> {
    let (Some(verifier), Some(db)) = (hub.verifier.as_ref(), hub.db.as_ref()) else {
        warn!("channels admission without verifier or database");
        return Err(Refusal::internal());
    };

    let user_id = verifier.verify(token).map_err(Refusal::auth)?;

    let user = db.users().find_by_id(user_id).await.map_err(|e| {
        warn!(error = %e, "user lookup failed");
        Refusal::internal()
    })?;
    let Some(user) = user else {
        return Err(Refusal::auth(AuthError::UnknownUser));
    };

    let known = match channel_id.parse::<i64>() {
        Ok(id) => db.channels().exists(id).await.map_err(|e| {
            warn!(error = %e, "channel lookup failed");
            Refusal::internal()
        })?,
        Err(_) => false,
    };
    if !known {
        return Err(Refusal::unknown_scope(channel_id));
    }

    Ok(Identity {
        user_id: user.id.to_string(),
        name: user.name,
        avatar: user.avatar,
        commitment: user.commitment,
    })
}

/// Classify and act on one inbound text frame from an active session.
/// Returns `false` when the session should close.
async fn handle_text(
    hub: &Arc<Hub>,
    scope: &str,
    conn: &Arc<Connection>,
    text: &str,
) -> SessionResult<bool> {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "unparseable frame dropped");
            return Ok(true);
        }
    };

    match frame {
        ClientFrame::Message {
            id,
            sender,
            sender_avatar,
            message,
            signature,
            commitment,
            timestamp,
        } => {
            let chat = match hub.mode {
                Mode::Room => {
                    let identity = conn.identity();
                    ChatMessage {
                        id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                        sender: sender.unwrap_or_else(|| identity.name.clone()),
                        sender_avatar,
                        message,
                        signature,
                        commitment: commitment.or(identity.commitment),
                        timestamp: timestamp.unwrap_or_else(now_rfc3339),
                    }
                }
                Mode::Channels => {
                    match persist_message(hub, scope, conn, &message, signature.as_ref()).await {
                        Some(chat) => chat,
                        None => return Ok(true),
                    }
                }
            };

            hub.history.append(scope, chat.clone()).await?;
            let _ = hub
                .broadcaster
                .broadcast(scope, &ServerFrame::Message(chat), Some(conn.id()))
                .await;
        }
        ClientFrame::Join { sender, .. } => {
            // An active room-mode connection re-sending join is a rename.
            if hub.mode != Mode::Room {
                debug!("join frame on an active channel session ignored");
                return Ok(true);
            }
            let new_name = sender.trim().to_string();
            if new_name.is_empty() {
                return Ok(true);
            }
            match hub.registry.rename(scope, conn.id(), &new_name) {
                Ok(old_name) => {
                    if old_name != new_name {
                        let _ = hub
                            .broadcaster
                            .broadcast(
                                scope,
                                &ServerFrame::system(format!(
                                    "{old_name} is now known as {new_name}"
                                )),
                                None,
                            )
                            .await;
                    }
                }
                Err(RegistryError::NameInUse(name)) => {
                    hub.broadcaster
                        .send_direct(
                            conn,
                            ServerFrame::system(format!("the name {name} is already taken")),
                        )
                        .await
                        .ok();
                }
                Err(e) => return Err(e.into()),
            }
        }
        ClientFrame::Leave { .. } => return Ok(false),
        ClientFrame::Unknown => debug!("unrecognized frame type dropped"),
    }

    Ok(true)
}

/// Channels mode stores a message before relaying it; the stored row supplies
/// the authoritative id, sender identity, and timestamp. A failed insert
/// drops the message rather than the session.
async fn persist_message(
    hub: &Arc<Hub>,
    scope: &str,
    conn: &Arc<Connection>,
    content: &str,
    signature: Option<&serde_json::Value>,
) -> Option<ChatMessage> {
    let db = hub.db.as_ref()?;
    let identity = conn.identity();
    let (Ok(channel_id), Ok(user_id)) = (scope.parse::<i64>(), identity.user_id.parse::<i64>())
    else {
        warn!(scope = %scope, user_id = %identity.user_id, "non-numeric ids on a channel session");
        return None;
    };

    let signature_text = signature.and_then(|v| serde_json::to_string(v).ok());
    match db
        .messages()
        .insert(channel_id, user_id, content, signature_text.as_deref())
        .await
    {
        Ok(stored) => Some(to_chat_message(&stored)),
        Err(e) => {
            warn!(error = %e, channel_id, "message insert failed, dropping message");
            None
        }
    }
}

/// Serialize and write one frame directly to the socket (pre-admission only;
/// active sessions write through the outbound queue).
async fn send_frame(
    ws: &mut WebSocketStream<TcpStream>,
    frame: &ServerFrame,
) -> SessionResult<()> {
    let text = serde_json::to_string(frame)?;
    ws.send(WsMessage::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> http::Uri {
        s.parse().unwrap()
    }

    #[test]
    fn root_ws_path_is_the_room() {
        assert_eq!(SessionRoute::parse(&uri("/ws")), Some(SessionRoute::Room));
    }

    #[test]
    fn channel_path_carries_id_and_token() {
        assert_eq!(
            SessionRoute::parse(&uri("/ws/7?token=abc.def.ghi")),
            Some(SessionRoute::Channel {
                channel_id: "7".to_string(),
                token: Some("abc.def.ghi".to_string()),
            })
        );
    }

    #[test]
    fn channel_path_without_token_still_routes() {
        // The missing token is an admission failure (4001), not a 404.
        assert_eq!(
            SessionRoute::parse(&uri("/ws/7")),
            Some(SessionRoute::Channel {
                channel_id: "7".to_string(),
                token: None,
            })
        );
    }

    #[test]
    fn unknown_paths_are_rejected() {
        assert_eq!(SessionRoute::parse(&uri("/")), None);
        assert_eq!(SessionRoute::parse(&uri("/ws/")), None);
        assert_eq!(SessionRoute::parse(&uri("/ws/7/extra")), None);
        assert_eq!(SessionRoute::parse(&uri("/metrics")), None);
    }

    #[test]
    fn query_param_picks_the_named_key() {
        assert_eq!(query_param("token=abc&x=1", "token"), Some("abc".to_string()));
        assert_eq!(query_param("x=1&token=abc", "token"), Some("abc".to_string()));
        assert_eq!(query_param("x=1", "token"), None);
        assert_eq!(query_param("token=", "token"), Some(String::new()));
    }

    /// History backend whose reads always fail, standing in for a lost
    /// database during the welcome replay.
    struct BrokenHistory;

    #[async_trait::async_trait]
    impl crate::history::HistoryStore for BrokenHistory {
        async fn append(
            &self,
            _scope: &str,
            _msg: ChatMessage,
        ) -> Result<(), crate::history::HistoryError> {
            Ok(())
        }

        async fn recent(
            &self,
            _scope: &str,
            _limit: usize,
        ) -> Result<Vec<ChatMessage>, crate::history::HistoryError> {
            Err(crate::history::HistoryError::Database(
                crate::db::DbError::Sqlx(sqlx::Error::PoolClosed),
            ))
        }

        async fn len(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn errored_session_still_deregisters() {
        let config: crate::config::Config = toml::from_str(
            r#"
            [server]
            name = "test.local"

            [listen]
            address = "127.0.0.1:0"
            "#,
        )
        .unwrap();
        let hub = Arc::new(Hub::new(&config, Arc::new(BrokenHistory), None, None));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_hub = hub.clone();
        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            Session::new(1, peer, server_hub, SessionRoute::Room, ws)
                .run()
                .await
        });

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        client
            .send(WsMessage::Text(
                r#"{"type":"join","sender":"alice"}"#.to_string(),
            ))
            .await
            .unwrap();

        // The failed replay errors the session after admission. The
        // registry must not keep a ghost entry for it.
        let result = server.await.unwrap();
        assert!(result.is_err());
        assert_eq!(hub.registry.connection_count(), 0);
    }
}
