//! Test WebSocket client.
//!
//! Speaks the JSON frame protocol and asserts on what the server sends back.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// A test chat client.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connect to a server endpoint.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (ws, _) = connect_async(url).await?;
        Ok(Self { ws })
    }

    /// Send one JSON frame.
    pub async fn send_json(&mut self, frame: &Value) -> anyhow::Result<()> {
        self.ws.send(WsMessage::Text(frame.to_string())).await?;
        Ok(())
    }

    /// Receive the next JSON frame, skipping control frames.
    pub async fn recv_json(&mut self) -> anyhow::Result<Value> {
        self.recv_json_timeout(Duration::from_secs(5)).await
    }

    /// Receive the next JSON frame with a timeout.
    pub async fn recv_json_timeout(&mut self, dur: Duration) -> anyhow::Result<Value> {
        let deadline = tokio::time::Instant::now() + dur;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let msg = timeout(remaining, self.ws.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
            match msg {
                WsMessage::Text(text) => return Ok(serde_json::from_str(&text)?),
                WsMessage::Close(frame) => {
                    anyhow::bail!("connection closed by server: {:?}", frame)
                }
                _ => continue,
            }
        }
    }

    /// Receive frames until the predicate matches; returns the matching one.
    pub async fn recv_until<F>(&mut self, mut predicate: F) -> anyhow::Result<Value>
    where
        F: FnMut(&Value) -> bool,
    {
        for _ in 0..50 {
            let frame = self.recv_json().await?;
            if predicate(&frame) {
                return Ok(frame);
            }
        }
        anyhow::bail!("predicate not satisfied within 50 frames")
    }

    /// Wait for the server to close the connection; returns the close code
    /// and reason.
    pub async fn expect_close(&mut self) -> anyhow::Result<(u16, String)> {
        for _ in 0..50 {
            let msg = timeout(Duration::from_secs(5), self.ws.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("connection ended without a close frame"))??;
            if let WsMessage::Close(Some(frame)) = msg {
                return Ok((frame.code.into(), frame.reason.into_owned()));
            }
        }
        anyhow::bail!("no close frame within 50 messages")
    }

    /// Room-mode admission: send a join frame and wait for the welcome
    /// banner.
    pub async fn join(&mut self, name: &str) -> anyhow::Result<()> {
        self.send_json(&serde_json::json!({ "type": "join", "sender": name }))
            .await?;
        self.recv_until(|f| f["type"] == "system" && f["message"].as_str().unwrap_or("").starts_with("Connected"))
            .await?;
        Ok(())
    }

    /// Abruptly drop the socket without a close handshake.
    pub fn abandon(self) {
        drop(self);
    }
}
