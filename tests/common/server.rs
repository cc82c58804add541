//! Test server management.
//!
//! Spawns and manages relaychatd instances for integration testing.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;
use tokio::time::sleep;

/// Shared HS256 secret used by channels-mode tests.
pub const TEST_SECRET: &str = "integration-test-secret";

/// A test server instance.
pub struct TestServer {
    child: Child,
    port: u16,
    data_dir: PathBuf,
}

impl TestServer {
    /// Spawn a room-mode server on `port`. A nonzero `status_port` also
    /// enables the status HTTP surface.
    pub async fn spawn_room(port: u16, status_port: u16) -> anyhow::Result<Self> {
        let config = format!(
            r#"
[server]
name = "test.relay"
mode = "room"
status_port = {status_port}

[listen]
address = "127.0.0.1:{port}"

[history]
capacity = 100
replay = 20
"#
        );
        Self::spawn(port, config).await
    }

    /// Spawn a channels-mode server on `port`, backed by a sqlite file in
    /// the server's data dir.
    pub async fn spawn_channels(port: u16) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(port);
        let config = format!(
            r#"
[server]
name = "test.relay"
mode = "channels"
status_port = 0

[listen]
address = "127.0.0.1:{port}"

[auth]
secret = "{TEST_SECRET}"

[database]
path = "{}/test.db"
"#,
            data_dir.display()
        );
        Self::spawn(port, config).await
    }

    async fn spawn(port: u16, config_content: String) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(port);
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join("config.toml");
        std::fs::write(&config_path, config_content)?;

        let binary_path =
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("target/debug/relaychatd");

        let child = Command::new(&binary_path)
            .arg(config_path.to_str().unwrap())
            .spawn()?;

        let server = Self {
            child,
            port,
            data_dir,
        };
        server.wait_until_ready().await?;
        Ok(server)
    }

    fn data_dir(port: u16) -> PathBuf {
        std::env::temp_dir().join(format!("relaychat-test-{}", port))
    }

    /// Wait until the server is accepting connections.
    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..30 {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("server failed to start within 3 seconds")
    }

    /// WebSocket URL for the given path (e.g. `/ws` or `/ws/1?token=...`).
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://127.0.0.1:{}{}", self.port, path)
    }

    /// Path of the sqlite database backing a channels-mode server.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("test.db")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}
