//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own public directory and a
//! fake tool gateway, so no audio tool needs to be installed.

use super::constants::*;
use super::gateway::FakeGateway;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use voiceclone_server::engines::TtsConfig;
use voiceclone_server::pipeline::{Coordinator, PipelineOptions};
use voiceclone_server::policy::StageTimeouts;
use voiceclone_server::render::ArtifactStore;
use voiceclone_server::server::{server::make_app, RequestsLoggingLevel, ServerConfig};

/// Test server instance with an isolated public directory
///
/// When dropped, the server gracefully shuts down and the directory is removed.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    #[allow(dead_code)]
    pub port: u16,

    /// The gateway every tool call goes through
    #[allow(dead_code)]
    pub gateway: Arc<FakeGateway>,

    // Private fields - keep resources alive until drop
    public_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl TestServer {
    /// Spawns a server whose tools all succeed
    pub async fn spawn() -> Self {
        Self::spawn_with(FakeGateway::new()).await
    }

    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if the port cannot be bound or the server does not become
    /// ready within the timeout.
    pub async fn spawn_with(gateway: FakeGateway) -> Self {
        let public_dir = TempDir::new().expect("Failed to create public dir");
        let gateway = Arc::new(gateway);

        let store = ArtifactStore::new(public_dir.path(), 1024 * 1024);
        store.init().await.expect("Failed to init artifact store");

        // The translation service would need the network
        let tts = TtsConfig {
            translate_url: None,
            ..Default::default()
        };
        let coordinator = Coordinator::standard(
            gateway.clone(),
            reqwest::Client::new(),
            &tts,
            StageTimeouts::default(),
            store,
            PipelineOptions::default(),
        );

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            content_cache_age_sec: 3600,
            ..Default::default()
        };
        let app = make_app(config, Arc::new(coordinator)).expect("Failed to build app");

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            gateway,
            public_dir,
            _shutdown_tx: Some(shutdown_tx),
        };
        server.wait_for_ready().await;
        server
    }

    /// Root holding `uploads/` and `temp/`
    pub fn public_dir(&self) -> &Path {
        self.public_dir.path()
    }

    /// Waits for the server to become ready by polling the health endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client
                .get(format!("{}/api/health", self.base_url))
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
