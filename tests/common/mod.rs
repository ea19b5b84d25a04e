//! Shared utilities for integration tests.

use std::net::SocketAddr;

use admission_gateway::config::GatewayConfig;
use admission_gateway::{HttpServer, Shutdown, Stores};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// A gateway running on an ephemeral port. Shuts down on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    shutdown: Shutdown,
    _uploads: TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

#[allow(dead_code)]
pub async fn spawn_server(config: GatewayConfig) -> TestServer {
    spawn_server_with(config, Stores::memory()).await
}

/// Start a gateway with its upload directory in a fresh temp dir.
#[allow(dead_code)]
pub async fn spawn_server_with(mut config: GatewayConfig, stores: Stores) -> TestServer {
    let uploads = tempfile::tempdir().unwrap();
    config.uploads.directory = uploads.path().to_string_lossy().into_owned();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, stores);
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();

    TestServer {
        addr,
        client,
        shutdown,
        _uploads: uploads,
    }
}

/// The `name=value` part of a response's `Set-Cookie`.
#[allow(dead_code)]
pub fn session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}
