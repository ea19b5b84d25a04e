//! Startup orchestration.
//!
//! Config is already validated when this runs. Order: metrics, stores (fatal
//! if unreachable), listener. Traffic is accepted only after all three.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::GatewayConfig;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::store::{StoreError, Stores};

/// Fatal startup failures.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("store connection failed: {0}")]
    Store(#[from] StoreError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to start serving.
pub struct Started {
    pub config: GatewayConfig,
    pub stores: Stores,
    pub listener: TcpListener,
    pub shutdown: Shutdown,
}

/// Bring up the process-wide pieces in order.
pub async fn start(config: GatewayConfig) -> Result<Started, StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let stores = Stores::connect(&config.store).await?;

    let address = config.listener.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;

    tracing::info!(
        address = %listener.local_addr()?,
        environment = ?config.environment,
        store = %config.store.url,
        "Listening for connections"
    );

    Ok(Started {
        config,
        stores,
        listener,
        shutdown: Shutdown::new(),
    })
}

impl Started {
    /// Serve until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<(), StartupError> {
        let Started {
            config,
            stores,
            listener,
            shutdown,
        } = self;

        shutdown.trigger_on_signal();
        stores.spawn_sweeper(
            Duration::from_secs(config.store.sweep_interval_secs),
            shutdown.subscribe(),
        );

        let server = HttpServer::new(config, stores);
        server.run(listener, shutdown.subscribe()).await?;
        Ok(())
    }
}
