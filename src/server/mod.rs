//! Presence aggregator
//!
//! Counts live observer sessions, derives the threshold level and fans out
//! rate-limited updates to every session.

mod coalescer;
mod http;
mod monitor;
mod registry;

pub use registry::SessionRegistry;

use http::{router, AppState};
use monitor::spawn_memory_monitor;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServerSettings;
use crate::error::{Error, Result};

/// How long shutdown waits for in-flight requests
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running aggregator
pub struct ServerHandle {
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    server_task: JoinHandle<()>,
    monitor_task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    #[cfg(test)]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// WebSocket endpoint URL for this server
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Stop accepting connections and wait for the listener to wind down
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(monitor) = self.monitor_task.take() {
            monitor.abort();
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.server_task)
            .await
            .is_err()
        {
            warn!("Server did not stop within grace period, aborting");
            self.server_task.abort();
        }
        info!(count = self.registry.count(), "Server stopped");
    }
}

/// Bind the listener and start serving in the background
pub async fn start(settings: &ServerSettings) -> Result<ServerHandle> {
    let listen_addr = settings.listen_addr();
    let listener = TcpListener::bind(&listen_addr)
        .await
        .map_err(|e| Error::connection_failed(listen_addr.clone(), format!("bind failed: {}", e)))?;
    let addr = listener.local_addr()?;

    let registry = Arc::new(SessionRegistry::new(settings));
    let shutdown = CancellationToken::new();
    let app = router(AppState {
        registry: Arc::clone(&registry),
        shutdown: shutdown.clone(),
    });

    let server_task = tokio::spawn(axum_serve(listener, app, shutdown.clone()));

    let monitor_task = spawn_memory_monitor(
        Arc::clone(&registry),
        Duration::from_secs(settings.memory_log_interval_secs),
    );

    info!(
        %addr,
        testing_mode = settings.testing_mode,
        debug_mode = settings.debug_mode,
        throttle_ms = settings.broadcast_throttle_ms,
        "Server listening"
    );
    if settings.testing_mode {
        warn!("Testing mode enabled: /force-count is reachable");
    }

    Ok(ServerHandle {
        addr,
        registry,
        shutdown,
        server_task,
        monitor_task,
    })
}

async fn axum_serve(listener: TcpListener, app: axum::Router, shutdown: CancellationToken) {
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;
    if let Err(e) = result {
        warn!(error = %e, "Server exited with error");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Settings for an in-process server on an ephemeral port
    pub fn local_settings(testing_mode: bool) -> ServerSettings {
        ServerSettings {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            testing_mode,
            memory_log_interval_secs: 0,
            ..Default::default()
        }
    }

    /// Poll until the registry reports `expected` or the deadline passes
    pub async fn wait_for_count(registry: &SessionRegistry, expected: u64, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if registry.count() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        registry.count() == expected
    }
}
