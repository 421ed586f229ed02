//! Service orchestration: wires hub, listener and watcher together and tears
//! them down in order.

use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use metrics_exporter_prometheus::PrometheusHandle;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BroadcastConfig;
use crate::hub::{Hub, HubHandle};
use crate::server::{AppState, build_router};
use crate::session::SessionConfig;
use crate::shutdown::{ShutdownCoordinator, drain};
use crate::supervisor::{Worker, supervise};
use crate::watcher::{DirectoryWatcher, WatchError, WatchExit, broadcast_file};

/// Errors that prevent the service from starting.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No message directory was configured.
    #[error("message directory path is empty")]
    EmptyDirectory,
    /// The message directory could not be created.
    #[error("create directory {path}: {source}")]
    CreateDir {
        /// Directory that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The listener could not bind.
    #[error("bind {addr}: {source}")]
    Bind {
        /// Address that failed.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The directory watcher could not start.
    #[error("start watcher: {0}")]
    Watch(#[from] WatchError),
}

/// The broadcast service before it is started.
pub struct BroadcastService {
    config: BroadcastConfig,
    shutdown: ShutdownCoordinator,
    metrics: Option<PrometheusHandle>,
}

impl BroadcastService {
    /// Create a service from `config`.
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            shutdown: ShutdownCoordinator::new(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Request shutdown. Non-blocking; safe to call any number of times.
    pub fn stop(&self) {
        self.shutdown.shutdown();
    }

    /// Coordinator shared with the running service, for signal handlers.
    pub fn coordinator(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    /// Start every component and return once the listener is accepting.
    pub async fn start(&self) -> Result<ServiceHandle, ServiceError> {
        let cfg = &self.config;
        ensure_dir(&cfg.message_dir).await?;

        let (hub, hub_task) = Hub::spawn(cfg.hub_buffer);

        let addr = cfg.bind_addr();
        let listener = match bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                hub.shutdown().await;
                return Err(e);
            }
        };
        let local_addr = listener.local_addr().map_err(|source| ServiceError::Bind {
            addr: addr.clone(),
            source,
        })?;

        let watcher = DirectoryWatcher::new(
            cfg.message_dir.clone(),
            hub.clone(),
            cfg.settle_delay(),
            self.shutdown.token(),
        );
        let watcher_task = match watcher.spawn() {
            Ok(task) => task,
            Err(e) => {
                hub.shutdown().await;
                return Err(e.into());
            }
        };

        if let Some(path) = cfg.snapshot_path() {
            if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
                info!(path = %path.display(), "broadcasting startup snapshot");
                if broadcast_file(&hub, &path).await.is_err() {
                    warn!("hub closed before startup snapshot");
                }
            }
        }

        let router = build_router(AppState {
            hub: hub.clone(),
            session: SessionConfig::from(cfg),
            max_inbound_bytes: cfg.max_inbound_bytes,
            metrics: self.metrics.clone(),
        });
        let token = self.shutdown.token();
        let server_task = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .into_future();
            match supervise(Worker::Listener, serve).await {
                Ok(Ok(())) => debug!("http listener stopped"),
                Ok(Err(e)) => error!(error = %e, "http listener failed"),
                Err(_) => {}
            }
        });
        info!(addr = %local_addr, endpoint = "/ws", "websocket server listening");

        Ok(ServiceHandle {
            local_addr,
            hub,
            shutdown: self.shutdown.clone(),
            grace: cfg.shutdown_grace(),
            server: Some(server_task),
            watcher: Some(watcher_task),
            hub_task: Some(hub_task),
            stopped: false,
        })
    }

    /// Start the service and block until it has been stopped and torn down.
    pub async fn run(&self) -> Result<(), ServiceError> {
        let mut handle = self.start().await?;
        handle.wait().await;
        Ok(())
    }
}

/// A running service.
pub struct ServiceHandle {
    local_addr: SocketAddr,
    hub: HubHandle,
    shutdown: ShutdownCoordinator,
    grace: std::time::Duration,
    server: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<WatchExit>>,
    hub_task: Option<JoinHandle<()>>,
    stopped: bool,
}

impl ServiceHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle to the running hub.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Request shutdown. Non-blocking; safe to call any number of times.
    pub fn stop(&self) {
        self.shutdown.shutdown();
    }

    /// Wait for a stop request, then shut down in order: listener (bounded by
    /// the grace period), hub, watcher, hub loop.
    ///
    /// Calling it again after it has returned is a no-op.
    pub async fn wait(&mut self) {
        if self.stopped {
            return;
        }
        self.shutdown.cancelled().await;

        let outcome = drain(&mut self.server, self.grace, "http listener").await;
        debug!(?outcome, "listener drained");

        self.hub.shutdown().await;

        if let Some(task) = self.watcher.take() {
            match task.await {
                Ok(exit) => debug!(?exit, "watcher stopped"),
                Err(e) => warn!(error = %e, "watcher task failed"),
            }
        }
        if let Some(task) = self.hub_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "hub task failed");
            }
        }

        self.stopped = true;
        info!("broadcast service stopped");
    }
}

async fn ensure_dir(dir: &std::path::Path) -> Result<(), ServiceError> {
    if dir.as_os_str().is_empty() {
        return Err(ServiceError::EmptyDirectory);
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| ServiceError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })
}

async fn bind(addr: &str) -> Result<TcpListener, ServiceError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServiceError::Bind {
            addr: addr.to_string(),
            source,
        })
}
