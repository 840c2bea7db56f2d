//! Accept loop and per-connection HTTP/1.1 serving

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::connection_pool::{ConnectionGuard, ConnectionPool};
use super::handler::{build_call, read_body, render};
use super::SHUTDOWN_TIMEOUT_MS;
use crate::config::Config;
use crate::origin::Origin;
use crate::replay::{FixtureResponse, ReplayEngine};
use crate::{HulkError, Result};

/// HTTP server in front of a [`ReplayEngine`]
pub struct ProxyServer<O> {
    engine: Arc<ReplayEngine<O>>,
    connection_pool: ConnectionPool,
    listen: String,
    max_body_size: usize,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

/// Handle that stops a running [`ProxyServer`]
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Ask the server to stop accepting and drain its connections
    pub fn shutdown(&self) {
        self.tx.send(()).ok();
    }
}

impl<O: Origin + 'static> ProxyServer<O> {
    /// Create a server for `engine` using the listener settings in `config`
    ///
    /// # Errors
    ///
    /// Returns error if `max_connections` is 0
    pub fn new(config: &Config, engine: Arc<ReplayEngine<O>>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Ok(Self {
            engine,
            connection_pool: ConnectionPool::new(config.max_connections)?,
            listen: config.listen.clone(),
            max_body_size: config.max_body_size,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Handle for stopping the server from another task
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Connection limit in effect
    #[must_use]
    pub fn connection_pool(&self) -> &ConnectionPool {
        &self.connection_pool
    }

    /// Bind the configured address and serve until shut down
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen).await.map_err(|e| {
            HulkError::ConfigError(format!("Failed to bind {}: {e}", self.listen))
        })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until Ctrl-C or a shutdown request
    ///
    /// # Errors
    ///
    /// Returns error if the listener address cannot be read
    pub async fn serve(mut self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(
            "Listening on {} (recording: {}, default dataset: {})",
            addr,
            self.engine.is_recording(),
            self.engine.default_dataset()
        );

        let mut connections = JoinSet::new();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let Some(guard) = self.connection_pool.try_acquire() else {
                                warn!("Connection limit reached, rejecting {}", peer_addr);
                                drop(stream);
                                continue;
                            };

                            debug!("Accepted connection from {}", peer_addr);
                            connections.spawn(serve_connection(
                                stream,
                                guard,
                                Arc::clone(&self.engine),
                                self.max_body_size,
                                self.shutdown_tx.subscribe(),
                            ));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(result) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = result {
                        warn!("Connection task failed: {}", e);
                    }
                }
                _ = &mut ctrl_c => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        drop(listener);
        self.shutdown_tx.send(()).ok();

        let shutdown_timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        let drained = tokio::time::timeout(shutdown_timeout, async {
            while let Some(result) = connections.join_next().await {
                if let Err(e) = result {
                    warn!("Connection cleanup error: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown timeout expired, aborting open connections");
            connections.abort_all();
        }

        let stats = self.engine.stats();
        info!(
            "Shutdown complete ({} replayed, {} recorded, {} absent)",
            stats.replays, stats.records, stats.absents
        );
        Ok(())
    }
}

async fn serve_connection<O: Origin + 'static>(
    stream: TcpStream,
    _guard: ConnectionGuard,
    engine: Arc<ReplayEngine<O>>,
    max_body_size: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let service = service_fn(move |request| {
        let engine = Arc::clone(&engine);
        async move { Ok::<_, Infallible>(respond(&engine, request, max_body_size).await) }
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => {
            if let Err(e) = result {
                debug!("Connection error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            connection.as_mut().graceful_shutdown();
            if let Err(e) = connection.as_mut().await {
                debug!("Connection error during shutdown: {}", e);
            }
        }
    }
}

async fn respond<O: Origin>(
    engine: &ReplayEngine<O>,
    request: Request<Incoming>,
    max_body_size: usize,
) -> Response<Full<Bytes>> {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let result = answer(engine, request, max_body_size).await;
    match &result {
        Ok(fixture) => info!("{} {} -> {:?} {}", method, uri, fixture.outcome, fixture.status),
        Err(e) => error!("{} {} failed: {}", method, uri, e),
    }
    render(result)
}

async fn answer<O: Origin>(
    engine: &ReplayEngine<O>,
    request: Request<Incoming>,
    max_body_size: usize,
) -> Result<FixtureResponse> {
    let (parts, body) = request.into_parts();
    let body = read_body(&parts, body, max_body_size).await?;
    let call = build_call(&parts, &body)?;
    engine.handle(&call).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetSelector;
    use crate::origin::{OriginRequest, OriginResponse};
    use tempfile::TempDir;

    struct NoOrigin;

    impl Origin for NoOrigin {
        async fn fetch(&self, request: &OriginRequest) -> Result<OriginResponse> {
            Err(HulkError::OriginTransport(format!("offline: {}", request.url)))
        }
    }

    fn server(temp: &TempDir, max_connections: usize) -> ProxyServer<NoOrigin> {
        let mut config = Config::default()
            .base_dir(temp.path().join("datasets"))
            .pointer_file(temp.path().join("current_dataset.hulk"));
        config.max_connections = max_connections;
        config.listen = "127.0.0.1:0".to_string();

        let selector = Arc::new(DatasetSelector::from_config(&config));
        let engine = Arc::new(ReplayEngine::new(&config, selector, NoOrigin));
        ProxyServer::new(&config, engine).unwrap()
    }

    #[test]
    fn test_server_creation() {
        let temp = TempDir::new().unwrap();
        let server = server(&temp, 10);
        assert_eq!(server.connection_pool().max_connections(), 10);
    }

    #[test]
    fn test_zero_connections_rejected() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default().base_dir(temp.path());
        config.max_connections = 0;

        let selector = Arc::new(DatasetSelector::from_config(&config));
        let engine = Arc::new(ReplayEngine::new(&config, selector, NoOrigin));
        assert!(ProxyServer::new(&config, engine).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let temp = TempDir::new().unwrap();
        let server = server(&temp, 4);
        let shutdown = server.shutdown_handle();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let handle = tokio::spawn(async move { server.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_before_serve() {
        let temp = TempDir::new().unwrap();
        let server = server(&temp, 4);
        server.shutdown_handle().shutdown();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), server.serve(listener)).await;
        assert!(result.unwrap().is_ok());
    }
}
