//! TCP Server
//!
//! Binds the listener and runs the accept loop. Every accepted connection is
//! spawned into a [`JoinSet`] as its own [`Session`](crate::connection::Session)
//! task, so the loop itself never waits on a client.
//!
//! ## Connection Limit
//!
//! A [`Semaphore`] holds one permit per allowed connection. The loop takes a
//! permit *before* calling `accept`, so once the limit is reached new clients
//! queue in the kernel backlog until a session ends and returns its permit.
//!
//! ## Shutdown
//!
//! When the shutdown future completes the listener is dropped, every session
//! is told to stop through a `watch` channel, and the loop waits for all of
//! them to finish. A session in the middle of a request gets a short grace
//! period to write its reply, so a client that stops reading cannot hold
//! shutdown up.

use crate::commands::Dispatcher;
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::{ExpiryConfig, ExpirySweeper, StorageEngine};
use std::future::Future;
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

/// First delay after a failed `accept`.
const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(10);

/// Longest delay between `accept` retries.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum number of concurrently served clients
    pub max_connections: usize,

    /// Run the background expiry sweeper with this configuration.
    /// `None` leaves expiry purely lazy.
    pub active_expiry: Option<ExpiryConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            max_connections: crate::DEFAULT_MAX_CONNECTIONS,
            active_expiry: None,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Errors that prevent the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Binds the listener, creates an empty store and serves clients until
/// `shutdown` completes.
pub async fn run(config: ServerConfig, shutdown: impl Future) -> Result<(), ServerError> {
    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!("Listening on {}", addr);

    let storage = Arc::new(StorageEngine::new());
    info!("Storage engine initialized");

    serve(listener, storage, &config, shutdown).await;
    Ok(())
}

/// Runs the accept loop on an already bound listener.
///
/// Returns once `shutdown` has completed and every session has ended.
pub async fn serve(
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    config: &ServerConfig,
    shutdown: impl Future,
) {
    tokio::pin!(shutdown);

    let permits = config.max_connections.clamp(1, Semaphore::MAX_PERMITS);
    let limit = Arc::new(Semaphore::new(permits));
    let (notify_shutdown, _) = watch::channel(false);
    let mut sessions = JoinSet::new();

    let sweeper = config
        .active_expiry
        .clone()
        .map(|expiry| {
            ExpirySweeper::new(Arc::clone(&storage), expiry, notify_shutdown.subscribe()).spawn()
        });

    let dispatcher = Dispatcher::new(storage);
    let stats = Arc::new(ConnectionStats::new());
    let mut backoff = ACCEPT_BACKOFF_START;

    loop {
        while let Some(result) = sessions.try_join_next() {
            log_task_exit("Connection", result);
        }

        let permit = tokio::select! {
            permit = Arc::clone(&limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                // The semaphore is never closed
                Err(_) => break,
            },
            _ = &mut shutdown => break,
        };

        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = &mut shutdown => break,
        };

        match accepted {
            Ok((stream, peer)) => {
                backoff = ACCEPT_BACKOFF_START;

                if let Err(e) = stream.set_nodelay(true) {
                    debug!(client = %peer, error = %e, "Failed to set TCP_NODELAY");
                }

                let dispatcher = dispatcher.clone();
                let stats = Arc::clone(&stats);
                let shutdown_rx = notify_shutdown.subscribe();

                sessions.spawn(async move {
                    handle_connection(stream, peer, dispatcher, stats, shutdown_rx).await;
                    drop(permit);
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = &mut shutdown => break,
                }
                backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
            }
        }
    }

    info!(
        active = sessions.len(),
        "Shutdown signal received, draining connections"
    );
    drop(listener);
    notify_shutdown.send_replace(true);

    while let Some(result) = sessions.join_next().await {
        log_task_exit("Connection", result);
    }
    if let Some(sweeper) = sweeper {
        log_task_exit("Expiry sweeper", sweeper.await);
    }

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
}

fn log_task_exit(task: &str, result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(task, error = %e, "Task panicked");
        } else {
            debug!(task, error = %e, "Task cancelled");
        }
    }
}
