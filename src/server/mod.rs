// src/server/mod.rs

//! TCP front end: one session per connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::errors::{LiverunError, Result};
use crate::session::SessionSettings;

pub mod connection;
pub mod protocol;

pub use protocol::{ClientFrame, ServerFrame};

/// Extra time on top of the session bounds before abandoning connections.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    settings: Arc<SessionSettings>,
}

impl Server {
    /// Bind the listening socket. Port 0 picks a free port.
    pub async fn bind(host: &str, port: u16, settings: Arc<SessionSettings>) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await.map_err(|e| {
            LiverunError::ConfigError(format!("cannot listen on {host}:{port}: {e}"))
        })?;

        Ok(Self { listener, settings })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until `shutdown` resolves, then terminate every
    /// session and wait (bounded) for their cleanup.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(%addr, "listening");

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(connection::serve(
                            stream,
                            peer,
                            Arc::clone(&self.settings),
                            stop_rx.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(res) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = res {
                        error!(error = %e, "connection task failed");
                    }
                }
            }
        }

        let _ = stop_tx.send(true);

        let bound = self.settings.termination_timeout + self.settings.kill_grace + SHUTDOWN_SLACK;
        let drain = async {
            while let Some(res) = connections.join_next().await {
                if let Err(e) = res {
                    error!(error = %e, "connection task failed");
                }
            }
        };

        if timeout(bound, drain).await.is_err() {
            warn!(timeout = ?bound, "sessions did not finish in time; aborting them");
            connections.abort_all();
        }

        info!("server stopped");
        Ok(())
    }
}
