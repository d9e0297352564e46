//! Core server: accepts connections, runs the handshake gate, and
//! supervises one task per session.
//!
//! Owns the hub, the listener and the shutdown token. Every connection task
//! lives in a [`JoinSet`] so shutdown can signal them all, wait a bounded
//! grace period, and abort whatever is left.

use crate::auth::{Authenticator, HandshakeLimiter};
use crate::config::ServerConfig;
use crate::handshake::{Gate, OriginPolicy};
use crate::hub::{Hub, HubHandle};
use crate::persist::Persister;
use crate::session::{self, SessionContext};
use crate::transport::websocket;
use parley_core::ParleyResult;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on the HTTP upgrade exchange.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The relay server instance.
pub struct ParleyServer {
    config: ServerConfig,
    listener: TcpListener,
    gate: Arc<Gate>,
    hub: Hub,
    hub_handle: HubHandle,
    persister: Arc<dyn Persister>,
    shutdown: CancellationToken,
}

impl ParleyServer {
    /// Bind the listener and build the hub. Nothing is served until
    /// [`run`](Self::run).
    pub async fn bind(
        config: ServerConfig,
        authenticator: Arc<dyn Authenticator>,
        persister: Arc<dyn Persister>,
    ) -> ParleyResult<Self> {
        let listener = websocket::bind(config.listen).await?;
        let gate = Arc::new(Gate::new(
            config.path.clone(),
            OriginPolicy::new(config.allowed_origins.clone()),
            authenticator,
            HandshakeLimiter::per_minute(config.max_handshakes_per_minute),
        ));
        let (hub, hub_handle) = Hub::new(config.hub.clone());

        Ok(Self {
            config,
            listener,
            gate,
            hub,
            hub_handle,
            persister,
            shutdown: CancellationToken::new(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> ParleyResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the hub, for presence queries and statistics.
    pub fn hub(&self) -> HubHandle {
        self.hub_handle.clone()
    }

    /// Serve until `shutdown` resolves, then close every session and stop.
    pub async fn run<F>(self, shutdown: F) -> ParleyResult<()>
    where
        F: Future<Output = ()>,
    {
        let ParleyServer {
            config,
            listener,
            gate,
            hub,
            hub_handle,
            persister,
            shutdown: stop,
        } = self;

        let hub_task = tokio::spawn(hub.run());
        let ctx = Arc::new(SessionContext {
            hub: hub_handle.clone(),
            persister,
            settings: config.session.clone(),
            shutdown: stop.clone(),
        });
        let max_message_size = config.max_message_size;
        let mut sessions = JoinSet::new();

        info!(
            addr = %listener.local_addr()?,
            path = %config.path,
            echo = config.hub.echo_to_sender,
            "parley-server ready"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let gate = gate.clone();
                        let ctx = ctx.clone();
                        sessions.spawn(async move {
                            match websocket::upgrade(
                                stream,
                                remote,
                                &gate,
                                max_message_size,
                                HANDSHAKE_TIMEOUT,
                            )
                            .await
                            {
                                Ok(conn) => {
                                    info!(remote = %conn.remote_addr, user = %conn.user, "client connected");
                                    session::run(conn.ws_stream, conn.user, ctx).await;
                                }
                                Err(e) => debug!(remote = %remote, error = %e, "upgrade failed"),
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "TCP accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "connection task panicked");
                        }
                    }
                }
            }
        }

        drop(listener);
        stop.cancel();
        info!(active = sessions.len(), "closing sessions");

        let grace = config.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = sessions.len(),
                grace_secs = grace.as_secs(),
                "sessions did not finish in time, aborting"
            );
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }

        hub_handle.shutdown().await;
        if let Err(e) = hub_task.await {
            error!(error = %e, "hub task failed");
        }
        info!("parley-server stopped");
        Ok(())
    }
}
