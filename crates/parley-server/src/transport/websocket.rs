//! WebSocket listener and upgrade using tokio-tungstenite.
//!
//! The handshake gate runs inside the HTTP upgrade callback, so a rejected
//! request gets a plain HTTP error and never becomes a WebSocket.

use crate::handshake::Gate;
use parley_core::{ParleyError, ParleyResult, UserId};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

pub type WsStream = WebSocketStream<TcpStream>;

/// An upgraded, authenticated connection.
pub struct AcceptedConnection {
    pub ws_stream: WsStream,
    pub remote_addr: SocketAddr,
    /// Identity established by the handshake token.
    pub user: UserId,
}

/// Bind the TCP listener for the WebSocket endpoint.
pub async fn bind(addr: SocketAddr) -> ParleyResult<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ParleyError::Transport(format!("WS bind failed: {e}")))?;
    let local = listener.local_addr()?;
    info!(addr = %local, "WebSocket listener started");
    Ok(listener)
}

/// Run the HTTP upgrade on an accepted TCP stream.
///
/// Fails when the gate rejects the request, the peer is not speaking
/// WebSocket, or the handshake does not finish within `handshake_timeout`.
pub async fn upgrade(
    stream: TcpStream,
    remote_addr: SocketAddr,
    gate: &Gate,
    max_message_size: usize,
    handshake_timeout: Duration,
) -> ParleyResult<AcceptedConnection> {
    let mut admitted: Option<UserId> = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match gate.admit(remote_addr.ip(), request) {
            Ok(user) => {
                admitted = Some(user);
                Ok(response)
            }
            Err(rejection) => {
                warn!(
                    remote = %remote_addr,
                    status = rejection.status().as_u16(),
                    reason = %rejection,
                    "handshake rejected"
                );
                Err(rejection.to_response())
            }
        }
    };

    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);

    let ws_stream = tokio::time::timeout(
        handshake_timeout,
        tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(config)),
    )
    .await
    .map_err(|_| ParleyError::Timeout)?
    .map_err(|e| ParleyError::Transport(format!("WS handshake failed: {e}")))?;

    let user = admitted.ok_or_else(|| {
        ParleyError::AuthFailed("upgrade completed without an identity".into())
    })?;
    debug!(remote = %remote_addr, user = %user, "WebSocket connection accepted");

    Ok(AcceptedConnection {
        ws_stream,
        remote_addr,
        user,
    })
}
