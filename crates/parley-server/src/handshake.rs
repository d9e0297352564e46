//! Handshake gate.
//!
//! Runs inside the WebSocket upgrade, before any session state exists:
//! 1. Request path must match the configured endpoint
//! 2. `Origin`, when present, must be allowed
//! 3. The client IP must be under its handshake rate limit
//! 4. A bearer token (`?token=` or `Authorization: Bearer`) must validate
//!
//! Any failure answers the upgrade request with an HTTP error status and no
//! session is created.

use crate::auth::{AuthError, Authenticator, HandshakeLimiter};
use parley_core::UserId;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tracing::debug;

/// Why an upgrade request was refused.
#[derive(Debug, Error)]
pub enum HandshakeRejection {
    #[error("unknown path: {0}")]
    NotFound(String),

    #[error("origin not allowed: {0}")]
    OriginDenied(String),

    #[error("too many handshake attempts")]
    RateLimited,

    #[error(transparent)]
    Unauthorized(#[from] AuthError),
}

impl HandshakeRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            HandshakeRejection::NotFound(_) => StatusCode::NOT_FOUND,
            HandshakeRejection::OriginDenied(_) => StatusCode::FORBIDDEN,
            HandshakeRejection::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            HandshakeRejection::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    fn body(&self) -> &'static str {
        match self {
            HandshakeRejection::NotFound(_) => "not found",
            HandshakeRejection::OriginDenied(_) => "origin not allowed",
            HandshakeRejection::RateLimited => "too many requests",
            HandshakeRejection::Unauthorized(AuthError::MissingToken) => "token required",
            HandshakeRejection::Unauthorized(AuthError::InvalidToken(_)) => "invalid token",
        }
    }

    /// The HTTP response sent instead of the upgrade.
    pub fn to_response(&self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.body().to_string()));
        *response.status_mut() = self.status();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }
}

/// Allow-list for the `Origin` header.
///
/// Empty list or `"*"` allows every origin. Otherwise an origin is allowed
/// when it equals an entry, or extends it with a port or path (`:` or `/`
/// right after the entry), so `http://localhost` covers
/// `http://localhost:3000` but not `http://localhost.evil.example`.
/// Requests without an `Origin` header (non-browser clients) are always
/// allowed.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed: Vec<String>,
    allow_all: bool,
}

impl OriginPolicy {
    pub fn new(allowed: Vec<String>) -> Self {
        let allow_all = allowed.is_empty() || allowed.iter().any(|o| o == "*");
        Self { allowed, allow_all }
    }

    pub fn allows(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(_) if self.allow_all => true,
            Some(origin) => self.allowed.iter().any(|a| origin_matches(a, origin)),
        }
    }
}

fn origin_matches(entry: &str, origin: &str) -> bool {
    match origin.strip_prefix(entry) {
        Some(rest) => rest.is_empty() || rest.starts_with([':', '/']),
        None => false,
    }
}

/// Admission checks for the WebSocket endpoint.
pub struct Gate {
    path: String,
    origins: OriginPolicy,
    authenticator: Arc<dyn Authenticator>,
    limiter: Mutex<HandshakeLimiter>,
}

impl Gate {
    pub fn new(
        path: impl Into<String>,
        origins: OriginPolicy,
        authenticator: Arc<dyn Authenticator>,
        limiter: HandshakeLimiter,
    ) -> Self {
        Self {
            path: path.into(),
            origins,
            authenticator,
            limiter: Mutex::new(limiter),
        }
    }

    /// Decide whether `request` from `peer` may open a session, and as whom.
    pub fn admit(&self, peer: IpAddr, request: &Request) -> Result<UserId, HandshakeRejection> {
        let path = request.uri().path();
        if path != self.path {
            return Err(HandshakeRejection::NotFound(path.to_string()));
        }

        let origin = request
            .headers()
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok());
        if !self.origins.allows(origin) {
            return Err(HandshakeRejection::OriginDenied(
                origin.unwrap_or_default().to_string(),
            ));
        }

        let allowed = self
            .limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check(&peer);
        if !allowed {
            return Err(HandshakeRejection::RateLimited);
        }

        let token = extract_token(request).ok_or(AuthError::MissingToken)?;
        let user = self.authenticator.validate(&token)?;
        debug!(peer = %peer, user = %user, "handshake admitted");
        Ok(user)
    }
}

/// Pull the bearer token from the `token` query parameter, falling back to
/// an `Authorization: Bearer` header.
pub fn extract_token(request: &Request) -> Option<String> {
    if let Some(token) = request
        .uri()
        .query()
        .and_then(|q| query_param(q, "token"))
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_string());
    }

    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == key).then_some(v)
    })
}
