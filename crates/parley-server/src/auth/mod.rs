//! Credential validation and handshake throttling.

pub mod jwt;
pub mod rate_limit;

pub use jwt::JwtAuthenticator;
pub use rate_limit::{HandshakeLimiter, RateLimiter};

use parley_core::UserId;
use thiserror::Error;

/// Why a credential was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("token required")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// Resolves a bearer credential to the identity it was issued for.
pub trait Authenticator: Send + Sync {
    fn validate(&self, token: &str) -> Result<UserId, AuthError>;
}
