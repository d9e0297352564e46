//! HS256 JWT authenticator.

use super::{AuthError, Authenticator};
use parley_core::{verify_token, UserId};
use tracing::debug;

/// Validates tokens signed with a shared HMAC secret.
pub struct JwtAuthenticator {
    secret: Vec<u8>,
}

impl JwtAuthenticator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl Authenticator for JwtAuthenticator {
    fn validate(&self, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        verify_token(&self.secret, token).map_err(|e| {
            debug!(error = %e, "token rejected");
            AuthError::InvalidToken(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::issue_token;

    #[test]
    fn accepts_token_signed_with_same_secret() {
        let auth = JwtAuthenticator::new("s3cret");
        let user = UserId::random();
        let token = issue_token(b"s3cret", user, 60).unwrap();
        assert_eq!(auth.validate(&token), Ok(user));
    }

    #[test]
    fn rejects_missing_and_foreign_tokens() {
        let auth = JwtAuthenticator::new("s3cret");
        assert_eq!(auth.validate(""), Err(AuthError::MissingToken));
        let token = issue_token(b"other", UserId::random(), 60).unwrap();
        assert!(matches!(auth.validate(&token), Err(AuthError::InvalidToken(_))));
    }
}
