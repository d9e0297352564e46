//! HS256 bearer tokens.
//!
//! Tokens are JWTs whose claims are `{user_id, exp, iat}`, the format the
//! chat backend's login endpoint issues. The relay only ever verifies them;
//! [`issue_token`] exists for development tooling and tests.

use crate::error::{ParleyError, ParleyResult};
use crate::identity::UserId;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
    /// Issue time, seconds since the Unix epoch.
    pub iat: u64,
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Sign a token for `user_id` valid for `ttl_secs` from now.
pub fn issue_token(secret: &[u8], user_id: UserId, ttl_secs: u64) -> ParleyResult<String> {
    let iat = now_secs();
    let claims = Claims {
        user_id,
        exp: iat + ttl_secs,
        iat,
    };
    encode_claims(secret, &claims)
}

/// Sign arbitrary claims.
pub fn encode_claims(secret: &[u8], claims: &Claims) -> ParleyResult<String> {
    Ok(jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )?)
}

/// Verify a token and return the identity it was issued for.
///
/// Rejects any algorithm other than HS256, bad signatures, expired tokens
/// (with the library's default 60 s leeway) and the nil identity.
pub fn verify_token(secret: &[u8], token: &str) -> ParleyResult<UserId> {
    let validation = Validation::new(Algorithm::HS256);
    let data =
        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    if data.claims.user_id.is_nil() {
        return Err(ParleyError::Token("nil user_id claim".into()));
    }
    Ok(data.claims.user_id)
}

/// Generate a random secret (32 bytes, hex-encoded).
pub fn generate_secret() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}
