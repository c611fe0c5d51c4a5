//! HMAC-signed principal tokens.
//!
//! A token carries a principal and its expiry, signed with a server secret.
//! Format: `hex(claims_json) "." hex(HMAC-SHA256(claims_json))`

use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::principal::{Principal, PrincipalValidator};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    id: u64,
    username: String,
    role: String,
    /// Expiry as unix seconds.
    exp: u64,
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Mint a token for `principal`, valid for `ttl_secs` seconds.
pub fn issue_token(secret: &[u8], principal: &Principal, ttl_secs: u64) -> CoreResult<String> {
    let claims = Claims {
        id: principal.id,
        username: principal.username.clone(),
        role: principal.role.clone(),
        exp: now_secs().saturating_add(ttl_secs),
    };
    let body = serde_json::to_vec(&claims)?;

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let tag = hmac::sign(&key, &body);

    Ok(format!("{}.{}", hex::encode(&body), hex::encode(tag.as_ref())))
}

/// Verify a token and return the principal it carries.
///
/// Checks the structure, the HMAC signature and the expiry time.
pub fn verify_token(secret: &[u8], token: &str) -> CoreResult<Principal> {
    let (body_hex, tag_hex) = token
        .split_once('.')
        .ok_or_else(|| CoreError::Token("malformed token".into()))?;

    let body = hex::decode(body_hex).map_err(|_| CoreError::Token("malformed token body".into()))?;
    let tag = hex::decode(tag_hex).map_err(|_| CoreError::Token("malformed token tag".into()))?;

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, &body, &tag)
        .map_err(|_| CoreError::Token("invalid token signature".into()))?;

    let claims: Claims = serde_json::from_slice(&body)
        .map_err(|e| CoreError::Token(format!("invalid token claims: {e}")))?;

    if now_secs() > claims.exp {
        return Err(CoreError::Token("token expired".into()));
    }

    Ok(Principal {
        id: claims.id,
        username: claims.username,
        role: claims.role,
    })
}

/// Generate a random server secret (32 bytes).
pub fn generate_secret() -> CoreResult<Vec<u8>> {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    let mut secret = vec![0u8; 32];
    rng.fill(&mut secret)
        .map_err(|_| CoreError::Other("system RNG failure".into()))?;
    Ok(secret)
}

/// [`PrincipalValidator`] backed by [`verify_token`].
pub struct HmacTokenValidator {
    secret: Vec<u8>,
}

impl HmacTokenValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }
}

impl PrincipalValidator for HmacTokenValidator {
    fn validate(&self, token: &str) -> CoreResult<Principal> {
        verify_token(&self.secret, token)
    }
}

impl std::fmt::Debug for HmacTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacTokenValidator").finish_non_exhaustive()
    }
}
