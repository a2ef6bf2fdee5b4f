use anyhow::{Result, anyhow};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Deserialize)]
struct SessionClaims {
    sub: Option<String>,
    email: Option<String>,
    exp: Option<u64>,
    iss: Option<String>,
}

/// Signed-in Builder Hub user behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPrincipal {
    pub user_id: String,
    pub email: Option<String>,
}

/// Pulls the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Result<&str> {
    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| anyhow!("invalid Authorization format"))?
        .trim();
    if token.is_empty() {
        return Err(anyhow!("missing bearer token"));
    }
    Ok(token)
}

/// Decodes an HS256 session token. The token must carry a subject and an
/// expiry in the future; the issuer is checked when one is configured.
pub fn verify_session_token(token: &str, secret: &str, expected_issuer: Option<&str>) -> Result<SessionPrincipal> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let claims = decode::<SessionClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|_| anyhow!("invalid session token"))?
        .claims;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs();
    let exp = claims.exp.ok_or_else(|| anyhow!("session token has no exp claim"))?;
    if exp <= now {
        return Err(anyhow!("session expired"));
    }

    if let Some(expected) = expected_issuer {
        let issuer = claims
            .iss
            .as_deref()
            .ok_or_else(|| anyhow!("session token has no iss claim"))?;
        if issuer != expected {
            return Err(anyhow!("unexpected session issuer {issuer}"));
        }
    }

    let user_id = claims.sub.as_deref().map(str::trim).unwrap_or_default();
    if user_id.is_empty() {
        return Err(anyhow!("session token has no subject"));
    }

    Ok(SessionPrincipal {
        user_id: user_id.to_owned(),
        email: claims.email,
    })
}
