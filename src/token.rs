use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::types::{IdentityRecord, UserId};

/// Why an access token could not be turned into an identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TokenError {
    #[error("invalid token format")]
    InvalidFormat,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("missing claim: {0}")]
    MissingClaim(&'static str),
    #[error("invalid expiry claim")]
    InvalidExpiry,
}

/// Decodes the identity claims of a JWT access token without checking expiry.
///
/// The signature is not verified; the server stays the authority on token
/// validity. Claim-name drift is normalized here:
/// - user id from `user_id`, `id` or `sub` (string or number)
/// - mentor flag from `is_mentor`, falling back to `role == "mentor"`
///
/// # Errors
///
/// Returns [`TokenError`] if the token is not three dot-separated segments,
/// the payload is not base64url JSON, or `exp` / the user id are missing.
pub fn decode_identity(token: &str) -> Result<IdentityRecord, TokenError> {
    let claims = decode_payload(token)?;

    let user_id = ["user_id", "id", "sub"]
        .iter()
        .find_map(|key| match claims.get(*key) {
            Some(JsonValue::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .map(UserId)
        .ok_or(TokenError::MissingClaim("user_id"))?;

    let expires_at = expiry(claims.get("exp").ok_or(TokenError::MissingClaim("exp"))?)?;

    let username = claims
        .get("username")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_owned();

    let email = claims
        .get("email")
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned);

    let is_mentor = match claims.get("is_mentor").and_then(JsonValue::as_bool) {
        Some(flag) => flag,
        None => claims
            .get("role")
            .and_then(JsonValue::as_str)
            .is_some_and(|role| role.eq_ignore_ascii_case("mentor")),
    };

    Ok(IdentityRecord {
        user_id,
        username,
        email,
        is_mentor,
        expires_at,
    })
}

/// Extracts the JSON payload (second segment) of a JWT.
fn decode_payload(token: &str) -> Result<serde_json::Map<String, JsonValue>, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts[1].is_empty() {
        return Err(TokenError::InvalidFormat);
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| TokenError::InvalidPayload(e.to_string()))?;

    match serde_json::from_slice(&bytes) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(TokenError::InvalidPayload("not a JSON object".into())),
        Err(e) => Err(TokenError::InvalidPayload(e.to_string())),
    }
}

fn expiry(exp: &JsonValue) -> Result<OffsetDateTime, TokenError> {
    if let Some(secs) = exp.as_i64() {
        return OffsetDateTime::from_unix_timestamp(secs).map_err(|_| TokenError::InvalidExpiry);
    }
    // Fractional seconds keep sub-second precision.
    let secs = exp.as_f64().ok_or(TokenError::InvalidExpiry)?;
    if !secs.is_finite() {
        return Err(TokenError::InvalidExpiry);
    }
    OffsetDateTime::from_unix_timestamp_nanos((secs * 1e9) as i128)
        .map_err(|_| TokenError::InvalidExpiry)
}
