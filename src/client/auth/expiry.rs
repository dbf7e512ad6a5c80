//! Local, unverified look at an access token's `exp` claim.
//!
//! This only saves a request that is bound to fail with 401. The signature
//! is not checked, so nothing here may be used to decide what a user is
//! allowed to do.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use serde::Deserialize;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<f64>,
    iat: Option<f64>,
}

/// Seconds since the UNIX epoch at which `token` stops being valid.
pub fn expires_at(token: &str) -> Option<f64> {
    claims(token)?.exp.filter(|exp| exp.is_finite())
}

/// Seconds since the UNIX epoch at which `token` was issued, when it says so.
pub fn issued_at(token: &str) -> Option<f64> {
    claims(token)?.iat.filter(|iat| iat.is_finite())
}

fn claims(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = match (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) {
        (Some(header), Some(payload), Some(signature), None) => (header, payload, signature),
        _ => return None,
    };
    let payload = URL_SAFE_LENIENT.decode(payload).ok()?;
    serde_json::from_slice(&payload).ok()
}

/// Whether `token` expires within `threshold` of `now`.
///
/// Anything that can't be read (no token, wrong shape, bad payload, no `exp`)
/// counts as expiring.
pub fn expires_within(token: Option<&str>, threshold: Duration, now: SystemTime) -> bool {
    let exp = match token.and_then(expires_at) {
        Some(exp) => exp,
        None => return true,
    };
    let now = match now.duration_since(UNIX_EPOCH) {
        Ok(now) => now.as_secs_f64(),
        Err(_) => return true,
    };
    exp <= now + threshold.as_secs_f64()
}

#[cfg(test)]
pub(crate) fn encode_token(claims: &serde_json::Value) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    format!(
        "{}.{}.signature",
        engine.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
        engine.encode(claims.to_string()),
    )
}
