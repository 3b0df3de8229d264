//! HMAC-SHA256 request signing for the signed REST gateway (LINE Pay).
//!
//! The signature covers `channel_secret + uri + body + nonce` and is sent
//! base64-encoded in the `X-LINE-Authorization` header. Nonce freshness is the
//! caller's concern.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::payments::error::{PaymentError, PaymentResult};

type HmacSha256 = Hmac<Sha256>;

pub fn sign(secret: &str, uri: &str, body: &str, nonce: &str) -> PaymentResult<String> {
    let mac = mac_for(secret, uri, body, nonce).ok_or_else(|| PaymentError::ValidationError {
        message: "unusable channel secret".to_string(),
        field: Some("channel_secret".to_string()),
    })?;
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Recomputes the signature and compares it in constant time. A signature that
/// is not valid base64 never verifies.
pub fn verify(secret: &str, uri: &str, body: &str, nonce: &str, signature: &str) -> bool {
    let Ok(supplied) = BASE64.decode(signature.trim()) else {
        return false;
    };
    mac_for(secret, uri, body, nonce)
        .map(|mac| mac.verify_slice(&supplied).is_ok())
        .unwrap_or(false)
}

/// Millisecond timestamp used as the request nonce.
pub fn nonce_now() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

fn mac_for(secret: &str, uri: &str, body: &str, nonce: &str) -> Option<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(secret.as_bytes());
    mac.update(uri.as_bytes());
    mac.update(body.as_bytes());
    mac.update(nonce.as_bytes());
    Some(mac)
}
