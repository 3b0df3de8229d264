//! RFC 6238 time-based one-time passwords (HMAC-SHA1, 30 second step,
//! 6 digits) and the `otpauth://` provisioning URI.

use base32::Alphabet;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

use crate::auth::step_up::TotpError;

type HmacSha1 = Hmac<Sha1>;

pub const STEP_SECS: i64 = 30;
pub const DIGITS: u32 = 6;
/// Accepted steps either side of the current one.
pub const SKEW_STEPS: i64 = 1;

const SECRET_BYTES: usize = 20;
const BASE32: Alphabet = Alphabet::Rfc4648 { padding: false };

/// 160 random bits, base32 without padding (32 characters).
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base32::encode(BASE32, &bytes)
}

pub fn decode_secret(secret: &str) -> Result<Vec<u8>, TotpError> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    match base32::decode(BASE32, &normalized) {
        Some(bytes) if !bytes.is_empty() => Ok(bytes),
        _ => Err(TotpError::InvalidSecret),
    }
}

/// HOTP value for one counter (RFC 4226 dynamic truncation).
pub fn hotp(key: &[u8], counter: u64) -> Result<u32, TotpError> {
    let mut mac = HmacSha1::new_from_slice(key).map_err(|_| TotpError::InvalidSecret)?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);
    Ok(binary % 10u32.pow(DIGITS))
}

pub fn step_for(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(STEP_SECS)
}

pub fn code_at(key: &[u8], at: DateTime<Utc>) -> Result<String, TotpError> {
    let value = hotp(key, step_for(at).max(0) as u64)?;
    Ok(format!("{:0width$}", value, width = DIGITS as usize))
}

/// Check `code` against the step containing `at` and its neighbours.
pub fn verify_code(secret: &str, code: &str, at: DateTime<Utc>) -> Result<bool, TotpError> {
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.chars().all(|c| c.is_ascii_digit()) {
        return Ok(false);
    }
    let Ok(presented) = code.parse::<u32>() else {
        return Ok(false);
    };

    let key = decode_secret(secret)?;
    let current = step_for(at);
    for step in (current - SKEW_STEPS)..=(current + SKEW_STEPS) {
        if step < 0 {
            continue;
        }
        if hotp(&key, step as u64)? == presented {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn provisioning_uri(secret: &str, account_label: &str, issuer: &str) -> String {
    let label = format!("{}:{}", issuer, account_label);
    let encoded_label: String = url::form_urlencoded::byte_serialize(label.as_bytes())
        .collect::<String>()
        .replace('+', "%20");
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("secret", secret)
        .append_pair("issuer", issuer)
        .finish()
        .replace('+', "%20");
    format!("otpauth://totp/{}?{}", encoded_label, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RFC_KEY: &[u8] = b"12345678901234567890";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn matches_rfc_6238_sha1_vectors() {
        assert_eq!(code_at(RFC_KEY, at(59)).unwrap(), "287082");
        assert_eq!(code_at(RFC_KEY, at(1_111_111_109)).unwrap(), "081804");
        assert_eq!(code_at(RFC_KEY, at(1_234_567_890)).unwrap(), "005924");
    }

    #[test]
    fn adjacent_steps_are_accepted() {
        let secret = base32::encode(BASE32, RFC_KEY);
        let now = at(1_111_111_109);
        let previous = code_at(RFC_KEY, now - chrono::Duration::seconds(30)).unwrap();
        let next = code_at(RFC_KEY, now + chrono::Duration::seconds(30)).unwrap();
        let far = code_at(RFC_KEY, now + chrono::Duration::seconds(90)).unwrap();

        assert!(verify_code(&secret, &previous, now).unwrap());
        assert!(verify_code(&secret, &next, now).unwrap());
        assert!(!verify_code(&secret, &far, now).unwrap());
    }

    #[test]
    fn malformed_codes_never_verify() {
        let secret = generate_secret();
        for code in ["", "12345", "1234567", "abcdef"] {
            assert!(!verify_code(&secret, code, Utc::now()).unwrap());
        }
    }

    #[test]
    fn generated_secret_decodes_to_twenty_bytes() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 32);
        assert_eq!(decode_secret(&secret).unwrap().len(), 20);
        assert!(matches!(decode_secret("!!"), Err(TotpError::InvalidSecret)));
    }

    #[test]
    fn provisioning_uri_carries_issuer_and_secret() {
        let uri = provisioning_uri("JBSWY3DPEHPK3PXP", "amy@example.com", "Voucher Gateway");
        assert_eq!(
            uri,
            "otpauth://totp/Voucher%20Gateway%3Aamy%40example.com?secret=JBSWY3DPEHPK3PXP&issuer=Voucher%20Gateway"
        );
    }
}
