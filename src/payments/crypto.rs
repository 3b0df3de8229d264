//! AES-256-CBC codec and checksum for the encrypted form gateway (NewebPay).
//!
//! Outbound payloads are PKCS7-padded, encrypted and hex-encoded. Inbound
//! payloads are decoded leniently: the gateway has been observed to pad the
//! return and notify channels inconsistently, so decryption walks an ordered
//! list of strategies before reporting `DecryptFailed`.

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::payments::utils::secure_eq;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
pub const BLOCK_SIZE: usize = 16;

/// Truncation lengths tried as a last resort when a decrypted stream carries
/// trailing garbage. Tuned against the gateway's notify channel; revalidate
/// when the provider changes its padding behaviour.
pub const TRUNCATION_CANDIDATES: [usize; 5] = [512, 496, 480, 464, 448];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid key length: expected {KEY_SIZE} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("invalid iv length: expected {IV_SIZE} bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("decrypt failed after all strategies (ciphertext length {ciphertext_len})")]
    DecryptFailed { ciphertext_len: usize },
}

/// Symmetric codec bound to one merchant's hash key and IV.
#[derive(Clone)]
pub struct CryptoCodec {
    hash_key: String,
    hash_iv: String,
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl std::fmt::Debug for CryptoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoCodec")
            .field("hash_key", &"<redacted>")
            .field("hash_iv", &"<redacted>")
            .finish()
    }
}

impl CryptoCodec {
    pub fn new(hash_key: impl Into<String>, hash_iv: impl Into<String>) -> Result<Self, CodecError> {
        let hash_key = hash_key.into();
        let hash_iv = hash_iv.into();
        let key: [u8; KEY_SIZE] = hash_key
            .as_bytes()
            .try_into()
            .map_err(|_| CodecError::InvalidKeyLength(hash_key.len()))?;
        let iv: [u8; IV_SIZE] = hash_iv
            .as_bytes()
            .try_into()
            .map_err(|_| CodecError::InvalidIvLength(hash_iv.len()))?;
        Ok(Self {
            hash_key,
            hash_iv,
            key,
            iv,
        })
    }

    /// PKCS7-pad, encrypt and hex-encode.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let cipher = Aes256CbcEnc::new(&self.key.into(), &self.iv.into());
        hex::encode(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes()))
    }

    /// Decrypt a hex, base64 or raw ciphertext.
    ///
    /// Strategies, in order, for each candidate encoding:
    /// 1. standard PKCS7 unpadding
    /// 2. recovery of the outermost JSON object from the decrypted stream
    /// 3. PKCS7 unpadding of fixed truncation lengths
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CodecError> {
        let trimmed = ciphertext.trim();
        let encodings: [(&str, Option<Vec<u8>>); 3] = [
            ("hex", hex::decode(trimmed).ok()),
            ("base64", BASE64.decode(trimmed).ok()),
            ("raw", Some(trimmed.as_bytes().to_vec())),
        ];

        for (encoding, bytes) in encodings {
            let Some(bytes) = bytes else { continue };
            if let Some(plaintext) = self.decrypt_bytes(&bytes) {
                debug!(encoding, plaintext_len = plaintext.len(), "ciphertext decoded");
                return Ok(plaintext);
            }
        }

        Err(CodecError::DecryptFailed {
            ciphertext_len: trimmed.len(),
        })
    }

    /// Uppercase SHA-256 over `HashKey=<key>&<cipher>&HashIV=<iv>`.
    pub fn checksum(&self, cipher_hex: &str) -> String {
        checksum_sha256(&self.hash_key, cipher_hex, &self.hash_iv)
    }

    /// Case-insensitive, constant-time comparison against a supplied checksum.
    pub fn verify_checksum(&self, cipher_hex: &str, supplied: &str) -> bool {
        let expected = self.checksum(cipher_hex);
        let supplied = supplied.trim().to_ascii_uppercase();
        secure_eq(expected.as_bytes(), supplied.as_bytes())
    }

    fn decrypt_bytes(&self, ciphertext: &[u8]) -> Option<String> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return None;
        }
        let cipher = Aes256CbcDec::new(&self.key.into(), &self.iv.into());
        let raw = cipher.decrypt_padded_vec_mut::<NoPadding>(ciphertext).ok()?;

        if let Some(text) = strip_pkcs7(&raw).and_then(utf8) {
            return Some(text);
        }
        if let Some(text) = recover_json_object(&raw) {
            debug!(raw_len = raw.len(), "recovered JSON object from unpadded stream");
            return Some(text);
        }
        TRUNCATION_CANDIDATES
            .iter()
            .filter(|len| **len < raw.len())
            .find_map(|len| {
                let text = strip_pkcs7(&raw[..*len]).and_then(utf8)?;
                debug!(truncated_to = *len, "decoded after truncation");
                Some(text)
            })
    }
}

pub fn checksum_sha256(hash_key: &str, cipher_hex: &str, hash_iv: &str) -> String {
    let input = format!("HashKey={}&{}&HashIV={}", hash_key, cipher_hex, hash_iv);
    hex::encode_upper(Sha256::digest(input.as_bytes()))
}

fn strip_pkcs7(data: &[u8]) -> Option<&[u8]> {
    let pad = *data.last()? as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > data.len() {
        return None;
    }
    let (body, padding) = data.split_at(data.len() - pad);
    padding.iter().all(|b| *b as usize == pad).then_some(body)
}

fn utf8(bytes: &[u8]) -> Option<String> {
    String::from_utf8(bytes.to_vec()).ok()
}

/// Take everything from the first `{` to the last `}` that still parses as a
/// JSON object, scanning closing braces from the end of the stream.
fn recover_json_object(raw: &[u8]) -> Option<String> {
    let start = raw.iter().position(|b| *b == b'{')?;
    let closing = raw
        .iter()
        .enumerate()
        .skip(start)
        .filter(|(_, b)| **b == b'}')
        .map(|(i, _)| i)
        .collect::<Vec<_>>();

    closing.into_iter().rev().find_map(|end| {
        let candidate = &raw[start..=end];
        match serde_json::from_slice::<serde_json::Value>(candidate) {
            Ok(serde_json::Value::Object(_)) => utf8(candidate),
            _ => None,
        }
    })
}
