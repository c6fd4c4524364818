//! HMAC-SHA512 verification of inbound run task requests.
//!
//! The digest is always computed over the raw request bytes as received,
//! never over a re-serialised JSON value.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "x-tfc-task-signature";

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing x-tfc-task-signature header")]
    Missing,

    #[error("signature mismatch (expected {expected}, received {received})")]
    Mismatch { expected: String, received: String },

    #[error("invalid HMAC key: {0}")]
    InvalidKey(String),
}

/// Hex-encoded HMAC-SHA512 of `body` under `key`.
pub fn compute_signature(key: &[u8], body: &[u8]) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha512::new_from_slice(key).map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks the header-supplied signature against the digest of `body`.
pub fn verify_signature(
    key: &[u8],
    body: &[u8],
    provided: Option<&str>,
) -> Result<(), SignatureError> {
    let provided = provided.map(str::trim).unwrap_or_default();
    if provided.is_empty() {
        return Err(SignatureError::Missing);
    }

    let expected = compute_signature(key, body)?;
    let received = provided.to_ascii_lowercase();
    if constant_time_eq(expected.as_bytes(), received.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch {
            expected,
            received: provided.to_string(),
        })
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
