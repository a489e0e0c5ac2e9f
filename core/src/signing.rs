//! HMAC-SHA256 request signatures for the signed method category.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{BridgeError, Result};

type HmacSha256 = Hmac<Sha256>;

/// The exact bytes that get signed.
pub fn string_to_sign(timestamp: &str, nonce: &str) -> String {
    format!("{timestamp}\n{nonce}")
}

/// Base64 of HMAC-SHA256(`secret`, `timestamp + "\n" + nonce`).
pub fn sign(secret: &str, timestamp: &str, nonce: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BridgeError::Configuration(format!("unusable signing secret: {e}")))?;
    mac.update(string_to_sign(timestamp, nonce).as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}
