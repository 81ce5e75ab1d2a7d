//! Public key fingerprints in the form Snowflake stores them for a user.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rsa::RsaPublicKey;
use rsa::pkcs8::EncodePublicKey;
use sha2::{Digest, Sha256};

use crate::error::{Result, StreamingError};

/// Prefix of a SHA-256 public key fingerprint.
pub const SHA256_PREFIX: &str = "SHA256:";

/// Computes `SHA256:<base64>` over the DER-encoded SubjectPublicKeyInfo.
pub fn sha256_fingerprint(public_key: &RsaPublicKey) -> Result<String> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| StreamingError::Crypto(format!("failed to encode public key: {}", e)))?;
    let digest = Sha256::digest(der.as_bytes());
    Ok(format!("{}{}", SHA256_PREFIX, BASE64.encode(digest)))
}

/// Strips an optional `SHA256:` prefix from a caller-supplied fingerprint.
pub(crate) fn strip_prefix(fingerprint: &str) -> &str {
    fingerprint
        .trim()
        .strip_prefix(SHA256_PREFIX)
        .unwrap_or(fingerprint.trim())
}
