//! Key-pair JWT generation.
//!
//! Tokens carry the claims Snowflake expects for key-pair authentication:
//! - `iss`: `<ACCOUNT>.<USER>.SHA256:<public_key_fingerprint>`
//! - `sub`: `<ACCOUNT>.<USER>`
//! - `iat`: issue time (seconds since the epoch)
//! - `exp`: `iat` plus the configured lifetime, never more than one hour

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::DecodePrivateKey;
use serde::{Deserialize, Serialize};

use crate::auth::fingerprint;
use crate::credential::{DEFAULT_TOKEN_LIFETIME, KeyPairCredential};
use crate::error::{Result, StreamingError};

/// Hard upper bound on a generated token's lifetime.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Claims of a key-pair JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Uppercases the account identifier and drops the region suffix of a legacy
/// account locator (everything after the first `.`).
pub fn normalize_account(account: &str) -> String {
    account
        .trim()
        .split('.')
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

/// Uppercases the user name.
pub fn normalize_user(user: &str) -> String {
    user.trim().to_uppercase()
}

/// Lifetime actually used for a token: zero means the default, anything
/// above one hour is clamped.
pub fn effective_lifetime(requested: Duration) -> Duration {
    if requested.is_zero() {
        DEFAULT_TOKEN_LIFETIME
    } else {
        requested.min(MAX_TOKEN_LIFETIME)
    }
}

/// Encodes bytes as unpadded base64url (RFC 7515).
pub fn base64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decodes base64url, accepting input with or without padding.
pub fn base64url_decode(s: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(s.trim_end_matches('='))
        .map_err(|e| StreamingError::Crypto(format!("invalid base64url segment: {}", e)))
}

/// Reads the claims of a compact JWT without verifying its signature.
pub fn decode_claims(token: &str) -> Result<Claims> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(StreamingError::Crypto(
            "token is not a three-part compact JWT".into(),
        ));
    };
    Ok(serde_json::from_slice(&base64url_decode(payload)?)?)
}

/// Parses PKCS#8, encrypted PKCS#8 or PKCS#1 PEM key material.
pub(crate) fn load_private_key(pem: &str, passphrase: Option<&str>) -> Result<RsaPrivateKey> {
    if pem.contains("ENCRYPTED PRIVATE KEY") {
        let passphrase = passphrase.filter(|p| !p.is_empty()).ok_or_else(|| {
            StreamingError::Crypto("private key is encrypted but no passphrase was provided".into())
        })?;
        return RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.as_bytes())
            .map_err(|e| StreamingError::Crypto(format!("failed to decrypt private key: {}", e)));
    }
    if pem.contains("RSA PRIVATE KEY") {
        return RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| StreamingError::Crypto(format!("failed to parse PKCS#1 key: {}", e)));
    }
    RsaPrivateKey::from_pkcs8_pem(pem)
        .map_err(|e| StreamingError::Crypto(format!("failed to parse PKCS#8 key: {}", e)))
}

/// Generates an RS256-signed JWT for `credential`, issued at `now`.
///
/// # Errors
///
/// - [`StreamingError::Credential`] if account, user or key material is missing.
/// - [`StreamingError::Crypto`] if the key cannot be parsed or decrypted
///   (including a missing or wrong passphrase), or signing fails.
pub fn generate_jwt(credential: &KeyPairCredential, now: DateTime<Utc>) -> Result<String> {
    let account = normalize_account(&credential.account);
    let user = normalize_user(&credential.user);
    if account.is_empty() {
        return Err(StreamingError::Credential("account identifier is required".into()));
    }
    if user.is_empty() {
        return Err(StreamingError::Credential("user name is required".into()));
    }

    let pem = credential.private_key_pem()?;
    let private_key = load_private_key(&pem, credential.passphrase.as_deref())?;

    let fp = match &credential.public_key_fingerprint {
        Some(fp) if !fp.trim().is_empty() => fingerprint::strip_prefix(fp).to_string(),
        _ => {
            let full = fingerprint::sha256_fingerprint(&private_key.to_public_key())?;
            full[fingerprint::SHA256_PREFIX.len()..].to_string()
        }
    };

    let iat = now.timestamp();
    let exp = iat + effective_lifetime(credential.token_lifetime).as_secs() as i64;
    let claims = Claims {
        iss: format!("{}.{}.{}{}", account, user, fingerprint::SHA256_PREFIX, fp),
        sub: format!("{}.{}", account, user),
        iat,
        exp,
    };

    let der = private_key
        .to_pkcs1_der()
        .map_err(|e| StreamingError::Crypto(format!("failed to encode private key: {}", e)))?;
    let encoding_key = EncodingKey::from_rsa_der(der.as_bytes());

    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| StreamingError::Crypto(format!("failed to sign JWT: {}", e)))
}
