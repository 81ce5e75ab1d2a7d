use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, StreamingError};

/// Token lifetime used when none (or zero) is configured.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(55 * 60);

/// Default tolerance subtracted from a token's expiry when deciding freshness.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

/// Where the RSA private key is read from.
#[derive(Clone)]
pub enum PrivateKeySource {
    /// PEM contents held in memory.
    Pem(String),
    /// Path to a PEM file, read on every token generation.
    Path(PathBuf),
}

impl std::fmt::Debug for PrivateKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrivateKeySource::Pem(_) => f.write_str("Pem(****)"),
            PrivateKeySource::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

/// Key-pair credential for a Snowflake user.
///
/// The `Debug` implementation redacts the private key and passphrase to prevent
/// accidental leakage in logs.
#[derive(Clone)]
pub struct KeyPairCredential {
    /// Account identifier, e.g. `myorg-myacct` or the legacy `xy12345.us-east-1`.
    pub account: String,
    /// User the public key is registered with.
    pub user: String,
    pub private_key: Option<PrivateKeySource>,
    /// Passphrase for an encrypted PKCS#8 key.
    pub passphrase: Option<String>,
    /// Precomputed public key fingerprint, without the `SHA256:` prefix.
    pub public_key_fingerprint: Option<String>,
    /// Requested token lifetime; clamped to one hour when generating.
    pub token_lifetime: Duration,
    pub clock_skew: Duration,
}

impl std::fmt::Debug for KeyPairCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPairCredential")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("private_key", &self.private_key)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "****"))
            .field("public_key_fingerprint", &self.public_key_fingerprint)
            .field("token_lifetime", &self.token_lifetime)
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

impl KeyPairCredential {
    /// Creates a credential from in-memory PEM key material.
    pub fn new(
        account: impl Into<String>,
        user: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            user: user.into(),
            private_key: Some(PrivateKeySource::Pem(private_key_pem.into())),
            passphrase: None,
            public_key_fingerprint: None,
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }

    /// Creates a credential that reads its key from a PEM file.
    pub fn from_key_file(
        account: impl Into<String>,
        user: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            private_key: Some(PrivateKeySource::Path(path.into())),
            ..Self::new(account, user, String::new())
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn with_public_key_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.public_key_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Resolves the PEM text of the private key.
    pub(crate) fn private_key_pem(&self) -> Result<String> {
        let pem = match &self.private_key {
            Some(PrivateKeySource::Pem(pem)) => pem.clone(),
            Some(PrivateKeySource::Path(path)) => fs::read_to_string(path).map_err(|e| {
                StreamingError::Credential(format!(
                    "cannot read private key file {}: {}",
                    path.display(),
                    e
                ))
            })?,
            None => {
                return Err(StreamingError::Credential(
                    "no private key configured; set a PEM or a key file path".into(),
                ));
            }
        };
        if pem.trim().is_empty() {
            return Err(StreamingError::Credential("private key is empty".into()));
        }
        Ok(pem)
    }
}

/// Resolves a [`KeyPairCredential`] from a specific source.
pub trait CredentialProvider {
    /// Attempt to resolve a credential from this provider.
    fn resolve(&self) -> Result<KeyPairCredential>;
}

/// Provides a credential from explicitly specified values.
pub struct StaticProvider {
    credential: KeyPairCredential,
}

impl StaticProvider {
    pub fn new(credential: KeyPairCredential) -> Self {
        Self { credential }
    }
}

impl CredentialProvider for StaticProvider {
    fn resolve(&self) -> Result<KeyPairCredential> {
        Ok(self.credential.clone())
    }
}

/// Provides a credential from environment variables.
///
/// Reads `SNOWFLAKE_ACCOUNT`, `SNOWFLAKE_USER`, one of `SNOWFLAKE_PRIVATE_KEY`
/// (PEM contents) or `SNOWFLAKE_PRIVATE_KEY_PATH`, and optionally
/// `SNOWFLAKE_PRIVATE_KEY_PASSPHRASE`.
pub struct EnvProvider;

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl CredentialProvider for EnvProvider {
    fn resolve(&self) -> Result<KeyPairCredential> {
        let account = non_empty_var("SNOWFLAKE_ACCOUNT")
            .ok_or_else(|| StreamingError::Credential("SNOWFLAKE_ACCOUNT not set".into()))?;
        let user = non_empty_var("SNOWFLAKE_USER")
            .ok_or_else(|| StreamingError::Credential("SNOWFLAKE_USER not set".into()))?;

        let private_key = match (
            non_empty_var("SNOWFLAKE_PRIVATE_KEY"),
            non_empty_var("SNOWFLAKE_PRIVATE_KEY_PATH"),
        ) {
            (Some(pem), _) => PrivateKeySource::Pem(pem),
            (None, Some(path)) => PrivateKeySource::Path(PathBuf::from(path)),
            (None, None) => {
                return Err(StreamingError::Credential(
                    "SNOWFLAKE_PRIVATE_KEY or SNOWFLAKE_PRIVATE_KEY_PATH must be set".into(),
                ));
            }
        };

        Ok(KeyPairCredential {
            private_key: Some(private_key),
            passphrase: env::var("SNOWFLAKE_PRIVATE_KEY_PASSPHRASE")
                .ok()
                .filter(|p| !p.is_empty()),
            ..KeyPairCredential::new(account, user, String::new())
        })
    }
}
