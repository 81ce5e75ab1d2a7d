//! Account-level authentication: key-pair JWTs, their cache, and the token
//! sources the session client can be built from.

pub mod cache;
pub mod fingerprint;
pub mod jwt;

use std::fmt;

use crate::credential::{CredentialProvider, EnvProvider, KeyPairCredential};
use crate::error::Result;

pub use cache::{CachedToken, TokenCache};

/// Value of the `X-Snowflake-Authorization-Token-Type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    /// A JWT supplied by the caller.
    Jwt,
    /// A JWT generated in-process from a key pair.
    KeyPairJwt,
    /// The scoped session token returned by the token exchange.
    OAuth,
}

impl TokenType {
    pub fn as_header_value(&self) -> &'static str {
        match self {
            TokenType::Jwt => "JWT",
            TokenType::KeyPairJwt => "KEYPAIR_JWT",
            TokenType::OAuth => "OAuth",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_header_value())
    }
}

/// A bearer token and the type marker sent alongside it.
#[derive(Clone)]
pub struct BearerToken {
    pub token: String,
    pub token_type: TokenType,
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("token", &"****")
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Produces the long-lived token used against the account host.
#[derive(Debug)]
pub enum AccountTokenSource {
    /// A token obtained elsewhere, sent as-is.
    Static(BearerToken),
    /// Key-pair JWTs generated and cached in-process.
    KeyPair(TokenCache),
}

impl AccountTokenSource {
    /// Uses a caller-supplied JWT.
    pub fn jwt(token: impl Into<String>) -> Self {
        AccountTokenSource::Static(BearerToken {
            token: token.into(),
            token_type: TokenType::Jwt,
        })
    }

    /// Generates `KEYPAIR_JWT` tokens from `credential`.
    pub fn key_pair(credential: KeyPairCredential) -> Self {
        AccountTokenSource::KeyPair(TokenCache::key_pair(credential))
    }

    /// Resolves a key-pair credential from `provider`.
    pub fn from_provider(provider: &dyn CredentialProvider) -> Result<Self> {
        Ok(Self::key_pair(provider.resolve()?))
    }

    /// Resolves a key-pair credential from `SNOWFLAKE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_provider(&EnvProvider)
    }

    pub fn token_type(&self) -> TokenType {
        match self {
            AccountTokenSource::Static(bearer) => bearer.token_type,
            AccountTokenSource::KeyPair(cache) => cache.token_type(),
        }
    }

    /// Returns the bearer token to send with the next account-plane request.
    pub async fn bearer(&self) -> Result<BearerToken> {
        match self {
            AccountTokenSource::Static(bearer) => Ok(bearer.clone()),
            AccountTokenSource::KeyPair(cache) => Ok(BearerToken {
                token: cache.get_token().await?,
                token_type: cache.token_type(),
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_values() {
        assert_eq!(TokenType::Jwt.as_header_value(), "JWT");
        assert_eq!(TokenType::KeyPairJwt.as_header_value(), "KEYPAIR_JWT");
        assert_eq!(TokenType::OAuth.to_string(), "OAuth");
    }

    #[test]
    fn bearer_debug_redacts_token() {
        let bearer = BearerToken {
            token: "eyJhbGciOi.secret".into(),
            token_type: TokenType::Jwt,
        };
        let debug = format!("{:?}", bearer);
        assert!(debug.contains("****"));
        assert!(!debug.contains("secret"));
    }

    #[tokio::test]
    async fn static_source_returns_token_as_is() {
        let source = AccountTokenSource::jwt("caller-jwt");
        assert_eq!(source.token_type(), TokenType::Jwt);
        let bearer = source.bearer().await.unwrap();
        assert_eq!(bearer.token, "caller-jwt");
        assert_eq!(bearer.token_type, TokenType::Jwt);
    }

    #[tokio::test]
    async fn key_pair_source_generates_keypair_jwt() {
        let cred = KeyPairCredential::new("acct", "user", test_keys::pkcs8_pem());
        let source = AccountTokenSource::key_pair(cred);
        assert_eq!(source.token_type(), TokenType::KeyPairJwt);
        let bearer = source.bearer().await.unwrap();
        assert_eq!(bearer.token_type, TokenType::KeyPairJwt);
        assert_eq!(jwt::decode_claims(&bearer.token).unwrap().sub, "ACCT.USER");
    }
}
