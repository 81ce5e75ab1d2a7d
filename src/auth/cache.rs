//! Cached account tokens with single-flight refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::auth::TokenType;
use crate::auth::jwt;
use crate::credential::KeyPairCredential;
use crate::error::{Result, StreamingError};

/// A generated token and the instant it stops being valid.
#[derive(Clone)]
pub struct CachedToken {
    pub token: String,
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("token", &"****")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CachedToken {
    /// `true` while `expires_at - skew` is still after `now`.
    fn is_fresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        (self.expires_at - now)
            .to_std()
            .map(|remaining| remaining > skew)
            .unwrap_or(false)
    }
}

type Generator = dyn Fn(DateTime<Utc>) -> Result<String> + Send + Sync;

/// Returns the cached token until it is within `skew` of expiry, then
/// regenerates it.
///
/// The slot lock is held across regeneration, so concurrent callers in the
/// same refresh window wait for the first one and receive its token. The
/// generator runs on the blocking thread pool since it may read a key file
/// and sign with RSA.
pub struct TokenCache {
    generate: Arc<Generator>,
    token_type: TokenType,
    skew: Duration,
    slot: Mutex<Option<CachedToken>>,
    generations: AtomicU64,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("token_type", &self.token_type)
            .field("skew", &self.skew)
            .field("generations", &self.generations.load(Ordering::Relaxed))
            .finish()
    }
}

impl TokenCache {
    /// Wraps an arbitrary generator. Generated tokens must be compact JWTs
    /// carrying an `exp` claim.
    pub fn new<F>(token_type: TokenType, skew: Duration, generate: F) -> Self
    where
        F: Fn(DateTime<Utc>) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            generate: Arc::new(generate),
            token_type,
            skew,
            slot: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    /// Caches `KEYPAIR_JWT` tokens generated from `credential`.
    pub fn key_pair(credential: KeyPairCredential) -> Self {
        let skew = credential.clock_skew;
        Self::new(TokenType::KeyPairJwt, skew, move |now| {
            jwt::generate_jwt(&credential, now)
        })
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    /// Number of times the generator has run.
    pub fn generation_count(&self) -> u64 {
        self.generations.load(Ordering::Relaxed)
    }

    /// Returns a valid token, regenerating if the cached one is stale.
    pub async fn get_token(&self) -> Result<String> {
        self.get_token_at(Utc::now()).await
    }

    /// Like [`get_token`](Self::get_token) with an explicit clock reading.
    pub async fn get_token_at(&self, now: DateTime<Utc>) -> Result<String> {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref()
            && cached.is_fresh(now, self.skew)
        {
            return Ok(cached.token.clone());
        }

        let generate = Arc::clone(&self.generate);
        let token = tokio::task::spawn_blocking(move || generate(now))
            .await
            .map_err(|e| StreamingError::Crypto(format!("token generation task failed: {}", e)))??;
        self.generations.fetch_add(1, Ordering::Relaxed);
        let exp = jwt::decode_claims(&token)?.exp;
        let expires_at = DateTime::from_timestamp(exp, 0).ok_or_else(|| {
            StreamingError::Crypto(format!("token exp claim {} is out of range", exp))
        })?;

        debug!(token_type = %self.token_type, %expires_at, "generated account token");
        *slot = Some(CachedToken {
            token: token.clone(),
            token_type: self.token_type,
            expires_at,
        });
        Ok(token)
    }

    /// Snapshot of the cached token, if any.
    pub async fn cached(&self) -> Option<CachedToken> {
        self.slot.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_keys;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;

    /// Unsigned compact token with the given expiry; enough for the cache.
    fn fake_token(iat: i64, exp: i64, n: usize) -> String {
        let claims = jwt::Claims {
            iss: format!("ISS{}", n),
            sub: "SUB".into(),
            iat,
            exp,
        };
        format!(
            "{}.{}.sig",
            jwt::base64url_encode(br#"{"alg":"none"}"#),
            jwt::base64url_encode(&serde_json::to_vec(&claims).unwrap())
        )
    }

    fn counting_cache(lifetime_secs: i64, skew: Duration) -> (TokenCache, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = TokenCache::new(TokenType::KeyPairJwt, skew, move |now| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(fake_token(now.timestamp(), now.timestamp() + lifetime_secs, n))
        });
        (cache, calls)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn returns_cached_token_while_fresh() {
        let (cache, calls) = counting_cache(3600, Duration::from_secs(300));
        let first = cache.get_token_at(t0()).await.unwrap();
        let second = cache
            .get_token_at(t0() + chrono::Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn regenerates_within_skew_of_expiry() {
        let (cache, calls) = counting_cache(3600, Duration::from_secs(300));
        let first = cache.get_token_at(t0()).await.unwrap();
        let refreshed = cache
            .get_token_at(t0() + chrono::Duration::minutes(56))
            .await
            .unwrap();
        assert_ne!(first, refreshed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.generation_count(), 2);
    }

    #[tokio::test]
    async fn records_parsed_expiry() {
        let (cache, _) = counting_cache(600, Duration::from_secs(60));
        cache.get_token_at(t0()).await.unwrap();
        let cached = cache.cached().await.unwrap();
        assert_eq!(cached.expires_at, t0() + chrono::Duration::seconds(600));
        assert_eq!(cached.token_type, TokenType::KeyPairJwt);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_trigger_one_generation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache = Arc::new(TokenCache::new(
            TokenType::KeyPairJwt,
            Duration::from_secs(300),
            move |now| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                // Widen the window in which other callers pile up.
                std::thread::sleep(Duration::from_millis(50));
                Ok(fake_token(now.timestamp(), now.timestamp() + 3600, n))
            },
        ));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            tasks.spawn(async move { cache.get_token().await });
        }

        let mut tokens = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            tokens.push(joined.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(tokens.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn generator_failure_leaves_cache_empty() {
        let cache = TokenCache::new(TokenType::KeyPairJwt, Duration::from_secs(60), |_| {
            Err(StreamingError::Credential("no key".into()))
        });
        assert!(cache.get_token().await.is_err());
        assert!(cache.cached().await.is_none());
        assert_eq!(cache.generation_count(), 0);
    }

    #[tokio::test]
    async fn generator_runs_off_the_runtime_thread() {
        let caller = std::thread::current().id();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let record = Arc::clone(&seen);
        let cache = TokenCache::new(TokenType::KeyPairJwt, Duration::from_secs(60), move |now| {
            *record.lock().unwrap() = Some(std::thread::current().id());
            Ok(fake_token(now.timestamp(), now.timestamp() + 600, 1))
        });
        cache.get_token_at(t0()).await.unwrap();
        let generator_thread = seen.lock().unwrap().unwrap();
        assert_ne!(generator_thread, caller);
    }

    #[tokio::test]
    async fn panicking_generator_is_a_crypto_error() {
        let cache = TokenCache::new(TokenType::KeyPairJwt, Duration::from_secs(60), |_| {
            panic!("signer blew up")
        });
        let err = cache.get_token().await.unwrap_err();
        assert!(matches!(err, StreamingError::Crypto(_)), "{:?}", err);
        assert!(cache.cached().await.is_none());
        assert_eq!(cache.generation_count(), 0);
    }

    #[tokio::test]
    async fn key_pair_cache_uses_credential_skew() {
        let cred = KeyPairCredential::new("acct", "user", test_keys::pkcs8_pem())
            .with_token_lifetime(Duration::from_secs(600))
            .with_clock_skew(Duration::from_secs(60));
        let cache = TokenCache::key_pair(cred);
        let token = cache.get_token_at(t0()).await.unwrap();
        let again = cache
            .get_token_at(t0() + chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(token, again);
        assert_eq!(cache.token_type(), TokenType::KeyPairJwt);
        assert_eq!(cache.generation_count(), 1);
    }
}
