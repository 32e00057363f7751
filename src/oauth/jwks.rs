//! Signing key cache backed by a JWKS endpoint.
//!
//! [`KeyCache`] holds the most recently fetched [`KeySet`] and refreshes it
//! when a `kid` is missing or the set is older than its TTL. Concurrent
//! refreshes share one in-flight fetch, so a burst of requests carrying a new
//! `kid` produces exactly one call to the [`KeySource`].
//!
//! A refresh replaces the whole set. Keys are never merged across fetches.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde_json::Value;
use tokio::time::Instant;

use super::error::KeyLookupError;

/// Default lifetime of a fetched key set.
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(300);

/// Default timeout for a single key set fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Key type of a JWK (`kty`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ec,
    Okp,
    Oct,
}

impl KeyFamily {
    fn from_kty(kty: &str) -> Option<Self> {
        match kty {
            "RSA" => Some(KeyFamily::Rsa),
            "EC" => Some(KeyFamily::Ec),
            "OKP" => Some(KeyFamily::Okp),
            "oct" => Some(KeyFamily::Oct),
            _ => None,
        }
    }

    /// Signature algorithms a key of this family may verify.
    pub fn allowed_algorithms(self) -> &'static [Algorithm] {
        match self {
            KeyFamily::Rsa => &[
                Algorithm::RS256,
                Algorithm::RS384,
                Algorithm::RS512,
                Algorithm::PS256,
                Algorithm::PS384,
                Algorithm::PS512,
            ],
            KeyFamily::Ec => &[Algorithm::ES256, Algorithm::ES384],
            KeyFamily::Okp => &[Algorithm::EdDSA],
            KeyFamily::Oct => &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512],
        }
    }
}

/// A verification key published by the authorization server.
#[derive(Clone)]
pub struct SigningKey {
    key_id: String,
    family: KeyFamily,
    algorithm: Option<Algorithm>,
    key: DecodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("family", &self.family)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Convert a single JWK (as raw JSON) into a signing key.
    ///
    /// Returns `Ok(None)` for keys that are not meant for signatures
    /// (`use = "enc"`).
    pub fn from_jwk_value(value: &Value) -> Result<Option<Self>, String> {
        if value.get("use").and_then(Value::as_str) == Some("enc") {
            return Ok(None);
        }

        let key_id = value
            .get("kid")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing kid".to_string())?
            .to_string();
        let kty = value
            .get("kty")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing kty".to_string())?;
        let family = KeyFamily::from_kty(kty).ok_or_else(|| format!("unsupported kty {kty}"))?;
        let algorithm = match value.get("alg").and_then(Value::as_str) {
            Some(alg) => Some(
                alg.parse::<Algorithm>()
                    .map_err(|_| format!("unsupported alg {alg}"))?,
            ),
            None => None,
        };
        if let Some(alg) = algorithm
            && !family.allowed_algorithms().contains(&alg)
        {
            return Err(format!("alg {alg:?} does not fit kty {kty}"));
        }

        let key = match family {
            // Symmetric keys are base64url per RFC 7518; decode them directly
            KeyFamily::Oct => {
                let k = value
                    .get("k")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "missing k".to_string())?;
                let secret = URL_SAFE_NO_PAD
                    .decode(k.trim_end_matches('='))
                    .map_err(|e| format!("invalid k: {e}"))?;
                DecodingKey::from_secret(&secret)
            }
            _ => {
                let jwk: Jwk =
                    serde_json::from_value(value.clone()).map_err(|e| format!("invalid jwk: {e}"))?;
                DecodingKey::from_jwk(&jwk).map_err(|e| format!("invalid jwk: {e}"))?
            }
        };

        Ok(Some(Self {
            key_id,
            family,
            algorithm,
            key,
        }))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// Algorithm declared by the JWK, if any.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// Whether a token header algorithm may be verified with this key.
    pub fn allows(&self, alg: Algorithm) -> bool {
        if !self.family.allowed_algorithms().contains(&alg) {
            return false;
        }
        self.algorithm.is_none_or(|declared| declared == alg)
    }
}

/// Signing keys indexed by `kid`.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, SigningKey>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JWKS document (`{"keys": [...]}`).
    ///
    /// Entries that cannot be used are skipped. Duplicate kids keep the first
    /// entry.
    pub fn from_jwks(document: &Value) -> Result<Self, KeySourceError> {
        let entries = document
            .get("keys")
            .and_then(Value::as_array)
            .ok_or_else(|| KeySourceError::InvalidBody("missing keys array".to_string()))?;

        let mut set = KeySet::new();
        for entry in entries {
            match SigningKey::from_jwk_value(entry) {
                Ok(Some(key)) => set.insert(key),
                Ok(None) => {
                    tracing::debug!(kid = ?entry.get("kid"), "Skipping encryption key");
                }
                Err(reason) => {
                    tracing::warn!(kid = ?entry.get("kid"), %reason, "Skipping unusable JWK");
                }
            }
        }
        Ok(set)
    }

    /// Add a key. A key with an already present kid is ignored.
    pub fn insert(&mut self, key: SigningKey) {
        if self.keys.contains_key(&key.key_id) {
            tracing::warn!(kid = %key.key_id, "Duplicate kid in key set, keeping the first");
            return;
        }
        self.keys.insert(key.key_id.clone(), key);
    }

    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Failure to obtain a key set from a [`KeySource`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeySourceError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("invalid key set: {0}")]
    InvalidBody(String),
}

/// Where key sets come from.
pub trait KeySource: Send + Sync + 'static {
    /// Fetch the complete current key set. One attempt, no retries.
    fn fetch(&self) -> BoxFuture<'static, Result<KeySet, KeySourceError>>;
}

/// Fetches the key set from a JWKS URL over HTTP.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, KeySourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KeySourceError::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl KeySource for HttpKeySource {
    fn fetch(&self) -> BoxFuture<'static, Result<KeySet, KeySourceError>> {
        let client = self.client.clone();
        let url = self.url.clone();
        async move {
            tracing::debug!(url = %url, "Fetching JWKS");
            let response = client.get(&url).send().await.map_err(map_reqwest_error)?;
            let status = response.status();
            if !status.is_success() {
                return Err(KeySourceError::Status(status.as_u16()));
            }
            let document: Value = response.json().await.map_err(map_reqwest_error)?;
            let set = KeySet::from_jwks(&document)?;
            tracing::info!(url = %url, keys = set.len(), "Fetched JWKS");
            Ok(set)
        }
        .boxed()
    }
}

fn map_reqwest_error(err: reqwest::Error) -> KeySourceError {
    if err.is_timeout() {
        KeySourceError::Timeout
    } else if err.is_decode() {
        KeySourceError::InvalidBody(err.to_string())
    } else {
        KeySourceError::Http(err.to_string())
    }
}

/// A fixed key set. Useful for tests and for deployments with pinned keys.
#[derive(Debug, Clone, Default)]
pub struct StaticKeySource {
    keys: KeySet,
}

impl StaticKeySource {
    pub fn new(keys: KeySet) -> Self {
        Self { keys }
    }
}

impl KeySource for StaticKeySource {
    fn fetch(&self) -> BoxFuture<'static, Result<KeySet, KeySourceError>> {
        futures::future::ready(Ok(self.keys.clone())).boxed()
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<KeySet>, KeySourceError>>>;

struct CachedKeys {
    keys: Arc<KeySet>,
    fetched_at: Instant,
}

struct Inner {
    source: Arc<dyn KeySource>,
    ttl: Duration,
    current: RwLock<Option<CachedKeys>>,
    in_flight: Mutex<Option<SharedFetch>>,
}

impl Inner {
    fn install(&self, keys: Arc<KeySet>) {
        if let Ok(mut current) = self.current.write() {
            *current = Some(CachedKeys {
                keys,
                fetched_at: Instant::now(),
            });
        }
    }

    fn clear_in_flight(&self) {
        if let Ok(mut slot) = self.in_flight.lock() {
            *slot = None;
        }
    }
}

/// Process-wide cache of signing keys with single-flight refresh.
///
/// Cloning is cheap and clones share the same cache.
#[derive(Clone)]
pub struct KeyCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("ttl", &self.inner.ttl)
            .finish_non_exhaustive()
    }
}

impl KeyCache {
    pub fn new(source: impl KeySource, ttl: Duration) -> Self {
        Self::from_arc(Arc::new(source), ttl)
    }

    pub fn from_arc(source: Arc<dyn KeySource>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                ttl,
                current: RwLock::new(None),
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Resolve the signing key for `kid`.
    ///
    /// A cached key younger than the TTL is returned without I/O. Otherwise
    /// the key set is refreshed once. If a TTL-only refresh fails, the stale
    /// key is served.
    pub async fn get_key(&self, kid: &str) -> Result<SigningKey, KeyLookupError> {
        let (cached, fresh) = self.lookup(kid);
        if fresh && let Some(key) = cached {
            return Ok(key);
        }

        match self.refresh().await {
            Ok(keys) => keys
                .get(kid)
                .cloned()
                .ok_or_else(|| KeyLookupError::NotFound(kid.to_string())),
            Err(err) => match cached {
                Some(stale) => {
                    tracing::warn!(
                        kid = %kid,
                        error = %err,
                        "JWKS refresh failed, using stale key"
                    );
                    Ok(stale)
                }
                None => Err(KeyLookupError::KeySourceUnavailable(err.to_string())),
            },
        }
    }

    /// Fetch the key set now, joining any refresh already in flight.
    pub async fn refresh(&self) -> Result<Arc<KeySet>, KeySourceError> {
        self.shared_fetch().await
    }

    /// Number of keys currently cached.
    pub fn cached_len(&self) -> usize {
        self.inner
            .current
            .read()
            .ok()
            .and_then(|current| current.as_ref().map(|c| c.keys.len()))
            .unwrap_or(0)
    }

    /// Cached key for `kid` and whether the set it came from is still fresh.
    fn lookup(&self, kid: &str) -> (Option<SigningKey>, bool) {
        let Ok(current) = self.inner.current.read() else {
            return (None, false);
        };
        match current.as_ref() {
            Some(cached) => (
                cached.keys.get(kid).cloned(),
                cached.fetched_at.elapsed() < self.inner.ttl,
            ),
            None => (None, false),
        }
    }

    fn shared_fetch(&self) -> SharedFetch {
        let mut slot = match self.inner.in_flight.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(fetch) = slot.as_ref() {
            tracing::debug!("Joining in-flight JWKS refresh");
            return fetch.clone();
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let fetch = self.inner.source.fetch();
        let shared = async move {
            let result = fetch.await.map(Arc::new);
            if let Some(inner) = weak.upgrade() {
                if let Ok(keys) = &result {
                    inner.install(keys.clone());
                }
                inner.clear_in_flight();
            }
            result
        }
        .boxed()
        .shared();

        *slot = Some(shared.clone());
        shared
    }
}
