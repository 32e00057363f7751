//! Token validation for OAuth 2.1 resource servers.
//!
//! Provides the [`TokenValidator`] trait for pluggable token validation and
//! [`JwtValidator`], which verifies JWTs against keys from a [`KeyCache`].
//!
//! Validation is an ordered chain that stops at the first failure:
//!
//! 1. parse the header and claims
//! 2. check `exp` / `nbf`
//! 3. resolve the signing key by `kid`
//! 4. check the header algorithm against the key
//! 5. verify the signature
//! 6. check the issuer
//! 7. extract scopes and audience
//!
//! Time bounds are checked on the still-unverified claims so an expired token
//! never triggers a key fetch. Nothing from an unverified token is trusted
//! beyond that rejection.

use std::collections::BTreeSet;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, decode_header};
use serde::{Deserialize, Serialize};

use super::error::{KeyLookupError, ValidationError};
use super::jwks::KeyCache;

/// Scope granted to the synthetic identity used when auth bypass kicks in.
pub const BYPASS_SCOPE: &str = "tools:mom_jokes";

/// Subject of the synthetic identity used when auth bypass kicks in.
pub const BYPASS_SUBJECT: &str = "dev-user";

/// Audience claim value, which can be a single string or array of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenAudience {
    /// A single audience string.
    Single(String),
    /// Multiple audience strings.
    Multiple(Vec<String>),
}

impl TokenAudience {
    /// Check if the audience contains a specific value.
    pub fn contains(&self, value: &str) -> bool {
        match self {
            TokenAudience::Single(s) => s == value,
            TokenAudience::Multiple(v) => v.iter().any(|s| s == value),
        }
    }

    fn into_set(self) -> BTreeSet<String> {
        match self {
            TokenAudience::Single(s) => BTreeSet::from([s]),
            TokenAudience::Multiple(v) => v.into_iter().collect(),
        }
    }
}

/// Claims exactly as they appear in the token payload.
#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    aud: Option<TokenAudience>,
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default)]
    nbf: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    azp: Option<String>,
}

/// Validated token claims.
///
/// Produced once per validated token and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    subject: String,
    scopes: BTreeSet<String>,
    issuer: String,
    expires_at: u64,
    not_before: Option<u64>,
    audience: BTreeSet<String>,
    client_id: Option<String>,
}

impl TokenClaims {
    /// Claims for custom [`TokenValidator`] implementations.
    pub fn new(subject: impl Into<String>, issuer: impl Into<String>, expires_at: u64) -> Self {
        Self {
            subject: subject.into(),
            scopes: BTreeSet::new(),
            issuer: issuer.into(),
            expires_at,
            not_before: None,
            audience: BTreeSet::new(),
            client_id: None,
        }
    }

    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_audience(mut self, audience: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.audience = audience.into_iter().map(Into::into).collect();
        self
    }

    /// Subject (user/client identifier).
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Granted scopes.
    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    /// Check if the token has a specific scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Expiration time (Unix timestamp).
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    pub fn not_before(&self) -> Option<u64> {
        self.not_before
    }

    pub fn audience(&self) -> &BTreeSet<String> {
        &self.audience
    }

    /// OAuth client ID (`client_id`, or `azp` for Keycloak tokens).
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Synthetic claims for the bypass identity.
    fn bypass(issuer: &str, now: u64) -> Self {
        Self::new(BYPASS_SUBJECT, issuer, now + 3600).with_scopes([BYPASS_SCOPE])
    }
}

/// Trait for validating OAuth access tokens.
///
/// Implement this trait to provide custom token validation logic
/// (e.g., JWT verification, token introspection, opaque token lookup).
///
/// # Example
///
/// ```rust
/// use joke_mcp_server::oauth::{TokenValidator, TokenClaims, ValidationError};
///
/// #[derive(Clone)]
/// struct RejectAll;
///
/// impl TokenValidator for RejectAll {
///     async fn validate_token(&self, _token: &str) -> Result<TokenClaims, ValidationError> {
///         Err(ValidationError::MalformedToken("not accepted".into()))
///     }
/// }
/// ```
pub trait TokenValidator: Clone + Send + Sync + 'static {
    /// Validate an access token and return the extracted claims.
    fn validate_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<TokenClaims, ValidationError>> + Send;
}

/// How the `aud` claim is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudienceMode {
    /// Log a warning when no accepted audience is present.
    #[default]
    Lenient,
    /// Reject tokens without an accepted audience.
    Strict,
}

impl FromStr for AudienceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lenient" => Ok(AudienceMode::Lenient),
            "strict" => Ok(AudienceMode::Strict),
            other => Err(format!("unknown audience mode '{other}'")),
        }
    }
}

/// JWT validator backed by a JWKS key cache.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use joke_mcp_server::oauth::{JwtValidator, KeyCache, StaticKeySource};
///
/// let cache = KeyCache::new(StaticKeySource::default(), Duration::from_secs(300));
/// let validator = JwtValidator::new(cache, "http://localhost:8080/realms/mcp")
///     .accepted_audience("http://localhost:8000");
/// ```
#[derive(Clone)]
pub struct JwtValidator {
    keys: KeyCache,
    issuer: Arc<str>,
    accepted_audiences: Arc<[String]>,
    audience_mode: AudienceMode,
    allow_bypass: bool,
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("issuer", &self.issuer)
            .field("accepted_audiences", &self.accepted_audiences)
            .field("audience_mode", &self.audience_mode)
            .field("allow_bypass", &self.allow_bypass)
            .finish_non_exhaustive()
    }
}

impl JwtValidator {
    pub fn new(keys: KeyCache, issuer: impl Into<String>) -> Self {
        let issuer: String = issuer.into();
        Self {
            keys,
            issuer: Arc::from(issuer),
            accepted_audiences: Arc::from(Vec::new()),
            audience_mode: AudienceMode::default(),
            allow_bypass: false,
        }
    }

    /// Add an audience this resource server accepts.
    pub fn accepted_audience(mut self, audience: impl Into<String>) -> Self {
        let mut audiences = self.accepted_audiences.to_vec();
        audiences.push(audience.into());
        self.accepted_audiences = Arc::from(audiences);
        self
    }

    pub fn audience_mode(mut self, mode: AudienceMode) -> Self {
        self.audience_mode = mode;
        self
    }

    /// Accept requests with synthetic claims when the key source is down.
    ///
    /// For offline development only.
    pub fn allow_auth_bypass(mut self, allow: bool) -> Self {
        self.allow_bypass = allow;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn key_cache(&self) -> &KeyCache {
        &self.keys
    }

    async fn validate(&self, token: &str) -> Result<TokenClaims, ValidationError> {
        let parsed = parse(token)?;
        let now = unix_now();
        check_time_bounds(&parsed.claims, now)?;

        let key = match self.keys.get_key(&parsed.kid).await {
            Ok(key) => key,
            Err(KeyLookupError::NotFound(kid)) => {
                return Err(ValidationError::UnknownSigningKey(kid));
            }
            Err(KeyLookupError::KeySourceUnavailable(reason)) => {
                if self.allow_bypass {
                    tracing::warn!(
                        reason = %reason,
                        subject = BYPASS_SUBJECT,
                        "AUTH BYPASS: key source unavailable, granting synthetic claims"
                    );
                    return Ok(TokenClaims::bypass(&self.issuer, now));
                }
                return Err(ValidationError::ServiceUnavailable(reason));
            }
        };

        if !key.allows(parsed.algorithm) {
            return Err(ValidationError::SignatureInvalid(format!(
                "algorithm {:?} not allowed for key {}",
                parsed.algorithm,
                key.key_id()
            )));
        }
        match jsonwebtoken::crypto::verify(
            parsed.signature,
            parsed.signing_input.as_bytes(),
            key.decoding_key(),
            parsed.algorithm,
        ) {
            Ok(true) => {}
            Ok(false) => {
                return Err(ValidationError::SignatureInvalid(
                    "signature does not match".to_string(),
                ));
            }
            Err(e) => return Err(ValidationError::SignatureInvalid(e.to_string())),
        }

        self.check_issuer(&parsed.claims)?;
        self.extract(parsed.claims)
    }

    fn check_issuer(&self, claims: &RequiredClaims) -> Result<(), ValidationError> {
        if claims.issuer != *self.issuer {
            return Err(ValidationError::IssuerMismatch {
                expected: self.issuer.to_string(),
                actual: claims.issuer.clone(),
            });
        }
        Ok(())
    }

    fn extract(&self, claims: RequiredClaims) -> Result<TokenClaims, ValidationError> {
        let audience = claims.raw.aud.map(TokenAudience::into_set).unwrap_or_default();
        let accepted = self
            .accepted_audiences
            .iter()
            .any(|candidate| audience.contains(candidate));
        if !accepted && !self.accepted_audiences.is_empty() {
            match self.audience_mode {
                AudienceMode::Strict => return Err(ValidationError::AudienceMismatch),
                AudienceMode::Lenient => {
                    tracing::warn!(
                        subject = %claims.subject,
                        audience = ?audience,
                        "Token audience does not include this resource, accepting (lenient)"
                    );
                }
            }
        }

        let scopes = claims
            .raw
            .scope
            .as_deref()
            .unwrap_or("")
            .split_whitespace()
            .map(String::from)
            .collect();

        Ok(TokenClaims {
            subject: claims.subject,
            scopes,
            issuer: claims.issuer,
            expires_at: claims.expires_at,
            not_before: claims.raw.nbf,
            audience,
            client_id: claims.raw.client_id.or(claims.raw.azp),
        })
    }
}

impl TokenValidator for JwtValidator {
    async fn validate_token(&self, token: &str) -> Result<TokenClaims, ValidationError> {
        let result = self.validate(token).await;
        if let Err(err) = &result {
            tracing::debug!(error = %err, "Token rejected");
        }
        result
    }
}

/// Claims that every accepted token must carry.
struct RequiredClaims {
    subject: String,
    issuer: String,
    expires_at: u64,
    raw: RawClaims,
}

struct ParsedToken<'a> {
    kid: String,
    algorithm: Algorithm,
    signing_input: &'a str,
    signature: &'a str,
    claims: RequiredClaims,
}

fn malformed(reason: impl Into<String>) -> ValidationError {
    ValidationError::MalformedToken(reason.into())
}

fn parse(token: &str) -> Result<ParsedToken<'_>, ValidationError> {
    let (signing_input, signature) = token
        .rsplit_once('.')
        .ok_or_else(|| malformed("expected three segments"))?;
    let mut segments = signing_input.split('.');
    let (Some(_header), Some(payload), None) = (segments.next(), segments.next(), segments.next())
    else {
        return Err(malformed("expected three segments"));
    };

    let header = decode_header(token).map_err(|e| malformed(format!("header: {e}")))?;
    let kid = header.kid.ok_or_else(|| malformed("missing kid"))?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| malformed(format!("payload: {e}")))?;
    let raw: RawClaims =
        serde_json::from_slice(&payload).map_err(|e| malformed(format!("payload: {e}")))?;

    let subject = raw.sub.clone().ok_or_else(|| malformed("missing sub"))?;
    let issuer = raw.iss.clone().ok_or_else(|| malformed("missing iss"))?;
    let expires_at = raw.exp.ok_or_else(|| malformed("missing exp"))?;

    Ok(ParsedToken {
        kid,
        algorithm: header.alg,
        signing_input,
        signature,
        claims: RequiredClaims {
            subject,
            issuer,
            expires_at,
            raw,
        },
    })
}

fn check_time_bounds(claims: &RequiredClaims, now: u64) -> Result<(), ValidationError> {
    if now >= claims.expires_at {
        return Err(ValidationError::Expired);
    }
    if let Some(nbf) = claims.raw.nbf
        && now < nbf
    {
        return Err(ValidationError::NotYetValid);
    }
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
