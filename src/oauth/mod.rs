//! OAuth 2.1 resource server support for the joke server.
//!
//! The server acts as a **resource server**: it validates tokens issued by an
//! external authorization server (Keycloak) and serves Protected Resource
//! Metadata for discovery. It never issues, refreshes or revokes tokens.
//!
//! # Architecture
//!
//! - **Key cache** ([`KeyCache`]): signing keys from the realm's JWKS, cached
//!   with a TTL and refreshed with a single in-flight fetch.
//!
//! - **Token validation** ([`TokenValidator`]): pluggable trait.
//!   [`JwtValidator`] verifies JWTs against the key cache.
//!
//! - **Authorization policy** ([`AuthorizationPolicy`]): maps protected
//!   operations to their required scope and produces a [`Verdict`].
//!
//! - **Protected Resource Metadata** ([`ProtectedResourceMetadata`]): served at
//!   `/.well-known/oauth-protected-resource` so OAuth clients can discover
//!   which authorization server to use (RFC 9728).
//!
//! - **Request gate** ([`RequestGate`]): the single decision point used by the
//!   dispatcher for both calling and listing operations.
//!
//! # Discovery Flow
//!
//! 1. Client calls a protected tool without a token
//! 2. Server returns `401` with `WWW-Authenticate: Bearer resource_metadata="..."`
//! 3. Client fetches `/.well-known/oauth-protected-resource` to discover the auth server
//! 4. Client obtains a token from the authorization server
//! 5. Client retries with `Authorization: Bearer <token>`

pub mod error;
pub mod gate;
pub mod jwks;
pub mod metadata;
pub mod policy;
pub mod token;

// Re-exports
pub use error::{Challenge, ChallengeKind, KeyLookupError, ValidationError};
pub use gate::{GateResult, RequestGate};
pub use jwks::{
    HttpKeySource, KeyCache, KeyFamily, KeySet, KeySource, KeySourceError, SigningKey,
    StaticKeySource,
};
pub use metadata::ProtectedResourceMetadata;
pub use policy::{AuthorizationPolicy, ProtectedOperations, ScopeEnforcement, Verdict};
pub use token::{AudienceMode, JwtValidator, TokenAudience, TokenClaims, TokenValidator};

use crate::config::AuthConfig;

/// Build the request gate for `config`, fetching keys over HTTP.
pub fn gate_from_config(config: &AuthConfig) -> Result<RequestGate, KeySourceError> {
    let source = HttpKeySource::new(config.jwks_url(), config.fetch_timeout)?;
    let cache = KeyCache::new(source, config.key_ttl);
    Ok(gate_with_keys(config, cache))
}

/// Build the request gate for `config` around an existing key cache.
pub fn gate_with_keys(config: &AuthConfig, cache: KeyCache) -> RequestGate {
    let mut validator = JwtValidator::new(cache, config.issuer())
        .audience_mode(config.audience_mode)
        .allow_auth_bypass(config.allow_auth_bypass);
    for audience in config.accepted_audiences() {
        validator = validator.accepted_audience(audience);
    }
    if config.allow_auth_bypass {
        tracing::warn!(
            "Auth bypass is enabled; protected tools are open while Keycloak is unreachable"
        );
    }

    let policy = AuthorizationPolicy::new(config.protected_operations.clone())
        .enforcement(config.scope_enforcement);
    RequestGate::new(validator, policy, ProtectedResourceMetadata::from_config(config))
}
