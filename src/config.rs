//! Command line and environment configuration.
//!
//! [`Args`] is parsed once at startup. Everything the authorization layer
//! needs is copied into a plain [`AuthConfig`], which the rest of the crate
//! consumes without touching the environment again.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::oauth::{AudienceMode, ProtectedOperations, ScopeEnforcement};

/// Scope required by `get_mom_joke`.
pub const MOM_JOKES_SCOPE: &str = "tools:mom_jokes";

/// Audience Keycloak puts in access tokens by default.
pub const KEYCLOAK_ACCOUNT_AUDIENCE: &str = "account";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    Stdio,
    Http,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "joke-mcp-server")]
#[command(about = "MCP joke server with an OAuth 2.1 protected tool", long_about = None)]
pub struct Args {
    /// Transport to use
    #[arg(short, long, default_value = "stdio")]
    pub transport: Transport,

    /// Host to bind to (http transport)
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on (http transport)
    #[arg(short, long, default_value = "8000")]
    pub port: u16,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Base URL of the Keycloak server
    #[arg(long, env = "KEYCLOAK_URL", default_value = "http://localhost:8080")]
    pub keycloak_url: String,

    /// Keycloak realm that issues tokens
    #[arg(long, env = "KEYCLOAK_REALM", default_value = "mcp")]
    pub keycloak_realm: String,

    /// Public URL of this resource server
    #[arg(long, env = "RESOURCE_SERVER_URL", default_value = "http://localhost:8000")]
    pub resource_server_url: String,

    /// Grant synthetic claims when Keycloak is unreachable (development only)
    #[arg(long, env = "ALLOW_AUTH_BYPASS", default_value_t = false)]
    pub allow_auth_bypass: bool,

    /// Lifetime of the cached JWKS in seconds
    #[arg(long, env = "JWKS_CACHE_TTL_SECS", default_value = "300")]
    pub jwks_cache_ttl_secs: u64,

    /// Timeout for a JWKS fetch in seconds
    #[arg(long, env = "JWKS_FETCH_TIMEOUT_SECS", default_value = "5")]
    pub jwks_fetch_timeout_secs: u64,

    /// Audience checking: lenient or strict
    #[arg(long, env = "AUDIENCE_MODE", default_value = "lenient")]
    pub audience_mode: AudienceMode,

    /// Scope enforcement: strict or lenient (debugging only)
    #[arg(long, env = "SCOPE_ENFORCEMENT", default_value = "strict")]
    pub scope_enforcement: ScopeEnforcement,

    /// Additional accepted token audience (repeatable)
    #[arg(long = "audience")]
    pub audiences: Vec<String>,

    /// Bearer token presented for protected tools over stdio
    #[arg(long, env = "MCP_BEARER_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,
}

impl Args {
    pub fn auth_config(&self) -> AuthConfig {
        let mut config = AuthConfig::new(
            &self.keycloak_url,
            &self.keycloak_realm,
            &self.resource_server_url,
        );
        config.allow_auth_bypass = self.allow_auth_bypass;
        config.key_ttl = Duration::from_secs(self.jwks_cache_ttl_secs);
        config.fetch_timeout = Duration::from_secs(self.jwks_fetch_timeout_secs);
        config.audience_mode = self.audience_mode;
        config.scope_enforcement = self.scope_enforcement;
        config.extra_audiences = self.audiences.clone();
        config
    }
}

/// Settings for the authorization layer.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    keycloak_url: String,
    realm: String,
    resource_url: String,
    pub allow_auth_bypass: bool,
    pub key_ttl: Duration,
    pub fetch_timeout: Duration,
    pub audience_mode: AudienceMode,
    pub scope_enforcement: ScopeEnforcement,
    pub extra_audiences: Vec<String>,
    pub protected_operations: ProtectedOperations,
}

impl AuthConfig {
    pub fn new(keycloak_url: &str, realm: &str, resource_url: &str) -> Self {
        Self {
            keycloak_url: keycloak_url.trim_end_matches('/').to_string(),
            realm: realm.to_string(),
            resource_url: resource_url.trim_end_matches('/').to_string(),
            allow_auth_bypass: false,
            key_ttl: crate::oauth::jwks::DEFAULT_KEY_TTL,
            fetch_timeout: crate::oauth::jwks::DEFAULT_FETCH_TIMEOUT,
            audience_mode: AudienceMode::default(),
            scope_enforcement: ScopeEnforcement::default(),
            extra_audiences: Vec::new(),
            protected_operations: ProtectedOperations::new()
                .protect("get_mom_joke", MOM_JOKES_SCOPE),
        }
    }

    /// Issuer URL: `{keycloak}/realms/{realm}`.
    pub fn issuer(&self) -> String {
        format!("{}/realms/{}", self.keycloak_url, self.realm)
    }

    /// JWKS endpoint of the realm.
    pub fn jwks_url(&self) -> String {
        format!("{}/protocol/openid-connect/certs", self.issuer())
    }

    pub fn resource_url(&self) -> &str {
        &self.resource_url
    }

    /// Every distinct scope some protected operation requires.
    pub fn protected_scopes(&self) -> Vec<String> {
        self.protected_operations
            .scopes()
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Audiences a token may carry for this resource.
    pub fn accepted_audiences(&self) -> Vec<String> {
        let mut audiences = vec![
            self.resource_url.clone(),
            KEYCLOAK_ACCOUNT_AUDIENCE.to_string(),
        ];
        for audience in &self.extra_audiences {
            if !audiences.contains(audience) {
                audiences.push(audience.clone());
            }
        }
        audiences
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080", "mcp", "http://localhost:8000")
    }
}
