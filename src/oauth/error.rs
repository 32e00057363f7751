//! OAuth 2.1 error types and WWW-Authenticate header construction.
//!
//! [`ValidationError`] and [`KeyLookupError`] stay inside the authorization
//! layer. [`Challenge`] is the only value that leaves the gate; it renders the
//! RFC 6750 Section 3 header with the RFC 9728 `resource_metadata` parameter.

use std::fmt;

/// Why a bearer token was refused by the token validator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Not a structurally valid JWT, or a required claim is missing.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The `kid` is not in the key set, even after a refresh.
    #[error("unknown signing key: {0}")]
    UnknownSigningKey(String),

    /// Signature does not verify, or the algorithm is not allowed for the key.
    #[error("invalid signature: {0}")]
    SignatureInvalid(String),

    #[error("token has expired")]
    Expired,

    #[error("token is not yet valid")]
    NotYetValid,

    #[error("issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch { expected: String, actual: String },

    /// Only produced when audience checking is strict.
    #[error("token audience does not match this resource")]
    AudienceMismatch,

    /// The key source could not be reached and bypass is off.
    #[error("authorization service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ValidationError {
    /// Text safe to show a client. Never echoes token content.
    pub fn public_description(&self) -> &'static str {
        match self {
            ValidationError::MalformedToken(_) => "The access token is malformed",
            ValidationError::UnknownSigningKey(_) => {
                "The access token was signed by an unknown key"
            }
            ValidationError::SignatureInvalid(_) => "The access token signature is invalid",
            ValidationError::Expired => "The access token has expired",
            ValidationError::NotYetValid => "The access token is not yet valid",
            ValidationError::IssuerMismatch { .. } => {
                "The access token was issued by an untrusted issuer"
            }
            ValidationError::AudienceMismatch => "The token audience does not match this resource",
            ValidationError::ServiceUnavailable(_) => "The authorization service is unavailable",
        }
    }
}

/// Failure to resolve a signing key from the key cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyLookupError {
    /// The key set was refreshed and still does not contain the kid.
    #[error("no signing key with kid {0}")]
    NotFound(String),

    /// The key set could not be fetched.
    #[error("key source unavailable: {0}")]
    KeySourceUnavailable(String),
}

/// What kind of challenge the gate issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeKind {
    /// A protected operation was called without a bearer token.
    CredentialsRequired,

    /// The bearer token failed validation.
    CredentialsRejected {
        /// Human-readable reason, no internal detail.
        description: String,
    },

    /// The token is valid but lacks the required scope.
    InsufficientScope {
        /// Scope the operation requires.
        required: String,
    },
}

/// Rejection issued by the request gate.
///
/// Renders the same status code and `WWW-Authenticate` header regardless of
/// transport; stdio carries the header value in the JSON-RPC error data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    kind: ChallengeKind,
    resource_metadata_url: String,
}

impl Challenge {
    pub fn new(kind: ChallengeKind, resource_metadata_url: impl Into<String>) -> Self {
        Self {
            kind,
            resource_metadata_url: resource_metadata_url.into(),
        }
    }

    pub fn kind(&self) -> &ChallengeKind {
        &self.kind
    }

    pub fn resource_metadata_url(&self) -> &str {
        &self.resource_metadata_url
    }

    /// HTTP status for this challenge. Always 401 Unauthorized.
    pub fn status_code(&self) -> u16 {
        401
    }

    /// Human-readable summary for the response body.
    pub fn summary(&self) -> String {
        match &self.kind {
            ChallengeKind::CredentialsRequired => {
                "Authorization required: this tool needs a bearer token".to_string()
            }
            ChallengeKind::CredentialsRejected { description } => {
                format!("Authorization failed: {}", description)
            }
            ChallengeKind::InsufficientScope { required } => {
                format!("Insufficient scope: this tool requires '{}'", required)
            }
        }
    }

    /// Builds the `WWW-Authenticate` header value per RFC 6750 Section 3.
    ///
    /// `resource_metadata` always comes first so clients can discover the
    /// authorization server without parsing error parameters.
    pub fn www_authenticate(&self) -> String {
        let mut parts = vec![format!(
            "resource_metadata=\"{}\"",
            self.resource_metadata_url
        )];

        match &self.kind {
            // RFC 6750 Section 3: no error code when the request carried no credentials
            ChallengeKind::CredentialsRequired => {}
            ChallengeKind::CredentialsRejected { description } => {
                parts.push("error=\"invalid_token\"".to_string());
                parts.push(format!(
                    "error_description=\"{}\"",
                    description.replace('"', "'")
                ));
            }
            ChallengeKind::InsufficientScope { required } => {
                parts.push("error=\"insufficient_scope\"".to_string());
                parts.push(format!("scope=\"{}\"", required));
            }
        }

        format!("Bearer {}", parts.join(", "))
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl std::error::Error for Challenge {}
