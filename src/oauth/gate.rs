//! The request gate: one authorization pass per operation.
//!
//! The dispatcher hands the gate an operation name and the raw bearer token
//! (if any). The gate consults the [`AuthorizationPolicy`], runs the
//! [`TokenValidator`] for protected operations and turns every failure into a
//! [`Challenge`]. Listing uses the same [`RequestGate::handle`] call, so an
//! operation is visible exactly when calling it would proceed.

use std::sync::Arc;

use super::error::{Challenge, ChallengeKind};
use super::metadata::ProtectedResourceMetadata;
use super::policy::{AuthorizationPolicy, Verdict};
use super::token::{JwtValidator, TokenClaims, TokenValidator};

/// Outcome of [`RequestGate::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateResult {
    /// Run the operation. Carries the caller's claims for protected operations.
    Proceed(Option<TokenClaims>),
    /// Refuse with a challenge.
    Reject(Challenge),
}

/// Authorization gate shared by every transport.
#[derive(Debug)]
pub struct RequestGate<V = JwtValidator> {
    validator: V,
    policy: AuthorizationPolicy,
    metadata: Arc<ProtectedResourceMetadata>,
    metadata_url: String,
}

impl<V: TokenValidator> RequestGate<V> {
    pub fn new(
        validator: V,
        policy: AuthorizationPolicy,
        metadata: ProtectedResourceMetadata,
    ) -> Self {
        let metadata_url = metadata.metadata_url();
        Self {
            validator,
            policy,
            metadata: Arc::new(metadata),
            metadata_url,
        }
    }

    /// The discovery document. Identical on every call.
    pub fn metadata(&self) -> &Arc<ProtectedResourceMetadata> {
        &self.metadata
    }

    /// URL advertised in `WWW-Authenticate` challenges.
    pub fn metadata_url(&self) -> &str {
        &self.metadata_url
    }

    pub fn validator(&self) -> &V {
        &self.validator
    }

    pub fn policy(&self) -> &AuthorizationPolicy {
        &self.policy
    }

    pub fn is_protected(&self, operation: &str) -> bool {
        self.policy.is_protected(operation)
    }

    /// Decide whether `operation` may run with the given bearer token.
    pub async fn handle(&self, operation: &str, credentials: Option<&str>) -> GateResult {
        if !self.policy.is_protected(operation) {
            return GateResult::Proceed(None);
        }

        let Some(token) = credentials.filter(|t| !t.is_empty()) else {
            tracing::debug!(
                operation = %operation,
                "Protected operation called without credentials"
            );
            return self.reject(ChallengeKind::CredentialsRequired);
        };

        let claims = match self.validator.validate_token(token).await {
            Ok(claims) => claims,
            Err(err) => {
                tracing::info!(operation = %operation, error = %err, "Bearer token rejected");
                return self.reject(ChallengeKind::CredentialsRejected {
                    description: err.public_description().to_string(),
                });
            }
        };

        match self.policy.authorize(operation, Some(&claims)) {
            Verdict::Allow => {
                tracing::debug!(operation = %operation, subject = %claims.subject(), "Authorized");
                GateResult::Proceed(Some(claims))
            }
            Verdict::DenyNoCredentials => self.reject(ChallengeKind::CredentialsRequired),
            Verdict::DenyInsufficientScope { required, provided } => {
                tracing::info!(
                    operation = %operation,
                    subject = %claims.subject(),
                    required = %required,
                    provided = ?provided,
                    "Insufficient scope"
                );
                self.reject(ChallengeKind::InsufficientScope { required })
            }
        }
    }

    /// The subset of `operations` for which [`handle`](Self::handle) proceeds.
    ///
    /// Order is preserved.
    pub async fn visible_operations<'a>(
        &self,
        operations: &[&'a str],
        credentials: Option<&str>,
    ) -> Vec<&'a str> {
        let mut visible = Vec::new();
        for &operation in operations {
            if let GateResult::Proceed(_) = self.handle(operation, credentials).await {
                visible.push(operation);
            }
        }
        visible
    }

    fn reject(&self, kind: ChallengeKind) -> GateResult {
        GateResult::Reject(Challenge::new(kind, self.metadata_url.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::ValidationError;
    use crate::oauth::policy::{ProtectedOperations, ScopeEnforcement};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts "good-token" (with the mom scope) and "no-scope-token"
    /// (without it). Counts calls.
    #[derive(Clone, Default)]
    struct FakeValidator {
        calls: Arc<AtomicUsize>,
    }

    impl TokenValidator for FakeValidator {
        async fn validate_token(&self, token: &str) -> Result<TokenClaims, ValidationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let claims = TokenClaims::new("user-1", "issuer", u64::MAX);
            match token {
                "good-token" => Ok(claims.with_scopes(["openid", "tools:mom_jokes"])),
                "no-scope-token" => Ok(claims.with_scopes(["openid"])),
                "expired-token" => Err(ValidationError::Expired),
                _ => Err(ValidationError::MalformedToken("garbage".to_string())),
            }
        }
    }

    fn gate_with(
        validator: FakeValidator,
        enforcement: ScopeEnforcement,
    ) -> RequestGate<FakeValidator> {
        let policy = AuthorizationPolicy::new(
            ProtectedOperations::new().protect("get_mom_joke", "tools:mom_jokes"),
        )
        .enforcement(enforcement);
        let metadata = ProtectedResourceMetadata::new("http://localhost:8000")
            .authorization_server("http://localhost:8080/realms/mcp")
            .scope("tools:mom_jokes");
        RequestGate::new(validator, policy, metadata)
    }

    fn gate() -> RequestGate<FakeValidator> {
        gate_with(FakeValidator::default(), ScopeEnforcement::Strict)
    }

    fn challenge(result: GateResult) -> Challenge {
        match result {
            GateResult::Reject(challenge) => challenge,
            GateResult::Proceed(claims) => panic!("expected reject, got proceed with {claims:?}"),
        }
    }

    #[tokio::test]
    async fn test_public_operation_never_validates() {
        let validator = FakeValidator::default();
        let gate = gate_with(validator.clone(), ScopeEnforcement::Strict);

        assert_eq!(gate.handle("get_dad_joke", None).await, GateResult::Proceed(None));
        assert_eq!(
            gate.handle("get_dad_joke", Some("garbage")).await,
            GateResult::Proceed(None)
        );
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_challenge() {
        let challenge = challenge(gate().handle("get_mom_joke", None).await);
        assert_eq!(challenge.kind(), &ChallengeKind::CredentialsRequired);
        assert_eq!(challenge.status_code(), 401);
        assert_eq!(
            challenge.www_authenticate(),
            "Bearer resource_metadata=\"http://localhost:8000/.well-known/oauth-protected-resource\""
        );

        // An empty token counts as no token
        let challenge2 = self::challenge(gate().handle("get_mom_joke", Some("")).await);
        assert_eq!(challenge2.kind(), &ChallengeKind::CredentialsRequired);
    }

    #[tokio::test]
    async fn test_rejected_credentials_hide_internal_error() {
        let challenge = challenge(gate().handle("get_mom_joke", Some("expired-token")).await);
        match challenge.kind() {
            ChallengeKind::CredentialsRejected { description } => {
                assert_eq!(description, "The access token has expired");
            }
            other => panic!("unexpected challenge {other:?}"),
        }
        assert!(challenge.www_authenticate().contains("invalid_token"));
    }

    #[tokio::test]
    async fn test_scope_round_trip() {
        match gate().handle("get_mom_joke", Some("good-token")).await {
            GateResult::Proceed(Some(claims)) => assert!(claims.has_scope("tools:mom_jokes")),
            other => panic!("unexpected {other:?}"),
        }

        let challenge = challenge(gate().handle("get_mom_joke", Some("no-scope-token")).await);
        assert_eq!(
            challenge.kind(),
            &ChallengeKind::InsufficientScope {
                required: "tools:mom_jokes".to_string()
            }
        );
        assert_eq!(challenge.status_code(), 401);
    }

    #[tokio::test]
    async fn test_lenient_enforcement_allows_missing_scope() {
        let gate = gate_with(FakeValidator::default(), ScopeEnforcement::Lenient);
        assert!(matches!(
            gate.handle("get_mom_joke", Some("no-scope-token")).await,
            GateResult::Proceed(Some(_))
        ));
    }

    #[tokio::test]
    async fn test_visible_operations_match_handle() {
        let gate = gate();
        let ops = ["get_dad_joke", "get_mom_joke"];

        for credentials in [None, Some("good-token"), Some("no-scope-token"), Some("junk")] {
            let visible = gate.visible_operations(&ops, credentials).await;
            for op in ops {
                let proceeds = matches!(gate.handle(op, credentials).await, GateResult::Proceed(_));
                assert_eq!(visible.contains(&op), proceeds, "{op} with {credentials:?}");
            }
        }

        assert_eq!(gate.visible_operations(&ops, None).await, vec!["get_dad_joke"]);
        assert_eq!(
            gate.visible_operations(&ops, Some("good-token")).await,
            vec!["get_dad_joke", "get_mom_joke"]
        );
    }

    #[test]
    fn test_metadata_is_shared() {
        let gate = gate();
        assert!(Arc::ptr_eq(gate.metadata(), gate.metadata()));
        assert_eq!(
            gate.metadata_url(),
            "http://localhost:8000/.well-known/oauth-protected-resource"
        );
    }
}
