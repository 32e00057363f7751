//! Per-operation scope requirements and the authorization decision.
//!
//! [`ProtectedOperations`] maps operation (tool) names to the scope they
//! require. Operations that are not listed need no authorization at all.
//! [`AuthorizationPolicy`] turns that map plus the caller's claims into a
//! [`Verdict`].

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use super::token::TokenClaims;

/// Registry of protected operations and the scope each one requires.
///
/// Built once at startup and shared read-only afterwards.
///
/// # Example
///
/// ```rust
/// use joke_mcp_server::oauth::ProtectedOperations;
///
/// let ops = ProtectedOperations::new().protect("get_mom_joke", "tools:mom_jokes");
/// assert_eq!(ops.required_scope("get_mom_joke"), Some("tools:mom_jokes"));
/// assert_eq!(ops.required_scope("get_dad_joke"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProtectedOperations {
    scopes: HashMap<String, String>,
}

impl ProtectedOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `scope` for `operation`. A later call for the same operation
    /// replaces the earlier scope.
    pub fn protect(mut self, operation: impl Into<String>, scope: impl Into<String>) -> Self {
        self.scopes.insert(operation.into(), scope.into());
        self
    }

    pub fn required_scope(&self, operation: &str) -> Option<&str> {
        self.scopes.get(operation).map(String::as_str)
    }

    /// Every distinct scope required by some operation.
    pub fn scopes(&self) -> BTreeSet<&str> {
        self.scopes.values().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ProtectedOperations {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            scopes: iter
                .into_iter()
                .map(|(op, scope)| (op.into(), scope.into()))
                .collect(),
        }
    }
}

/// How a missing scope on an otherwise valid token is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeEnforcement {
    /// Deny the request.
    #[default]
    Strict,
    /// Log a warning and allow. Debugging only.
    Lenient,
}

impl FromStr for ScopeEnforcement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(ScopeEnforcement::Strict),
            "lenient" => Ok(ScopeEnforcement::Lenient),
            other => Err(format!("unknown scope enforcement '{other}'")),
        }
    }
}

/// Outcome of an authorization decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// The operation is protected and no credentials were presented.
    DenyNoCredentials,
    /// The token does not carry the required scope.
    DenyInsufficientScope {
        required: String,
        provided: BTreeSet<String>,
    },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Decides whether a caller may run an operation.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationPolicy {
    operations: ProtectedOperations,
    enforcement: ScopeEnforcement,
}

impl AuthorizationPolicy {
    pub fn new(operations: ProtectedOperations) -> Self {
        Self {
            operations,
            enforcement: ScopeEnforcement::default(),
        }
    }

    pub fn enforcement(mut self, enforcement: ScopeEnforcement) -> Self {
        self.enforcement = enforcement;
        self
    }

    pub fn operations(&self) -> &ProtectedOperations {
        &self.operations
    }

    pub fn is_protected(&self, operation: &str) -> bool {
        self.operations.required_scope(operation).is_some()
    }

    /// Decide for `operation` given the caller's validated claims, if any.
    pub fn authorize(&self, operation: &str, claims: Option<&TokenClaims>) -> Verdict {
        let Some(required) = self.operations.required_scope(operation) else {
            return Verdict::Allow;
        };
        let Some(claims) = claims else {
            return Verdict::DenyNoCredentials;
        };
        if claims.has_scope(required) {
            return Verdict::Allow;
        }

        match self.enforcement {
            ScopeEnforcement::Strict => Verdict::DenyInsufficientScope {
                required: required.to_string(),
                provided: claims.scopes().clone(),
            },
            ScopeEnforcement::Lenient => {
                tracing::warn!(
                    operation = %operation,
                    subject = %claims.subject(),
                    required = %required,
                    "Scope missing, allowing because scope enforcement is lenient"
                );
                Verdict::Allow
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_with_scopes(scopes: &[&str]) -> TokenClaims {
        TokenClaims::new("user-1", "http://localhost:8080/realms/mcp", u64::MAX)
            .with_scopes(scopes.iter().copied())
    }

    fn policy() -> AuthorizationPolicy {
        AuthorizationPolicy::new(
            ProtectedOperations::new().protect("get_mom_joke", "tools:mom_jokes"),
        )
    }

    #[test]
    fn test_public_operation_allowed_regardless_of_credentials() {
        let policy = policy();
        assert!(!policy.is_protected("get_dad_joke"));
        assert_eq!(policy.authorize("get_dad_joke", None), Verdict::Allow);
        let claims = claims_with_scopes(&[]);
        assert_eq!(policy.authorize("get_dad_joke", Some(&claims)), Verdict::Allow);
    }

    #[test]
    fn test_protected_without_credentials() {
        let policy = policy();
        assert!(policy.is_protected("get_mom_joke"));
        assert_eq!(
            policy.authorize("get_mom_joke", None),
            Verdict::DenyNoCredentials
        );
    }

    #[test]
    fn test_protected_with_scope() {
        let claims = claims_with_scopes(&["openid", "tools:mom_jokes"]);
        assert_eq!(policy().authorize("get_mom_joke", Some(&claims)), Verdict::Allow);
    }

    #[test]
    fn test_protected_without_scope_strict() {
        let claims = claims_with_scopes(&["openid"]);
        match policy().authorize("get_mom_joke", Some(&claims)) {
            Verdict::DenyInsufficientScope { required, provided } => {
                assert_eq!(required, "tools:mom_jokes");
                assert!(provided.contains("openid"));
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn test_protected_without_scope_lenient() {
        let claims = claims_with_scopes(&["openid"]);
        let policy = policy().enforcement(ScopeEnforcement::Lenient);
        assert!(policy.authorize("get_mom_joke", Some(&claims)).is_allowed());
        // Lenient never lets a caller without credentials through
        assert_eq!(
            policy.authorize("get_mom_joke", None),
            Verdict::DenyNoCredentials
        );
    }

    #[test]
    fn test_registry_from_iter() {
        let ops: ProtectedOperations =
            [("a", "s1"), ("b", "s1"), ("c", "s2")].into_iter().collect();
        assert_eq!(ops.scopes().into_iter().collect::<Vec<_>>(), vec!["s1", "s2"]);
        assert!(!ops.is_empty());
    }

    #[test]
    fn test_enforcement_parse() {
        assert_eq!("Lenient".parse::<ScopeEnforcement>().unwrap(), ScopeEnforcement::Lenient);
        assert!("off".parse::<ScopeEnforcement>().is_err());
    }
}
