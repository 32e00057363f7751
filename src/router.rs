//! MCP Router - dispatches requests to the joke tools
//!
//! The router implements Tower's `Service` trait, making it composable with
//! standard tower middleware. Every `tools/call` and `tools/list` goes through
//! the [`RequestGate`] before a tool is run or shown.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower_service::Service;

use crate::error::JsonRpcError;
use crate::oauth::{Challenge, GateResult, RequestGate};
use crate::protocol::*;
use crate::tool::{Tool, ToolRequest};

/// MCP Router that dispatches requests to registered tools
///
/// Implements `tower::Service<RouterRequest>` for middleware composition.
#[derive(Clone)]
pub struct McpRouter {
    inner: Arc<McpRouterInner>,
}

impl std::fmt::Debug for McpRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpRouter")
            .field("server_name", &self.inner.server_name)
            .field("server_version", &self.inner.server_version)
            .field("tools_count", &self.inner.tools.len())
            .finish()
    }
}

/// Inner configuration that is shared across clones
#[derive(Clone)]
struct McpRouterInner {
    server_name: String,
    server_version: String,
    instructions: Option<String>,
    /// Registration order is listing order
    tools: Vec<Arc<Tool>>,
    gate: Arc<RequestGate>,
}

impl McpRouter {
    /// Create a router whose tools are guarded by `gate`.
    pub fn new(gate: Arc<RequestGate>) -> Self {
        Self {
            inner: Arc::new(McpRouterInner {
                server_name: "joke-server-http".to_string(),
                server_version: env!("CARGO_PKG_VERSION").to_string(),
                instructions: None,
                tools: Vec::new(),
                gate,
            }),
        }
    }

    /// Set server info
    pub fn server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        let inner = Arc::make_mut(&mut self.inner);
        inner.server_name = name.into();
        inner.server_version = version.into();
        self
    }

    /// Set instructions for LLMs describing how to use this server
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.inner).instructions = Some(instructions.into());
        self
    }

    /// Register a tool. A tool with the same name replaces the earlier one.
    pub fn tool(mut self, tool: Tool) -> Self {
        let tools = &mut Arc::make_mut(&mut self.inner).tools;
        match tools.iter_mut().find(|t| t.name == tool.name) {
            Some(existing) => *existing = Arc::new(tool),
            None => tools.push(Arc::new(tool)),
        }
        self
    }

    /// Register multiple tools at once.
    pub fn tools(self, tools: impl IntoIterator<Item = Tool>) -> Self {
        tools.into_iter().fold(self, |router, tool| router.tool(tool))
    }

    pub fn server_name(&self) -> &str {
        &self.inner.server_name
    }

    pub fn server_version(&self) -> &str {
        &self.inner.server_version
    }

    pub fn gate(&self) -> &Arc<RequestGate> {
        &self.inner.gate
    }

    fn find_tool(&self, name: &str) -> Option<&Arc<Tool>> {
        self.inner.tools.iter().find(|t| t.name == name)
    }

    fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: false,
            }),
        }
    }

    /// Handle an MCP request
    async fn handle(
        &self,
        request: McpRequest,
        credentials: Option<&str>,
    ) -> Result<McpResponse, DispatchError> {
        match request {
            McpRequest::Initialize(params) => {
                tracing::info!(
                    client = %params.client_info.name,
                    version = %params.client_info.version,
                    "Client initializing"
                );

                // Protocol version negotiation: respond with same version if supported,
                // otherwise respond with our latest supported version
                let protocol_version = if SUPPORTED_PROTOCOL_VERSIONS
                    .contains(&params.protocol_version.as_str())
                {
                    params.protocol_version
                } else {
                    LATEST_PROTOCOL_VERSION.to_string()
                };

                Ok(McpResponse::Initialize(InitializeResult {
                    protocol_version,
                    capabilities: self.capabilities(),
                    server_info: Implementation {
                        name: self.inner.server_name.clone(),
                        version: self.inner.server_version.clone(),
                    },
                    instructions: self.inner.instructions.clone(),
                }))
            }

            McpRequest::ListTools(_params) => {
                let names: Vec<&str> = self.inner.tools.iter().map(|t| t.name.as_str()).collect();
                let visible = self.inner.gate.visible_operations(&names, credentials).await;
                let tools = self
                    .inner
                    .tools
                    .iter()
                    .filter(|t| visible.contains(&t.name.as_str()))
                    .map(|t| t.definition())
                    .collect();

                Ok(McpResponse::ListTools(ListToolsResult {
                    tools,
                    next_cursor: None,
                }))
            }

            McpRequest::CallTool(params) => {
                let tool = self.find_tool(&params.name).ok_or_else(|| {
                    DispatchError::Protocol(JsonRpcError::invalid_params(format!(
                        "Unknown tool: {}",
                        params.name
                    )))
                })?;

                let claims = match self.inner.gate.handle(&params.name, credentials).await {
                    GateResult::Proceed(claims) => claims,
                    GateResult::Reject(challenge) => return Err(DispatchError::Denied(challenge)),
                };

                tracing::debug!(tool = %params.name, "Calling tool");
                let result = tool
                    .call(ToolRequest::new(params.arguments).with_claims(claims))
                    .await
                    .map_err(|e| {
                        tracing::error!(tool = %params.name, error = %e, "Tool failed");
                        DispatchError::Internal(JsonRpcError::internal_error(e.to_string()))
                    })?;

                Ok(McpResponse::CallTool(result))
            }

            McpRequest::Ping => Ok(McpResponse::Pong(EmptyResult {})),

            McpRequest::Unknown { method, .. } => Err(DispatchError::Protocol(
                JsonRpcError::method_not_found(&method),
            )),
        }
    }

    /// Handle an MCP notification (no response expected)
    pub fn handle_notification(&self, notification: McpNotification) {
        match notification {
            McpNotification::Initialized => {
                tracing::info!("Client initialized");
            }
            McpNotification::Cancelled { request_id } => {
                tracing::debug!(request_id = ?request_id, "Client cancelled request");
            }
            McpNotification::Unknown { method } => {
                tracing::debug!(method = %method, "Ignoring unknown notification");
            }
        }
    }
}

// =============================================================================
// Tower Service implementation
// =============================================================================

/// A minimal type-map for passing data through middleware.
///
/// Uses `Arc<dyn Any>` internally so `Clone` is cheap, which is needed for
/// batch requests that create multiple `RouterRequest`s from the same HTTP
/// request.
///
/// # Example
///
/// ```rust
/// use joke_mcp_server::router::Extensions;
///
/// let mut ext = Extensions::new();
/// ext.insert(42u32);
/// assert_eq!(ext.get::<u32>(), Some(&42));
/// ```
#[derive(Default, Clone)]
pub struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create an empty extensions map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value into the extensions map.
    ///
    /// If a value of the same type already exists, it is replaced.
    pub fn insert<T: Send + Sync + 'static>(&mut self, val: T) {
        self.map.insert(TypeId::of::<T>(), Arc::new(val));
    }

    /// Get a reference to a value in the extensions map.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|val| val.downcast_ref::<T>())
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Raw bearer token presented by the caller, carried in [`Extensions`].
#[derive(Clone)]
pub struct BearerToken(pub String);

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(..)")
    }
}

impl Extensions {
    /// Shorthand for extensions carrying a bearer token.
    pub fn with_bearer_token(token: Option<String>) -> Self {
        let mut ext = Self::new();
        if let Some(token) = token {
            ext.insert(BearerToken(token));
        }
        ext
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.get::<BearerToken>().map(|t| t.0.as_str())
    }
}

/// Why a request did not produce a result.
#[derive(Debug, Clone)]
pub enum DispatchError {
    /// Unknown method or tool, or bad parameters.
    Protocol(JsonRpcError),
    /// Refused by the request gate.
    Denied(Challenge),
    /// The tool itself failed.
    Internal(JsonRpcError),
}

impl DispatchError {
    /// HTTP status the transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::Protocol(_) => 200,
            DispatchError::Denied(challenge) => challenge.status_code(),
            DispatchError::Internal(_) => 500,
        }
    }

    /// The JSON-RPC error object for this failure.
    ///
    /// Denials carry the `WWW-Authenticate` value in `data` so transports
    /// without headers can still surface the challenge.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            DispatchError::Protocol(err) | DispatchError::Internal(err) => err.clone(),
            DispatchError::Denied(challenge) => JsonRpcError::unauthorized(challenge.summary())
                .with_data(serde_json::json!({
                    "www_authenticate": challenge.www_authenticate(),
                    "resource_metadata": challenge.resource_metadata_url(),
                })),
        }
    }
}

/// Request type for the tower Service implementation
#[derive(Debug)]
pub struct RouterRequest {
    pub id: RequestId,
    pub inner: McpRequest,
    /// Type-map for passing data (e.g., the [`BearerToken`]) through middleware.
    pub extensions: Extensions,
}

/// Response type for the tower Service implementation
#[derive(Debug)]
pub struct RouterResponse {
    pub id: RequestId,
    pub inner: std::result::Result<McpResponse, DispatchError>,
}

impl RouterResponse {
    pub fn error(id: RequestId, error: DispatchError) -> Self {
        Self {
            id,
            inner: Err(error),
        }
    }

    /// HTTP status for this response on its own.
    pub fn status_code(&self) -> u16 {
        match &self.inner {
            Ok(_) => 200,
            Err(err) => err.status_code(),
        }
    }

    /// The gate's challenge, if the request was denied.
    pub fn challenge(&self) -> Option<&Challenge> {
        match &self.inner {
            Err(DispatchError::Denied(challenge)) => Some(challenge),
            _ => None,
        }
    }

    /// Convert to JSON-RPC response
    pub fn into_jsonrpc(self) -> JsonRpcResponse {
        match self.inner {
            Ok(response) => match serde_json::to_value(response) {
                Ok(result) => JsonRpcResponse::result(self.id, result),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize response");
                    JsonRpcResponse::error(
                        Some(self.id),
                        JsonRpcError::internal_error(format!("Serialization error: {}", e)),
                    )
                }
            },
            Err(error) => JsonRpcResponse::error(Some(self.id), error.to_jsonrpc_error()),
        }
    }
}

impl Service<RouterRequest> for McpRouter {
    type Response = RouterResponse;
    type Error = std::convert::Infallible; // Errors are in the response
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RouterRequest) -> Self::Future {
        let router = self.clone();
        Box::pin(async move {
            let credentials = req.extensions.bearer_token();
            let inner = router.handle(req.inner, credentials).await;
            Ok(RouterResponse { id: req.id, inner })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::jokes::{DAD_JOKES, JokeGenerator};
    use crate::oauth::{ChallengeKind, KeyCache, KeySet, StaticKeySource, gate_with_keys};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use jsonwebtoken::{Algorithm, EncodingKey, Header};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tower::ServiceExt;

    const SECRET: &[u8] = b"router-test-secret";

    fn router() -> McpRouter {
        let config = AuthConfig::default();
        let keys = KeySet::from_jwks(&serde_json::json!({
            "keys": [{
                "kty": "oct", "kid": "k1", "alg": "HS256",
                "k": URL_SAFE_NO_PAD.encode(SECRET)
            }]
        }))
        .unwrap();
        let cache = KeyCache::new(StaticKeySource::new(keys), Duration::from_secs(300));
        let gate = Arc::new(gate_with_keys(&config, cache));
        let tools = crate::tools::all(Arc::new(JokeGenerator::with_seed(3))).unwrap();
        McpRouter::new(gate).tools(tools)
    }

    fn token(scope: &str) -> String {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k1".to_string());
        let claims = serde_json::json!({
            "sub": "user-1",
            "iss": AuthConfig::default().issuer(),
            "aud": "http://localhost:8000",
            "exp": now + 600,
            "scope": scope,
        });
        jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    async fn call(router: &McpRouter, inner: McpRequest, token: Option<String>) -> RouterResponse {
        let req = RouterRequest {
            id: RequestId::Number(1),
            inner,
            extensions: Extensions::with_bearer_token(token),
        };
        router.clone().oneshot(req).await.unwrap()
    }

    fn call_tool(name: &str) -> McpRequest {
        McpRequest::CallTool(CallToolParams {
            name: name.to_string(),
            arguments: serde_json::json!({}),
        })
    }

    async fn listed(router: &McpRouter, token: Option<String>) -> Vec<String> {
        let resp = call(router, McpRequest::ListTools(ListToolsParams::default()), token).await;
        match resp.inner {
            Ok(McpResponse::ListTools(result)) => {
                result.tools.into_iter().map(|t| t.name).collect()
            }
            other => panic!("Expected ListTools response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initialize_negotiates_version() {
        let router = router();
        let params = |version: &str| InitializeParams {
            protocol_version: version.to_string(),
            capabilities: serde_json::json!({}),
            client_info: Implementation {
                name: "test".to_string(),
                version: "1.0".to_string(),
            },
        };

        let resp = call(&router, McpRequest::Initialize(params("2024-11-05")), None).await;
        match resp.inner {
            Ok(McpResponse::Initialize(result)) => {
                assert_eq!(result.protocol_version, "2024-11-05");
                assert_eq!(result.server_info.name, "joke-server-http");
                assert!(result.capabilities.tools.is_some());
            }
            other => panic!("Expected Initialize response, got {:?}", other),
        }

        let resp = call(&router, McpRequest::Initialize(params("1999-01-01")), None).await;
        match resp.inner {
            Ok(McpResponse::Initialize(result)) => {
                assert_eq!(result.protocol_version, LATEST_PROTOCOL_VERSION)
            }
            other => panic!("Expected Initialize response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_public_tool_without_credentials() {
        let resp = call(&router(), call_tool("get_dad_joke"), None).await;
        assert_eq!(resp.status_code(), 200);
        match resp.inner {
            Ok(McpResponse::CallTool(result)) => {
                assert!(DAD_JOKES.contains(&result.all_text().as_str()))
            }
            other => panic!("Expected CallTool response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_protected_tool_without_credentials() {
        let resp = call(&router(), call_tool("get_mom_joke"), None).await;
        assert_eq!(resp.status_code(), 401);
        let challenge = resp.challenge().unwrap();
        assert_eq!(challenge.kind(), &ChallengeKind::CredentialsRequired);

        let json = serde_json::to_value(resp.into_jsonrpc()).unwrap();
        assert_eq!(json["error"]["code"], -32001);
        assert!(
            json["error"]["data"]["www_authenticate"]
                .as_str()
                .unwrap()
                .contains("resource_metadata=")
        );
    }

    #[tokio::test]
    async fn test_protected_tool_scope_checks() {
        let router = router();

        let resp = call(&router, call_tool("get_mom_joke"), Some(token("openid"))).await;
        assert!(matches!(
            resp.challenge().map(|c| c.kind()),
            Some(ChallengeKind::InsufficientScope { .. })
        ));

        let resp = call(&router, call_tool("get_mom_joke"), Some(token("tools:mom_jokes"))).await;
        assert_eq!(resp.status_code(), 200);
        assert!(matches!(resp.inner, Ok(McpResponse::CallTool(_))));
    }

    #[tokio::test]
    async fn test_listing_follows_the_gate() {
        let router = router();
        assert_eq!(listed(&router, None).await, vec!["get_dad_joke"]);
        assert_eq!(listed(&router, Some(token("openid"))).await, vec!["get_dad_joke"]);
        assert_eq!(
            listed(&router, Some(token("openid tools:mom_jokes"))).await,
            vec!["get_dad_joke", "get_mom_joke"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_listing_runs_on_spawned_tasks() {
        let router = router();
        let token = token("tools:mom_jokes");
        let task = tokio::spawn(async move { listed(&router, Some(token)).await });
        assert_eq!(task.await.unwrap(), vec!["get_dad_joke", "get_mom_joke"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_method() {
        let router = router();

        let resp = call(&router, call_tool("get_uncle_joke"), None).await;
        assert_eq!(resp.status_code(), 200);
        let json = serde_json::to_value(resp.into_jsonrpc()).unwrap();
        assert_eq!(json["error"]["code"], -32602);

        let resp = call(
            &router,
            McpRequest::Unknown {
                method: "resources/list".to_string(),
                params: None,
            },
            None,
        )
        .await;
        let json = serde_json::to_value(resp.into_jsonrpc()).unwrap();
        assert_eq!(json["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_tool_failure_is_internal() {
        let failing = crate::tool::ToolBuilder::new("explode")
            .handler_no_params(|| async { Err(crate::error::Error::tool("boom")) })
            .unwrap();
        let router = router().tool(failing);

        let resp = call(&router, call_tool("explode"), None).await;
        assert_eq!(resp.status_code(), 500);
        let json = serde_json::to_value(resp.into_jsonrpc()).unwrap();
        assert_eq!(json["error"]["code"], -32603);
    }

    #[tokio::test]
    async fn test_ping() {
        let resp = call(&router(), McpRequest::Ping, None).await;
        let json = serde_json::to_value(resp.into_jsonrpc()).unwrap();
        assert_eq!(json["result"], serde_json::json!({}));
    }

    #[test]
    fn test_bearer_token_debug_is_redacted() {
        let ext = Extensions::with_bearer_token(Some("secret-token".to_string()));
        assert_eq!(ext.bearer_token(), Some("secret-token"));
        assert!(!format!("{:?}", ext.get::<BearerToken>().unwrap()).contains("secret"));
    }
}
