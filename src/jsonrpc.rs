//! JSON-RPC 2.0 service layer
//!
//! Provides a Tower [`Layer`] and [`Service`] for JSON-RPC framing of MCP requests.
//!
//! - [`JsonRpcLayer`] - Tower layer for [`ServiceBuilder`](tower::ServiceBuilder) composition
//! - [`JsonRpcService`] - Tower service wrapping an MCP router
//!
//! The service handles:
//! - Single request processing
//! - Batch request processing (concurrent execution)
//! - JSON-RPC version validation
//! - Error conversion to JSON-RPC error responses
//!
//! Responses keep their [`RouterResponse`] form until the transport asks for
//! JSON, so the transport can still see the HTTP status and any challenge.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Layer;
use tower_service::Service;

use crate::error::{Error, JsonRpcError, Result};
use crate::protocol::{
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, JsonRpcResponseMessage, McpRequest,
};
use crate::router::{DispatchError, Extensions, RouterRequest, RouterResponse};

/// Tower layer that adds JSON-RPC 2.0 framing to an MCP service.
///
/// # Example
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
/// use joke_mcp_server::{JsonRpcLayer, McpRouter};
///
/// let service = ServiceBuilder::new()
///     .layer(JsonRpcLayer::new())
///     .service(router);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpcLayer {
    _priv: (),
}

impl JsonRpcLayer {
    /// Create a new `JsonRpcLayer`.
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

impl<S> Layer<S> for JsonRpcLayer {
    type Service = JsonRpcService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JsonRpcService::new(inner)
    }
}

/// A JSON-RPC message plus the per-request data transports attach to it.
#[derive(Debug)]
pub struct JsonRpcCall {
    pub message: JsonRpcMessage,
    pub extensions: Extensions,
}

/// Result of routing a [`JsonRpcMessage`].
#[derive(Debug)]
pub enum RoutedMessage {
    Single(RouterResponse),
    Batch(Vec<RouterResponse>),
}

impl RoutedMessage {
    /// HTTP status for the whole message.
    ///
    /// A batch answers with the challenge status only when every entry was
    /// denied. Otherwise it is 200 and the denials stay in the entries.
    pub fn status_code(&self) -> u16 {
        match self {
            RoutedMessage::Single(response) => response.status_code(),
            RoutedMessage::Batch(responses) => {
                if responses.iter().all(|r| r.challenge().is_some()) {
                    responses.first().map_or(200, RouterResponse::status_code)
                } else {
                    200
                }
            }
        }
    }

    /// `WWW-Authenticate` value for the first denied entry, if any.
    pub fn www_authenticate(&self) -> Option<String> {
        let first_denied = match self {
            RoutedMessage::Single(response) => response.challenge(),
            RoutedMessage::Batch(responses) => responses.iter().find_map(|r| r.challenge()),
        };
        first_denied.map(|c| c.www_authenticate())
    }

    pub fn into_jsonrpc(self) -> JsonRpcResponseMessage {
        match self {
            RoutedMessage::Single(response) => {
                JsonRpcResponseMessage::Single(response.into_jsonrpc())
            }
            RoutedMessage::Batch(responses) => JsonRpcResponseMessage::Batch(
                responses
                    .into_iter()
                    .map(RouterResponse::into_jsonrpc)
                    .collect(),
            ),
        }
    }
}

/// Service that handles JSON-RPC framing.
///
/// Wraps an MCP service and handles JSON-RPC request/response conversion.
/// Supports both single requests and batch requests.
pub struct JsonRpcService<S> {
    inner: S,
}

impl<S> JsonRpcService<S> {
    /// Create a new JSON-RPC service wrapping the given inner service
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S> JsonRpcService<S>
where
    S: Service<RouterRequest, Response = RouterResponse, Error = std::convert::Infallible>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    /// Process a single JSON-RPC request
    pub async fn call_single(&self, req: JsonRpcRequest, extensions: Extensions) -> RouterResponse {
        process_single_request(self.inner.clone(), req, extensions).await
    }

    /// Process a batch of JSON-RPC requests concurrently
    pub async fn call_batch(
        &self,
        requests: Vec<JsonRpcRequest>,
        extensions: Extensions,
    ) -> Result<Vec<RouterResponse>> {
        if requests.is_empty() {
            return Err(Error::JsonRpc(JsonRpcError::invalid_request(
                "Empty batch request",
            )));
        }

        let futures: Vec<_> = requests
            .into_iter()
            .map(|req| process_single_request(self.inner.clone(), req, extensions.clone()))
            .collect();

        Ok(futures::future::join_all(futures).await)
    }

    /// Process a JSON-RPC message (single or batch)
    pub async fn call_message(
        &self,
        msg: JsonRpcMessage,
        extensions: Extensions,
    ) -> Result<RoutedMessage> {
        match msg {
            JsonRpcMessage::Single(req) => Ok(RoutedMessage::Single(
                self.call_single(req, extensions).await,
            )),
            JsonRpcMessage::Batch(requests) => Ok(RoutedMessage::Batch(
                self.call_batch(requests, extensions).await?,
            )),
        }
    }
}

impl<S> Clone for JsonRpcService<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> Service<JsonRpcCall> for JsonRpcService<S>
where
    S: Service<RouterRequest, Response = RouterResponse, Error = std::convert::Infallible>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    type Response = RoutedMessage;
    type Error = Error;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: JsonRpcCall) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { service.call_message(call.message, call.extensions).await })
    }
}

/// Helper function to process a single JSON-RPC request
async fn process_single_request<S>(
    mut inner: S,
    req: JsonRpcRequest,
    extensions: Extensions,
) -> RouterResponse
where
    S: Service<RouterRequest, Response = RouterResponse, Error = std::convert::Infallible>
        + Send
        + 'static,
    S::Future: Send,
{
    // Validate JSON-RPC version
    if let Err(e) = req.validate() {
        return RouterResponse::error(req.id, DispatchError::Protocol(e));
    }

    // Parse the MCP request from JSON-RPC
    let mcp_request = match McpRequest::from_jsonrpc(&req) {
        Ok(r) => r,
        Err(e) => {
            return RouterResponse::error(
                req.id,
                DispatchError::Protocol(JsonRpcError::invalid_params(e.to_string())),
            );
        }
    };

    let router_req = RouterRequest {
        id: req.id.clone(),
        inner: mcp_request,
        extensions,
    };

    match inner.call(router_req).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// Serialize a routed message, falling back to a bare internal error.
pub fn to_json(message: RoutedMessage) -> serde_json::Value {
    serde_json::to_value(message.into_jsonrpc()).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize JSON-RPC response");
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": JsonRpcError::internal_error("Serialization error"),
        })
    })
}

/// The error response for a batch with no entries.
pub fn empty_batch_response() -> JsonRpcResponse {
    JsonRpcResponse::error(None, JsonRpcError::invalid_request("Empty batch request"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::jokes::JokeGenerator;
    use crate::oauth::{KeyCache, StaticKeySource, gate_with_keys};
    use crate::router::McpRouter;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn create_test_router() -> McpRouter {
        let cache = KeyCache::new(StaticKeySource::default(), Duration::from_secs(300));
        let gate = Arc::new(gate_with_keys(&AuthConfig::default(), cache));
        let tools = crate::tools::all(Arc::new(JokeGenerator::with_seed(9))).unwrap();
        McpRouter::new(gate).tools(tools)
    }

    fn call_tool(id: i64, name: &str) -> JsonRpcRequest {
        JsonRpcRequest::new(id, "tools/call").with_params(serde_json::json!({
            "name": name,
            "arguments": {}
        }))
    }

    #[tokio::test]
    async fn test_jsonrpc_service() {
        let service = JsonRpcService::new(create_test_router());

        let init_req = JsonRpcRequest::new(1, "initialize").with_params(serde_json::json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": { "name": "test", "version": "1.0" }
        }));
        let resp = service.call_single(init_req, Extensions::new()).await;
        assert!(matches!(resp.into_jsonrpc(), JsonRpcResponse::Result(_)));

        let req = JsonRpcRequest::new(2, "tools/list").with_params(serde_json::json!({}));
        match service.call_single(req, Extensions::new()).await.into_jsonrpc() {
            JsonRpcResponse::Result(r) => {
                let tools = r.result.get("tools").unwrap().as_array().unwrap();
                assert_eq!(tools.len(), 1);
                assert_eq!(tools[0]["name"], "get_dad_joke");
            }
            JsonRpcResponse::Error(e) => panic!("Expected result, got error: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_invalid_version_and_params() {
        let service = JsonRpcService::new(create_test_router());

        let mut req = JsonRpcRequest::new(1, "ping");
        req.jsonrpc = "1.0".to_string();
        let resp = service.call_single(req, Extensions::new()).await;
        assert_eq!(resp.status_code(), 200);
        let json = serde_json::to_value(resp.into_jsonrpc()).unwrap();
        assert_eq!(json["error"]["code"], -32600);

        let req = JsonRpcRequest::new(2, "tools/call").with_params(serde_json::json!({}));
        let json = serde_json::to_value(
            service.call_single(req, Extensions::new()).await.into_jsonrpc(),
        )
        .unwrap();
        assert_eq!(json["error"]["code"], -32602);
        assert_eq!(json["id"], 2);
    }

    #[tokio::test]
    async fn test_batch_request() {
        let service = JsonRpcService::new(create_test_router());

        let requests = vec![
            JsonRpcRequest::new(2, "tools/list").with_params(serde_json::json!({})),
            call_tool(3, "get_dad_joke"),
            call_tool(4, "get_mom_joke"),
        ];

        let routed = service
            .call_message(JsonRpcMessage::Batch(requests), Extensions::new())
            .await
            .unwrap();
        assert_eq!(routed.status_code(), 200);
        assert!(
            routed
                .www_authenticate()
                .unwrap()
                .starts_with("Bearer resource_metadata=")
        );

        match routed.into_jsonrpc() {
            JsonRpcResponseMessage::Batch(responses) => {
                assert_eq!(responses.len(), 3);
                let denied = serde_json::to_value(&responses[2]).unwrap();
                assert_eq!(denied["error"]["code"], -32001);
            }
            other => panic!("Expected batch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_denial_carries_challenge() {
        let service = JsonRpcService::new(create_test_router());
        let routed = service
            .call_message(
                JsonRpcMessage::Single(call_tool(1, "get_mom_joke")),
                Extensions::new(),
            )
            .await
            .unwrap();

        assert_eq!(routed.status_code(), 401);
        assert_eq!(
            routed.www_authenticate().unwrap(),
            "Bearer resource_metadata=\"http://localhost:8000/.well-known/oauth-protected-resource\""
        );
    }

    #[tokio::test]
    async fn test_fully_denied_batch_is_unauthorized() {
        let service = JsonRpcService::new(create_test_router());
        let routed = service
            .call_message(
                JsonRpcMessage::Batch(vec![
                    call_tool(1, "get_mom_joke"),
                    call_tool(2, "get_mom_joke"),
                ]),
                Extensions::new(),
            )
            .await
            .unwrap();

        assert_eq!(routed.status_code(), 401);
        assert!(routed.www_authenticate().is_some());
    }

    #[tokio::test]
    async fn test_empty_batch_error() {
        let service = JsonRpcService::new(create_test_router());
        let result = service.call_batch(vec![], Extensions::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_service_future_is_send() {
        let mut service = JsonRpcService::new(create_test_router());
        let call = JsonRpcCall {
            message: JsonRpcMessage::Single(
                JsonRpcRequest::new(1, "tools/list").with_params(serde_json::json!({})),
            ),
            extensions: Extensions::new(),
        };
        let routed = tokio::spawn(service.call(call)).await.unwrap().unwrap();
        assert_eq!(routed.status_code(), 200);
    }

    #[tokio::test]
    async fn test_jsonrpc_layer() {
        use tower::ServiceBuilder;

        let service = ServiceBuilder::new()
            .layer(JsonRpcLayer::new())
            .service(create_test_router());

        let call = JsonRpcCall {
            message: JsonRpcMessage::Single(JsonRpcRequest::new(1, "ping")),
            extensions: Extensions::new(),
        };
        let json = to_json(service.oneshot(call).await.unwrap());
        assert_eq!(json["id"], 1);
        assert_eq!(json["result"], serde_json::json!({}));
    }
}
