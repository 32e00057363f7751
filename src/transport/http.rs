//! HTTP transport for the joke server
//!
//! Serves JSON-RPC on `POST /mcp` together with the discovery document,
//! a server info page and a health check.
//!
//! Every request is independent: the caller's bearer token is read from the
//! `Authorization` header of each POST and handed to the router, which asks
//! the [`RequestGate`](crate::oauth::RequestGate) before running or listing a
//! protected tool.
//!
//! # Example
//!
//! ```rust,ignore
//! use joke_mcp_server::transport::http::HttpTransport;
//!
//! let transport = HttpTransport::new(router);
//! transport.serve("127.0.0.1:8000").await?;
//! ```

use std::any::Any;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::error::{Error, JsonRpcError, Result};
use crate::jsonrpc::{self, JsonRpcLayer, JsonRpcService};
use crate::oauth::ProtectedResourceMetadata;
use crate::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcResponse, McpNotification};
use crate::router::{Extensions, McpRouter};
use crate::tracing_layer::{McpTracingLayer, McpTracingService};

/// Path of the JSON-RPC endpoint.
pub const MCP_PATH: &str = "/mcp";

/// Path of the health check.
pub const HEALTH_PATH: &str = "/health";

type McpService = JsonRpcService<McpTracingService<McpRouter>>;

/// Shared state for the HTTP transport
struct AppState {
    router: McpRouter,
    service: McpService,
}

/// HTTP transport for the joke server
pub struct HttpTransport {
    router: McpRouter,
}

impl HttpTransport {
    /// Create a new HTTP transport wrapping an MCP router
    pub fn new(router: McpRouter) -> Self {
        Self { router }
    }

    /// Build the axum router for this transport
    pub fn into_router(self) -> Router {
        let service = ServiceBuilder::new()
            .layer(JsonRpcLayer::new())
            .layer(McpTracingLayer::new())
            .service(self.router.clone());

        let state = Arc::new(AppState {
            router: self.router,
            service,
        });

        Router::new()
            .route(ProtectedResourceMetadata::well_known_path(), get(handle_metadata))
            .route("/", get(handle_root))
            .route(HEALTH_PATH, get(handle_health))
            .route(MCP_PATH, post(handle_post))
            .with_state(state)
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve the transport on the given address
    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("Failed to bind to {}: {}", addr, e)))?;

        tracing::info!("MCP HTTP transport listening on {}", addr);

        axum::serve(listener, self.into_router())
            .await
            .map_err(|e| Error::Transport(format!("Server error: {}", e)))?;

        Ok(())
    }
}

/// Protected Resource Metadata (RFC 9728). Never requires credentials.
async fn handle_metadata(State(state): State<Arc<AppState>>) -> Json<ProtectedResourceMetadata> {
    Json(state.router.gate().metadata().as_ref().clone())
}

async fn handle_root(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "Joke MCP Server",
        "version": state.router.server_version(),
        "description": "MCP server providing dad and mom joke generation tools",
        "transport": "streamable-http",
        "endpoints": {
            "mcp": MCP_PATH,
            "health": HEALTH_PATH,
            "oauth_protected_resource": ProtectedResourceMetadata::well_known_path(),
        },
    }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Extract the bearer token from the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Handle POST requests (JSON-RPC messages from client)
async fn handle_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let parsed: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            return json_rpc_error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcError::parse_error(format!("Invalid JSON: {}", e)),
            );
        }
    };

    // Notifications carry no id and get no body
    if parsed.is_object() && parsed.get("id").is_none() {
        match serde_json::from_value::<JsonRpcNotification>(parsed) {
            Ok(notification) => {
                state
                    .router
                    .handle_notification(McpNotification::from_jsonrpc(&notification));
                return StatusCode::ACCEPTED.into_response();
            }
            Err(e) => {
                return json_rpc_error_response(
                    StatusCode::BAD_REQUEST,
                    JsonRpcError::invalid_request(format!("Invalid request: {}", e)),
                );
            }
        }
    }

    let message: JsonRpcMessage = match serde_json::from_value(parsed) {
        Ok(m) => m,
        Err(e) => {
            return json_rpc_error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcError::invalid_request(format!("Invalid request: {}", e)),
            );
        }
    };

    let extensions = Extensions::with_bearer_token(bearer_token(&headers));
    let routed = match state.service.call_message(message, extensions).await {
        Ok(routed) => routed,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected JSON-RPC message");
            return (StatusCode::BAD_REQUEST, Json(jsonrpc::empty_batch_response())).into_response();
        }
    };

    let status = StatusCode::from_u16(routed.status_code()).unwrap_or(StatusCode::OK);
    let www_authenticate = routed.www_authenticate();

    let mut response = (status, Json(jsonrpc::to_json(routed))).into_response();
    if let Some(challenge) = www_authenticate {
        match HeaderValue::from_str(&challenge) {
            Ok(value) => {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
            Err(e) => {
                tracing::error!(error = %e, "Challenge is not a valid header value");
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
        }
    }
    response
}

/// Turn a handler panic into a JSON-RPC internal error.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "Request handler panicked");

    json_rpc_error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        JsonRpcError::internal_error("Internal error"),
    )
}

/// Create a JSON-RPC error response without a request id
fn json_rpc_error_response(status: StatusCode, error: JsonRpcError) -> Response {
    let response = JsonRpcResponse::error(None, error);
    (status, Json(response)).into_response()
}
