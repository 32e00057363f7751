//! # joke-mcp-server
//!
//! An MCP server with two tools built on [Tower](https://docs.rs/tower):
//!
//! - `get_dad_joke` is public
//! - `get_mom_joke` needs an OAuth 2.1 bearer token carrying the
//!   `tools:mom_jokes` scope
//!
//! The server is an OAuth **resource server**. Tokens are issued by Keycloak;
//! this crate only validates them against the realm's JWKS and advertises the
//! authorization server through Protected Resource Metadata (RFC 9728).
//!
//! ## Request flow
//!
//! ```text
//! transport (stdio | http)
//!   └─ JsonRpcLayer        framing, batches, version check
//!       └─ McpTracingLayer structured request logs
//!           └─ McpRouter   initialize / ping / tools/list / tools/call
//!               └─ RequestGate  policy + token validation → Proceed | Reject(Challenge)
//! ```
//!
//! Listing tools and calling them go through the same
//! [`RequestGate::handle`](oauth::RequestGate::handle), so a caller sees a tool
//! in `tools/list` exactly when calling it would succeed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use joke_mcp_server::{BoxError, JokeGenerator, McpRouter, StdioTransport};
//! use joke_mcp_server::config::AuthConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BoxError> {
//!     let gate = joke_mcp_server::oauth::gate_from_config(&AuthConfig::default())?;
//!     let tools = joke_mcp_server::tools::all(Arc::new(JokeGenerator::new()))?;
//!     let router = McpRouter::new(Arc::new(gate)).tools(tools);
//!
//!     StdioTransport::new(router).run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod jokes;
pub mod jsonrpc;
pub mod oauth;
pub mod protocol;
pub mod router;
pub mod tool;
pub mod tools;
pub mod tracing_layer;
pub mod transport;

// Re-exports
pub use error::{BoxError, Error, Result};
pub use jokes::{JokeGenerator, JokeKind};
pub use jsonrpc::{JsonRpcLayer, JsonRpcService, RoutedMessage};
pub use protocol::{
    CallToolResult, Content, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    JsonRpcResponseMessage, McpRequest, McpResponse,
};
pub use router::{DispatchError, Extensions, McpRouter, RouterRequest, RouterResponse};
pub use tool::{Tool, ToolBuilder, ToolHandler, ToolRequest};
pub use tracing_layer::{McpTracingLayer, McpTracingService};
pub use transport::{HttpTransport, StdioTransport};
