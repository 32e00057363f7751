//! MCP transport implementations
//!
//! - `stdio` - line-delimited JSON-RPC on stdin/stdout, the default
//! - `http` - axum server with the JSON-RPC endpoint and OAuth discovery
//!
//! Both transports stack [`JsonRpcLayer`](crate::jsonrpc::JsonRpcLayer) over
//! [`McpTracingLayer`](crate::tracing_layer::McpTracingLayer) over the
//! router, and pass the caller's bearer token down in
//! [`Extensions`](crate::router::Extensions).

pub mod http;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;
