//! Tool definition and builder API
//!
//! Tools are built with a fluent builder and executed through a boxed
//! [`ToolHandler`]:
//!
//! ```rust
//! use joke_mcp_server::tool::ToolBuilder;
//! use joke_mcp_server::protocol::CallToolResult;
//!
//! let tool = ToolBuilder::new("server_time")
//!     .description("Get the current server time")
//!     .read_only()
//!     .handler_no_params(|| async {
//!         Ok(CallToolResult::text("2025-01-01T00:00:00Z"))
//!     })
//!     .expect("valid tool name");
//!
//! assert_eq!(tool.name, "server_time");
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::oauth::TokenClaims;
use crate::protocol::{CallToolResult, ToolAnnotations, ToolDefinition};

/// Input schema for tools that take no arguments.
pub fn empty_input_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// Request handed to a tool handler.
#[derive(Debug, Clone, Default)]
pub struct ToolRequest {
    /// Tool arguments as raw JSON
    pub args: Value,
    /// Claims of the caller, present when the tool is protected and the
    /// request passed the gate
    pub claims: Option<TokenClaims>,
}

impl ToolRequest {
    pub fn new(args: Value) -> Self {
        Self { args, claims: None }
    }

    pub fn with_claims(mut self, claims: Option<TokenClaims>) -> Self {
        self.claims = claims;
        self
    }
}

/// Validate a tool name.
///
/// Tool names must be:
/// - 1-128 characters long
/// - Contain only alphanumeric characters, underscores, hyphens, and dots
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::tool("Tool name cannot be empty"));
    }
    if name.len() > 128 {
        return Err(Error::tool(format!(
            "Tool name '{}' exceeds maximum length of 128 characters (got {})",
            name,
            name.len()
        )));
    }
    if let Some(invalid_char) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-' && *c != '.')
    {
        return Err(Error::tool(format!(
            "Tool name '{}' contains invalid character '{}'. Only alphanumeric, underscore, hyphen, and dot are allowed.",
            name, invalid_char
        )));
    }
    Ok(())
}

/// A boxed future for tool handlers
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Tool handler trait - the core abstraction for tool execution
pub trait ToolHandler: Send + Sync {
    /// Execute the tool
    fn call(&self, req: ToolRequest) -> BoxFuture<'_, Result<CallToolResult>>;
}

/// A complete tool: its listing metadata plus the handler that runs it.
#[derive(Clone)]
pub struct Tool {
    /// Tool name (must be 1-128 chars, alphanumeric/underscore/hyphen/dot only)
    pub name: String,
    /// Description of what the tool does
    pub description: Option<String>,
    /// Tool annotations (hints about behavior)
    pub annotations: Option<ToolAnnotations>,
    input_schema: Value,
    handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("annotations", &self.annotations)
            .finish_non_exhaustive()
    }
}

impl Tool {
    /// Get the tool definition for tools/list
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            annotations: self.annotations.clone(),
        }
    }

    /// Run the tool.
    ///
    /// Handler errors are returned as-is; the transport decides how to
    /// surface them.
    pub fn call(&self, req: ToolRequest) -> BoxFuture<'static, Result<CallToolResult>> {
        let handler = self.handler.clone();
        Box::pin(async move { handler.call(req).await })
    }
}

/// Builder for creating tools with a fluent API
pub struct ToolBuilder {
    name: String,
    description: Option<String>,
    annotations: Option<ToolAnnotations>,
    input_schema: Value,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            annotations: None,
            input_schema: empty_input_schema(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.annotations.get_or_insert_with(Default::default).title = Some(title.into());
        self
    }

    /// Mark the tool as read-only (does not modify state).
    pub fn read_only(mut self) -> Self {
        self.annotations
            .get_or_insert_with(Default::default)
            .read_only_hint = true;
        self
    }

    /// Create a tool from a handler that takes no input.
    ///
    /// Returns an error if the tool name is invalid.
    pub fn handler_no_params<F, Fut>(self, handler: F) -> Result<Tool>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
    {
        self.build(NoParamsHandler { handler })
    }

    /// Create a tool from a handler that sees the full [`ToolRequest`].
    ///
    /// Returns an error if the tool name is invalid.
    pub fn handler<F, Fut>(self, handler: F) -> Result<Tool>
    where
        F: Fn(ToolRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
    {
        self.build(RequestHandler { handler })
    }

    fn build<H: ToolHandler + 'static>(self, handler: H) -> Result<Tool> {
        validate_tool_name(&self.name)?;
        Ok(Tool {
            name: self.name,
            description: self.description,
            annotations: self.annotations,
            input_schema: self.input_schema,
            handler: Arc::new(handler),
        })
    }
}

struct NoParamsHandler<F> {
    handler: F,
}

impl<F, Fut> ToolHandler for NoParamsHandler<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
{
    fn call(&self, _req: ToolRequest) -> BoxFuture<'_, Result<CallToolResult>> {
        Box::pin((self.handler)())
    }
}

struct RequestHandler<F> {
    handler: F,
}

impl<F, Fut> ToolHandler for RequestHandler<F>
where
    F: Fn(ToolRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
{
    fn call(&self, req: ToolRequest) -> BoxFuture<'_, Result<CallToolResult>> {
        Box::pin((self.handler)(req))
    }
}
