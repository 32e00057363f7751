//! Stdio transport for MCP
//!
//! Reads JSON-RPC messages from stdin and writes responses to stdout.
//! Uses line-delimited JSON format.
//!
//! There are no headers on stdio, so the bearer token for protected tools is
//! configured once at startup. A denied call comes back as a JSON-RPC error
//! (-32001) with the challenge in `data.www_authenticate`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Error, JsonRpcError, Result};
use crate::jsonrpc::{self, JsonRpcLayer, JsonRpcService};
use crate::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcResponse, McpNotification};
use crate::router::{Extensions, McpRouter};
use crate::tracing_layer::{McpTracingLayer, McpTracingService};

/// Stdio transport for MCP servers
///
/// Reads JSON-RPC messages from stdin and writes responses to stdout.
/// Supports both single requests and batch requests.
pub struct StdioTransport {
    service: JsonRpcService<McpTracingService<McpRouter>>,
    router: McpRouter,
    bearer_token: Option<String>,
}

impl StdioTransport {
    /// Create a new stdio transport wrapping an MCP router
    pub fn new(router: McpRouter) -> Self {
        let service = tower::ServiceBuilder::new()
            .layer(JsonRpcLayer::new())
            .layer(McpTracingLayer::new())
            .service(router.clone());
        Self {
            service,
            router,
            bearer_token: None,
        }
    }

    /// Present `token` on every request.
    pub fn bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        self
    }

    /// Run the transport, processing messages until EOF or error
    pub async fn run(&mut self) -> Result<()> {
        let reader = BufReader::new(tokio::io::stdin());
        self.run_with(reader, tokio::io::stdout()).await
    }

    /// Run over arbitrary line-oriented input and output.
    pub async fn run_with<R, W>(&mut self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();

        tracing::info!(
            authenticated = self.bearer_token.is_some(),
            "Stdio transport started, waiting for input"
        );

        loop {
            line.clear();
            let bytes_read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Transport(format!("Failed to read from stdin: {}", e)))?;

            if bytes_read == 0 {
                tracing::info!("Stdin closed, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response = match self.process_line(trimmed).await {
                Ok(Some(response)) => response,
                // Notification, no response needed
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Error processing message");
                    let error = match e {
                        Error::JsonRpc(error) => error,
                        other => JsonRpcError::parse_error(other.to_string()),
                    };
                    serde_json::to_value(JsonRpcResponse::error(None, error))?
                }
            };

            let response_json = serde_json::to_string(&response)?;
            tracing::debug!(bytes = response_json.len(), "Sending response");
            write_line(&mut writer, &response_json).await?;
        }

        Ok(())
    }

    /// Process a single line of input
    async fn process_line(&mut self, line: &str) -> Result<Option<serde_json::Value>> {
        let parsed: serde_json::Value = serde_json::from_str(line)?;
        if parsed.is_object() && parsed.get("id").is_none() {
            let notification: JsonRpcNotification = serde_json::from_value(parsed)?;
            self.router
                .handle_notification(McpNotification::from_jsonrpc(&notification));
            return Ok(None);
        }

        let message: JsonRpcMessage = serde_json::from_value(parsed)?;
        let extensions = Extensions::with_bearer_token(self.bearer_token.clone());
        let routed = self.service.call_message(message, extensions).await?;
        Ok(Some(jsonrpc::to_json(routed)))
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| Error::Transport(format!("Failed to write to stdout: {}", e)))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| Error::Transport(format!("Failed to write newline: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Transport(format!("Failed to flush stdout: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::jokes::{JokeGenerator, MOM_JOKES};
    use crate::oauth::{KeyCache, StaticKeySource, gate_with_keys};
    use std::sync::Arc;
    use std::time::Duration;

    fn transport(config: &AuthConfig) -> StdioTransport {
        let cache = KeyCache::new(StaticKeySource::default(), Duration::from_secs(300));
        let gate = Arc::new(gate_with_keys(config, cache));
        let tools = crate::tools::all(Arc::new(JokeGenerator::with_seed(2))).unwrap();
        StdioTransport::new(McpRouter::new(gate).tools(tools))
    }

    async fn run_lines(transport: &mut StdioTransport, input: &str) -> Vec<serde_json::Value> {
        let mut output = Vec::new();
        transport
            .run_with(BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_session_over_lines() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","capabilities":{},"clientInfo":{"name":"t","version":"1"}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"get_mom_joke","arguments":{}}}"#,
            "\n",
            "not json\n",
        );

        let responses = run_lines(&mut transport(&AuthConfig::default()), input).await;
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["result"]["protocolVersion"], "2025-06-18");

        assert_eq!(responses[1]["id"], 2);
        assert_eq!(responses[1]["error"]["code"], -32001);
        assert!(
            responses[1]["error"]["data"]["www_authenticate"]
                .as_str()
                .unwrap()
                .starts_with("Bearer resource_metadata=")
        );

        assert_eq!(responses[2]["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_configured_token_is_presented() {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use jsonwebtoken::{Algorithm, EncodingKey, Header};

        let secret = b"stdio-secret";
        let config = AuthConfig::default();
        let keys = crate::oauth::KeySet::from_jwks(&serde_json::json!({
            "keys": [{
                "kty": "oct", "kid": "s1", "alg": "HS256",
                "k": URL_SAFE_NO_PAD.encode(secret)
            }]
        }))
        .unwrap();
        let cache = KeyCache::new(StaticKeySource::new(keys), Duration::from_secs(300));
        let gate = Arc::new(gate_with_keys(&config, cache));
        let tools = crate::tools::all(Arc::new(JokeGenerator::with_seed(2))).unwrap();

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("s1".to_string());
        let exp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 300;
        let token = jsonwebtoken::encode(
            &header,
            &serde_json::json!({
                "sub": "stdio-user",
                "iss": config.issuer(),
                "exp": exp,
                "scope": "tools:mom_jokes",
            }),
            &EncodingKey::from_secret(secret),
        )
        .unwrap();

        // Surrounding whitespace from the environment is not part of the token
        let mut transport = StdioTransport::new(McpRouter::new(gate).tools(tools))
            .bearer_token(Some(format!(" {token}\n")));
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"get_mom_joke"}}"#,
            "\n"
        );
        let responses = run_lines(&mut transport, input).await;
        let text = responses[0]["result"]["content"][0]["text"].as_str().unwrap();
        assert!(MOM_JOKES.contains(&text));
    }

    #[test]
    fn test_configured_token_is_trimmed() {
        let blank = transport(&AuthConfig::default()).bearer_token(Some("  ".to_string()));
        assert!(blank.bearer_token.is_none());

        let padded =
            transport(&AuthConfig::default()).bearer_token(Some("abc.def.ghi \n".to_string()));
        assert_eq!(padded.bearer_token.as_deref(), Some("abc.def.ghi"));
    }
}
