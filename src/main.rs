//! Joke MCP server binary.

use std::sync::Arc;

use clap::Parser;
use joke_mcp_server::config::{Args, Transport};
use joke_mcp_server::{
    BoxError, Error, HttpTransport, JokeGenerator, McpRouter, StdioTransport, oauth,
};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    let directive = format!("joke_mcp_server={}", args.log_level)
        .parse::<tracing_subscriber::filter::Directive>()
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", args.log_level, e)))?;

    // Initialize tracing; stdout belongs to the stdio transport
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let config = args.auth_config();
    tracing::info!(
        transport = ?args.transport,
        issuer = %config.issuer(),
        resource = %config.resource_url(),
        audience_mode = ?config.audience_mode,
        scope_enforcement = ?config.scope_enforcement,
        "Starting joke MCP server"
    );

    let gate = oauth::gate_from_config(&config)?;

    // Warm the key cache; a cold start is not fatal, the next miss refetches
    match gate.validator().key_cache().refresh().await {
        Ok(keys) => tracing::info!(keys = keys.len(), "Loaded signing keys"),
        Err(e) => tracing::warn!(
            error = %e,
            jwks_url = %config.jwks_url(),
            "Could not load signing keys at startup"
        ),
    }

    let tools = joke_mcp_server::tools::all(Arc::new(JokeGenerator::new()))?;
    let router = McpRouter::new(Arc::new(gate))
        .server_info("joke-server-http", env!("CARGO_PKG_VERSION"))
        .instructions(
            "Joke server.\n\n\
             Available tools:\n\
             - get_dad_joke: a random dad joke (public)\n\
             - get_mom_joke: a random mom joke (requires the tools:mom_jokes scope)",
        )
        .tools(tools);

    match args.transport {
        Transport::Stdio => {
            tracing::info!("Serving over stdio");
            StdioTransport::new(router)
                .bearer_token(args.bearer_token.clone())
                .run()
                .await?;
        }
        Transport::Http => {
            let addr = format!("{}:{}", args.host, args.port);
            HttpTransport::new(router).serve(&addr).await?;
        }
    }

    Ok(())
}
