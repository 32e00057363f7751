//! The joke tools exposed by the server.

use std::sync::Arc;

use crate::error::Result;
use crate::jokes::{JokeGenerator, JokeKind};
use crate::protocol::CallToolResult;
use crate::tool::{Tool, ToolBuilder, ToolRequest};

pub const DAD_JOKE_TOOL: &str = "get_dad_joke";
pub const MOM_JOKE_TOOL: &str = "get_mom_joke";

/// Public tool: a random dad joke.
pub fn dad_joke(jokes: Arc<JokeGenerator>) -> Result<Tool> {
    ToolBuilder::new(DAD_JOKE_TOOL)
        .description(
            "Get a random dad joke. Dad jokes are known for being cheesy, corny, \
             and often involving puns or wordplay. Perfect for groans and eye rolls!",
        )
        .title("Dad joke")
        .read_only()
        .handler_no_params(move || {
            let joke = jokes.joke(JokeKind::Dad);
            async move { Ok(CallToolResult::text(joke)) }
        })
}

/// Protected tool: a random mom joke. Requires `tools:mom_jokes`.
pub fn mom_joke(jokes: Arc<JokeGenerator>) -> Result<Tool> {
    ToolBuilder::new(MOM_JOKE_TOOL)
        .description(
            "Get a random mom joke. These are classic sayings and phrases that \
             mothers often use. Nostalgic and relatable!",
        )
        .title("Mom joke")
        .read_only()
        .handler(move |req: ToolRequest| {
            let joke = jokes.joke(JokeKind::Mom);
            if let Some(claims) = &req.claims {
                tracing::info!(subject = %claims.subject(), "Serving mom joke");
            }
            async move { Ok(CallToolResult::text(joke)) }
        })
}

/// Both joke tools, public one first.
pub fn all(jokes: Arc<JokeGenerator>) -> Result<Vec<Tool>> {
    Ok(vec![dad_joke(jokes.clone())?, mom_joke(jokes)?])
}
