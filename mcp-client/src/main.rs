//! Command-line utility to exercise `McpClient` directly against a stdio
//! downstream server, independent of the rest of the proxy.
//!
//! ```bash
//! cargo run -p hypertool-mcp-client -- some-mcp-server --some-arg
//! ```
//!
//! Connects, issues a `tools/list` request and prints the server's response
//! as pretty JSON.

use anyhow::Context;
use anyhow::Result;
use hypertool_mcp_client::McpClient;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args[0] == "--help" || args[0] == "-h" {
        eprintln!("Usage: hypertool-mcp-client <program> [args..]");
        std::process::exit(1);
    }
    let original_args = args.clone();

    let program = args.remove(0);
    let client = McpClient::new_stdio_client(program, args, None)
        .await
        .with_context(|| format!("failed to spawn subprocess: {original_args:?}"))?;

    let tools = client
        .list_tools(None, None)
        .await
        .context("tools/list request failed")?;

    println!("{}", serde_json::to_string_pretty(&tools)?);

    client.close().await;
    Ok(())
}
