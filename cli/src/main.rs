//! Binary entrypoint. Installs the process-wide `tracing` subscriber once
//! (stderr only — stdout is reserved for JSON-RPC framing on the stdio
//! transport) and dispatches to the `mcp`/`persona` subcommand trees.

mod mcp_commands;
mod persona_commands;

use clap::Parser;
use clap::Subcommand;

use crate::mcp_commands::McpCommand;
use crate::persona_commands::PersonaCommand;

#[derive(Debug, Parser)]
#[clap(author, version, about = "Aggregating MCP proxy")]
struct HypertoolCli {
    /// Log level passed through to `tracing-subscriber`'s `EnvFilter`
    /// (overridden by `RUST_LOG` if set).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[clap(subcommand)]
    command: TopLevelCommand,
}

#[derive(Debug, Subcommand)]
enum TopLevelCommand {
    /// Manage downstream MCP servers and run the proxy.
    #[clap(subcommand)]
    Mcp(McpCommand),
    /// Manage personas.
    #[clap(subcommand)]
    Persona(PersonaCommand),
}

fn install_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = HypertoolCli::parse();
    install_tracing(&cli.log_level);

    let result = match cli.command {
        TopLevelCommand::Mcp(command) => mcp_commands::run(command).await,
        TopLevelCommand::Persona(command) => persona_commands::run(command).await,
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            std::process::ExitCode::from(1)
        }
    }
}
