//! `hypertool mcp run/add/remove/list/get`: starting the proxy and editing
//! the stored `mcpServers` mapping. Exit codes: 0 success,
//! 1 for operational failure, 2 for invalid invocation (handled by clap).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use clap::Subcommand;
use clap::ValueEnum;
use hypertool_core::config_store::FileConfigStore;
use hypertool_core::config_store::StoreLayout;
use hypertool_core::ConfigStore;
use hypertool_core::ProxyRuntime;
use hypertool_core::ProxyRuntimeConfig;
use hypertool_core::ServerConfig;

#[derive(Debug, Subcommand)]
pub enum McpCommand {
    /// Start the proxy, exposing an aggregated tool surface upstream.
    Run(RunArgs),
    /// Add a server entry to the stored MCP-config mapping.
    Add(AddArgs),
    /// Remove a server entry by name.
    Remove(RemoveArgs),
    /// List all stored server entries.
    List,
    /// Print one server entry by name.
    Get(GetArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TransportKind {
    Stdio,
    Http,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(long, value_enum, default_value = "stdio")]
    pub transport: TransportKind,

    #[arg(long, default_value_t = 7890)]
    pub port: u16,

    #[arg(long)]
    pub mcp_config: Option<PathBuf>,

    #[arg(long)]
    pub equip_toolset: Option<String>,

    #[arg(long)]
    pub persona: Option<String>,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Name under which to store the server entry.
    pub name: String,

    /// Stdio launch command. Mutually exclusive with --url.
    #[arg(long, conflicts_with = "url")]
    pub command: Option<String>,

    #[arg(long, num_args = 0.., allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// HTTP/SSE endpoint. Mutually exclusive with --command.
    #[arg(long)]
    pub url: Option<String>,

    #[arg(long)]
    pub sse: bool,
}

#[derive(Debug, Args)]
pub struct RemoveArgs {
    pub name: String,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    pub name: String,
}

pub async fn run(command: McpCommand) -> anyhow::Result<()> {
    match command {
        McpCommand::Run(args) => run_proxy(args).await,
        McpCommand::Add(args) => add(args).await,
        McpCommand::Remove(args) => remove(args).await,
        McpCommand::List => list().await,
        McpCommand::Get(args) => get(args).await,
    }
}

fn open_store() -> anyhow::Result<Arc<dyn ConfigStore>> {
    let layout = StoreLayout::discover()?;
    Ok(Arc::new(FileConfigStore::new(layout)))
}

async fn run_proxy(args: RunArgs) -> anyhow::Result<()> {
    let layout = StoreLayout::discover()?;
    let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(layout.clone()));

    let config = ProxyRuntimeConfig {
        personas_root: layout.personas_dir(),
        ..Default::default()
    };
    let runtime = Arc::new(ProxyRuntime::new(store.clone(), config));

    match args.mcp_config {
        Some(path) => {
            let servers = load_servers_from_path(&path)?;
            runtime.start(servers).await;
        }
        None => runtime.start_from_config_store().await,
    }

    if let Some(toolset_name) = &args.equip_toolset {
        equip_named_toolset(&runtime, toolset_name).await?;
    }

    if let Some(persona_name) = &args.persona {
        runtime
            .persona
            .activate(
                persona_name,
                args.equip_toolset.as_deref(),
                hypertool_core::MergeOptions::default(),
                false,
            )
            .await?;
    }

    match args.transport {
        TransportKind::Stdio => hypertool_mcp_server::run_stdio(runtime).await,
        TransportKind::Http => {
            let addr: SocketAddr = ([0, 0, 0, 0], args.port).into();
            hypertool_mcp_server::run_http(runtime, addr).await
        }
    }
}

async fn equip_named_toolset(runtime: &ProxyRuntime, name: &str) -> anyhow::Result<()> {
    let toolset = runtime
        .config_store
        .load_toolset(name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("toolset '{name}' not found"))?;
    runtime.toolset.write().await.equip(toolset);
    Ok(())
}

fn load_servers_from_path(path: &PathBuf) -> anyhow::Result<HashMap<String, ServerConfig>> {
    #[derive(serde::Deserialize)]
    struct McpConfigFile {
        #[serde(default, rename = "mcpServers")]
        mcp_servers: HashMap<String, ServerConfig>,
    }
    let contents = std::fs::read_to_string(path)?;
    let file: McpConfigFile = serde_json::from_str(&contents)?;
    Ok(file.mcp_servers)
}

async fn add(args: AddArgs) -> anyhow::Result<()> {
    let store = open_store()?;
    let mut servers = store.load_mcp_servers().await?;

    let entry = if let Some(command) = args.command {
        ServerConfig::Stdio {
            command,
            args: args.args,
            env: HashMap::new(),
        }
    } else if let Some(url) = args.url {
        if args.sse {
            ServerConfig::Sse {
                url,
                headers: HashMap::new(),
            }
        } else {
            ServerConfig::Http {
                url,
                headers: HashMap::new(),
            }
        }
    } else {
        anyhow::bail!("either --command or --url is required");
    };

    if hypertool_core::is_self_reference(&entry) {
        anyhow::bail!("refusing to add a server entry that would recurse into this proxy");
    }

    servers.insert(args.name, entry);
    store.save_mcp_servers(&servers).await?;
    Ok(())
}

async fn remove(args: RemoveArgs) -> anyhow::Result<()> {
    let store = open_store()?;
    let mut servers = store.load_mcp_servers().await?;
    if servers.remove(&args.name).is_none() {
        anyhow::bail!("no server named '{}' found", args.name);
    }
    store.save_mcp_servers(&servers).await?;
    Ok(())
}

async fn list() -> anyhow::Result<()> {
    let store = open_store()?;
    let servers = store.load_mcp_servers().await?;
    let mut names: Vec<&String> = servers.keys().collect();
    names.sort();
    for name in names {
        println!("{name}");
    }
    Ok(())
}

async fn get(args: GetArgs) -> anyhow::Result<()> {
    let store = open_store()?;
    let servers = store.load_mcp_servers().await?;
    let entry = servers
        .get(&args.name)
        .ok_or_else(|| anyhow::anyhow!("no server named '{}' found", args.name))?;
    println!("{}", serde_json::to_string_pretty(entry)?);
    Ok(())
}
