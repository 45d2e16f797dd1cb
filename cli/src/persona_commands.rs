//! `hypertool persona list/activate/deactivate/status/validate`.
//! Each invocation builds a throwaway [`ProxyRuntime`] scoped to the
//! command: there is no long-lived proxy process behind these subcommands,
//! only the persisted state under the config store.

use std::sync::Arc;

use clap::Args;
use clap::Subcommand;
use hypertool_core::config_store::FileConfigStore;
use hypertool_core::config_store::StoreLayout;
use hypertool_core::persona::load_persona_manifest;
use hypertool_core::ConfigStore;
use hypertool_core::MergeOptions;
use hypertool_core::ProxyRuntime;
use hypertool_core::ProxyRuntimeConfig;

#[derive(Debug, Subcommand)]
pub enum PersonaCommand {
    /// List personas discovered under the persona search root.
    List,
    /// Activate a persona by name.
    Activate(ActivateArgs),
    /// Deactivate the currently active persona, if any.
    Deactivate,
    /// Print the currently active persona, if any.
    Status,
    /// Validate a persona manifest without activating it.
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct ActivateArgs {
    pub name: String,

    #[arg(long)]
    pub toolset: Option<String>,

    /// Skip manifest validation failures and proceed with warnings.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    pub name: String,
}

pub async fn run(command: PersonaCommand) -> anyhow::Result<()> {
    let layout = StoreLayout::discover()?;
    let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(layout.clone()));
    let config = ProxyRuntimeConfig {
        personas_root: layout.personas_dir(),
        ..Default::default()
    };
    let runtime = ProxyRuntime::new(store, config);

    match command {
        PersonaCommand::List => list(&runtime),
        PersonaCommand::Activate(args) => activate(&runtime, args).await,
        PersonaCommand::Deactivate => deactivate(&runtime).await,
        PersonaCommand::Status => status(&runtime).await,
        PersonaCommand::Validate(args) => validate(&runtime, args),
    }
}

fn list(runtime: &ProxyRuntime) -> anyhow::Result<()> {
    for persona in runtime.persona.list_personas() {
        println!("{}", persona.name);
    }
    Ok(())
}

async fn activate(runtime: &ProxyRuntime, args: ActivateArgs) -> anyhow::Result<()> {
    let outcome = runtime
        .persona
        .activate(
            &args.name,
            args.toolset.as_deref(),
            MergeOptions::default(),
            args.force,
        )
        .await?;
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    println!("activated '{}'", args.name);
    Ok(())
}

async fn deactivate(runtime: &ProxyRuntime) -> anyhow::Result<()> {
    runtime.persona.deactivate().await?;
    println!("deactivated");
    Ok(())
}

async fn status(runtime: &ProxyRuntime) -> anyhow::Result<()> {
    match runtime.persona.active_state().await {
        Some(state) => {
            let active_for = hypertool_common::elapsed::format_elapsed(state.activated_at);
            println!("{}", serde_json::to_string_pretty(&state)?);
            println!("active for {active_for}");
        }
        None => println!("no persona active"),
    }
    Ok(())
}

fn validate(runtime: &ProxyRuntime, args: ValidateArgs) -> anyhow::Result<()> {
    let personas_root = runtime.persona.list_personas();
    let found = personas_root.iter().find(|p| p.name == args.name);
    let dir = found
        .map(|p| p.path.clone())
        .ok_or_else(|| anyhow::anyhow!("persona '{}' not found", args.name))?;

    let (config, _) = load_persona_manifest(&dir)?;
    config.validate()?;
    println!("'{}' is valid", args.name);
    Ok(())
}
