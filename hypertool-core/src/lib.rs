//! Core proxy engine: connection pool, tool discovery, conflict
//! resolution, toolset management, request routing, and persona
//! activation. Built in dependency order on top of `hypertool-error`'s
//! taxonomy and `hypertool-mcp-client`'s transports; has no knowledge of
//! how it is exposed upstream (stdio/HTTP) or invoked (CLI) — those live
//! in their own crates.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config_store;
pub mod conflict;
pub mod discovery;
pub mod events;
pub mod extension_manifest;
pub mod persona;
pub mod pool;
pub mod router;
pub mod runtime;
pub mod server_config;
pub mod tool_cache;
pub mod toolset;

pub use config_store::ConfigStore;
pub use config_store::FileConfigStore;
pub use config_store::StoreLayout;
pub use conflict::ConflictError;
pub use conflict::ConflictResolver;
pub use conflict::ConflictStrategy;
pub use conflict::ResolvedTool;
pub use discovery::DiscoveryEngine;
pub use events::EventBus;
pub use events::ProxyEvent;
pub use events::ToolsetChangeType;
pub use persona::ActivationOutcome;
pub use persona::ActivePersonaState;
pub use persona::McpConfigMergeStrategy;
pub use persona::MergeOptions;
pub use persona::PersonaConfig;
pub use persona::PersonaManager;
pub use persona::PersonaReference;
pub use pool::ConnectionPool;
pub use router::RequestRouter;
pub use router::RouterStats;
pub use runtime::ProxyRuntime;
pub use runtime::ProxyRuntimeConfig;
pub use server_config::ServerConfig;
pub use server_config::is_self_reference;
pub use tool_cache::DiscoveredTool;
pub use tool_cache::ServerStatus;
pub use tool_cache::ToolCache;
pub use toolset::ToolReference;
pub use toolset::ToolsetConfig;
pub use toolset::ToolsetManager;
