use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::conflict::ConflictResolver;
use crate::conflict::ConflictStrategy;
use crate::config_store::ConfigStore;
use crate::discovery::DiscoveryEngine;
use crate::events::EventBus;
use crate::persona::PersonaManager;
use crate::pool::ConnectionPool;
use crate::router::RequestRouter;
use crate::server_config::ServerConfig;
use crate::tool_cache::ToolCache;
use crate::toolset::ToolsetManager;

/// Default interval on which the discovery loop re-polls every connected
/// server, independent of connect/reconnect transitions.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);
/// Default interval on which the pool's health loop runs.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Wires every leaf subsystem (pool, cache, discovery, conflict resolver,
/// toolset manager, persona manager, router) into the single composition
/// root the upstream server and the CLI both depend on.
pub struct ProxyRuntime {
    pub pool: Arc<ConnectionPool>,
    pub cache: Arc<RwLock<ToolCache>>,
    pub discovery: Arc<DiscoveryEngine>,
    pub toolset: Arc<RwLock<ToolsetManager>>,
    pub persona: Arc<PersonaManager>,
    pub router: Arc<RequestRouter>,
    pub events: EventBus,
    pub config_store: Arc<dyn ConfigStore>,
}

pub struct ProxyRuntimeConfig {
    pub max_concurrent_connections: usize,
    pub conflict_strategy: ConflictStrategy,
    pub conflict_separator: String,
    pub conflict_priority_order: Vec<String>,
    pub personas_root: PathBuf,
}

impl Default for ProxyRuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_connections: max_concurrent_connections_from_env(),
            conflict_strategy: ConflictStrategy::Namespace,
            conflict_separator: ".".to_string(),
            conflict_priority_order: Vec::new(),
            personas_root: PathBuf::new(),
        }
    }
}

/// `HYPERTOOL_MAX_CONNECTIONS` env override, read once at startup and
/// layered over the built-in default.
fn max_concurrent_connections_from_env() -> usize {
    std::env::var("HYPERTOOL_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10)
}

impl ProxyRuntime {
    pub fn new(config_store: Arc<dyn ConfigStore>, config: ProxyRuntimeConfig) -> Self {
        let events = EventBus::new();
        let pool = Arc::new(ConnectionPool::new(config.max_concurrent_connections));
        let cache = Arc::new(RwLock::new(ToolCache::new()));
        let discovery = Arc::new(DiscoveryEngine::new(pool.clone(), cache.clone(), events.clone()));
        let resolver = ConflictResolver::new(config.conflict_strategy)
            .with_separator(config.conflict_separator)
            .with_priority_order(config.conflict_priority_order);
        let toolset = Arc::new(RwLock::new(ToolsetManager::new(resolver, events.clone())));
        let router = Arc::new(RequestRouter::new(pool.clone(), cache.clone(), toolset.clone()));
        let persona = Arc::new(PersonaManager::new(
            pool.clone(),
            cache.clone(),
            discovery.clone(),
            toolset.clone(),
            config_store.clone(),
            events.clone(),
            config.personas_root,
        ));

        Self {
            pool,
            cache,
            discovery,
            toolset,
            persona,
            router,
            events,
            config_store,
        }
    }

    /// Starts every configured downstream server and runs one discovery
    /// pass so the cache is populated before the upstream server starts
    /// accepting `tools/list` calls.
    pub async fn start(&self, servers: HashMap<String, ServerConfig>) {
        self.pool.start_servers(servers).await;
        self.discovery.refresh_all().await;
    }

    /// Spawns the health-check and periodic-discovery background loops.
    /// One health-check task per connection is approximated here as one
    /// shared loop iterating every entry, since the pool already
    /// serializes per-entry state under its own lock.
    /// Returns the handles so the caller can abort them on shutdown.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let health_runtime = self.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(DEFAULT_HEALTH_CHECK_INTERVAL);
            loop {
                interval.tick().await;
                health_runtime.pool.run_health_check().await;
            }
        }));

        let discovery_runtime = self.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(DEFAULT_DISCOVERY_INTERVAL);
            loop {
                interval.tick().await;
                discovery_runtime.discovery.refresh_all().await;
            }
        }));

        handles
    }

    /// Graceful shutdown: stop accepting new work is the
    /// caller's responsibility (it owns the upstream transport); this
    /// closes every downstream connection, giving stdio children their
    /// shutdown signal before kill.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    /// Loads the primary MCP-config mapping from the config store and
    /// starts those servers. Used by `mcp run` at process startup.
    pub async fn start_from_config_store(&self) {
        match self.config_store.load_mcp_servers().await {
            Ok(servers) => self.start(servers).await,
            Err(e) => warn!(error = %e, "failed to load mcp.json; starting with no downstream servers"),
        }
    }
}
