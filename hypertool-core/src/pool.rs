use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use hypertool_error::CircuitBreaker;
use hypertool_error::CircuitBreakerThresholds;
use hypertool_error::ProxyError;
use hypertool_error::RetryPolicy;
use hypertool_mcp_client::McpClient;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tokio::sync::Semaphore;
use tracing::info;
use tracing::warn;

use crate::server_config::is_self_reference;
use crate::server_config::ServerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

pub struct PoolEntry {
    pub server_name: String,
    pub config: ServerConfig,
    pub client: Option<Arc<McpClient>>,
    pub state: ConnState,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_health_check_at: Option<Instant>,
}

/// Owns every downstream connection exclusively; all access to a connection
/// goes through this pool's API. Enforces `max_concurrent_connections` via a
/// FIFO-fair semaphore and runs a circuit breaker per server.
pub struct ConnectionPool {
    entries: RwLock<HashMap<String, PoolEntry>>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    connect_semaphore: Arc<Semaphore>,
    retry_policy: RetryPolicy,
    breaker_thresholds: CircuitBreakerThresholds,
}

impl ConnectionPool {
    pub fn new(max_concurrent_connections: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
            connect_semaphore: Arc::new(Semaphore::new(max_concurrent_connections.max(1))),
            retry_policy: RetryPolicy::default(),
            breaker_thresholds: CircuitBreakerThresholds::default(),
        }
    }

    async fn breaker_for(&self, server_name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(server_name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    server_name.to_string(),
                    self.breaker_thresholds,
                ))
            })
            .clone()
    }

    /// Starts one connection per `(name, config)` pair not already present,
    /// refusing self-referential stdio configs per the guard. Connections
    /// are attempted concurrently, bounded by `max_concurrent_connections`.
    pub async fn start_servers(&self, servers: HashMap<String, ServerConfig>) {
        let mut join_set = tokio::task::JoinSet::new();

        for (name, config) in servers {
            if is_self_reference(&config) {
                warn!(server = %name, "refusing self-referential stdio configuration");
                continue;
            }

            {
                let mut entries = self.entries.write().await;
                if entries.contains_key(&name) {
                    continue;
                }
                entries.insert(
                    name.clone(),
                    PoolEntry {
                        server_name: name.clone(),
                        config: config.clone(),
                        client: None,
                        state: ConnState::Connecting,
                        last_error: None,
                        consecutive_failures: 0,
                        last_health_check_at: None,
                    },
                );
            }

            let semaphore = self.connect_semaphore.clone();
            let retry_policy = self.retry_policy.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = retry_policy
                    .run(|_attempt| {
                        let config = config.clone();
                        async move { connect_client(&config).await }
                    })
                    .await;
                (name, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let Ok((name, result)) = joined else {
                continue;
            };
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(&name) {
                match result {
                    Ok(client) => {
                        entry.client = Some(Arc::new(client));
                        entry.state = ConnState::Connected;
                        entry.consecutive_failures = 0;
                        info!(server = %name, "downstream server connected");
                    }
                    Err(e) => {
                        entry.state = ConnState::Failed;
                        entry.last_error = Some(e.to_string());
                        entry.consecutive_failures += 1;
                        warn!(server = %name, error = %e, "downstream server failed to connect");
                    }
                }
            }
        }
    }

    /// Reconciles the pool against a new desired server set: stops removed
    /// servers, starts added ones, leaves unchanged ones untouched.
    pub async fn reconcile(&self, desired: HashMap<String, ServerConfig>) {
        let to_remove: Vec<String> = {
            let entries = self.entries.read().await;
            entries
                .keys()
                .filter(|name| !desired.contains_key(*name))
                .cloned()
                .collect()
        };
        for name in to_remove {
            self.stop_server(&name).await;
        }

        let to_add: HashMap<String, ServerConfig> = {
            let entries = self.entries.read().await;
            desired
                .into_iter()
                .filter(|(name, config)| {
                    entries.get(name).map(|e| &e.config) != Some(config)
                })
                .collect()
        };
        if !to_add.is_empty() {
            for name in to_add.keys() {
                self.stop_server(name).await;
            }
            self.start_servers(to_add).await;
        }
    }

    pub async fn stop_server(&self, server_name: &str) {
        let entry = self.entries.write().await.remove(server_name);
        if let Some(entry) = entry {
            if let Some(client) = entry.client {
                client.close().await;
            }
        }
        self.breakers.lock().await.remove(server_name);
    }

    pub async fn shutdown(&self) {
        let names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        for name in names {
            self.stop_server(&name).await;
        }
    }

    pub async fn get_connection(&self, server_name: &str) -> Option<Arc<McpClient>> {
        self.entries
            .read()
            .await
            .get(server_name)
            .and_then(|e| e.client.clone())
    }

    pub async fn list_connected(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.state == ConnState::Connected)
            .map(|e| e.server_name.clone())
            .collect()
    }

    pub async fn server_configs(&self) -> HashMap<String, ServerConfig> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.config.clone()))
            .collect()
    }

    /// Invokes `call_tool` on `server_name` through the retry + circuit
    /// breaker chain. Does not apply the fallback chain — that's the
    /// router's job, since only the router knows the call's MCP framing.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<mcp_types::CallToolResult, ProxyError> {
        let client = self
            .get_connection(server_name)
            .await
            .ok_or_else(|| ProxyError::ServerUnavailable {
                server: server_name.to_string(),
                reason: "no active connection".to_string(),
            })?;
        let breaker = self.breaker_for(server_name).await;
        let retry_policy = self.retry_policy.clone();

        let tool_name = tool_name.to_string();
        retry_policy
            .run(|_attempt| {
                let client = client.clone();
                let breaker = breaker.clone();
                let tool_name = tool_name.clone();
                let arguments = arguments.clone();
                async move {
                    breaker
                        .call(|| async {
                            client
                                .call_tool(tool_name.clone(), arguments.clone(), Some(timeout))
                                .await
                        })
                        .await
                }
            })
            .await
    }

    /// One liveness pass over every pool entry, marking failures as
    /// `Reconnecting`. Intended to run on a periodic interval owned by the
    /// caller (the proxy runtime's background task set).
    pub async fn run_health_check(&self) {
        let names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        for name in names {
            let healthy = {
                let entries = self.entries.read().await;
                match entries.get(&name).and_then(|e| e.client.clone()) {
                    Some(client) => client.is_healthy().await,
                    None => false,
                }
            };
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(&name) {
                entry.last_health_check_at = Some(Instant::now());
                if !healthy && entry.state == ConnState::Connected {
                    entry.state = ConnState::Reconnecting;
                    warn!(server = %name, "health check failed, marking for reconnect");
                }
            }
        }
    }
}

async fn connect_client(config: &ServerConfig) -> Result<McpClient, ProxyError> {
    match config {
        ServerConfig::Stdio { command, args, env } => {
            McpClient::new_stdio_client(command.clone(), args.clone(), Some(env.clone())).await
        }
        ServerConfig::Http { url, headers } => {
            McpClient::new_http_client(url.clone(), Some(headers.clone())).await
        }
        ServerConfig::Sse { url, headers } => {
            // Legacy SSE has no standard way to derive the companion POST
            // endpoint from the stream URL alone; callers that need SSE
            // provide both via `ServerConfig::Sse`'s `url` field carrying
            // the stream and `headers` unchanged, with the POST endpoint
            // assumed to live at the same path (common convention for
            // `/sse` + `/messages` server pairs).
            let post_url = url.replace("/sse", "/messages");
            McpClient::new_sse_client(url.clone(), post_url, Some(headers.clone())).await
        }
        ServerConfig::Extension { path } => {
            let resolved = crate::extension_manifest::resolve_extension(path)?;
            if matches!(resolved, ServerConfig::Extension { .. }) {
                return Err(ProxyError::Configuration(format!(
                    "extension manifest at {path} resolved to another extension, refusing to recurse"
                )));
            }
            Box::pin(connect_client(&resolved)).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    #[tokio::test]
    async fn starting_a_self_referential_server_is_skipped_not_fatal() {
        let pool = ConnectionPool::new(4);
        let mut servers = Map::new();
        servers.insert(
            "recursive".to_string(),
            ServerConfig::Stdio {
                command: "hypertool".to_string(),
                args: vec![],
                env: Map::new(),
            },
        );
        pool.start_servers(servers).await;
        assert!(pool.list_connected().await.is_empty());
    }

    #[tokio::test]
    async fn reconcile_leaves_unchanged_servers_untouched() {
        let pool = ConnectionPool::new(4);
        let mut servers = Map::new();
        servers.insert(
            "broken".to_string(),
            ServerConfig::Stdio {
                command: "definitely-not-a-real-binary-xyz".to_string(),
                args: vec![],
                env: Map::new(),
            },
        );
        pool.start_servers(servers.clone()).await;
        pool.reconcile(servers).await;
        assert_eq!(pool.server_configs().await.len(), 1);
    }
}
