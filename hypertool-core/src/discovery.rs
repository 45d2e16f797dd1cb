use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::warn;

use crate::events::EventBus;
use crate::events::ProxyEvent;
use crate::pool::ConnectionPool;
use crate::tool_cache::ServerStatus;
use crate::tool_cache::ToolCache;

const LIST_TOOLS_TIMEOUT: Duration = Duration::from_secs(10);

/// Issues `tools/list` against every connected server, reconciles the
/// result into the shared [`ToolCache`], and emits a `ToolsChanged` event
/// per server when anything changed. One refresh per server runs at a
/// time; concurrent callers for the same server collapse onto the same
/// in-flight pass via a per-server lock.
pub struct DiscoveryEngine {
    pool: Arc<ConnectionPool>,
    cache: Arc<RwLock<ToolCache>>,
    events: EventBus,
    server_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DiscoveryEngine {
    pub fn new(pool: Arc<ConnectionPool>, cache: Arc<RwLock<ToolCache>>, events: EventBus) -> Self {
        Self {
            pool,
            cache,
            events,
            server_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, server_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.server_locks.lock().await;
        locks
            .entry(server_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Refreshes the cache for every currently connected server. Servers
    /// are refreshed concurrently with each other; returns once all passes
    /// complete.
    pub async fn refresh_all(&self) {
        let servers = self.pool.list_connected().await;
        let refreshes = servers.iter().map(|name| self.refresh_server(name));
        futures::future::join_all(refreshes).await;
    }

    pub async fn refresh_server(&self, server_name: &str) {
        let lock = self.lock_for(server_name).await;
        let _guard = lock.lock().await;

        let client = match self.pool.get_connection(server_name).await {
            Some(client) => client,
            None => {
                debug!(server = %server_name, "skipping refresh, no active connection");
                return;
            }
        };

        let list_result = client.list_tools(None, Some(LIST_TOOLS_TIMEOUT)).await;
        let tools = match list_result {
            Ok(result) => result.tools,
            Err(e) => {
                warn!(server = %server_name, error = %e, "tools/list failed during discovery");
                let mut cache = self.cache.write().await;
                cache.set_server_status(server_name, ServerStatus::Error);
                return;
            }
        };

        let (_, summary) = {
            let mut cache = self.cache.write().await;
            cache.reconcile_server(server_name, &tools)
        };

        if summary.added > 0 || summary.updated > 0 || summary.removed > 0 {
            self.events.publish(ProxyEvent::ToolsChanged {
                server_name: server_name.to_string(),
                summary,
            });
        }
    }

    pub async fn mark_disconnected(&self, server_name: &str) {
        let mut cache = self.cache.write().await;
        cache.set_server_status(server_name, ServerStatus::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refresh_server_is_a_noop_without_a_connection() {
        let pool = Arc::new(ConnectionPool::new(4));
        let cache = Arc::new(RwLock::new(ToolCache::new()));
        let engine = DiscoveryEngine::new(pool, cache.clone(), EventBus::new());
        engine.refresh_server("nonexistent").await;
        assert!(cache.read().await.is_empty());
    }
}
