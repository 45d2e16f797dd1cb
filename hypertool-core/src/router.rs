use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use hypertool_error::FallbackChain;
use hypertool_error::ProxyError;
use mcp_types::CallToolResult;
use tokio::sync::Mutex;
use tokio::sync::RwLock;

use crate::pool::ConnectionPool;
use crate::tool_cache::ServerStatus;
use crate::tool_cache::ToolCache;
use crate::toolset::ToolsetManager;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct PerServerStats {
    calls: u64,
    errors: u64,
    /// Sampled latencies in milliseconds, capped to bound memory; used only
    /// to derive p50/p95 on demand, never on the hot path itself.
    latencies_ms: Vec<u64>,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct ServerStats {
    pub calls: u64,
    pub errors: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct RouterStats {
    pub total_calls: u64,
    pub per_server: HashMap<String, ServerStats>,
}

/// The single hot path for `tools/call`: external name -> namespaced name
/// -> `(server, original name)` -> dispatch -> recovery chain -> verbatim
/// result. Keeps aggregate counters but never logs on this path per the
/// router's no-hot-path-logging contract; logging happens one layer down,
/// in the pool and the fallback chain.
pub struct RequestRouter {
    pool: Arc<ConnectionPool>,
    cache: Arc<RwLock<ToolCache>>,
    toolset: Arc<RwLock<ToolsetManager>>,
    fallback: FallbackChain,
    total_calls: AtomicU64,
    per_server: Mutex<HashMap<String, PerServerStats>>,
}

impl RequestRouter {
    pub fn new(
        pool: Arc<ConnectionPool>,
        cache: Arc<RwLock<ToolCache>>,
        toolset: Arc<RwLock<ToolsetManager>>,
    ) -> Self {
        Self {
            pool,
            cache,
            toolset,
            fallback: FallbackChain::standard(),
            total_calls: AtomicU64::new(0),
            per_server: Mutex::new(HashMap::new()),
        }
    }

    pub async fn call_tool(
        &self,
        external_name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResult, ProxyError> {
        let namespaced_name = {
            let cache = self.cache.read().await;
            let toolset = self.toolset.read().await;
            toolset
                .get_original_tool_name(&cache, external_name)
                .ok_or_else(|| ProxyError::ToolNotFound(external_name.to_string()))?
        };

        let (server_name, original_name) = namespaced_name
            .split_once('.')
            .map(|(s, t)| (s.to_string(), t.to_string()))
            .ok_or_else(|| ProxyError::Internal(format!("malformed namespaced name '{namespaced_name}'")))?;

        {
            let cache = self.cache.read().await;
            let tool = cache
                .get_by_server(&server_name)
                .into_iter()
                .find(|t| t.name == original_name);
            match tool {
                None => return Err(ProxyError::ToolNotFound(namespaced_name)),
                Some(tool) if tool.server_status != ServerStatus::Connected => {
                    return Err(ProxyError::ServerUnavailable {
                        server: server_name,
                        reason: "server not connected".to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let result = self
            .pool
            .call_tool(&server_name, &original_name, arguments, DEFAULT_CALL_TIMEOUT)
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.record(&server_name, elapsed_ms, result.is_err()).await;

        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                let operation = format!("tools/call {namespaced_name}");
                let context = hypertool_error::FallbackContext {
                    original_error: &err,
                    operation: &operation,
                    attempt: 1,
                };
                match self.fallback.handle(&context) {
                    Some(result) => Ok(result),
                    None => Err(err),
                }
            }
        }
    }

    async fn record(&self, server_name: &str, elapsed_ms: u64, is_error: bool) {
        let mut per_server = self.per_server.lock().await;
        let stats = per_server.entry(server_name.to_string()).or_default();
        stats.calls += 1;
        if is_error {
            stats.errors += 1;
        }
        stats.latencies_ms.push(elapsed_ms);
        if stats.latencies_ms.len() > 1000 {
            stats.latencies_ms.remove(0);
        }
    }

    pub async fn stats(&self) -> RouterStats {
        let per_server = self.per_server.lock().await;
        let mut out = HashMap::new();
        for (server, stats) in per_server.iter() {
            let mut sorted = stats.latencies_ms.clone();
            sorted.sort_unstable();
            out.insert(
                server.clone(),
                ServerStats {
                    calls: stats.calls,
                    errors: stats.errors,
                    p50_ms: percentile(&sorted, 0.50),
                    p95_ms: percentile(&sorted, 0.95),
                },
            );
        }
        RouterStats {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            per_server: out,
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictResolver;
    use crate::conflict::ConflictStrategy;
    use crate::events::EventBus;

    fn router() -> RequestRouter {
        let pool = Arc::new(ConnectionPool::new(4));
        let cache = Arc::new(RwLock::new(ToolCache::new()));
        let toolset = Arc::new(RwLock::new(ToolsetManager::new(
            ConflictResolver::new(ConflictStrategy::Namespace),
            EventBus::new(),
        )));
        RequestRouter::new(pool, cache, toolset)
    }

    #[tokio::test]
    async fn unknown_external_name_yields_tool_not_found() {
        let router = router();
        let err = router.call_tool("unknown_tool", None).await.unwrap_err();
        assert!(matches!(err, ProxyError::ToolNotFound(_)));
    }

    #[test]
    fn percentile_of_empty_slice_is_zero() {
        assert_eq!(percentile(&[], 0.95), 0);
    }

    #[test]
    fn percentile_picks_expected_index() {
        let sorted = vec![10, 20, 30, 40, 50];
        assert_eq!(percentile(&sorted, 0.0), 10);
        assert_eq!(percentile(&sorted, 1.0), 50);
    }
}
