use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;
use std::time::Instant;

use mcp_types::Tool;
use serde::Serialize;
use sha1::Digest;
use sha1::Sha1;

/// Liveness of the server a [`DiscoveredTool`] was last seen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Connected,
    Disconnected,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredTool {
    pub name: String,
    pub server_name: String,
    pub namespaced_name: String,
    pub input_schema: serde_json::Value,
    pub description: Option<String>,
    #[serde(skip)]
    pub discovered_at: Instant,
    #[serde(skip)]
    pub last_updated: Instant,
    pub server_status: ServerStatus,
    pub tool_hash: String,
}

impl DiscoveredTool {
    pub fn from_tool(server_name: &str, tool: &Tool, server_status: ServerStatus) -> Self {
        let now = Instant::now();
        Self {
            name: tool.name.clone(),
            server_name: server_name.to_string(),
            namespaced_name: format!("{server_name}.{}", tool.name),
            input_schema: tool.input_schema.clone(),
            description: tool.description.clone(),
            discovered_at: now,
            last_updated: now,
            server_status,
            tool_hash: tool_hash(&tool.name, &tool.input_schema),
        }
    }
}

/// Computes `toolHash` over a canonical (sorted-key) JSON serialization of
/// `{name, inputSchema}`. Deliberately excludes `description` and every
/// other prose field so cosmetic server-side edits never invalidate a
/// [`crate::toolset::ToolReference`] pinned by `refId`.
pub fn tool_hash(name: &str, input_schema: &serde_json::Value) -> String {
    let canonical = serde_json::json!({
        "name": name,
        "inputSchema": canonicalize(input_schema),
    });
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let mut hasher = Sha1::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

/// Recursively sorts object keys so the hash is stable under key reordering.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, serde_json::Value> =
                std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize(v));
            }
            serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolChange {
    pub server_name: String,
    pub tool_name: String,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolChangeSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

type CacheKey = (String, String);

/// `map[(serverName, toolName)] -> DiscoveredTool`, with a per-server
/// secondary index so wiping a server's entries is O(|serverTools|) rather
/// than a full scan, and an optional per-entry TTL.
#[derive(Default)]
pub struct ToolCache {
    entries: HashMap<CacheKey, (DiscoveredTool, Option<Duration>)>,
    by_server: HashMap<String, HashSet<String>>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, tool: DiscoveredTool, ttl: Option<Duration>) {
        let key = (tool.server_name.clone(), tool.name.clone());
        self.by_server
            .entry(tool.server_name.clone())
            .or_default()
            .insert(tool.name.clone());
        self.entries.insert(key, (tool, ttl));
    }

    pub fn get(&mut self, server_name: &str, tool_name: &str) -> Option<DiscoveredTool> {
        let key = (server_name.to_string(), tool_name.to_string());
        let expired = match self.entries.get(&key) {
            Some((tool, Some(ttl))) => tool.last_updated.elapsed() > *ttl,
            _ => false,
        };
        if expired {
            self.delete(server_name, tool_name);
            return None;
        }
        self.entries.get(&key).map(|(tool, _)| tool.clone())
    }

    pub fn delete(&mut self, server_name: &str, tool_name: &str) {
        self.entries
            .remove(&(server_name.to_string(), tool_name.to_string()));
        if let Some(set) = self.by_server.get_mut(server_name) {
            set.remove(tool_name);
        }
    }

    pub fn get_by_server(&self, server_name: &str) -> Vec<DiscoveredTool> {
        self.by_server
            .get(server_name)
            .into_iter()
            .flat_map(|names| names.iter())
            .filter_map(|name| {
                self.entries
                    .get(&(server_name.to_string(), name.clone()))
                    .map(|(tool, _)| tool.clone())
            })
            .collect()
    }

    pub fn clear_server(&mut self, server_name: &str) {
        if let Some(names) = self.by_server.remove(server_name) {
            for name in names {
                self.entries.remove(&(server_name.to_string(), name));
            }
        }
    }

    pub fn set_server_status(&mut self, server_name: &str, status: ServerStatus) {
        if let Some(names) = self.by_server.get(server_name).cloned() {
            for name in names {
                if let Some((tool, _)) = self.entries.get_mut(&(server_name.to_string(), name)) {
                    tool.server_status = status;
                }
            }
        }
    }

    /// All cached tools, optionally restricted to those whose source server
    /// is currently `connected` — the set visible to the router and the
    /// toolset manager.
    pub fn get_all(&self, connected_only: bool) -> Vec<DiscoveredTool> {
        self.entries
            .values()
            .map(|(tool, _)| tool)
            .filter(|tool| !connected_only || tool.server_status == ServerStatus::Connected)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reconciles `server_name`'s cached tools against a freshly fetched
    /// `tools/list` result, returning the change set. Mirrors the
    /// added/updated/removed classification the discovery loop emits.
    pub fn reconcile_server(
        &mut self,
        server_name: &str,
        fresh_tools: &[Tool],
    ) -> (Vec<ToolChange>, ToolChangeSummary) {
        let mut changes = Vec::new();
        let mut summary = ToolChangeSummary::default();
        let previously_known: HashSet<String> = self
            .by_server
            .get(server_name)
            .cloned()
            .unwrap_or_default();
        let mut seen = HashSet::new();

        for tool in fresh_tools {
            seen.insert(tool.name.clone());
            let new_hash = tool_hash(&tool.name, &tool.input_schema);
            match self.entries.get(&(server_name.to_string(), tool.name.clone())) {
                None => {
                    self.set(
                        DiscoveredTool::from_tool(server_name, tool, ServerStatus::Connected),
                        None,
                    );
                    changes.push(ToolChange {
                        server_name: server_name.to_string(),
                        tool_name: tool.name.clone(),
                        kind: ChangeKind::Added,
                    });
                    summary.added += 1;
                }
                Some((existing, _)) if existing.tool_hash != new_hash => {
                    self.set(
                        DiscoveredTool::from_tool(server_name, tool, ServerStatus::Connected),
                        None,
                    );
                    changes.push(ToolChange {
                        server_name: server_name.to_string(),
                        tool_name: tool.name.clone(),
                        kind: ChangeKind::Updated,
                    });
                    summary.updated += 1;
                }
                Some(_) => {
                    if let Some((existing, _)) = self
                        .entries
                        .get_mut(&(server_name.to_string(), tool.name.clone()))
                    {
                        existing.last_updated = Instant::now();
                        existing.server_status = ServerStatus::Connected;
                    }
                }
            }
        }

        for stale in previously_known.difference(&seen) {
            self.delete(server_name, stale);
            changes.push(ToolChange {
                server_name: server_name.to_string(),
                tool_name: stale.clone(),
                kind: ChangeKind::Removed,
            });
            summary.removed += 1;
        }

        (changes, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, schema: serde_json::Value) -> Tool {
        Tool {
            name: name.to_string(),
            description: Some("desc".to_string()),
            input_schema: schema,
            output_schema: None,
            annotations: None,
        }
    }

    #[test]
    fn tool_hash_stable_under_key_reorder_and_description_change() {
        let a = tool_hash("foo", &serde_json::json!({"a": 1, "b": 2}));
        let b = tool_hash("foo", &serde_json::json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn tool_hash_changes_with_schema() {
        let a = tool_hash("foo", &serde_json::json!({"a": 1}));
        let b = tool_hash("foo", &serde_json::json!({"a": 2}));
        assert_ne!(a, b);
    }

    #[test]
    fn reconcile_classifies_added_updated_removed() {
        let mut cache = ToolCache::new();
        let (changes, summary) = cache.reconcile_server(
            "git",
            &[tool("status", serde_json::json!({})), tool("diff", serde_json::json!({}))],
        );
        assert_eq!(summary.added, 2);
        assert_eq!(changes.len(), 2);

        let (changes, summary) = cache.reconcile_server(
            "git",
            &[tool("status", serde_json::json!({"extra": true}))],
        );
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn clear_server_removes_only_that_servers_entries() {
        let mut cache = ToolCache::new();
        cache.reconcile_server("git", &[tool("status", serde_json::json!({}))]);
        cache.reconcile_server("docker", &[tool("ps", serde_json::json!({}))]);
        cache.clear_server("git");
        assert_eq!(cache.get_all(false).len(), 1);
    }
}
