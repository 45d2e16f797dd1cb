//! Cold-start tool exposure, namespace-collision naming, and the
//! empty-universe boundary case, exercised against the cache/toolset/router
//! layer directly (no real child process transport is available in this
//! harness).

use chrono::Utc;
use hypertool_core::conflict::ConflictResolver;
use hypertool_core::conflict::ConflictStrategy;
use hypertool_core::events::EventBus;
use hypertool_core::router::RequestRouter;
use hypertool_core::tool_cache::ToolCache;
use hypertool_core::toolset::ToolReference;
use hypertool_core::toolset::ToolsetConfig;
use hypertool_core::toolset::ToolsetManager;
use hypertool_core::ConnectionPool;
use std::sync::Arc;
use tokio::sync::RwLock;

fn mcp_tool(name: &str, description: &str) -> mcp_types::Tool {
    mcp_types::Tool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: serde_json::json!({"type": "object"}),
        output_schema: None,
        annotations: None,
    }
}

/// Cold start: one server, a toolset selecting two of its three tools by
/// namespacedName. Only the selected tools reach upstream `tools/list`.
#[tokio::test]
async fn cold_start_exposes_only_the_equipped_subset() {
    let mut cache = ToolCache::new();
    cache.reconcile_server(
        "git",
        &[
            mcp_tool("status", "git status"),
            mcp_tool("diff", "git diff"),
            mcp_tool("log", "git log"),
        ],
    );

    let mut manager = ToolsetManager::new(
        ConflictResolver::new(ConflictStrategy::Namespace),
        EventBus::new(),
    );
    manager.equip(
        ToolsetConfig {
            name: "git-core".to_string(),
            description: None,
            version: "1".to_string(),
            created_at: Utc::now(),
            tools: vec![
                ToolReference {
                    namespaced_name: Some("git.status".to_string()),
                    ref_id: None,
                },
                ToolReference {
                    namespaced_name: Some("git.diff".to_string()),
                    ref_id: None,
                },
            ],
        },
    );

    let mut names: Vec<String> = manager
        .get_mcp_tools(&cache)
        .into_iter()
        .map(|t| t.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["git_diff".to_string(), "git_status".to_string()]);
}

/// Two servers exposing the same tool name under the namespace strategy:
/// both survive with distinct, server-prefixed external names, and the
/// reverse lookup points each back at its own server.
#[tokio::test]
async fn namespace_collision_keeps_both_tools_with_distinct_names() {
    let mut cache = ToolCache::new();
    cache.reconcile_server("a", &[mcp_tool("status", "a's status")]);
    cache.reconcile_server("b", &[mcp_tool("status", "b's status")]);

    let mut manager = ToolsetManager::new(
        ConflictResolver::new(ConflictStrategy::Namespace),
        EventBus::new(),
    );
    manager.equip(
        ToolsetConfig {
            name: "both".to_string(),
            description: None,
            version: "1".to_string(),
            created_at: Utc::now(),
            tools: vec![
                ToolReference {
                    namespaced_name: Some("a.status".to_string()),
                    ref_id: None,
                },
                ToolReference {
                    namespaced_name: Some("b.status".to_string()),
                    ref_id: None,
                },
            ],
        },
    );

    let mut names: Vec<String> = manager
        .get_mcp_tools(&cache)
        .into_iter()
        .map(|t| t.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["a_status".to_string(), "b_status".to_string()]);

    assert_eq!(
        manager.get_original_tool_name(&cache, "a_status"),
        Some("a.status".to_string())
    );
    assert_eq!(
        manager.get_original_tool_name(&cache, "b_status"),
        Some("b.status".to_string())
    );
}

/// Empty downstream universe: `tools/list` is empty and any `tools/call`
/// fails with `ToolNotFound`.
#[tokio::test]
async fn empty_universe_yields_empty_list_and_tool_not_found() {
    let cache = Arc::new(RwLock::new(ToolCache::new()));
    let toolset = Arc::new(RwLock::new(ToolsetManager::new(
        ConflictResolver::new(ConflictStrategy::Namespace),
        EventBus::new(),
    )));
    let pool = Arc::new(ConnectionPool::new(4));
    let router = RequestRouter::new(pool, cache.clone(), toolset.clone());

    assert!(toolset.read().await.get_mcp_tools(&*cache.read().await).is_empty());

    let err = router
        .call_tool("anything", None)
        .await
        .expect_err("no tool is equipped");
    assert!(matches!(err, hypertool_error::ProxyError::ToolNotFound(_)));
}

/// Equipping then unequipping returns to the same empty-exposure state:
/// no tool reaches the router's hot path.
#[tokio::test]
async fn equip_then_unequip_leaves_no_hot_path_surface() {
    let mut cache = ToolCache::new();
    cache.reconcile_server("git", &[mcp_tool("status", "git status")]);

    let mut manager = ToolsetManager::new(
        ConflictResolver::new(ConflictStrategy::Namespace),
        EventBus::new(),
    );
    manager.equip(
        ToolsetConfig {
            name: "git-core".to_string(),
            description: None,
            version: "1".to_string(),
            created_at: Utc::now(),
            tools: vec![ToolReference {
                namespaced_name: Some("git.status".to_string()),
                ref_id: None,
            }],
        },
    );
    assert_eq!(manager.get_mcp_tools(&cache).len(), 1);

    manager.unequip();
    assert!(manager.get_mcp_tools(&cache).is_empty());
    assert_eq!(manager.get_original_tool_name(&cache, "git_status"), None);
}
