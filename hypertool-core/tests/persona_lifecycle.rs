//! Persona activation round-trip and failure rollback. Servers are
//! configured with commands that don't exist so connection attempts fail
//! fast; what's under test is config bookkeeping and rollback, not a live
//! downstream transport.

use std::collections::HashMap;
use std::sync::Arc;

use hypertool_core::conflict::ConflictResolver;
use hypertool_core::conflict::ConflictStrategy;
use hypertool_core::config_store::FileConfigStore;
use hypertool_core::config_store::StoreLayout;
use hypertool_core::discovery::DiscoveryEngine;
use hypertool_core::events::EventBus;
use hypertool_core::persona::McpConfigMergeStrategy;
use hypertool_core::persona::MergeOptions;
use hypertool_core::persona::PersonaManager;
use hypertool_core::server_config::ServerConfig;
use hypertool_core::tool_cache::ToolCache;
use hypertool_core::toolset::ToolsetManager;
use hypertool_core::ConfigStore;
use hypertool_core::ConnectionPool;
use tokio::sync::RwLock;

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<dyn ConfigStore>,
    persona: PersonaManager,
    pool: Arc<ConnectionPool>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = StoreLayout {
        root: dir.path().to_path_buf(),
    };
    let store: Arc<dyn ConfigStore> = Arc::new(FileConfigStore::new(layout));
    let pool = Arc::new(ConnectionPool::new(4));
    let cache = Arc::new(RwLock::new(ToolCache::new()));
    let events = EventBus::new();
    let discovery = Arc::new(DiscoveryEngine::new(pool.clone(), cache.clone(), events.clone()));
    let toolset = Arc::new(RwLock::new(ToolsetManager::new(
        ConflictResolver::new(ConflictStrategy::Namespace),
        events.clone(),
    )));
    let persona = PersonaManager::new(
        pool.clone(),
        cache,
        discovery,
        toolset,
        store.clone(),
        events,
        dir.path().join("personas"),
    );
    Fixture {
        _dir: dir,
        store,
        persona,
        pool,
    }
}

fn write_persona(dir: &std::path::Path, name: &str, manifest_yaml: &str, mcp_json: Option<&str>) {
    let persona_dir = dir.join(name);
    std::fs::create_dir_all(&persona_dir).expect("create persona dir");
    std::fs::write(persona_dir.join("persona.yaml"), manifest_yaml).expect("write manifest");
    if let Some(mcp_json) = mcp_json {
        std::fs::write(persona_dir.join("mcp.json"), mcp_json).expect("write mcp.json");
    }
}

fn base_servers() -> HashMap<String, ServerConfig> {
    let mut servers = HashMap::new();
    servers.insert(
        "git".to_string(),
        ServerConfig::Stdio {
            command: "definitely-not-a-real-binary-git".to_string(),
            args: vec![],
            env: HashMap::new(),
        },
    );
    servers
}

/// Activating then deactivating a persona that brings its own MCP-config
/// restores the pool's server set bit-for-bit.
#[tokio::test]
async fn activate_then_deactivate_restores_pre_activation_server_set() {
    let fx = fixture();
    let personas_root = fx._dir.path().join("personas");
    write_persona(
        &personas_root,
        "dev",
        "name: dev\ndescription: A development persona with extra tools.\ntoolsets: []\n",
        Some(r#"{"mcpServers": {"docker": {"type": "stdio", "command": "definitely-not-a-real-binary-docker", "args": [], "env": {}}}}"#),
    );

    let base = base_servers();
    fx.pool.start_servers(base.clone()).await;
    assert_eq!(fx.pool.server_configs().await, base);

    let outcome = fx
        .persona
        .activate("dev", None, MergeOptions::default(), false)
        .await
        .expect("activation succeeds even though downstream connects fail");
    assert!(outcome.success);

    let during = fx.pool.server_configs().await;
    assert!(during.contains_key("git"));
    assert!(during.contains_key("docker"));

    fx.persona.deactivate().await.expect("deactivate succeeds");
    assert_eq!(fx.pool.server_configs().await, base);
}

/// Re-activating the same persona is idempotent: no new warnings, no
/// duplicate activation work.
#[tokio::test]
async fn reactivating_same_persona_is_idempotent() {
    let fx = fixture();
    let personas_root = fx._dir.path().join("personas");
    write_persona(
        &personas_root,
        "solo",
        "name: solo\ndescription: A persona with no extra servers at all.\ntoolsets: []\n",
        None,
    );

    fx.pool.start_servers(base_servers()).await;

    let first = fx
        .persona
        .activate("solo", None, MergeOptions::default(), false)
        .await
        .expect("first activation succeeds");
    assert!(first.success);

    let second = fx
        .persona
        .activate("solo", None, MergeOptions::default(), false)
        .await
        .expect("second activation succeeds");
    assert!(second.warnings.is_empty());
}

/// Deactivating twice in a row (nothing active on the second call) is
/// still success.
#[tokio::test]
async fn deactivating_with_nothing_active_is_success() {
    let fx = fixture();
    fx.persona.deactivate().await.expect("first deactivate, nothing active");
    fx.persona.deactivate().await.expect("second deactivate, still success");
}

/// A persona whose own MCP-config conflicts with the base under the
/// `error` merge strategy fails activation and leaves the pool untouched.
#[tokio::test]
async fn activation_failure_rolls_back_to_pre_activation_state() {
    let fx = fixture();
    let personas_root = fx._dir.path().join("personas");
    write_persona(
        &personas_root,
        "conflicting",
        "name: conflicting\ndescription: Redefines the base git server on purpose.\ntoolsets: []\n",
        Some(r#"{"mcpServers": {"git": {"type": "stdio", "command": "a-different-binary", "args": [], "env": {}}}}"#),
    );

    let base = base_servers();
    fx.pool.start_servers(base.clone()).await;

    let merge_options = MergeOptions {
        strategy: McpConfigMergeStrategy::Error,
        merge_environment: false,
        preserve_base_env: false,
    };
    let result = fx.persona.activate("conflicting", None, merge_options, false).await;
    assert!(result.is_err());
    assert_eq!(fx.pool.server_configs().await, base);
    assert!(fx.persona.active_state().await.is_none());
    let _ = &fx.store;
}
