use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use hypertool_error::PersonaErrorCode;
use hypertool_error::ProxyError;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::sync::RwLock;

use crate::config_store::ConfigStore;
use crate::discovery::DiscoveryEngine;
use crate::events::EventBus;
use crate::events::ProxyEvent;
use crate::pool::ConnectionPool;
use crate::server_config::ServerConfig;
use crate::tool_cache::ToolCache;
use crate::toolset::ToolReference;
use crate::toolset::ToolsetConfig;
use crate::toolset::ToolsetManager;

const DISCOVERY_RETRY_ATTEMPTS: u32 = 20;
const DISCOVERY_RETRY_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaToolsetRef {
    pub name: String,
    pub tool_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaConfig {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub version: Option<String>,
    pub toolsets: Vec<PersonaToolsetRef>,
    #[serde(default)]
    pub default_toolset: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl PersonaConfig {
    pub fn validate(&self) -> Result<(), ProxyError> {
        if !(10..=500).contains(&self.description.len()) {
            return Err(ProxyError::persona(
                PersonaErrorCode::ValidationFailed,
                "persona description must be 10-500 characters",
            ));
        }

        let mut seen_toolsets = std::collections::HashSet::new();
        for toolset in &self.toolsets {
            if !seen_toolsets.insert(&toolset.name) {
                return Err(ProxyError::persona(
                    PersonaErrorCode::ValidationFailed,
                    format!("duplicate toolset name '{}' in persona", toolset.name),
                ));
            }
            let mut seen_tools = std::collections::HashSet::new();
            if toolset.tool_ids.is_empty() {
                return Err(ProxyError::persona(
                    PersonaErrorCode::ValidationFailed,
                    format!("toolset '{}' must name at least one tool", toolset.name),
                ));
            }
            for tool_id in &toolset.tool_ids {
                if !seen_tools.insert(tool_id) {
                    return Err(ProxyError::persona(
                        PersonaErrorCode::ValidationFailed,
                        format!("duplicate tool id '{tool_id}' in toolset '{}'", toolset.name),
                    ));
                }
            }
        }

        if let Some(default) = &self.default_toolset {
            if !self.toolsets.iter().any(|t| &t.name == default) {
                return Err(ProxyError::persona(
                    PersonaErrorCode::ValidationFailed,
                    format!("defaultToolset '{default}' does not name a declared toolset"),
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaAssets {
    pub config_file: PathBuf,
    #[serde(default)]
    pub mcp_config_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonaReference {
    pub name: String,
    pub path: PathBuf,
    pub is_valid: bool,
    pub is_archive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivePersonaMetadata {
    pub validation_passed: bool,
    pub tools_resolved: usize,
    pub warnings: Vec<String>,
    pub mcp_config_applied: bool,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub server_configs: HashMap<String, ServerConfig>,
    pub active_toolset_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivePersonaState {
    pub persona: String,
    pub active_toolset: Option<String>,
    pub activated_at: DateTime<Utc>,
    pub metadata: ActivePersonaMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationOutcome {
    pub success: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum McpConfigMergeStrategy {
    PersonaWins,
    BaseWins,
    Error,
    UserChoice,
}

impl Default for McpConfigMergeStrategy {
    fn default() -> Self {
        McpConfigMergeStrategy::PersonaWins
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub strategy: McpConfigMergeStrategy,
    pub merge_environment: bool,
    pub preserve_base_env: bool,
}

pub struct MergeResult {
    pub merged: HashMap<String, ServerConfig>,
    pub conflicts: Vec<String>,
    pub warnings: Vec<String>,
}

/// Merges a persona's MCP-config mapping into the base mapping per
/// `options.strategy`. Independent of strategy, stdio environments may be
/// unioned when both colliding servers are stdio-typed and
/// `merge_environment` is set.
pub fn merge_mcp_configs(
    base: &HashMap<String, ServerConfig>,
    persona: &HashMap<String, ServerConfig>,
    options: &MergeOptions,
) -> Result<MergeResult, ProxyError> {
    let mut merged = base.clone();
    let mut conflicts = Vec::new();
    let mut warnings = Vec::new();

    for (name, persona_config) in persona {
        match base.get(name) {
            None => {
                merged.insert(name.clone(), persona_config.clone());
            }
            Some(base_config) if base_config == persona_config => {
                // identical, nothing to reconcile
            }
            Some(base_config) => {
                conflicts.push(name.clone());
                let effective_strategy = match options.strategy {
                    McpConfigMergeStrategy::UserChoice => {
                        warnings.push(format!(
                            "no interactive resolver attached; treating '{name}' as persona-wins"
                        ));
                        McpConfigMergeStrategy::PersonaWins
                    }
                    other => other,
                };

                let resolved = match effective_strategy {
                    McpConfigMergeStrategy::PersonaWins => {
                        merge_env_if_applicable(base_config, persona_config, options)
                    }
                    McpConfigMergeStrategy::BaseWins => base_config.clone(),
                    McpConfigMergeStrategy::Error => {
                        return Err(ProxyError::persona(
                            PersonaErrorCode::McpConfigConflict,
                            format!("server '{name}' is defined by both base and persona configs"),
                        ));
                    }
                    McpConfigMergeStrategy::UserChoice => unreachable!("rewritten above"),
                };
                merged.insert(name.clone(), resolved);
                warnings.push(format!("conflict resolved for server {name}"));
            }
        }
    }

    Ok(MergeResult {
        merged,
        conflicts,
        warnings,
    })
}

fn merge_env_if_applicable(
    base: &ServerConfig,
    persona: &ServerConfig,
    options: &MergeOptions,
) -> ServerConfig {
    if !options.merge_environment {
        return persona.clone();
    }
    if let (
        ServerConfig::Stdio {
            command,
            args,
            env: persona_env,
        },
        ServerConfig::Stdio { env: base_env, .. },
    ) = (persona, base)
    {
        let mut merged_env = persona_env.clone();
        for (k, v) in base_env {
            if options.preserve_base_env || !merged_env.contains_key(k) {
                merged_env.insert(k.clone(), v.clone());
            }
        }
        return ServerConfig::Stdio {
            command: command.clone(),
            args: args.clone(),
            env: merged_env,
        };
    }
    persona.clone()
}

/// Loads a [`PersonaConfig`] (and sibling MCP-config, if present) from a
/// persona directory containing `persona.yaml`/`persona.yml`.
pub fn load_persona_manifest(dir: &Path) -> Result<(PersonaConfig, Option<HashMap<String, ServerConfig>>), ProxyError> {
    let manifest_path = ["persona.yaml", "persona.yml"]
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
        .ok_or_else(|| {
            ProxyError::persona(
                PersonaErrorCode::PersonaNotFound,
                format!("no persona.yaml/.yml found in {dir:?}"),
            )
        })?;

    let contents = std::fs::read_to_string(&manifest_path)
        .map_err(|e| ProxyError::Configuration(format!("failed to read {manifest_path:?}: {e}")))?;
    let config: PersonaConfig = serde_yaml::from_str(&contents)
        .map_err(|e| ProxyError::persona(PersonaErrorCode::ValidationFailed, format!("invalid manifest: {e}")))?;

    let mcp_config_path = dir.join("mcp.json");
    let mcp_config = if mcp_config_path.exists() {
        let contents = std::fs::read_to_string(&mcp_config_path)
            .map_err(|e| ProxyError::Configuration(format!("failed to read {mcp_config_path:?}: {e}")))?;
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(default, rename = "mcpServers")]
            mcp_servers: HashMap<String, ServerConfig>,
        }
        let wrapper: Wrapper = serde_json::from_str(&contents)
            .map_err(|e| ProxyError::Configuration(format!("invalid {mcp_config_path:?}: {e}")))?;
        Some(wrapper.mcp_servers)
    } else {
        None
    };

    Ok((config, mcp_config))
}

/// Enumerates persona directories lightweight-ly (name/path/validity only;
/// full manifest parsing happens on activation).
pub fn discover_personas(root: &Path) -> Vec<PersonaReference> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let is_valid = load_persona_manifest(&path)
                .map(|(config, _)| config.validate().is_ok())
                .unwrap_or(false);
            PersonaReference {
                name,
                path,
                is_valid,
                is_archive: false,
            }
        })
        .collect()
}

/// Atomically swaps the downstream-server configuration set and the active
/// toolset for a named persona, with rollback on failure. At most one
/// activation runs process-wide, guarded by `activation_lock`.
pub struct PersonaManager {
    pool: Arc<ConnectionPool>,
    cache: Arc<RwLock<ToolCache>>,
    discovery: Arc<DiscoveryEngine>,
    toolset_manager: Arc<RwLock<ToolsetManager>>,
    config_store: Arc<dyn ConfigStore>,
    events: EventBus,
    personas_root: PathBuf,
    active: RwLock<Option<ActivePersonaState>>,
    activation_lock: Mutex<()>,
    /// The pool/toolset state captured immediately before the currently
    /// active persona was applied; restored verbatim on deactivation.
    pre_activation_snapshot: RwLock<Option<Snapshot>>,
}

impl PersonaManager {
    pub fn new(
        pool: Arc<ConnectionPool>,
        cache: Arc<RwLock<ToolCache>>,
        discovery: Arc<DiscoveryEngine>,
        toolset_manager: Arc<RwLock<ToolsetManager>>,
        config_store: Arc<dyn ConfigStore>,
        events: EventBus,
        personas_root: PathBuf,
    ) -> Self {
        Self {
            pool,
            cache,
            discovery,
            toolset_manager,
            config_store,
            events,
            personas_root,
            active: RwLock::new(None),
            activation_lock: Mutex::new(()),
            pre_activation_snapshot: RwLock::new(None),
        }
    }

    pub async fn active_state(&self) -> Option<ActivePersonaState> {
        self.active.read().await.clone()
    }

    pub fn list_personas(&self) -> Vec<PersonaReference> {
        discover_personas(&self.personas_root)
    }

    async fn snapshot(&self) -> Snapshot {
        Snapshot {
            server_configs: self.pool.server_configs().await,
            active_toolset_name: self
                .toolset_manager
                .read()
                .await
                .active_toolset()
                .map(|t| t.name.clone()),
        }
    }

    async fn restore(&self, snapshot: Snapshot) {
        self.pool.reconcile(snapshot.server_configs).await;
        match snapshot.active_toolset_name {
            Some(name) => {
                if let Ok(Some(toolset)) = self.config_store.load_toolset(&name).await {
                    self.toolset_manager.write().await.equip(toolset);
                }
            }
            None => {
                self.toolset_manager.write().await.unequip();
            }
        }
    }

    /// Runs the full activation workflow: deactivate any differently-named
    /// active persona, load and validate the target, optionally merge its
    /// MCP config, reconcile the pool, wait for discovery, then equip the
    /// selected toolset. Rolls back to the pre-activation snapshot on
    /// failure before step 7 (equipping); failures at step 6-7 degrade to
    /// warnings instead.
    pub async fn activate(
        &self,
        persona_name: &str,
        requested_toolset: Option<&str>,
        merge_options: MergeOptions,
        force: bool,
    ) -> Result<ActivationOutcome, ProxyError> {
        let _guard = self.activation_lock.lock().await;

        if let Some(current) = self.active_state().await {
            if current.persona != persona_name {
                self.deactivate_inner().await?;
            } else {
                // Re-activating the same persona is idempotent: no new
                // warnings, state unchanged.
                return Ok(ActivationOutcome {
                    success: true,
                    warnings: Vec::new(),
                });
            }
        }

        let snapshot = self.snapshot().await;
        *self.pre_activation_snapshot.write().await = Some(snapshot.clone());
        let mut warnings = Vec::new();

        let dir = self.personas_root.join(persona_name);
        let (persona_config, persona_mcp_config) = load_persona_manifest(&dir)?;

        let mut validation_passed = true;
        if let Err(e) = persona_config.validate() {
            if force {
                validation_passed = false;
                warnings.push(format!("manifest validation bypassed via force: {e}"));
            } else {
                return Err(e);
            }
        }

        let toolset_name = requested_toolset
            .map(str::to_string)
            .or_else(|| persona_config.default_toolset.clone());

        let mut mcp_config_applied = false;
        if let Some(mcp_config) = persona_mcp_config {
            let base = self.pool.server_configs().await;
            let merge_result = match merge_mcp_configs(&base, &mcp_config, &merge_options) {
                Ok(result) => result,
                Err(e) => {
                    self.restore(snapshot).await;
                    return Err(e);
                }
            };
            warnings.extend(merge_result.warnings);
            self.config_store
                .save_mcp_servers(&merge_result.merged)
                .await
                .ok();
            self.pool.reconcile(merge_result.merged).await;
            mcp_config_applied = true;
        }

        let mut tools_resolved = 0;
        for attempt in 0..DISCOVERY_RETRY_ATTEMPTS {
            self.discovery.refresh_all().await;
            let cache = self.cache.read().await;
            tools_resolved = cache.get_all(true).len();
            if tools_resolved > 0 || attempt == DISCOVERY_RETRY_ATTEMPTS - 1 {
                break;
            }
            drop(cache);
            tokio::time::sleep(DISCOVERY_RETRY_INTERVAL).await;
        }
        if tools_resolved == 0 {
            warnings.push("no tools discovered within the activation retry budget".to_string());
        }

        if let Some(name) = &toolset_name {
            match self.config_store.load_toolset(name).await {
                Ok(Some(toolset)) => {
                    self.toolset_manager.write().await.equip(toolset);
                }
                Ok(None) => {
                    warnings.push(format!("toolset '{name}' not found; activating with no toolset equipped"));
                }
                Err(e) => {
                    warnings.push(format!("failed to load toolset '{name}': {e}"));
                }
            }
        }

        let state = ActivePersonaState {
            persona: persona_name.to_string(),
            active_toolset: toolset_name,
            activated_at: now(),
            metadata: ActivePersonaMetadata {
                validation_passed,
                tools_resolved,
                warnings: warnings.clone(),
                mcp_config_applied,
            },
        };
        *self.active.write().await = Some(state.clone());

        self.events.publish(ProxyEvent::PersonaActivated {
            persona: state.persona.clone(),
            toolset: state.active_toolset.clone(),
        });

        Ok(ActivationOutcome {
            success: true,
            warnings,
        })
    }

    async fn deactivate_inner(&self) -> Result<(), ProxyError> {
        let Some(state) = self.active.write().await.take() else {
            return Ok(());
        };
        let _ = state;
        if let Some(snapshot) = self.pre_activation_snapshot.write().await.take() {
            self.restore(snapshot).await;
        } else {
            self.toolset_manager.write().await.unequip();
        }
        self.events.publish(ProxyEvent::PersonaDeactivated);
        Ok(())
    }

    /// Idempotent: deactivating with nothing active returns success.
    pub async fn deactivate(&self) -> Result<(), ProxyError> {
        let _guard = self.activation_lock.lock().await;
        self.deactivate_inner().await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolReferenceId(pub String);

impl From<ToolReferenceId> for ToolReference {
    fn from(id: ToolReferenceId) -> Self {
        if id.0.contains('.') {
            ToolReference {
                namespaced_name: Some(id.0),
                ref_id: None,
            }
        } else {
            ToolReference {
                namespaced_name: None,
                ref_id: Some(id.0),
            }
        }
    }
}

/// Builds a [`ToolsetConfig`] from `server.tool` id strings, the shape a
/// persona's `toolIds` list carries.
pub fn toolset_from_tool_ids(name: &str, tool_ids: &[String]) -> ToolsetConfig {
    ToolsetConfig {
        name: name.to_string(),
        description: None,
        version: "1".to_string(),
        created_at: now(),
        tools: tool_ids
            .iter()
            .map(|id| ToolReference {
                namespaced_name: Some(id.clone()),
                ref_id: None,
            })
            .collect(),
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio(command: &str) -> ServerConfig {
        ServerConfig::Stdio {
            command: command.to_string(),
            args: vec![],
            env: HashMap::new(),
        }
    }

    #[test]
    fn persona_validation_rejects_short_description() {
        let config = PersonaConfig {
            name: "dev".to_string(),
            description: "short".to_string(),
            version: None,
            toolsets: vec![],
            default_toolset: None,
            metadata: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn persona_validation_rejects_unknown_default_toolset() {
        let config = PersonaConfig {
            name: "dev".to_string(),
            description: "a persona used for development work on this repo".to_string(),
            version: None,
            toolsets: vec![PersonaToolsetRef {
                name: "core".to_string(),
                tool_ids: vec!["git.status".to_string()],
            }],
            default_toolset: Some("missing".to_string()),
            metadata: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn merge_persona_wins_unions_environment_with_base_precedence() {
        let mut base = HashMap::new();
        let mut base_env = HashMap::new();
        base_env.insert("TOKEN".to_string(), "base-token".to_string());
        base.insert(
            "git".to_string(),
            ServerConfig::Stdio {
                command: "git-mcp".to_string(),
                args: vec![],
                env: base_env,
            },
        );

        let mut persona = HashMap::new();
        let mut persona_env = HashMap::new();
        persona_env.insert("TOKEN".to_string(), "persona-token".to_string());
        persona.insert(
            "git".to_string(),
            ServerConfig::Stdio {
                command: "git-mcp-v2".to_string(),
                args: vec![],
                env: persona_env,
            },
        );
        persona.insert("docker".to_string(), stdio("docker-mcp"));

        let options = MergeOptions {
            strategy: McpConfigMergeStrategy::PersonaWins,
            merge_environment: true,
            preserve_base_env: true,
        };
        let result = merge_mcp_configs(&base, &persona, &options).expect("merge succeeds");
        assert_eq!(result.conflicts, vec!["git".to_string()]);
        assert!(result.merged.contains_key("docker"));
        if let ServerConfig::Stdio { command, env, .. } = &result.merged["git"] {
            assert_eq!(command, "git-mcp-v2");
            assert_eq!(env.get("TOKEN"), Some(&"base-token".to_string()));
        } else {
            panic!("expected stdio variant");
        }
    }

    #[test]
    fn merge_error_strategy_rejects_conflicts() {
        let mut base = HashMap::new();
        base.insert("git".to_string(), stdio("git-mcp"));
        let mut persona = HashMap::new();
        persona.insert("git".to_string(), stdio("git-mcp-v2"));

        let options = MergeOptions {
            strategy: McpConfigMergeStrategy::Error,
            ..Default::default()
        };
        assert!(merge_mcp_configs(&base, &persona, &options).is_err());
    }
}
