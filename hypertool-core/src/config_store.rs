use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use hypertool_error::ProxyError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::server_config::ServerConfig;
use crate::toolset::ToolsetConfig;

/// The on-disk layout under `<home>/.hypertool/<app>/`: `config.json`,
/// `mcp.json`, `preferences.json`, `personas/`, `logs/`, `backups/`. Out of
/// scope for this crate beyond the subset read/written here: the primary
/// MCP-config mapping and stored toolsets. Treated as a key/value store
/// with the methods below; higher layers (CLI) are the only callers.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    pub root: PathBuf,
}

impl StoreLayout {
    pub fn discover() -> Result<Self, ProxyError> {
        if let Ok(test_override) = std::env::var("HYPERTOOL_TEST_CONFIG") {
            return Ok(Self {
                root: PathBuf::from(test_override),
            });
        }
        let home = dirs::home_dir().ok_or_else(|| {
            ProxyError::Configuration("could not determine home directory".to_string())
        })?;
        Ok(Self {
            root: home.join(".hypertool").join("mcp"),
        })
    }

    pub fn mcp_config_path(&self) -> PathBuf {
        self.root.join("mcp.json")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.root.join("preferences.json")
    }

    pub fn personas_dir(&self) -> PathBuf {
        match std::env::var("HYPERTOOL_PERSONA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => self.root.join("personas"),
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }
}

/// Abstracts "a key/value store with these methods" so the toolset manager
/// and the persona manager never touch the filesystem directly; tests
/// supply an in-memory implementation, production supplies
/// [`FileConfigStore`].
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_mcp_servers(&self) -> Result<HashMap<String, ServerConfig>, ProxyError>;
    async fn save_mcp_servers(
        &self,
        servers: &HashMap<String, ServerConfig>,
    ) -> Result<(), ProxyError>;

    async fn load_toolset(&self, name: &str) -> Result<Option<ToolsetConfig>, ProxyError>;
    async fn save_toolset(&self, toolset: &ToolsetConfig) -> Result<(), ProxyError>;
    async fn delete_toolset(&self, name: &str) -> Result<(), ProxyError>;
    async fn list_toolsets(&self) -> Result<Vec<String>, ProxyError>;
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct McpConfigFile {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: HashMap<String, ServerConfig>,
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct PreferencesFile {
    #[serde(default)]
    toolsets: HashMap<String, ToolsetConfig>,
}

/// JSON-file-backed [`ConfigStore`]. Writers are serialized through an
/// internal mutex so two writes to the same file never interleave; this is
/// the crate's only writer of `mcp.json`/`preferences.json`.
pub struct FileConfigStore {
    layout: StoreLayout,
    write_lock: Mutex<()>,
}

impl FileConfigStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            layout,
            write_lock: Mutex::new(()),
        }
    }

    fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, ProxyError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| ProxyError::Configuration(format!("malformed {path:?}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(ProxyError::Configuration(format!(
                "failed to read {path:?}: {e}"
            ))),
        }
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ProxyError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProxyError::Configuration(format!("failed to create {parent:?}: {e}")))?;
        }
        let contents = serde_json::to_string_pretty(value)
            .map_err(|e| ProxyError::Internal(format!("failed to serialize {path:?}: {e}")))?;
        std::fs::write(path, contents)
            .map_err(|e| ProxyError::Configuration(format!("failed to write {path:?}: {e}")))
    }
}

#[async_trait::async_trait]
impl ConfigStore for FileConfigStore {
    async fn load_mcp_servers(&self) -> Result<HashMap<String, ServerConfig>, ProxyError> {
        let path = self.layout.mcp_config_path();
        let file: McpConfigFile = Self::read_json(&path)?;
        Ok(file.mcp_servers)
    }

    async fn save_mcp_servers(
        &self,
        servers: &HashMap<String, ServerConfig>,
    ) -> Result<(), ProxyError> {
        let _guard = self.write_lock.lock().await;
        let path = self.layout.mcp_config_path();
        let file = McpConfigFile {
            mcp_servers: servers.clone(),
        };
        Self::write_json(&path, &file)
    }

    async fn load_toolset(&self, name: &str) -> Result<Option<ToolsetConfig>, ProxyError> {
        let path = self.layout.preferences_path();
        let file: PreferencesFile = Self::read_json(&path)?;
        Ok(file.toolsets.get(name).cloned())
    }

    async fn save_toolset(&self, toolset: &ToolsetConfig) -> Result<(), ProxyError> {
        let _guard = self.write_lock.lock().await;
        let path = self.layout.preferences_path();
        let mut file: PreferencesFile = Self::read_json(&path)?;
        file.toolsets.insert(toolset.name.clone(), toolset.clone());
        Self::write_json(&path, &file)
    }

    async fn delete_toolset(&self, name: &str) -> Result<(), ProxyError> {
        let _guard = self.write_lock.lock().await;
        let path = self.layout.preferences_path();
        let mut file: PreferencesFile = Self::read_json(&path)?;
        file.toolsets.remove(name);
        Self::write_json(&path, &file)
    }

    async fn list_toolsets(&self) -> Result<Vec<String>, ProxyError> {
        let path = self.layout.preferences_path();
        let file: PreferencesFile = Self::read_json(&path)?;
        Ok(file.toolsets.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn temp_store() -> (tempfile::TempDir, FileConfigStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = StoreLayout {
            root: dir.path().to_path_buf(),
        };
        (dir, FileConfigStore::new(layout))
    }

    #[tokio::test]
    async fn save_then_load_mcp_servers_round_trips() {
        let (_dir, store) = temp_store();
        let mut servers = HashMap::new();
        servers.insert(
            "git".to_string(),
            ServerConfig::Stdio {
                command: "git-mcp".to_string(),
                args: vec![],
                env: HashMap::new(),
            },
        );
        store.save_mcp_servers(&servers).await.expect("save succeeds");
        let loaded = store.load_mcp_servers().await.expect("load succeeds");
        assert_eq!(loaded, servers);
    }

    #[tokio::test]
    async fn missing_preferences_file_yields_empty_toolset_list() {
        let (_dir, store) = temp_store();
        assert!(store.list_toolsets().await.expect("ok").is_empty());
    }

    #[tokio::test]
    async fn save_delete_toolset_round_trip() {
        let (_dir, store) = temp_store();
        let toolset = ToolsetConfig {
            name: "git-core".to_string(),
            description: None,
            version: "1".to_string(),
            created_at: Utc::now(),
            tools: vec![],
        };
        store.save_toolset(&toolset).await.expect("save");
        assert!(store.load_toolset("git-core").await.expect("load").is_some());
        store.delete_toolset("git-core").await.expect("delete");
        assert!(store.load_toolset("git-core").await.expect("load").is_none());
    }
}
