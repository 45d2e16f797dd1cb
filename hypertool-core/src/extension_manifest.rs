//! Resolves `ServerConfig::Extension { path }` — a local path to a packaged
//! extension directory whose manifest yields a stdio or http config at load
//! time — to the concrete transport its packaged `manifest.json` describes.
//! Kept separate from [`crate::server_config`] since it touches the
//! filesystem and the other variants don't.

use std::collections::HashMap;
use std::path::Path;

use hypertool_error::ProxyError;
use serde::Deserialize;

use crate::server_config::ServerConfig;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ManifestTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl From<ManifestTransport> for ServerConfig {
    fn from(transport: ManifestTransport) -> Self {
        match transport {
            ManifestTransport::Stdio { command, args, env } => {
                ServerConfig::Stdio { command, args, env }
            }
            ManifestTransport::Http { url, headers } => ServerConfig::Http { url, headers },
        }
    }
}

/// Reads `<path>/manifest.json` and yields the transport it describes.
/// Relative `command` paths inside a stdio manifest are resolved against
/// the extension directory so the entry is portable across installs.
pub fn resolve_extension(path: &str) -> Result<ServerConfig, ProxyError> {
    let dir = Path::new(path);
    let manifest_path = dir.join("manifest.json");
    let contents = std::fs::read_to_string(&manifest_path).map_err(|e| {
        ProxyError::Configuration(format!("failed to read {manifest_path:?}: {e}"))
    })?;
    let transport: ManifestTransport = serde_json::from_str(&contents)
        .map_err(|e| ProxyError::Configuration(format!("invalid {manifest_path:?}: {e}")))?;

    let mut config: ServerConfig = transport.into();
    if let ServerConfig::Stdio { command, .. } = &mut config {
        let command_path = Path::new(&command);
        if command_path.is_relative() && command_path.components().count() > 1 {
            *command = dir.join(&command).to_string_lossy().into_owned();
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, contents: &str) {
        std::fs::write(dir.join("manifest.json"), contents).expect("write manifest");
    }

    #[test]
    fn resolves_stdio_manifest_with_relative_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_manifest(
            dir.path(),
            r#"{"type": "stdio", "command": "bin/run.sh", "args": ["--flag"], "env": {}}"#,
        );

        let resolved = resolve_extension(dir.path().to_str().unwrap()).expect("resolves");
        match resolved {
            ServerConfig::Stdio { command, args, .. } => {
                assert!(command.ends_with("bin/run.sh"));
                assert!(Path::new(&command).starts_with(dir.path()));
                assert_eq!(args, vec!["--flag".to_string()]);
            }
            other => panic!("expected stdio, got {other:?}"),
        }
    }

    #[test]
    fn resolves_http_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_manifest(
            dir.path(),
            r#"{"type": "http", "url": "http://localhost:9000/mcp"}"#,
        );

        let resolved = resolve_extension(dir.path().to_str().unwrap()).expect("resolves");
        assert!(matches!(resolved, ServerConfig::Http { url, .. } if url == "http://localhost:9000/mcp"));
    }

    #[test]
    fn missing_manifest_is_a_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(resolve_extension(dir.path().to_str().unwrap()).is_err());
    }
}
