use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// One entry in a `mcpServers` mapping: exactly one transport variant per
/// entry, covering every downstream transport the proxy speaks (stdio,
/// streamable HTTP, SSE, and local extension bundles).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerConfig {
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
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Extension {
        path: String,
    },
}

/// Names and identifiers that, if found in a stdio launch command, indicate
/// the configuration would recurse into this very process.
const SELF_REFERENCE_BINARY_NAMES: &[&str] = &["hypertool", "hypertool-mcp-server", "hypertool-mcp-client"];
const SELF_REFERENCE_PACKAGE_IDENTIFIERS: &[&str] = &["@hypertool/mcp", "hypertool-mcp-proxy"];

/// Detects stdio configurations that would launch this proxy binary itself.
/// Pure function so it can be unit tested without a pool in scope; the pool
/// calls it before accepting a config and only logs + skips on a hit, it
/// never treats the result as fatal.
pub fn is_self_reference(config: &ServerConfig) -> bool {
    let ServerConfig::Stdio { command, args, .. } = config else {
        return false;
    };

    let command_base = command
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(command.as_str());
    if SELF_REFERENCE_BINARY_NAMES
        .iter()
        .any(|name| command_base.eq_ignore_ascii_case(name))
    {
        return true;
    }

    let is_node_like = matches!(command_base, "npx" | "node" | "npm");
    if is_node_like {
        return args.iter().any(|arg| {
            SELF_REFERENCE_PACKAGE_IDENTIFIERS
                .iter()
                .any(|id| arg.contains(id))
        });
    }

    false
}
