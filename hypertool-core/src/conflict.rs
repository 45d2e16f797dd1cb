use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use crate::tool_cache::DiscoveredTool;

/// Which rule the conflict resolver applies when two or more servers expose
/// a tool under the same name. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    Namespace,
    Suffix,
    Priority,
    First,
    Merge,
    Error,
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::Namespace
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedTool {
    pub external_name: String,
    pub namespaced_name: String,
    pub tool: DiscoveredTool,
}

#[derive(Debug, thiserror::Error)]
#[error("tool name collision on '{0}' under the 'error' conflict strategy")]
pub struct ConflictError(pub String);

pub struct ConflictResolver {
    pub strategy: ConflictStrategy,
    pub separator: String,
    /// Server names in descending priority order, used by `priority`.
    pub priority_order: Vec<String>,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy,
            separator: ".".to_string(),
            priority_order: Vec::new(),
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_priority_order(mut self, order: Vec<String>) -> Self {
        self.priority_order = order;
        self
    }

    /// Maps the raw set of discovered tools to a list with pairwise-distinct
    /// `external_name`s, regardless of the input distribution of collisions.
    pub fn resolve(&self, tools: Vec<DiscoveredTool>) -> Result<Vec<ResolvedTool>, ConflictError> {
        let mut by_name: HashMap<String, Vec<DiscoveredTool>> = HashMap::new();
        for tool in tools {
            by_name.entry(tool.name.clone()).or_default().push(tool);
        }

        let mut resolved = Vec::new();
        for (name, mut group) in by_name {
            if group.len() == 1 {
                let tool = group.remove(0);
                resolved.push(ResolvedTool {
                    external_name: format!("{}{}{}", tool.server_name, self.separator, tool.name),
                    namespaced_name: tool.namespaced_name.clone(),
                    tool,
                });
                continue;
            }

            match self.strategy {
                ConflictStrategy::Namespace => {
                    for tool in group {
                        resolved.push(ResolvedTool {
                            external_name: format!(
                                "{}{}{}",
                                tool.server_name, self.separator, tool.name
                            ),
                            namespaced_name: tool.namespaced_name.clone(),
                            tool,
                        });
                    }
                }
                ConflictStrategy::Suffix => {
                    for tool in group {
                        resolved.push(ResolvedTool {
                            external_name: format!(
                                "{}{}{}",
                                tool.name, self.separator, tool.server_name
                            ),
                            namespaced_name: tool.namespaced_name.clone(),
                            tool,
                        });
                    }
                }
                ConflictStrategy::Priority => {
                    let winner = group.iter().min_by_key(|t| {
                        self.priority_order
                            .iter()
                            .position(|s| s == &t.server_name)
                            .unwrap_or(usize::MAX)
                    });
                    if let Some(winner) = winner.cloned() {
                        resolved.push(ResolvedTool {
                            external_name: winner.name.clone(),
                            namespaced_name: winner.namespaced_name.clone(),
                            tool: winner,
                        });
                    }
                }
                ConflictStrategy::First => {
                    let winner = group.iter().min_by_key(|t| t.discovered_at);
                    if let Some(winner) = winner.cloned() {
                        resolved.push(ResolvedTool {
                            external_name: winner.name.clone(),
                            namespaced_name: winner.namespaced_name.clone(),
                            tool: winner,
                        });
                    }
                }
                ConflictStrategy::Merge => {
                    let first_hash = &group[0].tool_hash;
                    if group.iter().all(|t| &t.tool_hash == first_hash) {
                        let merged_server = group
                            .iter()
                            .map(|t| t.server_name.as_str())
                            .collect::<Vec<_>>()
                            .join(",");
                        let mut merged = group[0].clone();
                        merged.server_name = merged_server;
                        resolved.push(ResolvedTool {
                            external_name: name.clone(),
                            namespaced_name: merged.namespaced_name.clone(),
                            tool: merged,
                        });
                    } else {
                        for tool in group {
                            resolved.push(ResolvedTool {
                                external_name: format!(
                                    "{}{}{}",
                                    tool.server_name, self.separator, tool.name
                                ),
                                namespaced_name: tool.namespaced_name.clone(),
                                tool,
                            });
                        }
                    }
                }
                ConflictStrategy::Error => {
                    return Err(ConflictError(name));
                }
            }
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_cache::ServerStatus;

    fn tool(server: &str, name: &str, schema: serde_json::Value) -> DiscoveredTool {
        DiscoveredTool::from_tool(
            server,
            &mcp_types::Tool {
                name: name.to_string(),
                description: None,
                input_schema: schema,
                output_schema: None,
                annotations: None,
            },
            ServerStatus::Connected,
        )
    }

    #[test]
    fn namespace_strategy_keeps_every_tool() {
        let resolver = ConflictResolver::new(ConflictStrategy::Namespace);
        let tools = vec![
            tool("a", "status", serde_json::json!({})),
            tool("b", "status", serde_json::json!({})),
        ];
        let resolved = resolver.resolve(tools).expect("no error strategy");
        let mut names: Vec<_> = resolved.iter().map(|r| r.external_name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a.status", "b.status"]);
    }

    #[test]
    fn merge_strategy_collapses_identical_tools() {
        let resolver = ConflictResolver::new(ConflictStrategy::Merge);
        let tools = vec![
            tool("a", "status", serde_json::json!({"x": 1})),
            tool("b", "status", serde_json::json!({"x": 1})),
        ];
        let resolved = resolver.resolve(tools).expect("no error strategy");
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].tool.server_name.contains(','));
    }

    #[test]
    fn merge_strategy_falls_back_to_namespace_on_schema_mismatch() {
        let resolver = ConflictResolver::new(ConflictStrategy::Merge);
        let tools = vec![
            tool("a", "status", serde_json::json!({"x": 1})),
            tool("b", "status", serde_json::json!({"x": 2})),
        ];
        let resolved = resolver.resolve(tools).expect("no error strategy");
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn error_strategy_rejects_collisions() {
        let resolver = ConflictResolver::new(ConflictStrategy::Error);
        let tools = vec![
            tool("a", "status", serde_json::json!({})),
            tool("b", "status", serde_json::json!({})),
        ];
        assert!(resolver.resolve(tools).is_err());
    }

    #[test]
    fn pairwise_distinct_external_names_regardless_of_collision_shape() {
        let resolver = ConflictResolver::new(ConflictStrategy::Namespace);
        let tools = vec![
            tool("a", "status", serde_json::json!({})),
            tool("a", "diff", serde_json::json!({})),
            tool("b", "status", serde_json::json!({})),
            tool("c", "status", serde_json::json!({})),
        ];
        let resolved = resolver.resolve(tools).expect("no error strategy");
        let mut names: Vec<_> = resolved.iter().map(|r| r.external_name.clone()).collect();
        let unique: std::collections::HashSet<_> = names.iter().cloned().collect();
        names.sort();
        assert_eq!(names.len(), unique.len());
    }
}
