use chrono::DateTime;
use chrono::Utc;
use hypertool_error::ProxyError;
use serde::Deserialize;
use serde::Serialize;

use crate::conflict::ConflictResolver;
use crate::events::EventBus;
use crate::events::ProxyEvent;
use crate::events::ToolsetChangeType;
use crate::tool_cache::DiscoveredTool;
use crate::tool_cache::ToolCache;

/// A user-facing pointer to a tool: may carry a `namespacedName`, a `refId`
/// (the tool's hash), or both. Resolution tries `namespacedName` first,
/// falls back to `refId`, and is a [`ProxyError::Validation`] if neither is
/// present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaced_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsetConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub tools: Vec<ToolReference>,
}

impl ToolsetConfig {
    pub fn validate_name(name: &str) -> Result<(), ProxyError> {
        let len_ok = (2..=50).contains(&name.len());
        let shape_ok = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if len_ok && shape_ok {
            Ok(())
        } else {
            Err(ProxyError::Validation(format!(
                "toolset name '{name}' must match ^[a-z0-9-]{{2,50}}$"
            )))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedReference {
    pub reference: ToolReference,
    pub tool: DiscoveredTool,
    /// Set when resolution fell back to `refId` and the cached tool's
    /// current `namespacedName` differs from the reference's recorded one.
    pub namespaced_name_drifted: bool,
}

#[derive(Debug, Default)]
pub struct ValidatedReferences {
    pub valid: Vec<ResolvedReference>,
    pub invalid: Vec<ToolReference>,
}

/// Resolves one [`ToolReference`] against the connected-only cache, per the
/// two-step lookup order: `namespacedName` first, then `refId`.
/// `allow_stale_refs` additionally matches disconnected servers' cached
/// tools — used for display/listing, never for call routing.
pub fn resolve_reference(
    cache: &ToolCache,
    reference: &ToolReference,
    allow_stale_refs: bool,
) -> Result<ResolvedReference, ProxyError> {
    if reference.namespaced_name.is_none() && reference.ref_id.is_none() {
        return Err(ProxyError::Validation(
            "tool reference must carry namespacedName and/or refId".to_string(),
        ));
    }

    let candidates = cache.get_all(!allow_stale_refs);

    if let Some(namespaced_name) = &reference.namespaced_name {
        if let Some(tool) = candidates
            .iter()
            .find(|t| &t.namespaced_name == namespaced_name)
        {
            return Ok(ResolvedReference {
                reference: reference.clone(),
                tool: tool.clone(),
                namespaced_name_drifted: false,
            });
        }
    }

    if let Some(ref_id) = &reference.ref_id {
        if let Some(tool) = candidates.iter().find(|t| &t.tool_hash == ref_id) {
            let drifted = reference
                .namespaced_name
                .as_ref()
                .is_some_and(|n| n != &tool.namespaced_name);
            return Ok(ResolvedReference {
                reference: reference.clone(),
                tool: tool.clone(),
                namespaced_name_drifted: drifted,
            });
        }
    }

    Err(ProxyError::ToolNotFound(
        reference
            .namespaced_name
            .clone()
            .or_else(|| reference.ref_id.clone())
            .unwrap_or_default(),
    ))
}

pub fn validate_references(
    cache: &ToolCache,
    refs: &[ToolReference],
    allow_stale_refs: bool,
) -> ValidatedReferences {
    let mut out = ValidatedReferences::default();
    for reference in refs {
        match resolve_reference(cache, reference, allow_stale_refs) {
            Ok(resolved) => out.valid.push(resolved),
            Err(_) => out.invalid.push(reference.clone()),
        }
    }
    out
}

/// Replaces `.` with `_` in a namespaced name for upstream exposure. MCP
/// clients commonly forbid dots in tool names; this is purely cosmetic.
pub fn flatten_name(namespaced_name: &str) -> String {
    namespaced_name.replace('.', "_")
}

#[derive(Debug, Clone, Serialize)]
pub struct McpToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Holds the currently active toolset (if any), translates it into the
/// upstream-exposed tool list, and resolves upstream names back to
/// downstream `(serverName, toolName)` pairs. Persistence is delegated to a
/// [`crate::config_store::ConfigStore`] passed into the mutating
/// operations; this type owns only in-memory state — both directions of
/// the flatten/unflatten mapping are resolved live against the cache on
/// every lookup, not cached at equip time, so a tool that only becomes
/// resolvable after equip (its server connects, or discovery finds it
/// later) is reachable the moment `tools/list` starts advertising it.
pub struct ToolsetManager {
    active: Option<ToolsetConfig>,
    resolver: ConflictResolver,
    events: EventBus,
}

impl ToolsetManager {
    pub fn new(resolver: ConflictResolver, events: EventBus) -> Self {
        Self {
            active: None,
            resolver,
            events,
        }
    }

    pub fn active_toolset(&self) -> Option<&ToolsetConfig> {
        self.active.as_ref()
    }

    /// Installs `toolset` as active. Does not itself persist the toolset;
    /// callers use the config store for that. No cache lookups happen here
    /// — references are resolved live on every `get_mcp_tools`/
    /// `get_original_tool_name` call, so equipping never needs the cache.
    pub fn equip(&mut self, toolset: ToolsetConfig) {
        let previous = self.active.as_ref().map(|t| t.name.clone());
        let change_type = if previous.is_some() {
            ToolsetChangeType::Updated
        } else {
            ToolsetChangeType::Equipped
        };

        let new_name = toolset.name.clone();
        self.active = Some(toolset);
        self.events.publish(ProxyEvent::ToolsetChanged {
            previous_toolset: previous,
            new_toolset: Some(new_name),
            change_type,
        });
    }

    pub fn unequip(&mut self) {
        let previous = self.active.take().map(|t| t.name);
        self.events.publish(ProxyEvent::ToolsetChanged {
            previous_toolset: previous,
            new_toolset: None,
            change_type: ToolsetChangeType::Unequipped,
        });
    }

    /// Flattened `{name, description, inputSchema}` triples for the active
    /// toolset, in its declared order; empty if nothing is equipped.
    pub fn get_mcp_tools(&self, cache: &ToolCache) -> Vec<McpToolDescriptor> {
        let Some(toolset) = &self.active else {
            return Vec::new();
        };
        toolset
            .tools
            .iter()
            .filter_map(|reference| resolve_reference(cache, reference, false).ok())
            .map(|resolved| McpToolDescriptor {
                name: flatten_name(&resolved.tool.namespaced_name),
                description: resolved.tool.description.clone(),
                input_schema: resolved.tool.input_schema.clone(),
            })
            .collect()
    }

    /// Reverse lookup of a flattened upstream name back to its namespaced
    /// `server.tool` routing key, resolved live against `cache` — the same
    /// resolution `get_mcp_tools` uses to build the forward list, so a tool
    /// exposed by `tools/list` is always reachable here too (spec §8
    /// invariant 1).
    pub fn get_original_tool_name(&self, cache: &ToolCache, flat_name: &str) -> Option<String> {
        let toolset = self.active.as_ref()?;
        toolset.tools.iter().find_map(|reference| {
            let resolved = resolve_reference(cache, reference, false).ok()?;
            if flatten_name(&resolved.tool.namespaced_name) == flat_name {
                Some(resolved.tool.namespaced_name)
            } else {
                None
            }
        })
    }

    /// Reapplies the conflict resolver's separator-aware naming to a list
    /// of resolved tools; used by callers that need the full external-name
    /// projection rather than just the active toolset (e.g. `mcp list`).
    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_cache() -> ToolCache {
        let mut cache = ToolCache::new();
        cache.reconcile_server(
            "git",
            &[mcp_types::Tool {
                name: "status".to_string(),
                description: Some("git status".to_string()),
                input_schema: serde_json::json!({}),
                output_schema: None,
                annotations: None,
            }],
        );
        cache
    }

    #[test]
    fn flatten_name_replaces_dots() {
        assert_eq!(flatten_name("git.status"), "git_status");
    }

    #[test]
    fn resolve_reference_requires_at_least_one_field() {
        let cache = seeded_cache();
        let reference = ToolReference {
            namespaced_name: None,
            ref_id: None,
        };
        assert!(resolve_reference(&cache, &reference, false).is_err());
    }

    #[test]
    fn resolve_by_namespaced_name_then_ref_id_fallback() {
        let cache = seeded_cache();
        let tool = cache.get_all(true).remove(0);

        let by_name = ToolReference {
            namespaced_name: Some("git.status".to_string()),
            ref_id: None,
        };
        assert!(resolve_reference(&cache, &by_name, false).is_ok());

        let by_ref_only = ToolReference {
            namespaced_name: Some("stale.name".to_string()),
            ref_id: Some(tool.tool_hash.clone()),
        };
        let resolved = resolve_reference(&cache, &by_ref_only, false).expect("resolves via refId");
        assert!(resolved.namespaced_name_drifted);
    }

    #[test]
    fn equip_then_unequip_empties_exposed_tools() {
        let cache = seeded_cache();
        let mut manager = ToolsetManager::new(
            ConflictResolver::new(crate::conflict::ConflictStrategy::Namespace),
            EventBus::new(),
        );
        let toolset = ToolsetConfig {
            name: "git-core".to_string(),
            description: None,
            version: "1".to_string(),
            created_at: Utc::now(),
            tools: vec![ToolReference {
                namespaced_name: Some("git.status".to_string()),
                ref_id: None,
            }],
        };
        manager.equip(toolset);
        assert_eq!(manager.get_mcp_tools(&cache).len(), 1);

        manager.unequip();
        assert!(manager.get_mcp_tools(&cache).is_empty());
    }

    #[test]
    fn toolset_name_validation_rejects_bad_shapes() {
        assert!(ToolsetConfig::validate_name("git-core").is_ok());
        assert!(ToolsetConfig::validate_name("a").is_err());
        assert!(ToolsetConfig::validate_name("Has_Upper").is_err());
    }
}
