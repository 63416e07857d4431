//! Per-backend tool catalog.

use crate::error::{ProxyError, Result};
use crate::session::ToolSession;
use serde_json::Value;
use sha2::Digest as _;
use std::collections::HashSet;

/// One discovered tool. Immutable once discovered.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    /// JSON Schema for the arguments object.
    pub input_schema: Value,
    pub output_schema: Option<Value>,
}

impl From<&rmcp::model::Tool> for ToolDescriptor {
    fn from(tool: &rmcp::model::Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool
                .description
                .as_deref()
                .map(str::to_string)
                .or_else(|| tool.title.clone()),
            input_schema: Value::Object(tool.input_schema.as_ref().clone()),
            output_schema: tool
                .output_schema
                .as_ref()
                .map(|s| Value::Object(s.as_ref().clone())),
        }
    }
}

/// The ordered tool set of one backend, with unique names.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    fingerprint: String,
}

impl ToolCatalog {
    /// Build a catalog, rejecting duplicate tool names.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Protocol`] naming the first duplicated tool.
    pub fn new(backend: impl Into<String>, tools: Vec<ToolDescriptor>) -> Result<Self> {
        let backend = backend.into();
        let mut seen = HashSet::new();
        for tool in &tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(ProxyError::Protocol(format!(
                    "backend '{backend}' advertises duplicate tool name '{}'",
                    tool.name
                )));
            }
        }
        let fingerprint = fingerprint(&tools);
        Ok(Self {
            tools,
            fingerprint,
        })
    }

    #[must_use]
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// SHA-256 over the canonicalized tool surface; stable across key order.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// List the session's tools and build its catalog.
///
/// # Errors
///
/// Propagates session failures and duplicate-name rejection.
pub async fn discover(session: &dyn ToolSession) -> Result<ToolCatalog> {
    let tools = session.list_tools().await?;
    let catalog = ToolCatalog::new(session.backend(), tools)?;
    if catalog.is_empty() {
        tracing::warn!(backend = %session.backend(), "Backend advertises no tools");
    }
    Ok(catalog)
}

fn fingerprint(tools: &[ToolDescriptor]) -> String {
    let mut entries: Vec<Value> = tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "name": t.name,
                "description": t.description,
                "inputSchema": t.input_schema,
                "outputSchema": t.output_schema,
            })
        })
        .collect();
    entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    let serialized = canonicalize_json(&Value::Array(entries)).to_string();
    format!("{:x}", sha2::Sha256::digest(serialized.as_bytes()))
}

fn canonicalize_json(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), canonicalize_json(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(canonicalize_json).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn tool(name: &str, schema: Value) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: None,
            input_schema: schema,
            output_schema: None,
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = ToolCatalog::new(
            "math",
            vec![tool("add", json!({})), tool("add", json!({}))],
        )
        .unwrap_err();
        assert_eq!(err.kind(), "protocol_error");
        assert!(err.to_string().contains("'add'"));
    }

    #[test]
    fn lookup_preserves_discovery_order() {
        let catalog = ToolCatalog::new(
            "math",
            vec![tool("sub", json!({})), tool("add", json!({}))],
        )
        .unwrap();
        let names: Vec<_> = catalog.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["sub", "add"]);
        assert_eq!(catalog.len(), 2);
        assert!(!catalog.is_empty());
    }

    #[test]
    fn fingerprint_ignores_order_but_tracks_schema() {
        let a = ToolCatalog::new(
            "m",
            vec![
                tool("x", json!({"type": "object", "required": ["a"]})),
                tool("y", json!({})),
            ],
        )
        .unwrap();
        let b = ToolCatalog::new(
            "m",
            vec![
                tool("y", json!({})),
                tool("x", json!({"required": ["a"], "type": "object"})),
            ],
        )
        .unwrap();
        let c = ToolCatalog::new("m", vec![tool("x", json!({"type": "object"}))]).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn converts_rmcp_tool() {
        let schema = json!({"type": "object", "properties": {"a": {"type": "integer"}}});
        let rmcp_tool = rmcp::model::Tool::new(
            "add",
            "Add numbers",
            Arc::new(schema.as_object().cloned().unwrap()),
        );
        let d = ToolDescriptor::from(&rmcp_tool);
        assert_eq!(d.name, "add");
        assert_eq!(d.description.as_deref(), Some("Add numbers"));
        assert_eq!(d.input_schema, schema);
        assert!(d.output_schema.is_none());
    }
}
