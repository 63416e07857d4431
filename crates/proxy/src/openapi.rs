//! OpenAPI document assembly.

use crate::config::ServerMetadata;
use serde_json::{Map, Value, json};

pub const OPENAPI_VERSION: &str = "3.0.3";
pub const DEFAULT_TITLE: &str = "MCP OpenAPI Proxy";
pub const DEFAULT_DESCRIPTION: &str = "Automatically generated API from MCP Tool Schemas";
pub const DEFAULT_VERSION: &str = "1.0";

/// The document's `info` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub title: String,
    pub description: String,
    pub version: String,
}

impl DocumentInfo {
    /// Configured values win over what the backend reported, which wins over the defaults.
    #[must_use]
    pub fn resolve(
        configured: &ServerMetadata,
        reported: Option<&ServerMetadata>,
        default_title: &str,
        default_description: &str,
    ) -> Self {
        Self {
            title: pick(
                configured.name.as_ref(),
                reported.and_then(|r| r.name.as_ref()),
                default_title,
            ),
            description: pick(
                configured.description.as_ref(),
                reported.and_then(|r| r.description.as_ref()),
                default_description,
            ),
            version: pick(
                configured.version.as_ref(),
                reported.and_then(|r| r.version.as_ref()),
                DEFAULT_VERSION,
            ),
        }
    }
}

fn pick(configured: Option<&String>, reported: Option<&String>, default: &str) -> String {
    [configured, reported]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .map_or_else(|| default.to_string(), Clone::clone)
}

/// Schema shared by every error response.
fn error_response_schema() -> Value {
    json!({
        "type": "object",
        "required": ["error"],
        "properties": {
            "error": {
                "type": "object",
                "required": ["kind", "message"],
                "properties": {
                    "kind": { "type": "string" },
                    "message": { "type": "string" },
                    "details": {}
                }
            }
        }
    })
}

/// Assemble a document from `(path, operation)` pairs. Every operation is a POST.
///
/// `server` becomes the single `servers` entry when non-empty; paths are relative to it.
pub fn build_document<'a>(
    info: &DocumentInfo,
    server: Option<&str>,
    tags: &[(String, String)],
    operations: impl Iterator<Item = (&'a str, &'a Value)>,
    secured: bool,
) -> Value {
    let mut paths = Map::new();
    for (path, operation) in operations {
        paths.insert(path.to_string(), json!({ "post": operation }));
    }

    let mut components = Map::new();
    components.insert(
        "schemas".into(),
        json!({ "ErrorResponse": error_response_schema() }),
    );
    if secured {
        components.insert(
            "securitySchemes".into(),
            json!({ "bearerAuth": { "type": "http", "scheme": "bearer" } }),
        );
    }

    let mut doc = Map::new();
    doc.insert("openapi".into(), json!(OPENAPI_VERSION));
    doc.insert(
        "info".into(),
        json!({
            "title": info.title,
            "description": info.description,
            "version": info.version,
        }),
    );
    if let Some(server) = server.filter(|s| !s.is_empty()) {
        doc.insert("servers".into(), json!([{ "url": server }]));
    }
    if !tags.is_empty() {
        let tags: Vec<Value> = tags
            .iter()
            .map(|(name, description)| json!({ "name": name, "description": description }))
            .collect();
        doc.insert("tags".into(), Value::Array(tags));
    }
    doc.insert("paths".into(), Value::Object(paths));
    doc.insert("components".into(), Value::Object(components));
    Value::Object(doc)
}

/// Minimal Swagger UI page pointing at `spec_url`.
#[must_use]
pub fn docs_page(title: &str, spec_url: &str) -> String {
    let title = html_escape(title);
    let spec_url = html_escape(spec_url);
    format!(
        r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title} - Docs</title>
<link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
<div id="swagger-ui"></div>
<noscript><a href="{spec_url}">{spec_url}</a></noscript>
<script src="https://cdn.jsdelivr.net/npm/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
<script>
window.ui = SwaggerUIBundle({{ url: "{spec_url}", dom_id: "#swagger-ui" }});
</script>
</body>
</html>
"##
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
