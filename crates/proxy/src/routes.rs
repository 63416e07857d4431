//! Route synthesis: one POST binding per (backend, tool).

use crate::catalog::{ToolCatalog, ToolDescriptor};
use crate::error::Result;
use crate::schema::{self, compile_validator};
use crate::session::ToolSession;
use rmcp::model::CallToolResult;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A synthesized HTTP endpoint bound to one tool on one backend. Read-only once built.
pub struct RouteBinding {
    /// Full served path, including prefix and backend mount.
    pub path: String,
    /// Path relative to the backend mount (`/<tool>`).
    pub tool_path: String,
    pub backend: String,
    pub tool: Arc<ToolDescriptor>,
    pub operation: Value,
    pub session: Arc<dyn ToolSession>,
    validator: Option<Arc<jsonschema::Validator>>,
}

impl std::fmt::Debug for RouteBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteBinding")
            .field("path", &self.path)
            .field("backend", &self.backend)
            .field("tool", &self.tool.name)
            .finish_non_exhaustive()
    }
}

/// Where a backend's routes hang off the served surface.
#[derive(Debug, Clone)]
pub struct Mount {
    pub backend: String,
    /// `<prefix>` for a single backend, `<prefix>/<backend>` otherwise.
    pub path: String,
    /// Tag operations with the backend name (multi-backend runs).
    pub tagged: bool,
    /// Operations advertise the bearer security requirement.
    pub secured: bool,
}

/// `/<tool>`.
#[must_use]
pub fn tool_path(tool: &str) -> String {
    format!("/{tool}")
}

/// Build the binding table for one catalog, keyed by tool name.
#[must_use]
pub fn synthesize(
    mount: &Mount,
    catalog: &ToolCatalog,
    session: &Arc<dyn ToolSession>,
) -> BTreeMap<String, Arc<RouteBinding>> {
    catalog
        .tools()
        .iter()
        .map(|tool| {
            let operation_id = if mount.tagged {
                format!("{}__{}", mount.backend, tool.name)
            } else {
                tool.name.clone()
            };
            let tag = mount.tagged.then_some(mount.backend.as_str());
            let operation =
                schema::to_openapi_operation(tool, tag, &operation_id, mount.secured);
            let tool_path = tool_path(&tool.name);
            let binding = RouteBinding {
                path: format!("{}{tool_path}", mount.path),
                tool_path,
                backend: mount.backend.clone(),
                tool: Arc::new(tool.clone()),
                operation,
                session: session.clone(),
                validator: compile_validator(tool).map(Arc::new),
            };
            (tool.name.clone(), Arc::new(binding))
        })
        .collect()
}

impl RouteBinding {
    /// Validate the body and invoke the tool.
    ///
    /// # Errors
    ///
    /// Validation failures never reach the session.
    pub async fn call(&self, body: Value, timeout: Duration) -> Result<CallToolResult> {
        let args =
            schema::request_to_args(body, &self.tool.input_schema, self.validator.as_deref())?;
        tracing::debug!(backend = %self.backend, tool = %self.tool.name, "Invoking tool");
        self.session.invoke(&self.tool.name, args, timeout).await
    }
}
