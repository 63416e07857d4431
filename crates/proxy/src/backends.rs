//! Backend lifecycle and the served route table.
//!
//! One [`BackendMount`] per configured backend, each owning one session and its binding table.
//! Backends start independently; a backend that fails to start is kept as an error mount (visible in
//! `/status`, absent from the documents) and the others keep serving.

use crate::catalog::{self, ToolCatalog};
use crate::config::{Backends, BackendDescriptor, RunConfig, ServerMetadata};
use crate::error::{ProxyError, Result};
use crate::openapi::{self, DocumentInfo};
use crate::routes::{self, Mount, RouteBinding};
use crate::session::{SessionState, ToolSession, TransportSession};
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Name used for the backend of a single-backend run.
pub const SINGLE_BACKEND: &str = "default";

type BindingTable = Arc<BTreeMap<String, Arc<RouteBinding>>>;

/// One backend: its session and current bindings.
pub struct BackendMount {
    mount: Mount,
    transport: &'static str,
    metadata: ServerMetadata,
    session: Option<Arc<dyn ToolSession>>,
    bindings: RwLock<BindingTable>,
    fingerprint: RwLock<Option<String>>,
    error: Option<String>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for BackendMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendMount")
            .field("name", &self.mount.backend)
            .field("path", &self.mount.path)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl BackendMount {
    fn ready(
        mount: Mount,
        transport: &'static str,
        metadata: ServerMetadata,
        session: Arc<dyn ToolSession>,
        catalog: &ToolCatalog,
    ) -> Self {
        let bindings = routes::synthesize(&mount, catalog, &session);
        Self {
            mount,
            transport,
            metadata,
            session: Some(session),
            bindings: RwLock::new(Arc::new(bindings)),
            fingerprint: RwLock::new(Some(catalog.fingerprint().to_string())),
            error: None,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn failed(mount: Mount, transport: &'static str, metadata: ServerMetadata, error: String) -> Self {
        Self {
            mount,
            transport,
            metadata,
            session: None,
            bindings: RwLock::new(Arc::new(BTreeMap::new())),
            fingerprint: RwLock::new(None),
            error: Some(error),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.mount.backend
    }

    /// Served path of this backend's mount (`""` for an unprefixed single backend).
    #[must_use]
    pub fn path(&self) -> &str {
        &self.mount.path
    }

    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.session.is_some()
    }

    /// Snapshot of the current binding table.
    #[must_use]
    pub fn bindings(&self) -> BindingTable {
        self.bindings.read().clone()
    }

    /// Re-list tools if the backend signalled a change, then swap in the new bindings.
    ///
    /// A refresh that fails (including duplicate tool names) keeps the previous bindings.
    pub async fn refresh_if_dirty(&self) {
        let Some(session) = &self.session else {
            return;
        };
        if !session.catalog_dirty() || session.state() != SessionState::Ready {
            return;
        }
        let _guard = self.refresh_lock.lock().await;
        if !session.catalog_dirty() {
            return;
        }

        match catalog::discover(session.as_ref()).await {
            Ok(catalog) => {
                if self.fingerprint.read().as_deref() == Some(catalog.fingerprint()) {
                    tracing::debug!(backend = %self.name(), "Tool list unchanged after refresh");
                    return;
                }
                let bindings = routes::synthesize(&self.mount, &catalog, session);
                tracing::info!(backend = %self.name(), tools = bindings.len(), "Rebuilt routes after tool list change");
                *self.bindings.write() = Arc::new(bindings);
                *self.fingerprint.write() = Some(catalog.fingerprint().to_string());
            }
            Err(e) => {
                tracing::warn!(backend = %self.name(), error = %e, "Tool list refresh failed; keeping previous routes");
            }
        }
    }

    /// Find the binding for `tool`, refreshing first if the catalog is dirty.
    pub async fn lookup(&self, tool: &str) -> Option<Arc<RouteBinding>> {
        self.refresh_if_dirty().await;
        self.bindings.read().get(tool).cloned()
    }

    fn document_info(&self) -> DocumentInfo {
        let reported = self.session.as_ref().and_then(|s| s.server_info());
        DocumentInfo::resolve(
            &self.metadata,
            reported.as_ref(),
            self.name(),
            &format!("{} MCP Server", self.name()),
        )
    }

    /// Backend-local OpenAPI document (paths relative to the mount).
    pub async fn openapi(&self) -> Value {
        self.refresh_if_dirty().await;
        let bindings = self.bindings();
        openapi::build_document(
            &self.document_info(),
            Some(self.mount.path.as_str()),
            &[],
            bindings.values().map(|b| (b.tool_path.as_str(), &b.operation)),
            self.mount.secured,
        )
    }

    fn status(&self) -> Value {
        let state = self
            .session
            .as_ref()
            .map_or(SessionState::ClosedError, |s| s.state());
        let path = if self.mount.path.is_empty() {
            "/"
        } else {
            self.mount.path.as_str()
        };
        let mut status = json!({
            "name": self.name(),
            "path": path,
            "transport": self.transport,
            "state": state,
            "tools": self.bindings.read().len(),
        });
        if let (Some(error), Some(obj)) = (&self.error, status.as_object_mut()) {
            obj.insert("error".into(), json!(error));
        }
        if let (Some(fp), Some(obj)) = (self.fingerprint.read().as_ref(), status.as_object_mut()) {
            obj.insert("catalogHash".into(), json!(fp));
        }
        status
    }
}

/// Every backend of this run.
#[derive(Debug)]
pub struct BackendRouter {
    multi: bool,
    prefix: String,
    metadata: ServerMetadata,
    secured: bool,
    mounts: BTreeMap<String, Arc<BackendMount>>,
}

struct Started {
    name: String,
    transport: &'static str,
    metadata: ServerMetadata,
    outcome: Result<(Arc<dyn ToolSession>, ToolCatalog)>,
}

async fn start_backend(
    name: String,
    descriptor: BackendDescriptor,
    startup_timeout: Duration,
) -> Started {
    let transport = descriptor.transport.kind();
    let metadata = descriptor.metadata.clone();
    tracing::info!(backend = %name, transport, "Starting MCP backend");

    let outcome = match timeout(startup_timeout, open_and_discover(&name, descriptor)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ProxyError::Connection(format!(
            "Startup timeout after {}s for '{name}'",
            startup_timeout.as_secs()
        ))),
    };
    Started {
        name,
        transport,
        metadata,
        outcome,
    }
}

async fn open_and_discover(
    name: &str,
    descriptor: BackendDescriptor,
) -> Result<(Arc<dyn ToolSession>, ToolCatalog)> {
    let session: Arc<dyn ToolSession> = Arc::new(TransportSession::open(name, descriptor).await?);
    match catalog::discover(session.as_ref()).await {
        Ok(catalog) => Ok((session, catalog)),
        Err(e) => {
            session.close().await;
            Err(e)
        }
    }
}

impl BackendRouter {
    /// Open every configured backend concurrently and build the route table.
    ///
    /// # Errors
    ///
    /// Fails only if no backend could be started at all.
    pub async fn start(config: &RunConfig) -> Result<Self> {
        let entries: Vec<(String, BackendDescriptor)> = match &config.backends {
            Backends::Single(d) => vec![(SINGLE_BACKEND.to_string(), d.clone())],
            Backends::Named(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        let started = futures::future::join_all(
            entries
                .into_iter()
                .map(|(name, d)| start_backend(name, d, config.startup_timeout)),
        )
        .await;
        Self::assemble(config, started)
    }

    /// Build a router over already-open sessions (embedding and tests).
    ///
    /// # Errors
    ///
    /// Fails only if no session yields a usable catalog.
    pub async fn with_sessions(
        config: &RunConfig,
        sessions: Vec<Arc<dyn ToolSession>>,
    ) -> Result<Self> {
        let mut started = Vec::with_capacity(sessions.len());
        for session in sessions {
            let name = session.backend().to_string();
            let outcome = match catalog::discover(session.as_ref()).await {
                Ok(catalog) => Ok((session, catalog)),
                Err(e) => {
                    session.close().await;
                    Err(e)
                }
            };
            started.push(Started {
                name,
                transport: "custom",
                metadata: ServerMetadata::default(),
                outcome,
            });
        }
        Self::assemble(config, started)
    }

    fn assemble(config: &RunConfig, started: Vec<Started>) -> Result<Self> {
        let multi = matches!(config.backends, Backends::Named(_));
        let secured = config.api_key.is_some();
        let mut mounts = BTreeMap::new();
        let mut failures = Vec::new();

        for s in started {
            let mount = Mount {
                backend: s.name.clone(),
                path: if multi {
                    format!("{}/{}", config.path_prefix, s.name)
                } else {
                    config.path_prefix.clone()
                },
                tagged: multi,
                secured,
            };
            let backend_mount = match s.outcome {
                Ok((session, catalog)) => {
                    tracing::info!(backend = %s.name, tools = catalog.len(), path = %mount.path, "Backend ready");
                    BackendMount::ready(mount, s.transport, s.metadata, session, &catalog)
                }
                Err(e) => {
                    tracing::error!(backend = %s.name, error = %e, "Backend failed to start; its routes are not registered");
                    failures.push(format!("{}: {e}", s.name));
                    BackendMount::failed(mount, s.transport, s.metadata, e.to_string())
                }
            };
            mounts.insert(s.name, Arc::new(backend_mount));
        }

        if mounts.values().all(|m| !m.is_serving()) {
            return Err(ProxyError::Connection(format!(
                "no backend could be started ({})",
                failures.join("; ")
            )));
        }

        Ok(Self {
            multi,
            prefix: config.path_prefix.clone(),
            metadata: config.metadata.clone(),
            secured,
            mounts,
        })
    }

    #[must_use]
    pub fn is_multi(&self) -> bool {
        self.multi
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Mount by backend name.
    #[must_use]
    pub fn mount(&self, name: &str) -> Option<&Arc<BackendMount>> {
        self.mounts.get(name)
    }

    /// The only mount of a single-backend run.
    #[must_use]
    pub fn single(&self) -> Option<&Arc<BackendMount>> {
        if self.multi {
            None
        } else {
            self.mounts.values().next()
        }
    }

    /// Aggregated OpenAPI document over every serving backend.
    pub async fn openapi(&self) -> Value {
        futures::future::join_all(self.mounts.values().map(|m| m.refresh_if_dirty())).await;

        let reported = self
            .single()
            .and_then(|m| m.session.as_ref())
            .and_then(|s| s.server_info());
        let info = DocumentInfo::resolve(
            &self.metadata,
            reported.as_ref(),
            openapi::DEFAULT_TITLE,
            openapi::DEFAULT_DESCRIPTION,
        );

        let tables: Vec<BindingTable> = self.mounts.values().map(|m| m.bindings()).collect();
        let tags: Vec<(String, String)> = if self.multi {
            self.mounts
                .values()
                .filter(|m| m.is_serving())
                .map(|m| (m.name().to_string(), m.document_info().description))
                .collect()
        } else {
            Vec::new()
        };
        openapi::build_document(
            &info,
            Some(self.prefix.as_str()),
            &tags,
            tables.iter().flat_map(|t| {
                t.values().map(|b| {
                    let relative = b.path.strip_prefix(&self.prefix).unwrap_or(&b.path);
                    (relative, &b.operation)
                })
            }),
            self.secured,
        )
    }

    /// Per-backend state for the status endpoint.
    #[must_use]
    pub fn status(&self) -> Value {
        let mode = if self.multi { "multi" } else { "single" };
        json!({
            "mode": mode,
            "backends": self.mounts.values().map(|m| m.status()).collect::<Vec<_>>(),
        })
    }

    /// Close every session. Idempotent.
    pub async fn close_all(&self) {
        futures::future::join_all(
            self.mounts
                .values()
                .filter_map(|m| m.session.clone())
                .map(|s| async move { s.close().await }),
        )
        .await;
    }
}
