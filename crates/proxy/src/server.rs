//! HTTP surface: axum router, auth/CORS policy, TLS and graceful shutdown.

use crate::backends::{BackendMount, BackendRouter};
use crate::config::RunConfig;
use crate::error::ProxyError;
use crate::openapi;
use crate::schema;
use anyhow::Context as _;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{OriginalUri, Path, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use sha2::Digest as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared bearer secret, kept as a SHA-256 digest.
#[derive(Clone)]
pub struct ApiKey {
    digest: [u8; 32],
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(..)")
    }
}

impl ApiKey {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            digest: sha2::Sha256::digest(secret.as_bytes()).into(),
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        let digest: [u8; 32] = sha2::Sha256::digest(candidate.as_bytes()).into();
        digest == self.digest
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    let (scheme, token) = authz.trim_start().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

async fn require_api_key(State(key): State<Arc<ApiKey>>, req: Request, next: Next) -> Response {
    match extract_bearer(req.headers()) {
        Some(token) if key.matches(token) => next.run(req).await,
        Some(_) => ProxyError::Unauthorized("invalid bearer token").into_response(),
        None => ProxyError::Unauthorized("bearer token is required").into_response(),
    }
}

/// Fixed GET paths that a tool of the same name must still be reachable on via POST.
const SINGLE_FIXED_PATHS: [&str; 4] = ["health", "status", "docs", "openapi.json"];
const BACKEND_FIXED_PATHS: [&str; 2] = ["docs", "openapi.json"];

#[derive(Clone)]
struct AppState {
    router: Arc<BackendRouter>,
    tool_timeout: Duration,
    docs_title: String,
}

/// Build the complete axum application for `config` over a started router.
pub fn build_app(router: Arc<BackendRouter>, config: &RunConfig) -> Router {
    let state = AppState {
        router: router.clone(),
        tool_timeout: config.tool_timeout,
        docs_title: config
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| openapi::DEFAULT_TITLE.to_string()),
    };
    let api_key = config.api_key.as_deref().map(|k| Arc::new(ApiKey::new(k)));

    let mut tools = Router::new();
    let mut docs = Router::new()
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(docs_page))
        .route("/status", get(status));
    if router.is_multi() {
        tools = tools.route("/{backend}/{tool}", post(invoke_multi));
        for name in BACKEND_FIXED_PATHS {
            tools = tools.route(
                &format!("/{{backend}}/{name}"),
                post(
                    move |State(state): State<AppState>,
                          Path(backend): Path<String>,
                          body: Bytes| async move {
                        dispatch_multi(&state, &backend, name, &body).await
                    },
                ),
            );
        }
        docs = docs
            .route("/{backend}/openapi.json", get(backend_openapi_json))
            .route("/{backend}/docs", get(backend_docs_page));
    } else {
        tools = tools.route("/{tool}", post(invoke_single));
        for name in SINGLE_FIXED_PATHS {
            tools = tools.route(
                &format!("/{name}"),
                post(move |State(state): State<AppState>, body: Bytes| async move {
                    dispatch_single(&state, name, &body).await
                }),
            );
        }
    }

    if let Some(key) = api_key {
        tools = tools.route_layer(middleware::from_fn_with_state(key.clone(), require_api_key));
        if config.strict_auth {
            docs = docs.route_layer(middleware::from_fn_with_state(key, require_api_key));
        }
    }

    let inner = Router::new()
        .route("/health", get(health))
        .merge(docs)
        .merge(tools)
        .fallback(route_not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state);

    let app = if config.path_prefix.is_empty() {
        inner
    } else {
        Router::new()
            .nest(&config.path_prefix, inner)
            .fallback(route_not_found)
    };

    let origins = OriginPolicy::new(config);
    app.layer(TraceLayer::new_for_http())
        .layer(origins.cors_layer())
        .layer(middleware::from_fn_with_state(
            Arc::new(origins),
            reject_disallowed_preflight,
        ))
}

/// Configured CORS allow-list.
#[derive(Debug, Clone)]
struct OriginPolicy {
    any: bool,
    origins: Vec<HeaderValue>,
}

impl OriginPolicy {
    fn new(config: &RunConfig) -> Self {
        let origins = config
            .cors_allow_origins
            .iter()
            .filter(|o| o.as_str() != "*")
            .filter_map(|o| match HeaderValue::from_str(o.trim_end_matches('/')) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        Self {
            any: config.cors_allows_any(),
            origins,
        }
    }

    fn allows(&self, origin: &HeaderValue) -> bool {
        self.any || self.origins.contains(origin)
    }

    fn cors_layer(&self) -> CorsLayer {
        let allow_origin = if self.any {
            AllowOrigin::from(Any)
        } else {
            AllowOrigin::list(self.origins.clone())
        };
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn reject_disallowed_preflight(
    State(policy): State<Arc<OriginPolicy>>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() == Method::OPTIONS
        && let Some(origin) = req.headers().get(header::ORIGIN)
        && !policy.allows(origin)
    {
        let origin = origin.to_str().unwrap_or("<non-ascii>").to_string();
        tracing::debug!(%origin, "Rejecting CORS preflight");
        return ProxyError::OriginRejected(origin).into_response();
    }
    next.run(req).await
}

async fn route_not_found(OriginalUri(uri): OriginalUri) -> ProxyError {
    ProxyError::NotFound(format!("no route for {}", uri.path()))
}

async fn method_not_allowed(method: Method, OriginalUri(uri): OriginalUri) -> ProxyError {
    ProxyError::MethodNotAllowed(format!("{method} {}", uri.path()))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.router.openapi().await)
}

async fn docs_page(State(state): State<AppState>) -> Html<String> {
    let spec_url = format!("{}/openapi.json", state.router.prefix());
    Html(openapi::docs_page(&state.docs_title, &spec_url))
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.router.status())
}

fn serving_mount<'a>(state: &'a AppState, backend: &str) -> Result<&'a Arc<BackendMount>, ProxyError> {
    state
        .router
        .mount(backend)
        .filter(|m| m.is_serving())
        .ok_or_else(|| ProxyError::NotFound(format!("no backend named '{backend}'")))
}

async fn backend_openapi_json(
    State(state): State<AppState>,
    Path(backend): Path<String>,
) -> Result<Json<serde_json::Value>, ProxyError> {
    let mount = serving_mount(&state, &backend)?;
    Ok(Json(mount.openapi().await))
}

async fn backend_docs_page(
    State(state): State<AppState>,
    Path(backend): Path<String>,
) -> Result<Html<String>, ProxyError> {
    let mount = serving_mount(&state, &backend)?;
    let spec_url = format!("{}/openapi.json", mount.path());
    Ok(Html(openapi::docs_page(mount.name(), &spec_url)))
}

async fn invoke_single(
    State(state): State<AppState>,
    Path(tool): Path<String>,
    body: Bytes,
) -> Response {
    dispatch_single(&state, &tool, &body).await
}

async fn invoke_multi(
    State(state): State<AppState>,
    Path((backend, tool)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    dispatch_multi(&state, &backend, &tool, &body).await
}

async fn dispatch_single(state: &AppState, tool: &str, body: &[u8]) -> Response {
    match state.router.single() {
        Some(mount) => invoke_tool(state, mount, tool, body).await,
        None => ProxyError::NotFound(format!("no tool named '{tool}'")).into_response(),
    }
}

async fn dispatch_multi(state: &AppState, backend: &str, tool: &str, body: &[u8]) -> Response {
    match serving_mount(state, backend) {
        Ok(mount) => invoke_tool(state, mount, tool, body).await,
        Err(e) => e.into_response(),
    }
}

async fn invoke_tool(state: &AppState, mount: &BackendMount, tool: &str, body: &[u8]) -> Response {
    let Some(binding) = mount.lookup(tool).await else {
        return ProxyError::NotFound(format!(
            "no tool named '{tool}' on backend '{}'",
            mount.name()
        ))
        .into_response();
    };

    let outcome = match schema::parse_body(body) {
        Ok(body) => binding.call(body, state.tool_timeout).await,
        Err(e) => Err(e),
    };
    if let Err(e) = &outcome {
        if e.status().is_server_error() {
            tracing::warn!(backend = %binding.backend, tool = %tool, kind = e.kind(), error = %e, "Tool call failed");
        } else {
            tracing::debug!(backend = %binding.backend, tool = %tool, kind = e.kind(), error = %e, "Tool call rejected");
        }
    }

    let (status, body) = schema::result_to_response(outcome);
    if status == StatusCode::OK {
        Json(body).into_response()
    } else {
        (status, Json(body)).into_response()
    }
}

async fn resolve_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("resolve {host}:{port}"))?
        .next()
        .with_context(|| format!("no address for {host}:{port}"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Start every backend, serve until a shutdown signal, then close all sessions.
///
/// # Errors
///
/// Returns an error if no backend starts, the address cannot be bound, or TLS material cannot be
/// loaded.
pub async fn run(config: RunConfig) -> anyhow::Result<()> {
    let router = Arc::new(
        BackendRouter::start(&config)
            .await
            .context("start MCP backends")?,
    );
    let app = build_app(router.clone(), &config);
    let addr = resolve_addr(&config.host, config.port).await?;

    let served = match &config.tls {
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("bind {addr}"))?;
            tracing::info!(%addr, prefix = %config.path_prefix, "Serving OpenAPI proxy over HTTP");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("HTTP server failed")
        }
        Some(tls) => {
            let _ = rustls::crypto::ring::default_provider().install_default();
            let rustls_config =
                axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                    .await
                    .with_context(|| {
                        format!(
                            "load TLS cert {} / key {}",
                            tls.cert.display(),
                            tls.key.display()
                        )
                    })?;
            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
            });
            tracing::info!(%addr, prefix = %config.path_prefix, "Serving OpenAPI proxy over HTTPS");
            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server failed")
        }
    };

    router.close_all().await;
    tracing::info!("OpenAPI proxy stopped");
    served
}
