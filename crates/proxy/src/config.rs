//! Run configuration and the multi-server config file loader.
//!
//! [`RunConfig`] is the immutable value the core is started with. It is produced either from CLI
//! flags (single backend) or from a `mcpServers` config file (named backends).

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-invocation timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);
/// Default time allowed for spawn + handshake + discovery of one backend.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Fully resolved configuration for one proxy run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    /// Protect the OpenAPI document and docs pages too (not only tool routes).
    pub strict_auth: bool,
    /// Allowed CORS origins; `*` (or an empty list) permits every origin.
    pub cors_allow_origins: Vec<String>,
    pub tls: Option<TlsPaths>,
    /// Normalized prefix (`""` or `"/x"`), see [`normalize_path_prefix`].
    pub path_prefix: String,
    pub tool_timeout: Duration,
    pub startup_timeout: Duration,
    /// Metadata for the aggregated OpenAPI document.
    pub metadata: ServerMetadata,
    pub backends: Backends,
}

impl RunConfig {
    /// A config with default network settings for the given backends.
    #[must_use]
    pub fn new(backends: Backends) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_key: None,
            strict_auth: false,
            cors_allow_origins: vec!["*".to_string()],
            tls: None,
            path_prefix: String::new(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            metadata: ServerMetadata::default(),
            backends,
        }
    }

    /// Whether every origin is allowed.
    #[must_use]
    pub fn cors_allows_any(&self) -> bool {
        self.cors_allow_origins.is_empty() || self.cors_allow_origins.iter().any(|o| o == "*")
    }
}

/// Certificate and private key (PEM) for TLS.
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Optional name/description/version overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Either one unnamed backend or several named ones.
#[derive(Debug, Clone)]
pub enum Backends {
    /// Routes mount directly under the path prefix.
    Single(BackendDescriptor),
    /// Routes mount under `<prefix>/<name>`.
    Named(BTreeMap<String, BackendDescriptor>),
}

/// How to reach one backend tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub transport: TransportConfig,
    pub metadata: ServerMetadata,
}

impl BackendDescriptor {
    #[must_use]
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            transport: TransportConfig::Stdio {
                command: command.into(),
                args,
                env: BTreeMap::new(),
            },
            metadata: ServerMetadata::default(),
        }
    }

    #[must_use]
    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self {
            transport: TransportConfig::StreamableHttp {
                url: url.into(),
                headers: BTreeMap::new(),
            },
            metadata: ServerMetadata::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Spawn a subprocess and speak newline-delimited JSON-RPC over its stdio.
    Stdio {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    /// Connect to an MCP Streamable HTTP endpoint.
    StreamableHttp {
        url: String,
        headers: BTreeMap<String, String>,
    },
}

impl TransportConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::StreamableHttp { .. } => "streamable-http",
        }
    }
}

/// Normalize a user-supplied path prefix: no prefix is `""`, anything else is `/x` without a
/// trailing slash.
#[must_use]
pub fn normalize_path_prefix(raw: Option<&str>) -> String {
    let trimmed = raw.unwrap_or_default().trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Backend names become path segments.
///
/// # Errors
///
/// Returns an error if the name is empty or contains characters outside `[A-Za-z0-9_.-]`.
pub fn validate_backend_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Invalid("backend name must not be empty".into()));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(ConfigError::Invalid(format!(
            "backend name '{name}' contains invalid character '{c}'"
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigDocument {
    #[serde(default)]
    mcp_servers: BTreeMap<String, ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

impl ServerEntry {
    fn into_descriptor(self, name: &str) -> Result<BackendDescriptor, ConfigError> {
        let kind = self.kind.as_deref().unwrap_or("stdio");
        let transport = match kind {
            "stdio" => {
                let command = self
                    .command
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| ConfigError::Invalid("stdio entry requires 'command'".into()))?;
                TransportConfig::Stdio {
                    command,
                    args: self.args,
                    env: expand_values(self.env)?,
                }
            }
            "streamable-http" | "streamable_http" | "streamableHttp" | "http" => {
                let url = self.url.filter(|u| !u.trim().is_empty()).ok_or_else(|| {
                    ConfigError::Invalid(format!("'{kind}' entry requires 'url'"))
                })?;
                TransportConfig::StreamableHttp {
                    url,
                    headers: expand_values(self.headers)?,
                }
            }
            "sse" => {
                return Err(ConfigError::Invalid(
                    "server type 'sse' is not supported; use 'streamable-http'".into(),
                ));
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown server type '{other}'"
                )));
            }
        };
        Ok(BackendDescriptor {
            transport,
            metadata: ServerMetadata {
                name: Some(name.to_string()),
                description: self.description,
                version: self.version,
            },
        })
    }
}

fn expand_values(values: BTreeMap<String, String>) -> Result<BTreeMap<String, String>, ConfigError> {
    values
        .into_iter()
        .map(|(k, v)| {
            let expanded = shellexpand::env(&v)
                .map_err(|e| ConfigError::Invalid(format!("'{k}': {e}")))?
                .into_owned();
            Ok((k, expanded))
        })
        .collect()
}

/// Parse a `mcpServers` document (JSON or YAML).
///
/// Entries that are disabled are dropped. Entries that fail validation are logged and skipped so
/// the remaining backends still start.
///
/// # Errors
///
/// Returns an error if the document does not parse or no usable backend remains.
pub fn parse_backends_document(
    text: &str,
) -> Result<BTreeMap<String, BackendDescriptor>, ConfigError> {
    let doc: ConfigDocument = serde_yaml::from_str(text)?;
    if doc.mcp_servers.is_empty() {
        return Err(ConfigError::Invalid(
            "config file defines no 'mcpServers'".into(),
        ));
    }

    let mut backends = BTreeMap::new();
    for (name, entry) in doc.mcp_servers {
        if entry.disabled {
            tracing::info!(backend = %name, "Skipping disabled backend");
            continue;
        }
        match validate_backend_name(&name).and_then(|()| entry.into_descriptor(&name)) {
            Ok(descriptor) => {
                backends.insert(name, descriptor);
            }
            Err(e) => {
                tracing::error!(backend = %name, error = %e, "Skipping invalid backend entry");
            }
        }
    }

    if backends.is_empty() {
        return Err(ConfigError::Invalid(
            "no usable backends in config file".into(),
        ));
    }
    Ok(backends)
}

/// Read and parse a `mcpServers` config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or [`parse_backends_document`] rejects it.
pub fn load_backends_file(path: &Path) -> Result<BTreeMap<String, BackendDescriptor>, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_backends_document(&text)
}
