//! Command-line interface.
//!
//! Flags resolve into a [`RunConfig`]; the core never sees raw arguments.

use crate::config::{
    BackendDescriptor, Backends, RunConfig, ServerMetadata, TlsPaths, TransportConfig,
    load_backends_file, normalize_path_prefix,
};
use crate::error::ConfigError;
use clap::{Parser, ValueEnum};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Expose MCP tool servers as an OpenAPI HTTP server.
#[derive(Parser, Debug, Clone)]
#[command(name = "unrelated-openapi-proxy", version, about, long_about = None)]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "UNRELATED_PROXY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "UNRELATED_PROXY_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Bearer API key required on tool routes
    #[arg(short = 'k', long, env = "UNRELATED_PROXY_API_KEY")]
    pub api_key: Option<String>,

    /// Also require the API key for the OpenAPI document, docs and status
    #[arg(long, env = "UNRELATED_PROXY_STRICT_AUTH")]
    pub strict_auth: bool,

    /// Allowed CORS origins (repeatable or comma separated; `*` allows all)
    #[arg(long, value_delimiter = ',', default_value = "*")]
    pub cors_allow_origins: Vec<String>,

    /// Environment variable passed to the stdio backend (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Dotenv file whose variables are passed to the stdio backend
    #[arg(long, value_name = "PATH")]
    pub env_path: Option<PathBuf>,

    /// Transport of the single backend given after `--`
    #[arg(long, value_enum, default_value_t = ServerType::Stdio)]
    pub server_type: ServerType,

    /// `mcpServers` config file (JSON or YAML) with several named backends
    #[arg(short, long, env = "UNRELATED_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Title of the OpenAPI document
    #[arg(long)]
    pub name: Option<String>,

    /// Description of the OpenAPI document
    #[arg(long)]
    pub description: Option<String>,

    /// Version of the OpenAPI document
    #[arg(long)]
    pub server_version: Option<String>,

    /// TLS certificate (PEM)
    #[arg(long, requires = "ssl_keyfile")]
    pub ssl_certfile: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, requires = "ssl_certfile")]
    pub ssl_keyfile: Option<PathBuf>,

    /// URL path prefix for every route (e.g. `/api`)
    #[arg(long, env = "UNRELATED_PROXY_PATH_PREFIX")]
    pub path_prefix: Option<String>,

    /// Per-invocation timeout in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 60)]
    pub tool_timeout: u64,

    /// Time allowed for each backend to start and list its tools, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    pub startup_timeout: u64,

    /// Default log filter (`RUST_LOG` takes precedence)
    #[arg(long, env = "UNRELATED_PROXY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Backend command and arguments (stdio), or the backend URL (streamable-http)
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServerType {
    Stdio,
    #[value(alias = "streamable_http", alias = "http")]
    StreamableHttp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if k.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((k.to_string(), v.to_string()))
}

fn seconds(flag: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Invalid(format!("--{flag} must be greater than 0")));
    }
    Ok(Duration::from_secs(secs))
}

impl Args {
    /// Variables for stdio backends: the dotenv file first, then `--env` (which wins).
    fn backend_env(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        let mut env = BTreeMap::new();
        if let Some(path) = &self.env_path {
            let iter = dotenvy::from_path_iter(path).map_err(|e| {
                ConfigError::Invalid(format!("cannot read env file {}: {e}", path.display()))
            })?;
            for item in iter {
                let (k, v) = item.map_err(|e| {
                    ConfigError::Invalid(format!("invalid env file {}: {e}", path.display()))
                })?;
                env.insert(k, v);
            }
        }
        env.extend(self.env.iter().cloned());
        Ok(env)
    }

    fn backends(&self) -> Result<Backends, ConfigError> {
        let env = self.backend_env()?;

        if let Some(path) = &self.config {
            if !self.command.is_empty() {
                return Err(ConfigError::Invalid(
                    "use either --config or a backend command after `--`, not both".into(),
                ));
            }
            let mut backends = load_backends_file(path)?;
            for descriptor in backends.values_mut() {
                if let TransportConfig::Stdio { env: backend_env, .. } = &mut descriptor.transport {
                    for (k, v) in &env {
                        backend_env.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
            }
            return Ok(Backends::Named(backends));
        }

        let Some((first, rest)) = self.command.split_first() else {
            return Err(ConfigError::Invalid(
                "either --config or a backend command after `--` is required".into(),
            ));
        };
        let descriptor = match self.server_type {
            ServerType::Stdio => BackendDescriptor {
                transport: TransportConfig::Stdio {
                    command: first.clone(),
                    args: rest.to_vec(),
                    env,
                },
                metadata: ServerMetadata::default(),
            },
            ServerType::StreamableHttp => {
                if !rest.is_empty() {
                    return Err(ConfigError::Invalid(
                        "streamable-http takes exactly one URL after `--`".into(),
                    ));
                }
                BackendDescriptor::streamable_http(first.clone())
            }
        };
        Ok(Backends::Single(descriptor))
    }

    /// Resolve flags, env file and config file into a [`RunConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error for missing/conflicting backend sources, unreadable files, or zero
    /// timeouts.
    pub fn into_run_config(self) -> Result<RunConfig, ConfigError> {
        let backends = self.backends()?;
        let tls = match (self.ssl_certfile, self.ssl_keyfile) {
            (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(
                    "--ssl-certfile and --ssl-keyfile must be given together".into(),
                ));
            }
        };

        Ok(RunConfig {
            host: self.host,
            port: self.port,
            api_key: self.api_key.filter(|k| !k.is_empty()),
            strict_auth: self.strict_auth,
            cors_allow_origins: self.cors_allow_origins,
            tls,
            path_prefix: normalize_path_prefix(self.path_prefix.as_deref()),
            tool_timeout: seconds("tool-timeout", self.tool_timeout)?,
            startup_timeout: seconds("startup-timeout", self.startup_timeout)?,
            metadata: ServerMetadata {
                name: self.name,
                description: self.description,
                version: self.server_version,
            },
            backends,
        })
    }
}
