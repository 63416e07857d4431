//! Error types for the OpenAPI proxy.
//!
//! [`ProxyError`] is the invocation-path taxonomy: every variant has a stable `kind` string and an
//! HTTP status, and renders as the JSON error envelope returned to HTTP callers.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while opening sessions, discovering tools, or serving a tool call.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Backend unreachable, failed to spawn, or its session is already closed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The transport dropped while a request was in flight.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Malformed or unexpected protocol message (including calls before the handshake).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The invocation exceeded its time budget.
    #[error("Tool call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The request body does not satisfy the tool's input schema.
    #[error("{message}")]
    Validation { message: String, details: Value },

    /// The backend reported a tool-level failure.
    #[error("{message}")]
    RemoteTool {
        status: StatusCode,
        message: String,
        data: Option<Value>,
    },

    /// Missing or mismatched bearer credential.
    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    /// No route binding for the requested backend/tool.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The path exists but not for this HTTP method.
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// CORS preflight from an origin outside the allow-list.
    #[error("Origin not allowed: {0}")]
    OriginRejected(String),
}

impl ProxyError {
    /// Stable machine-readable error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::ConnectionLost(_) => "connection_lost",
            Self::Protocol(_) => "protocol_error",
            Self::Timeout(_) => "timeout",
            Self::Validation { .. } => "validation_error",
            Self::RemoteTool { .. } => "remote_tool_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::OriginRejected(_) => "origin_not_allowed",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Connection(_) | Self::ConnectionLost(_) | Self::Protocol(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RemoteTool { status, .. } => *status,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::OriginRejected(_) => StatusCode::FORBIDDEN,
        }
    }

    /// JSON error envelope: `{"error": {"kind", "message", "details"?}}`.
    #[must_use]
    pub fn to_body(&self) -> Value {
        let mut error = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        let details = match self {
            Self::Validation { details, .. } => Some(details.clone()),
            Self::RemoteTool { data, .. } => data.clone(),
            _ => None,
        };
        if let (Some(details), Some(obj)) = (details, error.as_object_mut()) {
            obj.insert("details".to_string(), details);
        }
        json!({ "error": error })
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body())).into_response()
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid values, missing fields, conflicts.
    #[error("Configuration error: {0}")]
    Invalid(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON/YAML parsing errors
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}
