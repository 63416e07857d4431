//! Expose MCP tool servers as a plain HTTP + OpenAPI surface.
//!
//! Each configured backend (a stdio child process or a streamable HTTP endpoint) is opened
//! as an MCP client session. Its tools are listed and every tool becomes a `POST` route whose
//! JSON body is validated against the tool's input schema and forwarded as a tool call.
//!
//! Layout:
//! - [`config`] / [`cli`]: run configuration and the `mcpServers` config file
//! - [`session`] / [`catalog`]: MCP client sessions and their tool catalogs
//! - [`schema`] / [`routes`]: JSON Schema translation, validation and route bindings
//! - [`backends`] / [`openapi`] / [`server`]: backend mounts, documents and the HTTP server

pub mod backends;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod schema;
pub mod server;
pub mod session;
