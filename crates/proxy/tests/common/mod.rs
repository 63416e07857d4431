#![allow(dead_code)]

use anyhow::Context as _;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

pub use unrelated_test_support::{KillOnDrop, pick_unused_port, post_json, wait_exit, wait_http_ok};

pub const TEST_SERVER: &str = env!("CARGO_BIN_EXE_unrelated-openapi-proxy-test-server");

pub fn spawn_proxy(port: u16, args: &[&str]) -> anyhow::Result<Child> {
    let bin = env!("CARGO_BIN_EXE_unrelated-openapi-proxy");
    Command::new(bin)
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg(port.to_string())
        .arg("--startup-timeout")
        .arg("10")
        .arg("--log-level")
        .arg("info")
        .args(args)
        .stdin(Stdio::null())
        .spawn()
        .context("spawn proxy")
}

/// A running proxy process; killed on drop.
pub struct Proxy {
    pub base_url: String,
    pub client: reqwest::Client,
    _child: KillOnDrop,
}

impl Proxy {
    /// Spawn the proxy and wait until `<health_path>` answers.
    pub async fn start(args: &[&str], health_path: &str) -> anyhow::Result<Self> {
        let port = pick_unused_port()?;
        let child = KillOnDrop(spawn_proxy(port, args)?);
        let base_url = format!("http://127.0.0.1:{port}");
        wait_http_ok(&format!("{base_url}{health_path}"), Duration::from_secs(20)).await?;
        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
            _child: child,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> anyhow::Result<(reqwest::StatusCode, serde_json::Value)> {
        post_json(&self.client, &self.url(path), &body, None).await
    }

    pub async fn get_json(&self, path: &str) -> anyhow::Result<serde_json::Value> {
        let resp = self.client.get(self.url(path)).send().await?;
        anyhow::ensure!(resp.status().is_success(), "GET {path} returned {}", resp.status());
        Ok(resp.json().await?)
    }
}

/// Write an `mcpServers` config file into `dir`.
pub fn write_config(dir: &Path, contents: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join("mcp.json");
    std::fs::write(&path, contents).context("write config")?;
    Ok(path)
}
