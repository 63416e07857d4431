mod common;

use common::{Proxy, TEST_SERVER, write_config};
use reqwest::StatusCode;
use serde_json::json;

fn config(dir: &std::path::Path) -> anyhow::Result<std::path::PathBuf> {
    let server = serde_json::to_string(TEST_SERVER)?;
    write_config(
        dir,
        &format!(
            r#"{{
  "mcpServers": {{
    "math": {{ "command": {server}, "args": ["--name", "math"] }},
    "files": {{ "type": "stdio", "command": {server}, "args": ["--name", "files"] }},
    "broken": {{ "command": "/nonexistent/mcp-server-binary" }},
    "dup": {{ "command": {server}, "args": ["--duplicate-tools"] }},
    "off": {{ "command": {server}, "disabled": true }}
  }}
}}"#
        ),
    )
}

async fn start(
    dir: &tempfile::TempDir,
    extra: &[&str],
    health_path: &str,
) -> anyhow::Result<Proxy> {
    let path = config(dir.path())?;
    let path = path.to_string_lossy().into_owned();
    let mut args = vec!["--config", path.as_str()];
    args.extend_from_slice(extra);
    Proxy::start(&args, health_path).await
}

#[tokio::test]
async fn healthy_backends_serve_while_failed_ones_are_left_out() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let proxy = start(&dir, &[], "/health").await?;

    let (status, body) = proxy.post("/math/add", json!({ "a": 20, "b": 22 })).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(42));

    let (status, body) = proxy.post("/files/echo", json!({ "value": "hi" })).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("hi"));

    for path in ["/broken/add", "/dup/add", "/off/add", "/math/nope"] {
        let (status, body) = proxy.post(path, json!({ "a": 1, "b": 1 })).await?;
        assert_eq!(status, StatusCode::NOT_FOUND, "{path}");
        assert_eq!(body["error"]["kind"], "not_found");
    }

    let status = proxy.get_json("/status").await?;
    assert_eq!(status["mode"], "multi");
    let backends = status["backends"].as_array().cloned().unwrap_or_default();
    let state_of = |name: &str| {
        backends
            .iter()
            .find(|b| b["name"] == name)
            .map(|b| b["state"].clone())
    };
    assert_eq!(state_of("math"), Some(json!("ready")));
    assert_eq!(state_of("broken"), Some(json!("closed_error")));
    assert_eq!(state_of("dup"), Some(json!("closed_error")));
    assert_eq!(state_of("off"), None);
    Ok(())
}

#[tokio::test]
async fn documents_are_aggregated_and_per_backend() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let proxy = start(
        &dir,
        &["--path-prefix", "/api", "--name", "Toolbox"],
        "/api/health",
    )
    .await?;

    let doc = proxy.get_json("/api/openapi.json").await?;
    assert_eq!(doc["info"]["title"], "Toolbox");
    assert_eq!(doc["servers"], json!([{ "url": "/api" }]));
    assert_eq!(doc["paths"]["/math/add"]["post"]["operationId"], "math__add");
    assert_eq!(doc["paths"]["/files/add"]["post"]["tags"], json!(["files"]));
    assert!(doc["paths"].get("/broken/add").is_none());
    assert!(doc["paths"].get("/dup/add").is_none());
    let tags: Vec<&str> = doc["tags"]
        .as_array()
        .map(|t| t.iter().filter_map(|t| t["name"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(tags, vec!["files", "math"]);

    let math = proxy.get_json("/api/math/openapi.json").await?;
    assert_eq!(math["servers"], json!([{ "url": "/api/math" }]));
    assert_eq!(math["info"]["title"], "math");
    assert!(math["paths"]["/add"]["post"].is_object());
    assert!(math["paths"].get("/math/add").is_none());

    let (status, body) = proxy.post("/api/math/add", json!({ "a": 1, "b": 2 })).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(3));

    let (status, body) = proxy.post("/math/add", json!({ "a": 1, "b": 2 })).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");
    Ok(())
}

#[tokio::test]
async fn crashed_backend_fails_fast_without_affecting_others() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let proxy = start(&dir, &["--tool-timeout", "15"], "/health").await?;

    let (status, body) = proxy.post("/math/crash", json!({})).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let kind = body["error"]["kind"].as_str().unwrap_or_default();
    assert!(
        kind == "connection_lost" || kind == "connection_error",
        "unexpected kind: {kind}"
    );

    let (status, body) = proxy.post("/math/add", json!({ "a": 1, "b": 2 })).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "connection_error");

    let (status, body) = proxy.post("/files/add", json!({ "a": 1, "b": 2 })).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(3));

    let status = proxy.get_json("/status").await?;
    let math = status["backends"]
        .as_array()
        .and_then(|b| b.iter().find(|b| b["name"] == "math").cloned())
        .unwrap_or_default();
    assert_eq!(math["state"], "closed_error");
    Ok(())
}

#[tokio::test]
async fn every_backend_failing_is_fatal() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_config(
        dir.path(),
        r#"{ "mcpServers": { "a": { "command": "/nonexistent/one" }, "b": { "command": "/nonexistent/two" } } }"#,
    )?;
    let port = common::pick_unused_port()?;
    let mut child = common::spawn_proxy(port, &["--config", &path.to_string_lossy()])?;
    let status = common::wait_exit(&mut child, std::time::Duration::from_secs(20)).await?;
    assert!(!status.success());
    Ok(())
}
