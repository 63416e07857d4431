mod common;

use common::{Proxy, TEST_SERVER};
use reqwest::StatusCode;
use serde_json::json;

async fn start() -> anyhow::Result<Proxy> {
    Proxy::start(&["--", TEST_SERVER, "--name", "calc"], "/health").await
}

#[tokio::test]
async fn tool_call_returns_decoded_result() -> anyhow::Result<()> {
    let proxy = start().await?;

    let (status, body) = proxy.post("/add", json!({ "a": 2, "b": 3 })).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(5));

    let (status, body) = proxy
        .post("/echo", json!({ "value": { "nested": [1, "two"] } }))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "nested": [1, "two"] }));
    Ok(())
}

#[tokio::test]
async fn invalid_body_is_rejected_before_the_backend() -> anyhow::Result<()> {
    let proxy = start().await?;

    let (status, body) = proxy.post("/add", json!({ "a": 2 })).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "validation_error");
    let message = body["error"]["message"].as_str().unwrap_or_default();
    assert!(message.contains("'b'"), "unexpected message: {message}");

    let (status, body) = proxy.post("/add", json!({ "a": "two", "b": 3 })).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["details"]["type"], "validation-errors");

    let resp = proxy
        .client
        .post(proxy.url("/add"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn backend_errors_map_to_status_codes() -> anyhow::Result<()> {
    let proxy = start().await?;

    let (status, body) = proxy.post("/fail", json!({})).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["kind"], "remote_tool_error");
    assert_eq!(body["error"]["message"], "boom");

    let (status, body) = proxy.post("/reject", json!({})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "remote_tool_error");
    assert_eq!(body["error"]["details"]["code"], -32602);

    let (status, body) = proxy.post("/nope", json!({})).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");
    Ok(())
}

#[tokio::test]
async fn unanswered_call_times_out_and_session_survives() -> anyhow::Result<()> {
    let proxy = Proxy::start(
        &["--tool-timeout", "1", "--", TEST_SERVER, "--name", "calc"],
        "/health",
    )
    .await?;

    let started = std::time::Instant::now();
    let (status, body) = proxy.post("/hang", json!({})).await?;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["kind"], "timeout");
    assert_eq!(body["error"]["message"], "Tool call timed out after 1000ms");
    assert!(started.elapsed() < std::time::Duration::from_secs(10));

    let (status, body) = proxy.post("/add", json!({ "a": 4, "b": 5 })).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(9));

    let status = proxy.get_json("/status").await?;
    assert_eq!(status["backends"][0]["state"], "ready");
    Ok(())
}

#[tokio::test]
async fn concurrent_calls_get_their_own_results() -> anyhow::Result<()> {
    let proxy = start().await?;

    // Later requests finish first, so responses arrive out of order on the backend pipe.
    let calls = (0..16u64).map(|i| {
        let proxy = &proxy;
        async move {
            let delay = (16 - i) * 15;
            let (status, body) = proxy
                .post("/echo", json!({ "value": { "i": i }, "delay_ms": delay }))
                .await?;
            anyhow::ensure!(status == StatusCode::OK, "call {i} returned {status}");
            anyhow::ensure!(body == json!({ "i": i }), "call {i} got {body}");
            Ok::<_, anyhow::Error>(())
        }
    });
    for result in futures::future::join_all(calls).await {
        result?;
    }
    Ok(())
}

#[tokio::test]
async fn document_describes_every_tool() -> anyhow::Result<()> {
    let proxy = start().await?;

    let doc = proxy.get_json("/openapi.json").await?;
    assert_eq!(doc["openapi"], "3.0.3");
    // Title falls back to the name the backend reported.
    assert_eq!(doc["info"]["title"], "calc");
    assert_eq!(doc["info"]["version"], "0.3.1");
    let add = &doc["paths"]["/add"]["post"];
    assert_eq!(add["operationId"], "add");
    assert_eq!(
        add["requestBody"]["content"]["application/json"]["schema"]["required"],
        json!(["a", "b"])
    );
    assert!(doc["paths"]["/echo"]["post"].is_object());
    assert!(doc.get("tags").is_none());

    let docs = proxy.client.get(proxy.url("/docs")).send().await?;
    assert_eq!(docs.status(), StatusCode::OK);
    assert!(docs.text().await?.contains("/openapi.json"));

    let status = proxy.get_json("/status").await?;
    assert_eq!(status["mode"], "single");
    assert_eq!(status["backends"][0]["state"], "ready");
    Ok(())
}

#[tokio::test]
async fn unreachable_single_backend_is_fatal() -> anyhow::Result<()> {
    let port = common::pick_unused_port()?;
    let mut child = common::spawn_proxy(port, &["--", "/nonexistent/mcp-server-binary"])?;
    let status = common::wait_exit(&mut child, std::time::Duration::from_secs(20)).await?;
    assert!(!status.success());
    Ok(())
}
