//! Minimal MCP stdio server used only for proxy integration tests.
//!
//! It speaks JSON-RPC over stdio directly (one JSON message per line) and does not depend on
//! the proxy's own code paths.
//!
//! Flags:
//! - `--name <name>`: server name reported in `initialize` (default `proxy-stdio-test-server`)
//! - `--duplicate-tools`: list `add` twice, which the proxy must refuse
//!
//! Tools: `add`, `echo` (optional `delay_ms`, answered from a worker thread so calls overlap),
//! `fail` (tool-level error), `reject` (JSON-RPC invalid params), `crash` (exits without
//! answering), `hang` (never answers) and `enable_extra` (adds `extra` and emits
//! `notifications/tools/list_changed`).

use parking_lot::Mutex;
use serde_json::{Value, json};
use std::io::{BufRead as _, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

type Out = Arc<Mutex<std::io::Stdout>>;

struct ServerState {
    name: String,
    duplicate_tools: bool,
    extra_enabled: AtomicBool,
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let mut name = "proxy-stdio-test-server".to_string();
    let mut duplicate_tools = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--name" => {
                name = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--name requires a value"))?;
            }
            "--duplicate-tools" => duplicate_tools = true,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    let state = Arc::new(ServerState {
        name,
        duplicate_tools,
        extra_enabled: AtomicBool::new(false),
    });
    let out: Out = Arc::new(Mutex::new(std::io::stdout()));

    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(msg) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        handle_message(&state, &out, &msg)?;
    }

    Ok(())
}

fn handle_message(state: &Arc<ServerState>, out: &Out, msg: &Value) -> anyhow::Result<()> {
    let Some(method) = msg.get("method").and_then(Value::as_str) else {
        return Ok(());
    };
    // Notifications carry no id.
    let Some(id) = msg.get("id").cloned() else {
        return Ok(());
    };

    match method {
        "initialize" => write_json_line(out, &jsonrpc_ok(&id, &initialize_result(state, msg))),
        "ping" => write_json_line(out, &jsonrpc_ok(&id, &json!({}))),
        "tools/list" => write_json_line(out, &jsonrpc_ok(&id, &tools_list_result(state))),
        "tools/call" => tools_call(state, out, msg, id),
        _ => write_json_line(
            out,
            &jsonrpc_err(&id, &json!({ "code": -32601, "message": "method not found" })),
        ),
    }
}

fn initialize_result(state: &ServerState, msg: &Value) -> Value {
    let protocol_version = msg
        .get("params")
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or("2024-11-05")
        .to_string();

    json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": { "listChanged": true } },
        "serverInfo": { "name": state.name, "version": "0.3.1" },
        "instructions": format!("{} test tools", state.name)
    })
}

fn tools_list_result(state: &ServerState) -> Value {
    let add = json!({
        "name": "add",
        "description": "Add two integers",
        "inputSchema": {
            "type": "object",
            "properties": {
                "a": { "type": "integer" },
                "b": { "type": "integer" }
            },
            "required": ["a", "b"]
        }
    });
    let mut tools = vec![
        add.clone(),
        json!({
            "name": "echo",
            "description": "Return `value` unchanged, optionally after `delay_ms`",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "value": {},
                    "delay_ms": { "type": "integer", "minimum": 0 }
                },
                "required": ["value"]
            }
        }),
        json!({ "name": "fail", "description": "Always fails", "inputSchema": { "type": "object" } }),
        json!({ "name": "reject", "description": "Rejects its params", "inputSchema": { "type": "object" } }),
        json!({ "name": "crash", "description": "Exit without answering", "inputSchema": { "type": "object" } }),
        json!({ "name": "hang", "description": "Never answers", "inputSchema": { "type": "object" } }),
        json!({
            "name": "enable_extra",
            "description": "Add the `extra` tool and announce the change",
            "inputSchema": { "type": "object" }
        }),
    ];
    if state.duplicate_tools {
        tools.push(add);
    }
    if state.extra_enabled.load(Ordering::SeqCst) {
        tools.push(json!({
            "name": "extra",
            "description": "Appears after enable_extra",
            "inputSchema": { "type": "object" }
        }));
    }
    json!({ "tools": tools })
}

fn text_result(text: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": text.into() }] })
}

fn tools_call(state: &Arc<ServerState>, out: &Out, msg: &Value, id: Value) -> anyhow::Result<()> {
    let params = msg.get("params").cloned().unwrap_or(Value::Null);
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match name {
        "add" => {
            let a = args.get("a").and_then(Value::as_i64).unwrap_or(0);
            let b = args.get("b").and_then(Value::as_i64).unwrap_or(0);
            write_json_line(out, &jsonrpc_ok(&id, &text_result((a + b).to_string())))
        }
        "echo" => {
            let delay = args.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
            let value = args.get("value").cloned().unwrap_or(Value::Null);
            let out = out.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(delay));
                let result = text_result(value.to_string());
                let _ = write_json_line(&out, &jsonrpc_ok(&id, &result));
            });
            Ok(())
        }
        "fail" => write_json_line(
            out,
            &jsonrpc_ok(
                &id,
                &json!({ "content": [{ "type": "text", "text": "boom" }], "isError": true }),
            ),
        ),
        "reject" => write_json_line(
            out,
            &jsonrpc_err(
                &id,
                &json!({ "code": -32602, "message": "bad input", "data": { "field": "x" } }),
            ),
        ),
        "crash" => std::process::exit(3),
        "hang" => Ok(()),
        "enable_extra" => {
            state.extra_enabled.store(true, Ordering::SeqCst);
            write_json_line(
                out,
                &json!({ "jsonrpc": "2.0", "method": "notifications/tools/list_changed" }),
            )?;
            write_json_line(out, &jsonrpc_ok(&id, &text_result("ok")))
        }
        "extra" if state.extra_enabled.load(Ordering::SeqCst) => {
            write_json_line(out, &jsonrpc_ok(&id, &text_result("\"extra\"")))
        }
        _ => write_json_line(
            out,
            &jsonrpc_err(&id, &json!({ "code": -32601, "message": "unknown tool" })),
        ),
    }
}

fn jsonrpc_ok(id: &Value, result: &Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn jsonrpc_err(id: &Value, error: &Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}

fn write_json_line(out: &Out, v: &Value) -> anyhow::Result<()> {
    let line = serde_json::to_string(v)?;
    let mut stdout = out.lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}
