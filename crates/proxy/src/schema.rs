//! JSON Schema <-> OpenAPI translation and request/response mapping.
//!
//! Tool input schemas are JSON Schema (usually 2020-12 or draft-07). The HTTP surface documents them
//! as OpenAPI 3.0.3 schemas, which lack `null` types, `const`, numeric `exclusiveMinimum` and most
//! conditional keywords. Anything that cannot be expressed degrades to an open schema (`{}`).
//! Request validation always runs against the original tool schema, never the translated one.

use crate::catalog::ToolDescriptor;
use crate::error::{ProxyError, Result};
use axum::http::StatusCode;
use rmcp::model::{CallToolResult, ErrorCode, JsonObject};
use serde_json::{Map, Value, json};

/// Keywords that make a node untranslatable; the node becomes `{}`.
const OPAQUE_KEYWORDS: &[&str] = &["not", "if", "then", "else", "prefixItems"];

/// Keywords copied verbatim.
const PASSTHROUGH_KEYWORDS: &[&str] = &[
    "title",
    "description",
    "default",
    "format",
    "pattern",
    "enum",
    "minLength",
    "maxLength",
    "minimum",
    "maximum",
    "multipleOf",
    "minItems",
    "maxItems",
    "uniqueItems",
    "minProperties",
    "maxProperties",
    "readOnly",
    "writeOnly",
    "deprecated",
];

/// Translate a JSON Schema into an OpenAPI 3.0 schema object.
///
/// Local `$ref`s (`#/$defs/..`, `#/definitions/..`) are inlined; recursive references become `{}`.
#[must_use]
pub fn to_openapi_schema(schema: &Value) -> Value {
    let mut visiting = Vec::new();
    translate(schema, schema, &mut visiting)
}

/// Translate a tool input schema into a request body schema. The body is always an object.
#[must_use]
pub fn request_body_schema(input_schema: &Value) -> Value {
    let mut out = to_openapi_schema(input_schema);
    let Some(obj) = out.as_object_mut() else {
        return json!({ "type": "object" });
    };
    let ty = obj.get("type").and_then(Value::as_str).map(str::to_string);
    match ty.as_deref() {
        Some("object") => {}
        None if obj.contains_key("properties") || obj.is_empty() => {
            obj.insert("type".into(), json!("object"));
        }
        _ => {
            let mut open = Map::new();
            open.insert("type".into(), json!("object"));
            if let Some(description) = obj.get("description") {
                open.insert("description".into(), description.clone());
            }
            return Value::Object(open);
        }
    }
    out
}

fn translate(node: &Value, root: &Value, visiting: &mut Vec<String>) -> Value {
    let Some(obj) = node.as_object() else {
        // `true` or anything unexpected: accept anything.
        return json!({});
    };

    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        return translate_ref(reference, obj, root, visiting);
    }

    if OPAQUE_KEYWORDS.iter().any(|k| obj.contains_key(*k)) {
        return open_schema(obj);
    }

    let mut out = Map::new();
    let mut nullable = obj.get("nullable").and_then(Value::as_bool).unwrap_or(false);

    match obj.get("type") {
        Some(Value::String(t)) if t == "null" => nullable = true,
        Some(Value::String(t)) => {
            out.insert("type".into(), json!(t));
        }
        Some(Value::Array(types)) => {
            let mut concrete: Vec<&str> = Vec::new();
            for t in types.iter().filter_map(Value::as_str) {
                if t == "null" {
                    nullable = true;
                } else {
                    concrete.push(t);
                }
            }
            match concrete.as_slice() {
                [] => {}
                [single] => {
                    out.insert("type".into(), json!(single));
                }
                many => {
                    let variants: Vec<Value> = many
                        .iter()
                        .map(|t| {
                            if *t == "array" {
                                json!({ "type": "array", "items": {} })
                            } else {
                                json!({ "type": t })
                            }
                        })
                        .collect();
                    out.insert("anyOf".into(), Value::Array(variants));
                }
            }
        }
        _ => {}
    }

    for key in PASSTHROUGH_KEYWORDS {
        if let Some(v) = obj.get(*key) {
            out.insert((*key).to_string(), v.clone());
        }
    }

    if let Some(constant) = obj.get("const") {
        out.insert("enum".into(), json!([constant]));
    }
    for (key, bound) in [("exclusiveMinimum", "minimum"), ("exclusiveMaximum", "maximum")] {
        match obj.get(key) {
            Some(Value::Number(n)) => {
                out.insert(bound.into(), Value::Number(n.clone()));
                out.insert(key.into(), json!(true));
            }
            Some(Value::Bool(b)) => {
                out.insert(key.into(), json!(b));
            }
            _ => {}
        }
    }
    if let Some(example) = obj
        .get("examples")
        .and_then(Value::as_array)
        .and_then(|e| e.first())
        .or_else(|| obj.get("example"))
    {
        out.insert("example".into(), example.clone());
    }

    if let Some(props) = obj.get("properties").and_then(Value::as_object) {
        let translated: Map<String, Value> = props
            .iter()
            .map(|(k, v)| (k.clone(), translate(v, root, visiting)))
            .collect();
        out.insert("properties".into(), Value::Object(translated));
        out.entry("type").or_insert_with(|| json!("object"));
    }
    if let Some(required) = obj.get("required").and_then(Value::as_array)
        && !required.is_empty()
    {
        out.insert("required".into(), Value::Array(required.clone()));
    }
    match obj.get("additionalProperties") {
        Some(Value::Bool(b)) => {
            out.insert("additionalProperties".into(), json!(b));
        }
        Some(schema @ Value::Object(_)) => {
            out.insert(
                "additionalProperties".into(),
                translate(schema, root, visiting),
            );
        }
        _ => {
            if obj.contains_key("patternProperties") {
                out.insert("additionalProperties".into(), json!({}));
            }
        }
    }

    match obj.get("items") {
        Some(items @ Value::Object(_)) => {
            out.insert("items".into(), translate(items, root, visiting));
        }
        Some(Value::Array(_)) => {
            // Tuple form (draft-07).
            out.insert("items".into(), json!({}));
        }
        _ => {}
    }
    if out.get("type").and_then(Value::as_str) == Some("array") && !out.contains_key("items") {
        out.insert("items".into(), json!({}));
    }

    for key in ["allOf", "anyOf", "oneOf"] {
        let Some(variants) = obj.get(key).and_then(Value::as_array) else {
            continue;
        };
        let mut translated: Vec<Value> = Vec::new();
        for variant in variants {
            if variant.get("type").and_then(Value::as_str) == Some("null") && key != "allOf" {
                nullable = true;
            } else {
                translated.push(translate(variant, root, visiting));
            }
        }
        match translated.len() {
            0 => {}
            // `anyOf: [X, {type: null}]` is how optional fields are usually written.
            1 if key != "allOf" && !out.contains_key("type") => {
                if let Some(Value::Object(single)) = translated.pop() {
                    for (k, v) in single {
                        out.entry(k).or_insert(v);
                    }
                }
            }
            _ => {
                out.insert(key.into(), Value::Array(translated));
            }
        }
    }

    if nullable {
        out.insert("nullable".into(), json!(true));
    }

    Value::Object(out)
}

fn translate_ref(
    reference: &str,
    node: &Map<String, Value>,
    root: &Value,
    visiting: &mut Vec<String>,
) -> Value {
    let target = reference
        .strip_prefix('#')
        .and_then(|pointer| root.pointer(pointer));
    let Some(target) = target else {
        tracing::debug!(reference, "Unresolvable $ref; documenting as open schema");
        return open_schema(node);
    };
    if visiting.iter().any(|r| r == reference) {
        return open_schema(node);
    }

    visiting.push(reference.to_string());
    let mut out = translate(target, root, visiting);
    visiting.pop();

    if let (Some(out), Some(description)) = (out.as_object_mut(), node.get("description")) {
        out.insert("description".into(), description.clone());
    }
    out
}

fn open_schema(node: &Map<String, Value>) -> Value {
    let mut out = Map::new();
    for key in ["title", "description", "default"] {
        if let Some(v) = node.get(key) {
            out.insert(key.into(), v.clone());
        }
    }
    Value::Object(out)
}

/// `snake_case_name` -> `Snake Case Name`.
fn summary_for(name: &str) -> String {
    name.split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the OpenAPI operation object for one tool.
#[must_use]
pub fn to_openapi_operation(
    tool: &ToolDescriptor,
    tag: Option<&str>,
    operation_id: &str,
    secured: bool,
) -> Value {
    let body_schema = request_body_schema(&tool.input_schema);
    let body_required = body_schema
        .get("required")
        .and_then(Value::as_array)
        .is_some_and(|r| !r.is_empty());
    let response_schema = tool
        .output_schema
        .as_ref()
        .map_or_else(|| json!({}), to_openapi_schema);
    let error_content = json!({
        "application/json": {
            "schema": { "$ref": "#/components/schemas/ErrorResponse" }
        }
    });

    let mut op = Map::new();
    op.insert("operationId".into(), json!(operation_id));
    op.insert("summary".into(), json!(summary_for(&tool.name)));
    if let Some(description) = &tool.description {
        op.insert("description".into(), json!(description));
    }
    if let Some(tag) = tag {
        op.insert("tags".into(), json!([tag]));
    }
    op.insert(
        "requestBody".into(),
        json!({
            "required": body_required,
            "content": { "application/json": { "schema": body_schema } }
        }),
    );
    op.insert(
        "responses".into(),
        json!({
            "200": {
                "description": "Successful Response",
                "content": { "application/json": { "schema": response_schema } }
            },
            "422": { "description": "Validation Error", "content": error_content.clone() },
            "default": { "description": "Error", "content": error_content }
        }),
    );
    if secured {
        op.insert("security".into(), json!([{ "bearerAuth": [] }]));
    }
    Value::Object(op)
}

/// Compile a validator for a tool's input schema.
///
/// Returns `None` if the schema does not compile; only the required/unknown-field checks run then.
#[must_use]
pub fn compile_validator(tool: &ToolDescriptor) -> Option<jsonschema::Validator> {
    match jsonschema::validator_for(&tool.input_schema) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(tool = %tool.name, error = %e, "Input schema does not compile; skipping constraint validation");
            None
        }
    }
}

/// Parse a raw HTTP body. An empty body means "no arguments".
///
/// # Errors
///
/// Returns [`ProxyError::Validation`] if the body is not valid JSON.
pub fn parse_body(bytes: &[u8]) -> Result<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| ProxyError::Validation {
        message: format!("Invalid params: request body is not valid JSON: {e}"),
        details: json!({
            "type": "validation-errors",
            "violations": [{ "type": "invalid-json", "message": e.to_string() }],
        }),
    })
}

/// Validate an HTTP request body against a tool's input schema and turn it into call arguments.
///
/// # Errors
///
/// Returns [`ProxyError::Validation`] listing every violation.
pub fn request_to_args(
    body: Value,
    input_schema: &Value,
    validator: Option<&jsonschema::Validator>,
) -> Result<JsonObject> {
    let body = match body {
        Value::Null => Value::Object(JsonObject::new()),
        body @ Value::Object(_) => body,
        other => {
            return Err(ProxyError::Validation {
                message: "Invalid params: request body must be a JSON object".into(),
                details: json!({
                    "type": "validation-errors",
                    "violations": [{
                        "type": "constraint-violation",
                        "message": format!("{other} is not of type 'object'"),
                        "instancePath": "",
                    }],
                }),
            });
        }
    };
    let empty = JsonObject::new();
    let args = body.as_object().unwrap_or(&empty);

    let props = input_schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let closed = input_schema.get("additionalProperties") == Some(&Value::Bool(false));
    let valid_params: Vec<String> = props.keys().cloned().collect();
    let valid_param_refs: Vec<&str> = valid_params.iter().map(String::as_str).collect();

    let mut violations: Vec<Value> = Vec::new();

    if closed {
        for k in args.keys().filter(|k| !props.contains_key(*k)) {
            violations.push(json!({
                "type": "invalid-parameter",
                "parameter": k,
                "suggestions": find_similar_strings(k, &valid_param_refs),
                "validParameters": valid_params,
            }));
        }
    }

    for r in input_schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
    {
        if !args.contains_key(r) {
            violations.push(json!({
                "type": "missing-required-parameter",
                "parameter": r,
            }));
        }
    }

    if let Some(validator) = validator {
        for e in validator.iter_errors(&body) {
            // Reported above with a nicer shape.
            if matches!(
                e.kind(),
                jsonschema::error::ValidationErrorKind::Required { .. }
                    | jsonschema::error::ValidationErrorKind::AdditionalProperties { .. }
            ) {
                continue;
            }
            violations.push(json!({
                "type": "constraint-violation",
                "message": e.to_string(),
                "instancePath": e.instance_path().to_string(),
            }));
        }
    }

    if !violations.is_empty() {
        return Err(validation_failure(violations));
    }
    match body {
        Value::Object(args) => Ok(args),
        _ => Ok(JsonObject::new()),
    }
}

fn validation_failure(violations: Vec<Value>) -> ProxyError {
    let first_of = |kind: &str| {
        violations
            .iter()
            .find(|v| v.get("type").and_then(Value::as_str) == Some(kind))
    };
    let message = if let Some(v) = first_of("invalid-parameter") {
        let p = v.get("parameter").and_then(Value::as_str).unwrap_or("?");
        let suggestion = v
            .get("suggestions")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .and_then(Value::as_str);
        if let Some(s) = suggestion {
            format!("Invalid params: unknown parameter '{p}' (did you mean '{s}'?)")
        } else {
            format!("Invalid params: unknown parameter '{p}'")
        }
    } else if let Some(v) = first_of("missing-required-parameter") {
        let p = v.get("parameter").and_then(Value::as_str).unwrap_or("?");
        format!("Invalid params: missing required parameter '{p}'")
    } else if let [only] = violations.as_slice() {
        let msg = only.get("message").and_then(Value::as_str).unwrap_or("invalid value");
        match only.get("instancePath").and_then(Value::as_str) {
            Some(path) if !path.is_empty() => format!("Invalid params: {msg} (at {path})"),
            _ => format!("Invalid params: {msg}"),
        }
    } else {
        format!(
            "Invalid params: validation failed with {} error(s)",
            violations.len()
        )
    };

    ProxyError::Validation {
        message,
        details: json!({
            "type": "validation-errors",
            "violations": violations,
        }),
    }
}

fn find_similar_strings(unknown: &str, known: &[&str]) -> Vec<String> {
    let mut candidates: Vec<(f64, String)> = Vec::new();
    for k in known {
        let score = strsim::jaro(unknown, k);
        if score > 0.7 {
            candidates.push((score, (*k).to_string()));
        }
    }
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    candidates.into_iter().map(|(_, s)| s).collect()
}

/// Map a JSON-RPC error from the backend to a [`ProxyError::RemoteTool`].
///
/// Caller-attributable codes become 4xx; everything else is 500. The message is kept verbatim.
#[must_use]
pub fn remote_error(code: i32, message: String, data: Option<Value>) -> ProxyError {
    let status = match ErrorCode(code) {
        ErrorCode::INVALID_PARAMS | ErrorCode::INVALID_REQUEST | ErrorCode::PARSE_ERROR => {
            StatusCode::BAD_REQUEST
        }
        ErrorCode::METHOD_NOT_FOUND => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let data = match data {
        Some(data) => json!({ "code": code, "data": data }),
        None => json!({ "code": code }),
    };
    ProxyError::RemoteTool {
        status,
        message,
        data: Some(data),
    }
}

/// Convert one content block into its HTTP representation.
fn shape_block(block: &Value) -> Value {
    match block.get("type").and_then(Value::as_str) {
        Some("text") => {
            let text = block.get("text").and_then(Value::as_str).unwrap_or_default();
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        }
        Some("image" | "audio") => {
            let mime = block
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("application/octet-stream");
            let data = block.get("data").and_then(Value::as_str).unwrap_or_default();
            Value::String(format!("data:{mime};base64,{data}"))
        }
        Some("resource") => block.get("resource").cloned().unwrap_or(Value::Null),
        _ => block.clone(),
    }
}

/// Shape a successful protocol result into the HTTP response payload.
///
/// # Errors
///
/// Returns [`ProxyError::RemoteTool`] (500) if the result is flagged `isError`.
pub fn shape_result(result: &CallToolResult) -> Result<Value> {
    let raw = serde_json::to_value(result)
        .map_err(|e| ProxyError::Protocol(format!("Unserializable tool result: {e}")))?;
    let blocks: Vec<Value> = raw
        .get("content")
        .and_then(Value::as_array)
        .map(|c| c.iter().map(shape_block).collect())
        .unwrap_or_default();

    if raw.get("isError").and_then(Value::as_bool) == Some(true) {
        let texts: Vec<&str> = raw
            .get("content")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect();
        let message = if texts.is_empty() {
            "Tool reported an error".to_string()
        } else {
            texts.join("\n")
        };
        return Err(ProxyError::RemoteTool {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
            data: Some(json!({ "content": blocks })),
        });
    }

    if let Some(structured) = raw.get("structuredContent").filter(|v| !v.is_null()) {
        return Ok(structured.clone());
    }

    let mut blocks = blocks;
    Ok(match blocks.len() {
        0 => Value::Null,
        1 => blocks.remove(0),
        _ => Value::Array(blocks),
    })
}

/// Final HTTP status and JSON body for an invocation outcome.
#[must_use]
pub fn result_to_response(result: Result<CallToolResult>) -> (StatusCode, Value) {
    match result.and_then(|r| shape_result(&r)) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (e.status(), e.to_body()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;

    fn add_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "a": { "type": "integer", "description": "first" },
                "b": { "type": "integer" }
            },
            "required": ["a", "b"]
        })
    }

    fn tool(schema: Value) -> ToolDescriptor {
        ToolDescriptor {
            name: "add".into(),
            description: Some("Add two integers".into()),
            input_schema: schema,
            output_schema: None,
        }
    }

    #[test]
    fn supported_constructs_translate_losslessly() {
        let schema = add_schema();
        assert_eq!(to_openapi_schema(&schema), schema);

        let rich = json!({
            "type": "object",
            "properties": {
                "mode": { "type": "string", "enum": ["fast", "slow"], "default": "fast" },
                "tags": { "type": "array", "items": { "type": "string" }, "minItems": 1 },
                "opts": {
                    "type": "object",
                    "properties": { "depth": { "type": "number", "maximum": 3.5 } },
                    "additionalProperties": false
                },
                "flag": { "type": "boolean" }
            }
        });
        assert_eq!(to_openapi_schema(&rich), rich);
    }

    #[test]
    fn null_unions_become_nullable() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": { "type": ["string", "null"] },
                "b": { "anyOf": [{ "type": "integer" }, { "type": "null" }], "default": null }
            }
        });
        let out = to_openapi_schema(&schema);
        assert_eq!(out["properties"]["a"], json!({ "type": "string", "nullable": true }));
        assert_eq!(
            out["properties"]["b"],
            json!({ "type": "integer", "nullable": true, "default": null })
        );
    }

    #[test]
    fn refs_are_inlined_and_cycles_cut() {
        let schema = json!({
            "type": "object",
            "properties": {
                "point": { "$ref": "#/$defs/Point" },
                "node": { "$ref": "#/definitions/Node" }
            },
            "$defs": {
                "Point": {
                    "type": "object",
                    "properties": { "x": { "type": "number" }, "y": { "type": "number" } },
                    "required": ["x", "y"]
                }
            },
            "definitions": {
                "Node": {
                    "type": "object",
                    "properties": { "next": { "$ref": "#/definitions/Node" } }
                }
            }
        });
        let out = to_openapi_schema(&schema);
        assert_eq!(out["properties"]["point"]["required"], json!(["x", "y"]));
        assert_eq!(out["properties"]["node"]["properties"]["next"], json!({}));
        assert!(out.get("$defs").is_none());
    }

    #[test]
    fn exotic_constructs_degrade_to_open_schema() {
        let schema = json!({
            "type": "object",
            "properties": {
                "weird": { "not": { "type": "string" }, "description": "anything but a string" },
                "cond": { "if": { "type": "string" }, "then": { "minLength": 2 } },
                "tuple": { "type": "array", "items": [{ "type": "string" }] },
                "c": { "const": 7 },
                "n": { "type": "number", "exclusiveMinimum": 0 },
                "map": { "type": "object", "patternProperties": { "^x": { "type": "string" } } },
                "any": true
            }
        });
        let out = to_openapi_schema(&schema);
        let props = &out["properties"];
        assert_eq!(props["weird"], json!({ "description": "anything but a string" }));
        assert_eq!(props["cond"], json!({}));
        assert_eq!(props["tuple"], json!({ "type": "array", "items": {} }));
        assert_eq!(props["c"], json!({ "enum": [7] }));
        assert_eq!(
            props["n"],
            json!({ "type": "number", "minimum": 0, "exclusiveMinimum": true })
        );
        assert_eq!(props["map"]["additionalProperties"], json!({}));
        assert_eq!(props["any"], json!({}));
    }

    #[test]
    fn body_schema_is_always_an_object() {
        assert_eq!(request_body_schema(&json!({})), json!({ "type": "object" }));
        assert_eq!(
            request_body_schema(&json!({ "type": "string", "description": "d" })),
            json!({ "type": "object", "description": "d" })
        );
        assert_eq!(
            request_body_schema(&json!({ "properties": { "a": { "type": "string" } } })),
            json!({ "type": "object", "properties": { "a": { "type": "string" } } })
        );
    }

    #[test]
    fn operation_carries_schema_tag_and_security() {
        let op = to_openapi_operation(&tool(add_schema()), Some("math"), "math__add", true);
        assert_eq!(op["operationId"], json!("math__add"));
        assert_eq!(op["summary"], json!("Add"));
        assert_eq!(op["description"], json!("Add two integers"));
        assert_eq!(op["tags"], json!(["math"]));
        assert_eq!(op["requestBody"]["required"], json!(true));
        assert_eq!(
            op["requestBody"]["content"]["application/json"]["schema"],
            add_schema()
        );
        assert_eq!(op["security"], json!([{ "bearerAuth": [] }]));
        assert!(op["responses"].get("422").is_some());

        let open = to_openapi_operation(&tool(json!({})), None, "add", false);
        assert_eq!(open["requestBody"]["required"], json!(false));
        assert!(open.get("tags").is_none());
        assert!(open.get("security").is_none());
    }

    #[test]
    fn summary_title_cases_tool_names() {
        assert_eq!(summary_for("get_current_time"), "Get Current Time");
        assert_eq!(summary_for("list-files"), "List Files");
    }

    #[test]
    fn missing_required_field_names_the_field() {
        let schema = add_schema();
        let validator = jsonschema::validator_for(&schema).unwrap();
        let err = request_to_args(json!({ "a": 2 }), &schema, Some(&validator)).unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            err.to_string(),
            "Invalid params: missing required parameter 'b'"
        );
        let ProxyError::Validation { details, .. } = err else {
            panic!("expected validation error");
        };
        assert_eq!(
            details["violations"],
            json!([{ "type": "missing-required-parameter", "parameter": "b" }])
        );
    }

    #[test]
    fn type_mismatch_is_a_constraint_violation() {
        let schema = add_schema();
        let validator = jsonschema::validator_for(&schema).unwrap();
        let err =
            request_to_args(json!({ "a": "two", "b": 3 }), &schema, Some(&validator)).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
        assert!(err.to_string().contains("/a"), "{err}");
    }

    #[test]
    fn unknown_params_only_rejected_for_closed_schemas() {
        let open = add_schema();
        let args = request_to_args(json!({ "a": 1, "b": 2, "c": 3 }), &open, None).unwrap();
        assert_eq!(args.len(), 3);

        let mut closed = add_schema();
        closed["additionalProperties"] = json!(false);
        let validator = jsonschema::validator_for(&closed).unwrap();
        let err = request_to_args(json!({ "a": 1, "bb": 2 }), &closed, Some(&validator))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid params: unknown parameter 'bb' (did you mean 'b'?)"
        );
    }

    #[test]
    fn empty_and_non_object_bodies() {
        let schema = json!({ "type": "object" });
        assert!(request_to_args(Value::Null, &schema, None).unwrap().is_empty());
        assert!(request_to_args(json!([1, 2]), &schema, None).is_err());
        assert_eq!(parse_body(b"  ").unwrap(), Value::Null);
        assert_eq!(parse_body(b"{\"a\":1}").unwrap(), json!({ "a": 1 }));
        assert_eq!(parse_body(b"{oops").unwrap_err().kind(), "validation_error");
    }

    #[test]
    fn text_results_are_parsed_and_unwrapped() {
        let r = CallToolResult::success(vec![Content::text("5")]);
        assert_eq!(shape_result(&r).unwrap(), json!(5));

        let r = CallToolResult::success(vec![Content::text("hello")]);
        assert_eq!(shape_result(&r).unwrap(), json!("hello"));

        let r = CallToolResult::success(vec![Content::text("{\"x\":1}"), Content::text("two")]);
        assert_eq!(shape_result(&r).unwrap(), json!([{ "x": 1 }, "two"]));

        let r = CallToolResult::success(vec![]);
        assert_eq!(shape_result(&r).unwrap(), Value::Null);
    }

    #[test]
    fn images_become_data_uris() {
        let r = CallToolResult::success(vec![Content::image("aGVsbG8=", "image/png")]);
        assert_eq!(
            shape_result(&r).unwrap(),
            json!("data:image/png;base64,aGVsbG8=")
        );
    }

    #[test]
    fn structured_content_wins() {
        let r = CallToolResult::structured(json!({ "sum": 5 }));
        assert_eq!(shape_result(&r).unwrap(), json!({ "sum": 5 }));
    }

    #[test]
    fn is_error_maps_to_500_with_text() {
        let r = CallToolResult::error(vec![Content::text("division by zero")]);
        let (status, body) = result_to_response(Ok(r));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["kind"], json!("remote_tool_error"));
        assert_eq!(body["error"]["message"], json!("division by zero"));
    }

    #[test]
    fn rpc_codes_map_to_statuses() {
        let status = |code: ErrorCode| remote_error(code.0, "m".into(), None).status();
        assert_eq!(status(ErrorCode::INVALID_PARAMS), StatusCode::BAD_REQUEST);
        assert_eq!(status(ErrorCode::INVALID_REQUEST), StatusCode::BAD_REQUEST);
        assert_eq!(status(ErrorCode::PARSE_ERROR), StatusCode::BAD_REQUEST);
        assert_eq!(status(ErrorCode::METHOD_NOT_FOUND), StatusCode::NOT_FOUND);
        assert_eq!(
            status(ErrorCode::INTERNAL_ERROR),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let (status, body) = result_to_response(Err(remote_error(
            -32602,
            "bad a".into(),
            Some(json!({ "field": "a" })),
        )));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], json!("bad a"));
        assert_eq!(body["error"]["details"]["data"], json!({ "field": "a" }));
    }
}
