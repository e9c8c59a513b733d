//! JSON-RPC endpoint behind the gating chain.
//!
//! # Endpoint
//!
//! - `POST /mcp` - One JSON-RPC 2.0 message per request
//!
//! Only the protocol housekeeping methods are answered here. Tool definitions
//! and execution belong to the dispatch layer mounted behind the gateway, so
//! `tools/list` advertises an empty catalogue and every `tools/call` names an
//! unknown tool.
//!
//! | Input | Result |
//! |---|---|
//! | body is not JSON | `200`, error `-32700` |
//! | JSON but not a request object | `200`, error `-32600` |
//! | notification (no `id`) | `202`, empty body |
//! | unknown method | `200`, error `-32601` |
//! | `tools/call` with unknown or missing tool | `200`, error `-32602` |

use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{JSONRPC_VERSION, RpcError, RpcRequest, RpcResponse, ToolCallParams};

/// Protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Handle a single JSON-RPC message.
///
/// # Errors
///
/// `AppError::BadRequest` when the request declares a non-JSON content type.
/// Everything else is reported inside the JSON-RPC envelope.
#[instrument(skip_all)]
pub async fn handle_rpc(headers: HeaderMap, body: Bytes) -> AppResult<Response> {
    ensure_json_content_type(&headers)?;

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Rejected unparseable JSON-RPC body");
            metrics::record_rpc_call("", "parse_error");
            return Ok(Json(RpcResponse::failure(Value::Null, RpcError::parse_error())).into_response());
        }
    };

    // Echo the id back when the envelope is otherwise unusable.
    let raw_id = value.get("id").cloned().unwrap_or(Value::Null);

    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Rejected malformed JSON-RPC request");
            metrics::record_rpc_call("", "invalid_request");
            return Ok(Json(RpcResponse::failure(
                raw_id,
                RpcError::invalid_request("Invalid Request"),
            ))
            .into_response());
        }
    };

    if request.jsonrpc != JSONRPC_VERSION {
        metrics::record_rpc_call(&request.method, "invalid_request");
        return Ok(Json(RpcResponse::failure(
            raw_id,
            RpcError::invalid_request(format!("jsonrpc must be \"{JSONRPC_VERSION}\"")),
        ))
        .into_response());
    }

    let Some(id) = request.id else {
        debug!(method = %request.method, "Accepted notification");
        metrics::record_rpc_call(&request.method, "notification");
        return Ok(StatusCode::ACCEPTED.into_response());
    };

    let started = Instant::now();
    let outcome = dispatch(&request.method, request.params);
    metrics::record_rpc_duration(&request.method, started.elapsed().as_secs_f64());

    let response = match outcome {
        Ok(result) => {
            metrics::record_rpc_call(&request.method, "ok");
            RpcResponse::success(id, result)
        }
        Err(error) => {
            debug!(method = %request.method, code = error.code, "JSON-RPC call failed");
            metrics::record_rpc_call(&request.method, "error");
            RpcResponse::failure(id, error)
        }
    };

    Ok(Json(response).into_response())
}

fn dispatch(method: &str, params: Option<Value>) -> Result<Value, RpcError> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": [] })),
        "tools/call" => {
            let params: ToolCallParams = params
                .ok_or_else(|| RpcError::invalid_params("Missing params"))
                .and_then(|p| {
                    serde_json::from_value(p)
                        .map_err(|_| RpcError::invalid_params("params.name must be a string"))
                })?;
            Err(RpcError::invalid_params(format!(
                "Unknown tool: {}",
                params.name
            )))
        }
        other => Err(RpcError::method_not_found(other)),
    }
}

/// A missing content type is tolerated; an explicit non-JSON one is not.
fn ensure_json_content_type(headers: &HeaderMap) -> AppResult<()> {
    let Some(content_type) = headers.get(header::CONTENT_TYPE) else {
        return Ok(());
    };

    let is_json = content_type
        .to_str()
        .ok()
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));

    if is_json {
        Ok(())
    } else {
        Err(AppError::BadRequest(
            "Content-Type must be application/json".to_string(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::error_codes;
    use axum::body::to_bytes;
    use axum::http::HeaderValue;

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    async fn call(body: &str) -> (StatusCode, Value) {
        let response = handle_rpc(json_headers(), Bytes::from(body.to_string()))
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_initialize() {
        let (status, body) = call(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert!(body["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_ping_and_tools_list() {
        let (_, body) = call(r#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#).await;
        assert_eq!(body["id"], "a");
        assert_eq!(body["result"], json!({}));

        let (_, body) = call(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#).await;
        assert_eq!(body["result"]["tools"], json!([]));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_params() {
        let (_, body) = call(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"search"}}"#,
        )
        .await;
        assert_eq!(body["error"]["code"], error_codes::INVALID_PARAMS);
        assert!(body["error"]["message"].as_str().unwrap().contains("search"));

        let (_, body) = call(r#"{"jsonrpc":"2.0","id":4,"method":"tools/call"}"#).await;
        assert_eq!(body["error"]["code"], error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (_, body) = call(r#"{"jsonrpc":"2.0","id":5,"method":"resources/list"}"#).await;
        assert_eq!(body["error"]["code"], error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_parse_error() {
        let (status, body) = call("{not json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"]["code"], error_codes::PARSE_ERROR);
        assert_eq!(body["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_invalid_request() {
        let (_, body) = call(r#"{"jsonrpc":"2.0","id":6}"#).await;
        assert_eq!(body["error"]["code"], error_codes::INVALID_REQUEST);
        assert_eq!(body["id"], 6);

        let (_, body) = call(r#"{"jsonrpc":"1.0","id":7,"method":"ping"}"#).await;
        assert_eq!(body["error"]["code"], error_codes::INVALID_REQUEST);

        let (_, body) = call("[]").await;
        assert_eq!(body["error"]["code"], error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_notification_is_accepted_without_body() {
        let (status, body) =
            call(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_non_json_content_type_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        let result = handle_rpc(headers, Bytes::from_static(b"{}")).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_content_type_with_charset() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(ensure_json_content_type(&headers).is_ok());
        assert!(ensure_json_content_type(&HeaderMap::new()).is_ok());
    }
}
