//! JSON-RPC 2.0 framing for the MCP tool surface.
//!
//! One request per line in, at most one response per line out. Requests
//! without an `id` are notifications and never get a response.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::actions::Action;
use super::handler::ActionHandler;

/// Value of every `jsonrpc` member.
pub const JSONRPC_VERSION: &str = "2.0";
/// MCP protocol revision this server speaks.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "neotoma";

/// Invalid JSON.
pub const PARSE_ERROR: i32 = -32700;
/// Not a valid request object.
pub const INVALID_REQUEST: i32 = -32600;
/// Unknown method.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Bad method parameters.
pub const INVALID_PARAMS: i32 = -32602;
/// Server-side failure.
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// JSON-RPC response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Set on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Echo of the request ID; `null` if it could not be read.
    pub id: Value,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// JSON-RPC error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// JSON-RPC error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Extra error detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Routes JSON-RPC methods to the action handler.
#[derive(Debug, Clone)]
pub struct McpProtocol {
    handler: ActionHandler,
}

impl McpProtocol {
    /// Wraps an action handler.
    #[must_use]
    pub fn new(handler: ActionHandler) -> Self {
        Self { handler }
    }

    /// The wrapped handler.
    #[must_use]
    pub fn handler(&self) -> &ActionHandler {
        &self.handler
    }

    /// Handles one line of input and returns the serialized response, if any.
    #[must_use]
    pub fn handle_line(&self, line: &str) -> Option<String> {
        let response = self.handle_message(line)?;
        match serde_json::to_string(&response) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize response");
                let fallback = JsonRpcResponse::failure(
                    response.id,
                    JsonRpcError::new(INTERNAL_ERROR, "failed to serialize response"),
                );
                serde_json::to_string(&fallback).ok()
            }
        }
    }

    fn handle_message(&self, line: &str) -> Option<JsonRpcResponse> {
        let message: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable message");
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError::new(PARSE_ERROR, format!("Parse error: {e}")),
                ));
            }
        };

        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(r) => r,
            Err(e) => {
                return Some(JsonRpcResponse::failure(
                    id,
                    JsonRpcError::new(INVALID_REQUEST, format!("Invalid request: {e}")),
                ));
            }
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::failure(
                id,
                JsonRpcError::new(INVALID_REQUEST, "Invalid request: jsonrpc must be \"2.0\""),
            ));
        }
        self.handle_request(request)
    }

    /// Handles a parsed request. Returns `None` for notifications.
    #[must_use]
    pub fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let result = match request.method.as_str() {
            "initialize" => Ok(Self::initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(Self::tools_list()),
            "tools/call" => self.tools_call(request.params),
            method if method.starts_with("notifications/") => {
                tracing::debug!(%method, "notification");
                return None;
            }
            method => Err(JsonRpcError::new(
                METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            )),
        };

        let id = request.id?;
        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    fn initialize() -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {"tools": {"listChanged": false}},
            "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")}
        })
    }

    fn tools_list() -> Value {
        let tools: Vec<Value> = Action::ALL
            .into_iter()
            .map(|action| {
                json!({
                    "name": action.name(),
                    "description": action.description(),
                    "inputSchema": action.input_schema(),
                    "annotations": {
                        "readOnlyHint": action.read_only(),
                        "consistency": action.consistency(),
                    }
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    fn tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: ToolCallParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| JsonRpcError::new(INVALID_PARAMS, format!("Invalid params: {e}")))?;

        let (structured, is_error) = match self.handler.call(&params.name, params.arguments) {
            Ok(value) => (value, false),
            Err(envelope) => {
                let value = serde_json::to_value(&envelope).map_err(|e| {
                    JsonRpcError::new(INTERNAL_ERROR, format!("failed to serialize error: {e}"))
                })?;
                (value, true)
            }
        };
        let text = serde_json::to_string_pretty(&structured)
            .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, format!("failed to serialize result: {e}")))?;
        Ok(json!({
            "content": [{"type": "text", "text": text}],
            "structuredContent": structured,
            "isError": is_error,
        }))
    }
}
