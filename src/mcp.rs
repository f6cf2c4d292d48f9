//! JSON-RPC message handling: the handshake, discovery and the tool envelope.
//!
//! A [`Session`] is one client conversation. Operations are refused with
//! -32002 until the client has sent `initialize`.

use crate::config::Config;
use crate::error::GraphError;
use crate::query::Deadline;
use crate::rpc;
use crate::service::IndexService;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Clone, Copy)]
enum TextMode {
    None,
    Compact,
    Pretty,
}

#[derive(Clone)]
pub struct Session {
    service: Arc<IndexService>,
    initialized: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl Session {
    pub fn new(service: Arc<IndexService>) -> Self {
        Self {
            service,
            initialized: Arc::new(AtomicBool::new(false)),
            request_timeout: Config::get().request_timeout(),
        }
    }

    /// A session that skips the handshake, for one-shot CLI requests.
    pub fn preinitialized(service: Arc<IndexService>) -> Self {
        let session = Self::new(service);
        session.initialized.store(true, Ordering::SeqCst);
        session
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Handles one raw frame. Parse failures are answered with a null id.
    pub fn handle_line(&self, line: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(line) {
            Ok(message) => self.handle_message(message),
            Err(err) => Some(parse_error_response(&err)),
        }
    }

    /// Returns `None` for notifications.
    pub fn handle_message(&self, message: Value) -> Option<Value> {
        let id = message.get("id").cloned();
        let Some(method) = message.get("method").and_then(|value| value.as_str()) else {
            return Some(jsonrpc_error(
                id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                "invalid request: missing method",
                json!({ "kind": "invalid_request" }),
            ));
        };
        if method.starts_with("notifications/") {
            return None;
        }
        let id = id?;
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        tracing::debug!(method, "request");

        match method {
            "initialize" => {
                self.initialized.store(true, Ordering::SeqCst);
                Some(jsonrpc_result(id, initialize_result(&params)))
            }
            "ping" => Some(jsonrpc_result(id, json!({}))),
            "tools/list" => Some(jsonrpc_result(id, json!({ "tools": rpc::tool_specs() }))),
            "tools/call" => Some(self.handle_tool_call(id, &params)),
            name if rpc::is_operation(name) => Some(self.handle_operation(id, name, params)),
            other => Some(graph_error_response(
                id,
                &GraphError::UnknownOperation(other.to_string()),
            )),
        }
    }

    fn handle_operation(&self, id: Value, method: &str, params: Value) -> Value {
        match self.run(method, params) {
            Ok(result) => jsonrpc_result(id, result),
            Err(err) => graph_error_response(id, &err),
        }
    }

    fn handle_tool_call(&self, id: Value, params: &Value) -> Value {
        let name = params
            .get("name")
            .and_then(|value| value.as_str())
            .unwrap_or("");
        if !rpc::is_operation(name) {
            return jsonrpc_error(
                id,
                METHOD_NOT_FOUND,
                &format!("unknown tool: {name}"),
                json!({ "kind": "unknown_operation" }),
            );
        }
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let text_mode = text_mode_from_args(&arguments);
        match self.run(name, arguments) {
            Ok(result) => jsonrpc_result(id, call_result_ok(result, text_mode)),
            Err(GraphError::NotInitialized) => {
                graph_error_response(id, &GraphError::NotInitialized)
            }
            Err(err) => jsonrpc_result(id, call_result_error(&err, text_mode)),
        }
    }

    fn run(&self, method: &str, params: Value) -> Result<Value, GraphError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(GraphError::NotInitialized);
        }
        let snapshot = self.service.snapshot();
        let deadline = Deadline::after(self.request_timeout);
        let result = rpc::dispatch(&snapshot, method, params, &deadline);
        if let Err(err) = &result {
            tracing::debug!(method, code = err.code(), "operation failed: {err}");
        }
        result
    }
}

fn initialize_result(params: &Value) -> Value {
    let protocol = params
        .get("protocolVersion")
        .cloned()
        .unwrap_or_else(|| Value::String(DEFAULT_PROTOCOL_VERSION.to_string()));
    json!({
        "protocolVersion": protocol,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": {
            "name": "codegraph",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "instructions": "Call-graph index of the Python and Rust code in one repository. Use \
find to locate symbols, navigate to see callers and callees around one function, impact to \
list everything that depends on a function, and status for index counts. Functions may be \
named by bare name, Class.method, or module.Class.method; an ambiguous name returns its \
candidates.",
    })
}

fn call_result_ok(result: Value, text_mode: TextMode) -> Value {
    let content = match format_text(&result, text_mode) {
        Some(text) => vec![json!({ "type": "text", "text": text })],
        None => Vec::new(),
    };
    json!({
        "content": content,
        "structuredContent": result,
        "isError": false
    })
}

fn call_result_error(err: &GraphError, text_mode: TextMode) -> Value {
    let content = match text_mode {
        TextMode::None => Vec::new(),
        _ => vec![json!({ "type": "text", "text": err.to_string() })],
    };
    json!({
        "content": content,
        "structuredContent": { "error": rpc::error_object(err) },
        "isError": true
    })
}

fn format_text(value: &Value, text_mode: TextMode) -> Option<String> {
    match text_mode {
        TextMode::None => None,
        TextMode::Compact => serde_json::to_string(value).ok(),
        TextMode::Pretty => serde_json::to_string_pretty(value).ok(),
    }
}

fn text_mode_from_args(arguments: &Value) -> TextMode {
    match arguments.get("text_mode").and_then(|value| value.as_str()) {
        Some("none") => TextMode::None,
        Some("compact") => TextMode::Compact,
        _ => TextMode::Pretty,
    }
}

pub fn jsonrpc_result(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn jsonrpc_error(id: Value, code: i64, message: &str, data: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message,
            "data": data
        }
    })
}

pub fn graph_error_response(id: Value, err: &GraphError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": rpc::error_object(err)
    })
}

pub fn parse_error_response(err: &serde_json::Error) -> Value {
    jsonrpc_error(
        Value::Null,
        PARSE_ERROR,
        &format!("parse error: {err}"),
        json!({ "kind": "invalid_json" }),
    )
}
