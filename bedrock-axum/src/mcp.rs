//! Model Context Protocol over HTTP: a JSON-RPC 2.0 endpoint at `/mcp`
//! exposing the tools registered by features.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bedrock_core::AppError;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::RequestContext;
use crate::state::AppState;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the `arguments` object.
    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, state: &AppState, ctx: &RequestContext, arguments: Value) -> anyhow::Result<Value>;
}

type ToolFn = Arc<dyn Fn(AppState, RequestContext, Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A tool backed by a closure.
pub struct FnTool {
    name: String,
    description: String,
    schema: Value,
    f: ToolFn,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(AppState, RequestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema: json!({ "type": "object", "properties": {} }),
            f: Arc::new(move |state, ctx, args| Box::pin(f(state, ctx, args))),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn call(&self, state: &AppState, ctx: &RequestContext, arguments: Value) -> anyhow::Result<Value> {
        (self.f)(state.clone(), ctx.clone(), arguments).await
    }
}

/// Tools by name, listed in name order.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    /// False when a tool with the same name is already present.
    pub fn insert(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return false;
        }
        self.tools.insert(name, tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn definitions(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "inputSchema": t.input_schema(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

fn result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message.into() } })
}

/// The `/mcp` POST handler for a fixed tool set.
pub fn handler(
    tools: ToolSet,
) -> impl Fn(State<AppState>, RequestContext, Bytes) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static {
    let tools = Arc::new(tools);
    move |State(state): State<AppState>, ctx: RequestContext, body: Bytes| {
        let tools = Arc::clone(&tools);
        Box::pin(async move { dispatch(&state, &ctx, &tools, &body).await })
    }
}

pub async fn dispatch(state: &AppState, ctx: &RequestContext, tools: &ToolSet, body: &[u8]) -> Response {
    let request: RpcRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return Json(rpc_error(Value::Null, PARSE_ERROR, format!("parse error: {e}"))).into_response(),
    };
    if request.jsonrpc.as_deref() != Some("2.0") {
        let id = request.id.unwrap_or(Value::Null);
        return Json(rpc_error(id, INVALID_REQUEST, "jsonrpc must be \"2.0\"")).into_response();
    }

    // Notifications carry no id and get no body.
    let Some(id) = request.id else {
        tracing::debug!(method = %request.method, "mcp notification");
        return StatusCode::ACCEPTED.into_response();
    };

    tracing::debug!(method = %request.method, request_id = %ctx.request_id, "mcp request");
    let reply = match request.method.as_str() {
        "initialize" => result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": state.config().get_or(bedrock_core::config::keys::APP_NAME, "bedrock"),
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        ),
        "ping" => result(id, json!({})),
        "tools/list" => result(id, json!({ "tools": tools.definitions() })),
        "tools/call" => call_tool(state, ctx, tools, id, &request.params).await,
        other => rpc_error(id, METHOD_NOT_FOUND, format!("method not found: {other}")),
    };
    Json(reply).into_response()
}

async fn call_tool(state: &AppState, ctx: &RequestContext, tools: &ToolSet, id: Value, params: &Value) -> Value {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return rpc_error(id, INVALID_PARAMS, "missing tool name");
    };
    let Some(tool) = tools.get(name) else {
        return rpc_error(id, INVALID_PARAMS, format!("unknown tool: {name}"));
    };
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match tool.call(state, ctx, arguments).await {
        Ok(value) => {
            let text = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            result(
                id,
                json!({
                    "content": [{ "type": "text", "text": text }],
                    "structuredContent": value,
                    "isError": false,
                }),
            )
        }
        Err(e) => {
            let app = AppError::normalize(e);
            if app.kind.is_technical() {
                tracing::error!(tool = name, error = ?app, "tool failed");
            }
            let safe = app.sanitize_for_client();
            result(
                id,
                json!({
                    "content": [{ "type": "text", "text": safe.message }],
                    "isError": true,
                }),
            )
        }
    }
}
