//! MCP Server (stdio)
//!
//! Newline-delimited JSON-RPC 2.0 over any async reader/writer pair. Each
//! `tools/call` runs on its own task with its own cancellation token;
//! `notifications/cancelled` cancels one call and end of input cancels all
//! of them. Responses are funneled through a single writer task so lines
//! never interleave.

use super::protocol::{
    CancelledParams, InitializeResult, McpError, McpMethod, McpRequest, McpResponse, RequestId,
    ServerInfo, Tool, ToolCallParams, JSONRPC_VERSION, PROTOCOL_VERSION,
};
use crate::handler::ToolHandler;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type InFlight = Arc<Mutex<HashMap<RequestId, CancellationToken>>>;

/// MCP server exposing a set of tools
pub struct McpServer {
    info: ServerInfo,
    tools: Vec<(Tool, Arc<dyn ToolHandler>)>,
}

impl McpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: ServerInfo {
                name: name.into(),
                version: version.into(),
            },
            tools: Vec::new(),
        }
    }

    /// Register a tool handler
    pub fn with_tool(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.push((handler.definition(), handler));
        self
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Serve on the process's stdin/stdout until EOF or `shutdown`
    pub async fn serve_stdio(&self, shutdown: CancellationToken) -> Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.serve(stdin, tokio::io::stdout(), shutdown).await
    }

    /// Serve one connection
    ///
    /// Returns after input ends (or `shutdown` fires) and every in-flight
    /// call has been cancelled and drained.
    pub async fn serve<R, W>(&self, reader: R, writer: W, shutdown: CancellationToken) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!(name = %self.info.name, version = %self.info.version, "MCP server started");

        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_responses(writer, rx));

        let root = shutdown.child_token();
        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
        let mut calls = JoinSet::new();
        let mut lines = reader.lines();

        loop {
            let line = tokio::select! {
                _ = root.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "Failed to read from input");
                    break;
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // Reap finished calls so the set does not grow without bound
            while calls.try_join_next().is_some() {}

            let request = match parse_request(line) {
                Ok(request) => request,
                Err(response) => {
                    send(&tx, *response);
                    continue;
                }
            };

            self.dispatch(request, &tx, &root, &in_flight, &mut calls).await;
        }

        root.cancel();
        while calls.join_next().await.is_some() {}

        drop(tx);
        writer_task
            .await
            .context("Response writer task panicked")?
            .context("Failed to write responses")?;

        info!("MCP server stopped");
        Ok(())
    }

    async fn dispatch(
        &self,
        request: McpRequest,
        tx: &mpsc::UnboundedSender<McpResponse>,
        root: &CancellationToken,
        in_flight: &InFlight,
        calls: &mut JoinSet<()>,
    ) {
        let method = McpMethod::from(request.method.as_str());
        debug!(method = method.as_str(), id = ?request.id, "Received request");

        match (method, request.id) {
            (McpMethod::Initialized, _) => debug!("Client initialized"),

            (McpMethod::Cancelled, _) => {
                let params = request
                    .params
                    .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok());
                match params {
                    Some(params) => {
                        if let Some(token) = in_flight.lock().await.remove(&params.request_id) {
                            info!(request_id = %params.request_id, reason = ?params.reason, "Cancelling request");
                            token.cancel();
                        }
                    }
                    None => warn!("Ignoring malformed cancellation notification"),
                }
            }

            (McpMethod::Initialize, Some(id)) => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: json!({ "tools": { "listChanged": false } }),
                    server_info: self.info.clone(),
                };
                respond(tx, id, serde_json::to_value(result));
            }

            (McpMethod::Ping, Some(id)) => send(tx, McpResponse::ok(id, json!({}))),

            (McpMethod::ToolsList, Some(id)) => {
                let tools: Vec<&Tool> = self.tools.iter().map(|(tool, _)| tool).collect();
                send(tx, McpResponse::ok(id, json!({ "tools": tools })));
            }

            (McpMethod::ToolsCall, Some(id)) => {
                let params = match request
                    .params
                    .map(serde_json::from_value::<ToolCallParams>)
                {
                    Some(Ok(params)) => params,
                    _ => {
                        send(
                            tx,
                            McpResponse::err(Some(id), McpError::invalid_params("Invalid tools/call params")),
                        );
                        return;
                    }
                };

                let Some(handler) = self.handler(&params.name) else {
                    send(
                        tx,
                        McpResponse::err(
                            Some(id),
                            McpError::invalid_params(format!("Unknown tool: {}", params.name)),
                        ),
                    );
                    return;
                };

                let token = root.child_token();
                in_flight.lock().await.insert(id.clone(), token.clone());

                let tx = tx.clone();
                let in_flight = Arc::clone(in_flight);
                calls.spawn(async move {
                    let result = handler.call(token, params.arguments).await;

                    // Entry already gone means the client cancelled this call
                    if in_flight.lock().await.remove(&id).is_none() {
                        debug!(%id, "Dropping response for cancelled request");
                        return;
                    }
                    respond(&tx, id, serde_json::to_value(result));
                });
            }

            (McpMethod::Unknown(name), Some(id)) => {
                warn!(method = %name, "Unknown method");
                send(tx, McpResponse::err(Some(id), McpError::method_not_found(name)));
            }

            (method, None) => debug!(method = method.as_str(), "Ignoring notification"),
        }
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools
            .iter()
            .find(|(tool, _)| tool.name == name)
            .map(|(_, handler)| Arc::clone(handler))
    }
}

/// Parse one input line, or produce the error response for it
fn parse_request(line: &str) -> std::result::Result<McpRequest, Box<McpResponse>> {
    let value: Value = serde_json::from_str(line).map_err(|err| {
        warn!(error = %err, "Received invalid JSON");
        Box::new(McpResponse::err(None, McpError::parse_error(format!("Parse error: {}", err))))
    })?;

    let id = value
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

    let request: McpRequest = serde_json::from_value(value).map_err(|err| {
        Box::new(McpResponse::err(
            id.clone(),
            McpError::invalid_request(format!("Invalid request: {}", err)),
        ))
    })?;

    if request.jsonrpc != JSONRPC_VERSION {
        return Err(Box::new(McpResponse::err(
            id,
            McpError::invalid_request(format!("Unsupported jsonrpc version: {}", request.jsonrpc)),
        )));
    }

    Ok(request)
}

fn respond(tx: &mpsc::UnboundedSender<McpResponse>, id: RequestId, result: serde_json::Result<Value>) {
    let response = match result {
        Ok(value) => McpResponse::ok(id, value),
        Err(err) => McpResponse::err(Some(id), McpError::internal_error(err.to_string())),
    };
    send(tx, response);
}

fn send(tx: &mpsc::UnboundedSender<McpResponse>, response: McpResponse) {
    if tx.send(response).is_err() {
        debug!("Response writer closed, dropping response");
    }
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<McpResponse>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_string(&response).context("Failed to serialize response")?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
