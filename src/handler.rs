//! `shell_exec` Tool Handler
//!
//! Glue between an MCP tool call and the command pipeline: argument
//! extraction, policy check, execution and result rendering. Every failure is
//! turned into a tool error result so a bad call never takes the server down.

use crate::audit::AuditLog;
use crate::config::SecurityConfig;
use crate::mcp::protocol::{Tool, ToolCallResult};
use crate::tools::{CommandExecutor, CommandPolicy};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name under which the handler is advertised
pub const TOOL_NAME: &str = "shell_exec";

/// A tool the MCP server can dispatch calls to
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Definition returned from `tools/list`
    fn definition(&self) -> Tool;

    /// Run one call; `cancel` fires if the client cancels or the server stops
    async fn call(&self, cancel: CancellationToken, arguments: Value) -> ToolCallResult;
}

/// Handler for `shell_exec`
#[derive(Debug, Clone)]
pub struct ShellHandler {
    policy: CommandPolicy,
    executor: CommandExecutor,
    audit: AuditLog,
}

impl ShellHandler {
    /// Build the policy and executor for a security configuration
    pub fn new(config: Arc<SecurityConfig>) -> Result<Self, regex::Error> {
        let audit = AuditLog::new(config.audit_log);
        let policy = CommandPolicy::new(&config, audit)?;
        let executor = CommandExecutor::new(config, audit);
        Ok(Self::from_parts(policy, executor, audit))
    }

    pub fn from_parts(policy: CommandPolicy, executor: CommandExecutor, audit: AuditLog) -> Self {
        Self {
            policy,
            executor,
            audit,
        }
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    /// Handle one `shell_exec` call
    pub async fn handle(&self, cancel: &CancellationToken, arguments: &Value) -> ToolCallResult {
        let Some(command) = arguments.get("command").and_then(Value::as_str) else {
            error!("Missing command parameter");
            return ToolCallResult::error("Missing 'command' parameter");
        };

        let call_id = Uuid::new_v4();
        info!(%call_id, command, "Received shell command request");
        self.audit.command_requested(call_id, command);

        if let Err(denial) = self.policy.validate(command) {
            warn!(%call_id, command, reason = %denial, "Security validation failed");
            return ToolCallResult::error(format!("Security violation: {}", denial));
        }

        let want_base64 = arguments
            .get("base64")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let result = match self.executor.execute(cancel, command, want_base64).await {
            Ok(result) => result,
            Err(err) => {
                error!(%call_id, command, error = %err, "Command execution failed");
                return ToolCallResult::error(err.to_string());
            }
        };

        match serde_json::to_string(&result) {
            Ok(payload) => {
                debug!(%call_id, command, status = result.status.as_str(), "Request handled successfully");
                ToolCallResult::text(payload)
            }
            Err(err) => {
                error!(%call_id, error = %err, "Failed to marshal response");
                ToolCallResult::error("Failed to marshal result to JSON")
            }
        }
    }
}

#[async_trait]
impl ToolHandler for ShellHandler {
    fn definition(&self) -> Tool {
        Tool {
            name: TOOL_NAME.to_string(),
            description: "Execute shell commands under the configured security policy. Returns \
                          structured JSON with stdout, stderr, exit code and execution status."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Shell command to execute"
                    },
                    "base64": {
                        "type": "boolean",
                        "default": false,
                        "description": "Return stdout/stderr as base64-encoded strings (useful for binary data)"
                    }
                },
                "required": ["command"]
            }),
        }
    }

    async fn call(&self, cancel: CancellationToken, arguments: Value) -> ToolCallResult {
        self.handle(&cancel, &arguments).await
    }
}
