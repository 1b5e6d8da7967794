//! MCP (Model Context Protocol) Server
//!
//! A small, dependency-light MCP server built directly on Tokio and Serde.
//!
//! 1. **Protocol Layer** (`protocol`): JSON-RPC 2.0 message types
//! 2. **Server Layer** (`server`): stdio framing, dispatch and per-call
//!    cancellation

pub mod protocol;
pub mod server;

pub use protocol::{
    McpError, McpMethod, McpRequest, McpResponse, RequestId, ServerInfo, Tool, ToolCallParams,
    ToolCallResult, ToolContent,
};
pub use server::McpServer;
