//! mcp-shell
//!
//! An MCP server exposing a single `shell_exec` tool. Every command passes a
//! policy engine before it is run, either directly (secure mode) or through
//! `bash -c` (legacy mode), under a timeout, an output limit and optional
//! working-directory and identity confinement.

pub mod audit;
pub mod config;
pub mod handler;
pub mod logging;
pub mod mcp;
pub mod tools;
