//! Command Validation and Execution
//!
//! The two halves of the `shell_exec` pipeline:
//!
//! - `validator.rs`: policy engine deciding whether a command may run
//! - `executor.rs`: child process execution with timeout, cancellation and
//!   output capture
//! - `lexer.rs`: metacharacter detection and tokenizing shared by both
//! - `timeout.rs`: deadline and cancellation scope
//! - `identity.rs`: run-as user resolution
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcp_shell::audit::AuditLog;
//! use mcp_shell::config::SecurityConfig;
//! use mcp_shell::tools::{CommandExecutor, CommandPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(SecurityConfig {
//!         enabled: true,
//!         allowed_executables: vec!["echo".to_string()],
//!         ..Default::default()
//!     });
//!     let audit = AuditLog::new(config.audit_log);
//!
//!     let policy = CommandPolicy::new(&config, audit)?;
//!     policy.validate("echo hello")?;
//!
//!     let executor = CommandExecutor::new(config, audit);
//!     let result = executor.execute(&CancellationToken::new(), "echo hello", false).await?;
//!     println!("Exit code: {}", result.exit_code);
//!     println!("Stdout: {}", result.stdout);
//!
//!     Ok(())
//! }
//! ```

mod executor;
mod identity;
mod lexer;
mod timeout;
mod validator;

#[cfg(test)]
mod proptests;

pub use executor::{CommandExecutor, ExecutionError, ExecutionResult, ExecutionStatus, SecurityInfo};
pub use identity::{Identity, IdentityError, IdentityResolver, SystemIdentity};
pub use lexer::{
    contains_dangerous_constructs, contains_shell_metacharacters, parse_command, tokenize,
    ParseError, ParsedCommand, DANGEROUS_CONSTRUCTS, SHELL_METACHARACTERS,
};
pub use timeout::{ExecutionScope, ExecutionTimeout, Interrupted};
pub use validator::{
    matches_executable, resolve_executable, CommandPolicy, PolicyDenial, ValidationMode,
};
