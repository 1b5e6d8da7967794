//! Audit Event Stream
//!
//! Audit events are ordinary `tracing` events on the `audit` target so they
//! can be routed or filtered (`RUST_LOG=audit=info`) like any other log line.
//! An [`AuditLog`] is handed to the policy engine, the executor and the
//! handler at construction; there is no process-wide audit state.

use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Audit context shared by the command pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditLog {
    enabled: bool,
}

impl AuditLog {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// An audit log that records nothing
    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// A tool call asked to run `command`
    pub fn command_requested(&self, call_id: Uuid, command: &str) {
        if self.enabled {
            info!(target: "audit", event = "command_requested", %call_id, command, "Command execution requested");
        }
    }

    /// Validation was skipped because security is disabled
    pub fn policy_bypassed(&self, command: &str) {
        if self.enabled {
            info!(target: "audit", event = "policy_bypassed", command, "Security disabled, command allowed without validation");
        }
    }

    /// The policy engine allowed `command` under `mode`
    pub fn command_allowed(&self, command: &str, mode: &str) {
        if self.enabled {
            info!(target: "audit", event = "command_allowed", command, mode, "Command passed validation");
        }
    }

    /// The policy engine denied `command`
    pub fn command_denied(&self, command: &str, reason: &str) {
        if self.enabled {
            info!(target: "audit", event = "command_denied", command, reason, "Command denied");
        }
    }

    /// The child process finished and a result was produced
    pub fn command_completed(&self, command: &str, status: &str, exit_code: i32, elapsed: Duration) {
        if self.enabled {
            info!(
                target: "audit",
                event = "command_completed",
                command,
                status,
                exit_code,
                elapsed_ms = elapsed.as_millis() as u64,
                "Command completed"
            );
        }
    }

    /// Execution failed without producing a result
    pub fn command_failed(&self, command: &str, error: &str) {
        if self.enabled {
            info!(target: "audit", event = "command_failed", command, error, "Command execution failed");
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(true)
    }
}
